//! Dynamic debounce duration.
//!
//! The window stretches for short openers (people often follow them
//! with an audio note), for long pending buffers, and for chatty
//! bursts; high focus clamps it back down so engaged users get fast
//! replies.

use std::time::Duration;

use rand::Rng;

use charla_humanizer::reading_time;

use crate::focus::{FOCUS_HIGH, FOCUS_MEDIUM};

/// Messages shorter than this get the sticky-wait pad.
const SHORT_MESSAGE_CHARS: usize = 50;
const SHORT_MESSAGE_PAD: Duration = Duration::from_secs(5);
/// "Reaching for the record button" pad applied to every window.
const RECORD_BUTTON_PAD: Duration = Duration::from_secs(2);
/// Past this many fragments the chat is a burst; stretch the window.
const FRAGMENT_THRESHOLD: u32 = 3;
const FRAGMENT_MULTIPLIER: f64 = 1.5;
/// Uniform variance applied to the final window.
const VARIANCE: f64 = 0.15;

const HIGH_FOCUS_CLAMP: Duration = Duration::from_millis(1_500);
const MEDIUM_FOCUS_CLAMP: Duration = Duration::from_millis(3_000);

/// Compute the debounce window.
///
/// `jitter` is the variance factor in `[-VARIANCE, VARIANCE]`; callers
/// pass [`draw_jitter`] in production and a constant in tests.
pub fn debounce_duration(
    base: Duration,
    last_message: &str,
    buffer: &[String],
    fragment_count: u32,
    focus: u8,
    jitter: f64,
) -> Duration {
    let mut window = base;

    if last_message.chars().count() < SHORT_MESSAGE_CHARS {
        window += SHORT_MESSAGE_PAD;
    }

    let pending = buffer.join("\n");
    window = window.max(reading_time(&pending));
    window += RECORD_BUTTON_PAD;

    if fragment_count > FRAGMENT_THRESHOLD {
        window = window.mul_f64(FRAGMENT_MULTIPLIER);
    }

    window = window.mul_f64(1.0 + jitter.clamp(-VARIANCE, VARIANCE));

    if focus >= FOCUS_HIGH {
        window = window.min(HIGH_FOCUS_CLAMP);
    } else if focus >= FOCUS_MEDIUM {
        window = window.min(MEDIUM_FOCUS_CLAMP);
    }
    window
}

pub fn draw_jitter() -> f64 {
    rand::thread_rng().gen_range(-VARIANCE..=VARIANCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(2);

    #[test]
    fn short_opener_gets_padded() {
        let short = debounce_duration(BASE, "hola", &[], 1, 0, 0.0);
        assert_eq!(short, Duration::from_secs(9)); // 2 + 5 + 2

        let long_msg = "x".repeat(60);
        let long = debounce_duration(BASE, &long_msg, &[], 1, 0, 0.0);
        assert_eq!(long, Duration::from_secs(4)); // 2 + 2
    }

    #[test]
    fn reading_time_can_dominate_base() {
        // 200 chars -> 5 s reading, beats the 2 s base.
        let buffer = vec!["y".repeat(200)];
        let msg = "z".repeat(60);
        let window = debounce_duration(BASE, &msg, &buffer, 1, 0, 0.0);
        assert_eq!(window, Duration::from_secs(7)); // 5 + 2
    }

    #[test]
    fn burst_multiplier_applies_past_three_fragments() {
        let msg = "x".repeat(60);
        let normal = debounce_duration(BASE, &msg, &[], 3, 0, 0.0);
        let burst = debounce_duration(BASE, &msg, &[], 4, 0, 0.0);
        assert_eq!(burst, normal.mul_f64(1.5));
    }

    #[test]
    fn focus_clamps_down() {
        let high = debounce_duration(BASE, "hola", &[], 1, FOCUS_HIGH, 0.0);
        assert_eq!(high, Duration::from_millis(1_500));

        let medium = debounce_duration(BASE, "hola", &[], 1, FOCUS_MEDIUM, 0.0);
        assert_eq!(medium, Duration::from_millis(3_000));
    }

    #[test]
    fn jitter_stays_within_variance() {
        let msg = "x".repeat(60);
        let center = debounce_duration(BASE, &msg, &[], 1, 0, 0.0).as_millis() as i64;
        let low = debounce_duration(BASE, &msg, &[], 1, 0, -1.0).as_millis() as i64;
        let high = debounce_duration(BASE, &msg, &[], 1, 0, 1.0).as_millis() as i64;
        // Out-of-range factors clamp to ±15 %.
        assert!((low - (center as f64 * 0.85) as i64).abs() <= 1);
        assert!((high - (center as f64 * 1.15) as i64).abs() <= 1);

        for _ in 0..50 {
            let drawn = draw_jitter();
            assert!((-VARIANCE..=VARIANCE).contains(&drawn));
        }
    }
}
