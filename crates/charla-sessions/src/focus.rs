//! Focus scoring: a 0..100 attention proxy that tightens the debounce
//! window and drives read-receipt policy.

use std::time::Duration;

use charla_core::Mindset;

/// Focus at or above this clamps the debounce window to 1.5 s and
/// triggers immediate read receipts.
pub const FOCUS_HIGH: u8 = 70;
/// Focus at or above this clamps the debounce window to 3.0 s.
pub const FOCUS_MEDIUM: u8 = 40;

/// Score delta for a new arrival while the session was Waiting.
pub fn arrival_adjustment(since_last_reply: Duration, text_len: usize) -> i32 {
    let mut delta = if since_last_reply < Duration::from_secs(60) {
        30
    } else if since_last_reply < Duration::from_secs(300) {
        10
    } else {
        -20
    };

    if text_len > 500 {
        delta += 15;
    } else if text_len > 100 {
        delta += 5;
    }
    delta
}

/// Score delta contributed by the model's mindset tag.
pub fn mindset_adjustment(mindset: &Mindset) -> i32 {
    let mut delta = 0;
    if mindset.focus == Some(true) {
        delta += 25;
    }
    if mindset.pace.as_deref() == Some("fast") {
        delta += 10;
    }
    delta
}

/// Apply a delta, clamping to 0..=100.
pub fn apply(score: u8, delta: i32) -> u8 {
    (score as i32 + delta).clamp(0, 100) as u8
}
