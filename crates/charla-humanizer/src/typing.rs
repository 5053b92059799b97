//! Artificial typing rhythm.
//!
//! The schedule is computed as plain data so it can be tested without
//! sleeping; `simulate_typing` then walks it, yielding to cancellation
//! at every sleep point so a reply can be aborted mid-typing.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use charla_core::CharlaError;

use crate::profile::TypingProfile;

/// Build the per-rune pause schedule for `text`.
pub fn typing_schedule(text: &str, profile: &TypingProfile, rng: &mut impl Rng) -> Vec<Duration> {
    let mut schedule = Vec::with_capacity(text.chars().count());
    let mut words_since_pause: u32 = 0;
    let mut next_thinking_at: u32 =
        rng.gen_range(profile.thinking_every_words.0..=profile.thinking_every_words.1);
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let mut pause =
            Duration::from_millis(rng.gen_range(profile.char_delay_ms.0..=profile.char_delay_ms.1));

        match c {
            '\n' if chars.peek() == Some(&'\n') => {
                chars.next();
                pause += Duration::from_millis(profile.paragraph_pause_ms);
            }
            '\n' => {
                pause += Duration::from_millis(profile.line_pause_ms);
            }
            ',' | ';' | ':' => {
                pause += Duration::from_millis(profile.micro_pause_ms);
            }
            '.' | '?' | '!' => {
                if rng.gen_bool(profile.punctuation_pause_prob) {
                    pause += Duration::from_millis(
                        rng.gen_range(profile.punctuation_pause_ms.0..=profile.punctuation_pause_ms.1),
                    );
                }
            }
            c if is_emoji(c) => {
                pause += Duration::from_millis(profile.emoji_pause_ms);
            }
            ' ' => {
                words_since_pause += 1;
                if words_since_pause >= next_thinking_at {
                    pause += Duration::from_millis(
                        rng.gen_range(profile.thinking_pause_ms.0..=profile.thinking_pause_ms.1),
                    );
                    words_since_pause = 0;
                    next_thinking_at = rng
                        .gen_range(profile.thinking_every_words.0..=profile.thinking_every_words.1);
                }
            }
            _ => {}
        }

        schedule.push(pause);
    }
    schedule
}

/// Walk the schedule for `text`, sleeping each pause.
///
/// Returns `Err(Cancelled)` as soon as `cancel` fires; the caller is
/// expected to stop the composing indicator and drop the reply.
pub async fn simulate_typing(
    text: &str,
    profile: &TypingProfile,
    cancel: &CancellationToken,
) -> Result<Duration, CharlaError> {
    let schedule = {
        let mut rng = rand::thread_rng();
        typing_schedule(text, profile, &mut rng)
    };
    let total: Duration = schedule.iter().sum();
    debug!(profile = profile.name, chars = schedule.len(), total_ms = total.as_millis() as u64,
        "typing simulation");

    for pause in schedule {
        tokio::select! {
            _ = cancel.cancelled() => return Err(CharlaError::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }
    }
    Ok(total)
}

fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F300..=0x1FAFF | 0x2600..=0x27BF | 0x1F000..=0x1F02F | 0xFE00..=0xFE0F)
}

#[cfg(test)]
mod tests {
    use rand::rngs::mock::StepRng;

    use super::*;

    #[test]
    fn one_pause_per_rune() {
        let mut rng = StepRng::new(0, 1);
        let schedule = typing_schedule("hola, ¿qué tal?", &TypingProfile::DEFAULT, &mut rng);
        // "\n\n" collapses two runes into one pause; none here.
        assert_eq!(schedule.len(), "hola, ¿qué tal?".chars().count());
    }

    #[test]
    fn paragraph_break_collapses_and_pauses_longer() {
        let mut rng = StepRng::new(0, 1);
        let profile = TypingProfile::DEFAULT;
        let schedule = typing_schedule("a\n\nb", &profile, &mut rng);
        assert_eq!(schedule.len(), 3);
        let max = schedule.iter().max().unwrap();
        assert!(*max >= Duration::from_millis(profile.paragraph_pause_ms));
    }

    #[test]
    fn every_pause_within_profile_bounds() {
        let mut rng = rand::thread_rng();
        let profile = TypingProfile::FAST;
        let text = "Sí, claro. Llego en 10 minutos, espérame ahí: portón azul.";
        let worst_case = profile.char_delay_ms.1
            + profile.thinking_pause_ms.1
            + profile.punctuation_pause_ms.1
            + profile.paragraph_pause_ms;
        for pause in typing_schedule(text, &profile, &mut rng) {
            assert!(pause >= Duration::from_millis(profile.char_delay_ms.0));
            assert!(pause <= Duration::from_millis(worst_case));
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_mid_typing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = simulate_typing("un texto largo…", &TypingProfile::CASUAL, &cancel).await;
        assert!(matches!(result, Err(CharlaError::Cancelled)));
    }
}
