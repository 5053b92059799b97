use std::time::Duration;

/// Milliseconds a human needs per character when reading.
const READ_MS_PER_CHAR: u64 = 25;
/// Nobody "reads" longer than this before reacting.
const READ_CAP: Duration = Duration::from_secs(6);

/// Estimated time to read `text`, capped at 6 s.
pub fn reading_time(text: &str) -> Duration {
    let chars = text.chars().count() as u64;
    Duration::from_millis(chars * READ_MS_PER_CHAR).min(READ_CAP)
}
