/// All the knobs of the typing simulation.
///
/// Ranges are inclusive min/max in milliseconds (or words); each draw
/// is uniform within its range so no two replies type identically.
#[derive(Debug, Clone, Copy)]
pub struct TypingProfile {
    pub name: &'static str,
    /// Per-character delay range.
    pub char_delay_ms: (u64, u64),
    /// Insert a thinking pause every N words, N drawn from this range.
    pub thinking_every_words: (u32, u32),
    pub thinking_pause_ms: (u64, u64),
    /// Probability of pausing after sentence-ending punctuation.
    pub punctuation_pause_prob: f64,
    pub punctuation_pause_ms: (u64, u64),
    /// Pause on a blank line (`\n\n`).
    pub paragraph_pause_ms: u64,
    /// Pause on a single line break.
    pub line_pause_ms: u64,
    /// Micro-pause on `,;:`.
    pub micro_pause_ms: u64,
    /// Longer pause when an emoji rune is typed.
    pub emoji_pause_ms: u64,
}

impl TypingProfile {
    /// Balanced profile used unless a bot overrides it.
    pub const DEFAULT: TypingProfile = TypingProfile {
        name: "default",
        char_delay_ms: (8, 18),
        thinking_every_words: (12, 28),
        thinking_pause_ms: (350, 900),
        punctuation_pause_prob: 0.6,
        punctuation_pause_ms: (200, 550),
        paragraph_pause_ms: 700,
        line_pause_ms: 300,
        micro_pause_ms: 90,
        emoji_pause_ms: 260,
    };

    /// Quick typist — short delays, rare pauses.
    pub const FAST: TypingProfile = TypingProfile {
        name: "fast",
        char_delay_ms: (4, 9),
        thinking_every_words: (20, 35),
        thinking_pause_ms: (150, 400),
        punctuation_pause_prob: 0.3,
        punctuation_pause_ms: (100, 250),
        paragraph_pause_ms: 350,
        line_pause_ms: 150,
        micro_pause_ms: 40,
        emoji_pause_ms: 120,
    };

    /// Relaxed conversational cadence with frequent hesitation.
    pub const CASUAL: TypingProfile = TypingProfile {
        name: "casual",
        char_delay_ms: (10, 18),
        thinking_every_words: (12, 20),
        thinking_pause_ms: (500, 1400),
        punctuation_pause_prob: 0.8,
        punctuation_pause_ms: (300, 800),
        paragraph_pause_ms: 1000,
        line_pause_ms: 450,
        micro_pause_ms: 120,
        emoji_pause_ms: 400,
    };

    pub fn by_name(name: &str) -> Option<TypingProfile> {
        match name {
            "default" => Some(Self::DEFAULT),
            "fast" => Some(Self::FAST),
            "casual" => Some(Self::CASUAL),
            _ => None,
        }
    }
}
