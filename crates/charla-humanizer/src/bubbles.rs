//! Message bubble splitting.
//!
//! Long replies read more naturally as a few consecutive messages.
//! Splitting every reply is its own tell, so 30 % of the time the text
//! goes out whole.

use rand::Rng;

/// Hard cap on bubbles per reply. Excess paragraphs are merged into
/// the last bubble.
pub const MAX_BUBBLES: usize = 3;

/// Paragraphs longer than this are further split into sentences.
const LONG_PARAGRAPH: usize = 600;

/// Chance of skipping the split entirely.
const UNSPLIT_PROB: f64 = 0.30;

/// Split a reply into at most [`MAX_BUBBLES`] bubbles.
pub fn split_bubbles(text: &str, rng: &mut impl Rng) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if rng.gen_bool(UNSPLIT_PROB) {
        return vec![text.to_string()];
    }

    let mut parts: Vec<String> = Vec::new();
    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.chars().count() > LONG_PARAGRAPH {
            parts.extend(split_sentences(paragraph));
        } else {
            parts.push(paragraph.to_string());
        }
    }

    cap_bubbles(parts)
}

/// Split on `.?!` runs followed by whitespace, keeping the punctuation.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '?' | '!') {
            // Absorb punctuation runs like "?!" or "...".
            while let Some(&next) = chars.peek() {
                if matches!(next, '.' | '?' | '!') {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if chars.peek().map(|n| n.is_whitespace()).unwrap_or(false) {
                sentences.push(current.trim().to_string());
                current.clear();
            }
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn cap_bubbles(mut parts: Vec<String>) -> Vec<String> {
    if parts.len() > MAX_BUBBLES {
        let overflow = parts.split_off(MAX_BUBBLES - 1);
        parts.push(overflow.join("\n\n"));
    }
    parts
}

#[cfg(test)]
mod tests {
    use rand::rngs::mock::StepRng;
    use rand::SeedableRng;

    use super::*;

    /// StepRng::new(u64::MAX / 2, 0) makes gen_bool(0.30) return false,
    /// so the split path is always taken.
    fn splitting_rng() -> StepRng {
        StepRng::new(u64::MAX / 2, 0)
    }

    #[test]
    fn short_text_is_one_bubble() {
        let bubbles = split_bubbles("hola", &mut splitting_rng());
        assert_eq!(bubbles, vec!["hola".to_string()]);
    }

    #[test]
    fn paragraphs_become_bubbles() {
        let bubbles = split_bubbles("primero\n\nsegundo\n\ntercero", &mut splitting_rng());
        assert_eq!(bubbles, vec!["primero", "segundo", "tercero"]);
    }

    #[test]
    fn never_more_than_three_bubbles() {
        let text = (0..10)
            .map(|i| format!("párrafo {i}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let bubbles = split_bubbles(&text, &mut splitting_rng());
        assert_eq!(bubbles.len(), MAX_BUBBLES);
        // Everything survives the merge.
        assert!(bubbles[2].contains("párrafo 9"));
    }

    #[test]
    fn cap_holds_for_arbitrary_seeds() {
        let text = "¡Hola! ¿Cómo estás? Muy bien.\n\n".repeat(8);
        for seed in 0..64u64 {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let bubbles = split_bubbles(&text, &mut rng);
            assert!(!bubbles.is_empty());
            assert!(bubbles.len() <= MAX_BUBBLES);
        }
    }

    #[test]
    fn long_paragraph_splits_into_sentences() {
        let long = format!(
            "{} Fin de la primera. ¿Segunda pregunta? Tercera frase va aquí.",
            "palabra ".repeat(90)
        );
        assert!(long.chars().count() > 600);
        let bubbles = split_bubbles(&long, &mut splitting_rng());
        assert!(bubbles.len() > 1);
        assert!(bubbles.len() <= MAX_BUBBLES);
    }

    #[test]
    fn empty_text_yields_no_bubbles() {
        assert!(split_bubbles("   ", &mut splitting_rng()).is_empty());
    }
}
