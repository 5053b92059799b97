use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Per-invocation cost accounting returned by AI providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub system_tokens: u64,
    pub cached_tokens: u64,
    pub cost_usd: f64,
}

impl UsageStats {
    pub fn add(&mut self, other: &UsageStats) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.system_tokens = self.system_tokens.saturating_add(other.system_tokens);
        self.cached_tokens = self.cached_tokens.saturating_add(other.cached_tokens);
        self.cost_usd += other.cost_usd;
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.system_tokens == 0
    }
}

/// Summed usage per (bot, model) pair across one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCost {
    pub bot_id: String,
    pub model: String,
    pub usage: UsageStats,
}

/// Per-client profile injected into prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientContext {
    pub id: String,
    pub display_name: Option<String>,
    pub country: Option<String>,
    /// Fixed-offset timezone string, e.g. "+02:00".
    pub timezone: Option<String>,
    pub language: Option<String>,
    pub registered: bool,
    /// Testers see unredacted tool traffic in execution events.
    pub tester: bool,
    pub custom_system_prompt: Option<String>,
}

/// Lifecycle of an attachment inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaState {
    /// Sent to the provider's multimodal endpoint and annotated inline.
    Analyzed,
    /// Kept on disk; listed as an available resource for on-demand analysis.
    Available,
    /// Rejected by capability flags or policy; listed as blocked.
    Blocked,
}

/// One attachment accumulated in the debounce buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    pub mime: String,
    pub filename: String,
    pub state: MediaState,
}

impl MediaItem {
    /// Coarse modality bucket derived from the MIME type, used for
    /// `[Audio 1]`-style annotation labels.
    pub fn kind(&self) -> &'static str {
        let mime = self.mime.as_str();
        if mime.starts_with("audio/") {
            "Audio"
        } else if mime.starts_with("image/") {
            "Image"
        } else if mime.starts_with("video/") {
            "Video"
        } else {
            "Document"
        }
    }
}

/// Friendly-named file tracked in a session's resource index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRef {
    pub path: PathBuf,
    pub mime: String,
    /// SHA-256 of the content, hex-encoded.
    pub hash: String,
}

impl ResourceRef {
    /// Index entry for freshly downloaded content.
    pub fn new(path: PathBuf, mime: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path,
            mime: mime.into(),
            hash: content_hash(bytes),
        }
    }
}

/// Hex SHA-256, used to de-duplicate session resources.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hidden marker the model emits on every reply:
/// `<mindset pace="fast" focus="true" work="ordering" />`.
///
/// Drives focus scoring and downstream UX; stripped from the visible
/// reply before it is humanized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mindset {
    pub pace: Option<String>,
    pub focus: Option<bool>,
    pub work: Option<String>,
}

/// Extract and strip the first mindset tag from model output.
///
/// Returns the cleaned text and the parsed tag, if present. Malformed
/// tags are stripped but yield `None` rather than failing the reply.
pub fn extract_mindset(text: &str) -> (String, Option<Mindset>) {
    let Some(start) = text.find("<mindset") else {
        return (text.to_string(), None);
    };
    let Some(end_rel) = text[start..].find("/>") else {
        return (text.to_string(), None);
    };
    let end = start + end_rel + 2;

    let tag_body = &text[start + "<mindset".len()..end - 2];
    let mindset = parse_mindset_attrs(tag_body);

    let mut cleaned = String::with_capacity(text.len());
    cleaned.push_str(text[..start].trim_end());
    let tail = text[end..].trim_start();
    if !cleaned.is_empty() && !tail.is_empty() {
        cleaned.push('\n');
    }
    cleaned.push_str(tail);
    (cleaned, mindset)
}

fn parse_mindset_attrs(body: &str) -> Option<Mindset> {
    let mut mindset = Mindset::default();
    let mut rest = body.trim();
    let mut any = false;

    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim();
        let after = &rest[eq + 1..];
        let after = after.strip_prefix('"')?;
        let close = after.find('"')?;
        let value = &after[..close];

        match key {
            "pace" => mindset.pace = Some(value.to_string()),
            "focus" => mindset.focus = Some(value == "true"),
            "work" => mindset.work = Some(value.to_string()),
            _ => {}
        }
        any = true;
        rest = after[close + 1..].trim_start();
    }

    if any {
        Some(mindset)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = UsageStats::default();
        total.add(&UsageStats {
            input_tokens: 100,
            output_tokens: 20,
            system_tokens: 5,
            cached_tokens: 80,
            cost_usd: 0.002,
        });
        total.add(&UsageStats {
            input_tokens: 50,
            output_tokens: 10,
            ..Default::default()
        });
        assert_eq!(total.input_tokens, 150);
        assert_eq!(total.output_tokens, 30);
        assert_eq!(total.cached_tokens, 80);
    }

    #[test]
    fn media_kind_buckets() {
        let item = |mime: &str| MediaItem {
            data: vec![],
            mime: mime.to_string(),
            filename: "f".to_string(),
            state: MediaState::Analyzed,
        };
        assert_eq!(item("audio/ogg").kind(), "Audio");
        assert_eq!(item("image/jpeg").kind(), "Image");
        assert_eq!(item("video/mp4").kind(), "Video");
        assert_eq!(item("application/pdf").kind(), "Document");
    }

    #[test]
    fn resource_hash_is_stable_hex() {
        let a = content_hash(b"catalogo.pdf contents");
        let b = content_hash(b"catalogo.pdf contents");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash(b"other"));
    }

    #[test]
    fn mindset_is_extracted_and_stripped() {
        let (clean, mindset) = extract_mindset(
            "Claro, te ayudo.\n<mindset pace=\"fast\" focus=\"true\" work=\"pedido\" />",
        );
        assert_eq!(clean, "Claro, te ayudo.");
        let mindset = mindset.expect("tag should parse");
        assert_eq!(mindset.pace.as_deref(), Some("fast"));
        assert_eq!(mindset.focus, Some(true));
        assert_eq!(mindset.work.as_deref(), Some("pedido"));
    }

    #[test]
    fn text_without_tag_passes_through() {
        let (clean, mindset) = extract_mindset("hola");
        assert_eq!(clean, "hola");
        assert!(mindset.is_none());
    }

    #[test]
    fn malformed_tag_is_stripped_without_panic() {
        let (clean, mindset) = extract_mindset("ok <mindset pace=fast />");
        assert_eq!(clean, "ok");
        assert!(mindset.is_none());
    }
}
