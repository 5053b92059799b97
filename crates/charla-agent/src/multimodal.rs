//! Multimodal interpretation: turns accumulated attachments into
//! textual context the model can reason over.
//!
//! Analyzed items go to the provider's multimodal endpoint and come
//! back as numbered annotations. Available/Blocked items are only
//! listed, so the model can request on-demand analysis later.

use std::collections::HashMap;

use tracing::warn;

use charla_bots::Bot;
use charla_core::types::ResourceRef;
use charla_core::{MediaItem, MediaState, UsageStats};

use crate::provider::MultimodalInterpreter;

/// Enrich the user's text with annotations for every attachment.
///
/// Returns the enriched text plus the usage spent on analysis calls.
pub async fn enrich_input(
    text: &str,
    media: &[MediaItem],
    resources: &HashMap<String, ResourceRef>,
    bot: &Bot,
    interpreter: Option<&dyn MultimodalInterpreter>,
) -> (String, UsageStats) {
    let mut enriched = text.to_string();
    let mut usage = UsageStats::default();
    let mut counters: HashMap<&'static str, u32> = HashMap::new();

    for item in media {
        let kind = item.kind();
        let n = counters.entry(kind).or_insert(0);
        *n += 1;
        let label = format!("[{kind} {n}]");
        let name = friendly_name(resources, &item.filename);

        match item.state {
            MediaState::Analyzed => {
                let annotation = match interpreter {
                    Some(interpreter) => {
                        match interpreter.analyze(bot, item, "describe the content").await {
                            Ok(analysis) => {
                                usage.add(&analysis.usage);
                                analysis.text
                            }
                            Err(e) => {
                                warn!(file = %item.filename, error = %e, "media analysis failed");
                                format!("analysis failed: {e}")
                            }
                        }
                    }
                    None => "analysis unavailable for this bot".to_string(),
                };
                push_line(&mut enriched, &format!("{label} {annotation}"));
            }
            MediaState::Available => {
                push_line(&mut enriched, &format!("[RESOURCE AVAILABLE: {name}]"));
            }
            MediaState::Blocked => {
                push_line(&mut enriched, &format!("[RESOURCE BLOCKED: {name}]"));
            }
        }
    }

    (enriched, usage)
}

/// The session resource index maps friendly names to files; when an
/// attachment matches an indexed file, the friendly name wins over the
/// raw filename.
fn friendly_name(resources: &HashMap<String, ResourceRef>, filename: &str) -> String {
    for (name, resource) in resources {
        let matches = resource
            .path
            .file_name()
            .map(|f| f.to_string_lossy() == filename)
            .unwrap_or(false);
        if matches {
            return name.clone();
        }
    }
    filename.to_string()
}

fn push_line(text: &mut String, line: &str) {
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(line);
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use charla_bots::{Capabilities, Provider};
    use charla_core::CharlaError;

    use super::*;
    use crate::provider::Analysis;

    struct EchoInterpreter;

    #[async_trait]
    impl MultimodalInterpreter for EchoInterpreter {
        async fn analyze(
            &self,
            _bot: &Bot,
            media: &MediaItem,
            _intent: &str,
        ) -> Result<Analysis, CharlaError> {
            Ok(Analysis {
                text: format!("contents of {}", media.filename),
                usage: UsageStats {
                    input_tokens: 7,
                    ..Default::default()
                },
            })
        }
    }

    fn bot() -> Bot {
        Bot {
            id: "b".into(),
            name: "b".into(),
            provider: Provider::Gemini,
            model: "m".into(),
            capabilities: Capabilities::default(),
            system_prompt: String::new(),
            knowledge_base: String::new(),
            api_key: None,
            credential_id: None,
            chatwoot_credential_id: None,
            allowed_chats: vec![],
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn item(filename: &str, mime: &str, state: MediaState) -> MediaItem {
        MediaItem {
            data: vec![1, 2, 3],
            mime: mime.into(),
            filename: filename.into(),
            state,
        }
    }

    #[tokio::test]
    async fn analyzed_items_become_numbered_annotations() {
        let media = vec![
            item("voz.ogg", "audio/ogg", MediaState::Analyzed),
            item("foto.jpg", "image/jpeg", MediaState::Analyzed),
            item("voz2.ogg", "audio/ogg", MediaState::Analyzed),
        ];
        let (text, usage) = enrich_input(
            "mira esto",
            &media,
            &HashMap::new(),
            &bot(),
            Some(&EchoInterpreter),
        )
        .await;

        assert!(text.starts_with("mira esto\n"));
        assert!(text.contains("[Audio 1] contents of voz.ogg"));
        assert!(text.contains("[Image 1] contents of foto.jpg"));
        assert!(text.contains("[Audio 2] contents of voz2.ogg"));
        assert_eq!(usage.input_tokens, 21);
    }

    #[tokio::test]
    async fn available_and_blocked_are_listed_with_friendly_names() {
        let mut resources = HashMap::new();
        resources.insert(
            "catálogo".to_string(),
            ResourceRef {
                path: PathBuf::from("/tmp/session/cat-8f3.pdf"),
                mime: "application/pdf".into(),
                hash: "abc".into(),
            },
        );
        let media = vec![
            item("cat-8f3.pdf", "application/pdf", MediaState::Available),
            item("malware.exe", "application/octet-stream", MediaState::Blocked),
        ];
        let (text, _) = enrich_input("", &media, &resources, &bot(), None).await;

        assert!(text.contains("[RESOURCE AVAILABLE: catálogo]"));
        assert!(text.contains("[RESOURCE BLOCKED: malware.exe]"));
    }
}
