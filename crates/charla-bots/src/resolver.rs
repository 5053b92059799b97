//! API-key resolution with the documented fallback chain:
//! bot key → linked credential → global provider-specific key →
//! global generic key.

use tracing::debug;

use charla_core::config::ProvidersConfig;

use crate::repo::BotRepository;
use crate::types::{Bot, Provider};

/// Resolve the effective API key for a bot, or `None` when nothing in
/// the chain yields one.
pub fn resolve_api_key(
    repo: &BotRepository,
    bot: &Bot,
    providers: &ProvidersConfig,
) -> Option<String> {
    if let Some(key) = bot.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        return Some(key.to_string());
    }

    if let Some(cred_id) = &bot.credential_id {
        match repo.get_credential(cred_id) {
            Ok(cred) => {
                if let Some(key) = cred.secret("api_key").filter(|k| !k.trim().is_empty()) {
                    return Some(key.to_string());
                }
            }
            Err(e) => {
                debug!(bot_id = %bot.id, credential_id = %cred_id, error = %e,
                    "credential lookup failed, continuing fallback chain");
            }
        }
    }

    let provider_key = match bot.provider {
        Provider::Gemini => providers.gemini_api_key.as_deref(),
        Provider::OpenAi => providers.openai_api_key.as_deref(),
        Provider::Claude => providers.claude_api_key.as_deref(),
        Provider::Ai => None,
    };
    if let Some(key) = provider_key.filter(|k| !k.trim().is_empty()) {
        return Some(key.to_string());
    }

    providers
        .ai_api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .map(String::from)
}
