//! Chatwoot-style helpdesk mirror.
//!
//! Every inbound user message and outbound bot reply is posted into the
//! linked helpdesk conversation so human agents see the full thread.
//! Mirroring is fire-and-forget: failures are logged, never propagated.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

/// One configured helpdesk account.
pub struct HelpdeskMirror {
    http: reqwest::Client,
    base_url: String,
    account_id: String,
    token: String,
}

impl HelpdeskMirror {
    pub fn new(base_url: String, account_id: String, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id,
            token,
        }
    }

    /// Mirror an inbound user message (`incoming`) or a bot reply
    /// (`outgoing`) into the conversation for `source_id`.
    pub async fn mirror(&self, source_id: &str, text: &str, outgoing: bool) {
        let url = format!(
            "{}/api/v1/accounts/{}/conversations/{}/messages",
            self.base_url, self.account_id, source_id
        );
        let body = json!({
            "content": text,
            "message_type": if outgoing { "outgoing" } else { "incoming" },
            "private": false,
            // Marks our own traffic so the webhook filter can skip it.
            "content_attributes": { "from_bot": outgoing },
        });

        let outcome = self
            .http
            .post(&url)
            .header("api_access_token", &self.token)
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match outcome {
            Ok(response) if response.status().is_success() => {
                debug!(source_id, outgoing, "helpdesk mirror ok");
            }
            Ok(response) => {
                warn!(source_id, status = %response.status(), "helpdesk mirror rejected");
            }
            Err(e) => {
                warn!(source_id, error = %e, "helpdesk mirror failed");
            }
        }
    }
}
