//! Message processor: the glue between the orchestrator, the executor,
//! the humanizer and the channel adapters.
//!
//! Implements the orchestrator's `SessionEvents` collaborator: flushes
//! become worker-pool jobs pinned to their chat, replies come back
//! through the typing simulation, and session state is folded back in
//! under the sliding TTL.

use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use charla_agent::executor::{BotInput, ConversationExecutor, FinalAction};
use charla_agent::prompt::{self, DynamicContext};
use charla_agent::multimodal::enrich_input;
use charla_agent::provider::AIProvider;
use charla_bots::{BotRepository, BotsError};
use charla_channels::{ChannelAdapter, ChannelManager, OutboundMessage, PresenceController};
use charla_core::tz;
use charla_core::{CharlaConfig, CharlaError, ClientContext};
use charla_humanizer::{simulate_typing, split_bubbles, TypingProfile};
use charla_pool::{Job, PoolError, WorkerPool};
use charla_sessions::orchestrator::{Arrival, FlushJob};
use charla_sessions::{focus, SessionEntry, SessionEvents, SessionKey, SessionOrchestrator};

use crate::helpdesk::HelpdeskMirror;

/// A typing-on signal older than this no longer defers the flush.
const TYPING_STICKY: Duration = Duration::from_secs(10);

pub struct MessageProcessor {
    config: CharlaConfig,
    bots: Arc<BotRepository>,
    provider: Arc<dyn AIProvider>,
    executor: Arc<ConversationExecutor>,
    orchestrator: Arc<SessionOrchestrator>,
    channels: Arc<ChannelManager>,
    message_pool: Arc<WorkerPool>,
    helpdesk: Option<Arc<HelpdeskMirror>>,
    /// channel id → bot id assignment.
    bot_routes: DashMap<String, String>,
    /// sender id → resolved profile, cached by the CRUD surface.
    clients: DashMap<String, ClientContext>,
    /// session key → last typing-on instant (sticky typing flag).
    typing: DashMap<String, Instant>,
    presence: DashMap<String, Arc<PresenceController>>,
    /// Ambient cancellation: flips on shutdown, aborts typing mid-sleep.
    shutdown: CancellationToken,
    /// Needed to move an owned handle into pool jobs.
    self_ref: OnceLock<Weak<MessageProcessor>>,
}

impl MessageProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CharlaConfig,
        bots: Arc<BotRepository>,
        provider: Arc<dyn AIProvider>,
        executor: Arc<ConversationExecutor>,
        orchestrator: Arc<SessionOrchestrator>,
        channels: Arc<ChannelManager>,
        message_pool: Arc<WorkerPool>,
        helpdesk: Option<Arc<HelpdeskMirror>>,
    ) -> Arc<Self> {
        let processor = Arc::new(Self {
            config,
            bots,
            provider,
            executor,
            orchestrator,
            channels,
            message_pool,
            helpdesk,
            bot_routes: DashMap::new(),
            clients: DashMap::new(),
            typing: DashMap::new(),
            presence: DashMap::new(),
            shutdown: CancellationToken::new(),
            self_ref: OnceLock::new(),
        });
        let _ = processor.self_ref.set(Arc::downgrade(&processor));
        processor
    }

    /// Assign a bot to a channel instance.
    pub fn assign_bot(&self, channel_id: &str, bot_id: &str) {
        self.bot_routes
            .insert(channel_id.to_string(), bot_id.to_string());
    }

    /// Cache a resolved client profile.
    pub fn upsert_client(&self, context: ClientContext) {
        self.clients.insert(context.id.clone(), context);
    }

    pub fn register_presence(&self, channel_id: &str, presence: Arc<PresenceController>) {
        self.presence.insert(channel_id.to_string(), presence);
    }

    /// Adapter lookup for the HTTP surface.
    pub fn channel(&self, channel_id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.channels.get(channel_id)
    }

    /// Sticky typing flag, fed by transport/helpdesk typing events.
    pub fn set_typing(&self, key: &SessionKey, typing: bool) {
        if typing {
            self.typing.insert(key.format(), Instant::now());
        } else {
            self.typing.remove(&key.format());
        }
    }

    /// Cancels in-flight typing simulations; new flushes still run so
    /// queued work can drain before the pools stop.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Transport entry point: feed one inbound message to the
    /// orchestrator (presence bookkeeping included).
    pub async fn handle_transport_message(
        &self,
        arrival: Arrival,
    ) -> Result<(), CharlaError> {
        let presence = self
            .presence
            .get(&arrival.key.channel_id)
            .map(|p| p.value().clone());
        if let Some(presence) = presence {
            presence.record_activity().await;
        }
        self.orchestrator
            .handle_inbound(arrival)
            .await
            .map_err(|e| CharlaError::Internal(e.to_string()))
    }

    /// Bot-webhook entry point: synchronous request/reply without the
    /// debounce machinery, but with the same executor and memory.
    pub async fn process_webhook(
        &self,
        bot_id: &str,
        memory_id: &str,
        input: &str,
    ) -> Result<String, CharlaError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CharlaError::Validation("input must not be empty".into()));
        }
        if memory_id.trim().is_empty() {
            return Err(CharlaError::Validation("memory_id must not be empty".into()));
        }
        let bot = self.bots.get_bot(bot_id).map_err(bots_error)?;

        let key = SessionKey::new("bot-webhook", bot_id, memory_id);
        let mut entry = self
            .orchestrator
            .get(&key)
            .await
            .map_err(|e| CharlaError::Internal(e.to_string()))?
            .unwrap_or_else(|| SessionEntry::new(key.clone(), self.config.engine.max_history));

        let client = ClientContext {
            id: memory_id.to_string(),
            ..Default::default()
        };
        let offset = tz::resolve(None, None, &self.config.engine.timezone);
        let guidelines = self.mcp_guidelines(&bot.id);

        let outcome = self
            .executor
            .execute(BotInput {
                system_stable: prompt::stable_block(
                    &self.config.engine.global_system_prompt,
                    &bot,
                    &client,
                    &guidelines,
                ),
                system_dynamic: prompt::dynamic_block(&DynamicContext {
                    now: Utc::now(),
                    offset,
                    client: &client,
                    focus: entry.focus,
                    pending_tasks: &entry.tasks,
                    language: entry.language.as_deref(),
                }),
                bot,
                client,
                session_key: key.format(),
                text: input.to_string(),
                history: entry.history.clone(),
                timezone: offset.to_string(),
            })
            .await?;

        for turn in outcome.transcript {
            entry.push_history(turn);
        }
        if outcome.final_action == FinalAction::Terminate {
            self.orchestrator.terminate(&key).await;
        } else {
            self.orchestrator
                .save(&mut entry)
                .await
                .map_err(|e| CharlaError::Internal(e.to_string()))?;
        }
        Ok(outcome.reply)
    }

    /// Worker-pool handler for one flushed composite message.
    pub async fn process_flush(self: Arc<Self>, job: FlushJob) -> Result<(), CharlaError> {
        let key = job.key.clone();
        debug!(key = %key, chars = job.text.len(), media = job.media.len(), "processing flush");

        let Some(bot_id) = self.bot_routes.get(&key.channel_id).map(|r| r.value().clone()) else {
            warn!(channel = %key.channel_id, "no bot assigned to channel, dropping flush");
            self.orchestrator.terminate(&key).await;
            return Ok(());
        };
        let bot = self.bots.get_bot(&bot_id).map_err(bots_error)?;
        if !bot.chat_allowed(&key.chat_id) {
            debug!(key = %key, "chat not in bot allow-list, dropping");
            self.orchestrator.terminate(&key).await;
            return Ok(());
        }

        let client = self
            .clients
            .get(&key.sender_id)
            .map(|c| c.value().clone())
            .unwrap_or_else(|| ClientContext {
                id: key.sender_id.clone(),
                ..Default::default()
            });

        let adapter = self.channels.get(&key.channel_id);
        let presence = self.presence.get(&key.channel_id).map(|p| p.value().clone());
        if let Some(presence) = presence {
            presence.record_activity().await;
        }

        // Mirror the user's side before anything can fail.
        self.mirror(&key, &job.text, false);

        let entry = self
            .orchestrator
            .get(&key)
            .await
            .map_err(|e| CharlaError::Internal(e.to_string()))?
            .unwrap_or_else(|| SessionEntry::new(key.clone(), self.config.engine.max_history));

        let channel_tz = adapter.as_ref().and_then(|a| a.timezone());
        let offset = tz::resolve(
            client.timezone.as_deref(),
            channel_tz.as_deref(),
            &self.config.engine.timezone,
        );

        let (enriched, media_usage) = enrich_input(
            &job.text,
            &job.media,
            &entry.resources,
            &bot,
            self.provider.as_multimodal(),
        )
        .await;
        if !media_usage.is_empty() {
            debug!(key = %key, tokens = media_usage.input_tokens, "media analysis usage");
        }

        let guidelines = self.mcp_guidelines(&bot.id);
        let execution = self
            .executor
            .execute(BotInput {
                system_stable: prompt::stable_block(
                    &self.config.engine.global_system_prompt,
                    &bot,
                    &client,
                    &guidelines,
                ),
                system_dynamic: prompt::dynamic_block(&DynamicContext {
                    now: Utc::now(),
                    offset,
                    client: &client,
                    focus: entry.focus,
                    pending_tasks: &entry.tasks,
                    language: entry.language.as_deref(),
                }),
                bot: bot.clone(),
                client: client.clone(),
                session_key: key.format(),
                text: enriched,
                history: entry.history.clone(),
                timezone: offset.to_string(),
            })
            .await;
        let outcome = match execution {
            Ok(outcome) => outcome,
            Err(e) => {
                // The conversation is not retried, but the session must
                // not wedge in Processing: park it in Waiting so its
                // expiry timers run.
                let _ = self.orchestrator.finish_processing(&key, |_| {}).await;
                return Err(e);
            }
        };

        for cost in &outcome.costs {
            info!(
                bot_id = %cost.bot_id, model = %cost.model,
                input_tokens = cost.usage.input_tokens,
                output_tokens = cost.usage.output_tokens,
                cost_usd = cost.usage.cost_usd,
                "execution cost"
            );
        }

        let bubble_count = if outcome.reply.trim().is_empty() {
            0
        } else {
            self.deliver_reply(&key, &outcome.reply, adapter.as_deref())
                .await?
        };

        // The outgoing side mirrors even when the transport send failed.
        if !outcome.reply.trim().is_empty() {
            self.mirror(&key, &outcome.reply, true);
        }

        match outcome.final_action {
            FinalAction::Terminate => {
                info!(key = %key, "session terminated by the model");
                self.orchestrator.terminate(&key).await;
            }
            FinalAction::Continue => {
                let transcript = outcome.transcript;
                let mindset = outcome.mindset;
                self.orchestrator
                    .finish_processing(&key, move |entry| {
                        for turn in transcript {
                            entry.push_history(turn);
                        }
                        if let Some(mindset) = mindset {
                            entry.focus =
                                focus::apply(entry.focus, focus::mindset_adjustment(&mindset));
                            match mindset.work.as_deref() {
                                Some("none") | None => entry.tasks.clear(),
                                Some(work) => entry.tasks = vec![work.to_string()],
                            }
                            entry.last_mindset = Some(mindset);
                        }
                        entry.last_bubble_count = bubble_count as u8;
                    })
                    .await
                    .map_err(|e| CharlaError::Internal(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Split into bubbles, simulate typing, send. Transport errors are
    /// logged (the mirror still records the attempt); cancellation
    /// aborts mid-typing.
    async fn deliver_reply(
        &self,
        key: &SessionKey,
        reply: &str,
        adapter: Option<&dyn ChannelAdapter>,
    ) -> Result<usize, CharlaError> {
        let Some(adapter) = adapter else {
            warn!(channel = %key.channel_id, "no adapter for channel, reply dropped");
            return Ok(0);
        };

        let bubbles = {
            let mut rng = rand::thread_rng();
            split_bubbles(reply, &mut rng)
        };

        let typing_enabled = self.config.engine.typing_enabled;
        if typing_enabled {
            let _ = adapter.send_typing(&key.chat_id, true).await;
        }

        for bubble in &bubbles {
            if typing_enabled {
                simulate_typing(bubble, &TypingProfile::DEFAULT, &self.shutdown).await?;
            }
            let outbound = OutboundMessage::text(&key.channel_id, &key.chat_id, bubble);
            if let Err(e) = adapter.send(&outbound).await {
                warn!(key = %key, error = %e, "bubble send failed");
            }
        }

        if typing_enabled {
            let _ = adapter.send_typing(&key.chat_id, false).await;
        }
        Ok(bubbles.len())
    }

    fn mirror(&self, key: &SessionKey, text: &str, outgoing: bool) {
        let Some(helpdesk) = self.helpdesk.clone() else {
            return;
        };
        if text.trim().is_empty() {
            return;
        }
        let source = key.chat_id.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            helpdesk.mirror(&source, &text, outgoing).await;
        });
    }

    /// Merged per-server and per-bot tool instructions for the prompt.
    fn mcp_guidelines(&self, bot_id: &str) -> Vec<String> {
        let mut guidelines = Vec::new();
        let Ok(server_ids) = self.bots.enabled_server_ids(bot_id) else {
            return guidelines;
        };
        for server_id in server_ids {
            if let Ok(server) = self.bots.get_server(&server_id) {
                if let Some(instructions) = server.instructions.filter(|i| !i.trim().is_empty()) {
                    guidelines.push(instructions);
                }
            }
            if let Ok(Some(config)) = self.bots.get_bot_config(bot_id, &server_id) {
                if let Some(instructions) = config.instructions.filter(|i| !i.trim().is_empty()) {
                    guidelines.push(instructions);
                }
            }
        }
        guidelines
    }
}

#[async_trait]
impl SessionEvents for MessageProcessor {
    fn dispatch_flush(&self, job: FlushJob) -> Result<(), CharlaError> {
        let me = self
            .self_ref
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| CharlaError::Internal("processor not wired".into()))?;

        let instance = job.key.channel_id.clone();
        let chat = job.key.chat_id.clone();
        self.message_pool
            .try_dispatch(Job::new(instance, chat, async move {
                me.process_flush(job).await
            }))
            .map_err(|e| match e {
                PoolError::QueueFull { pool, .. } => CharlaError::AdmissionRejected { pool },
                PoolError::ShutDown { .. } => CharlaError::Cancelled,
            })
    }

    async fn on_inactivity_warning(&self, key: &SessionKey) {
        // Channel-specific nudges hang off this hook; the engine only
        // records the fact.
        info!(key = %key, "inactivity warning");
    }

    async fn on_channel_idle(&self, channel_id: &str) {
        debug!(channel = %channel_id, "channel idle");
    }

    async fn on_cleanup_files(&self, entry: &SessionEntry) {
        for resource in entry.resources.values() {
            if let Err(e) = tokio::fs::remove_file(&resource.path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %resource.path.display(), error = %e, "resource cleanup failed");
                }
            }
        }
    }

    fn is_typing(&self, key: &SessionKey) -> bool {
        self.typing
            .get(&key.format())
            .map(|started| started.elapsed() < TYPING_STICKY)
            .unwrap_or(false)
    }

    async fn mark_read(&self, key: &SessionKey, message_ids: &[String]) {
        if let Some(adapter) = self.channels.get(&key.channel_id) {
            if let Err(e) = adapter.mark_read(&key.chat_id, message_ids).await {
                debug!(key = %key, error = %e, "mark read failed");
            }
        }
    }
}

fn bots_error(e: BotsError) -> CharlaError {
    match e {
        BotsError::NotFound { entity, id } => CharlaError::NotFound { entity, id },
        BotsError::Validation(msg) => CharlaError::Validation(msg),
        other => CharlaError::Database(other.to_string()),
    }
}
