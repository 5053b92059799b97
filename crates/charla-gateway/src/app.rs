use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use charla_agent::executor::ConversationExecutor;
use charla_agent::provider::AIProvider;
use charla_agent::tools::end_chat::EndChatTool;
use charla_agent::{LogEventSink, NativeToolRegistry};
use charla_bots::BotRepository;
use charla_channels::{ChannelManager, OutboundMessage};
use charla_core::{CharlaConfig, SecretBox};
use charla_mcp::{LogHealthSink, McpGateway};
use charla_pool::{PoolMonitor, WorkerPool};
use charla_scheduler::{PostSender, PostStore, ScheduledPost, SchedulerEngine};
use charla_sessions::orchestrator::OrchestratorConfig;
use charla_sessions::SessionOrchestrator;
use charla_store::{MemoryStore, SessionStore};

use crate::helpdesk::HelpdeskMirror;
use crate::processor::MessageProcessor;

/// Pool names used by the stats endpoints.
pub const MESSAGE_POOL: &str = "worker-pool";
pub const WEBHOOK_POOL: &str = "bot-webhook-pool";

/// The runtime container. Everything is built here and injected
/// explicitly — no process globals — so tests construct isolated
/// runtimes with in-memory backends.
pub struct AppState {
    pub config: CharlaConfig,
    pub crypto: Arc<SecretBox>,
    pub store: Arc<dyn SessionStore>,
    pub bots: Arc<BotRepository>,
    pub mcp: Arc<McpGateway>,
    pub orchestrator: Arc<SessionOrchestrator>,
    pub processor: Arc<MessageProcessor>,
    pub monitor: Arc<PoolMonitor>,
    pub message_pool: Arc<WorkerPool>,
    pub webhook_pool: Option<Arc<WorkerPool>>,
    pub posts: Arc<PostStore>,
    pub scheduler: Arc<SchedulerEngine>,
    shutdown: watch::Sender<bool>,
}

/// Routes scheduled posts through the registered channel adapters.
struct ChannelPostSender {
    channels: Arc<ChannelManager>,
}

#[async_trait]
impl PostSender for ChannelPostSender {
    async fn send_post(&self, post: &ScheduledPost) -> Result<(), String> {
        let adapter = self
            .channels
            .get(&post.channel_id)
            .ok_or_else(|| format!("no adapter for channel {}", post.channel_id))?;
        adapter
            .send(&OutboundMessage::text(
                &post.channel_id,
                &post.target_id,
                &post.text,
            ))
            .await
            .map_err(|e| e.to_string())
    }
}

impl AppState {
    /// Build the full runtime. The AI provider and the channel set are
    /// the two external collaborators and arrive pre-built.
    pub fn build(
        config: CharlaConfig,
        provider: Arc<dyn AIProvider>,
        channels: ChannelManager,
    ) -> anyhow::Result<Arc<Self>> {
        let crypto = Arc::new(SecretBox::new(&config.security.secret_key));

        let bots_conn = rusqlite::Connection::open(&config.database.path)?;
        let bots = Arc::new(BotRepository::new(bots_conn, crypto.clone())?);

        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        MemoryStore::spawn_sweeper(store.clone());
        let store_dyn: Arc<dyn SessionStore> = store.clone();

        let mcp = Arc::new(McpGateway::new(
            bots.clone(),
            Arc::new(LogHealthSink),
            config.mcp.allow_insecure_http,
        ));

        let mut native = NativeToolRegistry::new();
        native.register(Arc::new(EndChatTool));
        let executor = Arc::new(ConversationExecutor::new(
            provider.clone(),
            mcp.clone(),
            Some(Arc::new(native)),
            Arc::new(LogEventSink),
        ));

        let orchestrator = SessionOrchestrator::new(
            store_dyn.clone(),
            OrchestratorConfig {
                base_debounce: std::time::Duration::from_millis(config.engine.debounce_ms),
                warning_after: std::time::Duration::from_millis(config.engine.wait_contact_idle_ms),
                immediate_read_window: std::time::Duration::from_secs(
                    config.engine.immediate_read_window_secs,
                ),
                max_history: config.engine.max_history,
                ..OrchestratorConfig::default()
            },
        );

        let message_pool = Arc::new(WorkerPool::new(
            MESSAGE_POOL,
            config.pools.message_pool_size,
            config.pools.message_queue_size,
        ));
        let webhook_pool = Arc::new(WorkerPool::new(
            WEBHOOK_POOL,
            config.pools.bot_webhook_pool_size,
            config.pools.bot_webhook_queue_size,
        ));
        let monitor = Arc::new(PoolMonitor::new());
        monitor.register(message_pool.clone());
        monitor.register(webhook_pool.clone());

        let helpdesk = match (&config.helpdesk.base_url, &config.helpdesk.token) {
            (Some(base), Some(token)) => Some(Arc::new(HelpdeskMirror::new(
                base.clone(),
                config
                    .helpdesk
                    .account_id
                    .clone()
                    .unwrap_or_else(|| "1".to_string()),
                token.clone(),
            ))),
            _ => None,
        };

        let channels = Arc::new(channels);
        let processor = MessageProcessor::new(
            config.clone(),
            bots.clone(),
            provider,
            executor,
            orchestrator.clone(),
            channels.clone(),
            message_pool.clone(),
            helpdesk,
        );
        orchestrator.set_events(processor.clone());

        let posts_conn = rusqlite::Connection::open(&config.database.path)?;
        let posts = Arc::new(PostStore::new(posts_conn)?);
        let scheduler = Arc::new(SchedulerEngine::new(
            posts.clone(),
            store_dyn.clone(),
            Arc::new(ChannelPostSender {
                channels: channels.clone(),
            }),
        ));

        let (shutdown, _) = watch::channel(false);

        info!("runtime container built");
        Ok(Arc::new(Self {
            config,
            crypto,
            store: store_dyn,
            bots,
            mcp,
            orchestrator,
            processor,
            monitor,
            message_pool,
            webhook_pool: Some(webhook_pool),
            posts,
            scheduler,
            shutdown,
        }))
    }

    /// Subscribe to the process shutdown broadcast.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Cooperative shutdown: stop admissions, cancel typing, close MCP.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.processor.begin_shutdown();
        self.orchestrator.shutdown();
        self.monitor.shutdown_all().await;
        self.mcp.shutdown();
        info!("runtime shut down");
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/bots/{id}/webhook", post(crate::http::webhook::bot_webhook))
        .route(
            "/api/worker-pool/stats",
            get(crate::http::stats::worker_pool_stats),
        )
        .route(
            "/api/bot-webhook-pool/stats",
            get(crate::http::stats::webhook_pool_stats),
        )
        .route(
            "/instances/{id}/chatwoot/webhook",
            post(crate::http::chatwoot::chatwoot_webhook),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
