//! HTTP surface tests against an isolated runtime (in-memory databases,
//! stub provider, no channel adapters).

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use charla_agent::provider::{AIProvider, ChatRequest, ChatResponse};
use charla_bots::{Bot, Capabilities, Provider};
use charla_channels::ChannelManager;
use charla_core::{CharlaConfig, CharlaError, UsageStats};
use charla_gateway::{build_router, AppState};

struct EchoProvider;

#[async_trait]
impl AIProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }
    async fn chat(&self, _bot: &Bot, _req: &ChatRequest) -> Result<ChatResponse, CharlaError> {
        Ok(ChatResponse {
            text: "respuesta".to_string(),
            tool_calls: vec![],
            raw_content: serde_json::json!([{ "type": "text", "text": "respuesta" }]),
            usage: UsageStats::default(),
        })
    }
}

fn test_config() -> CharlaConfig {
    let mut config = CharlaConfig::default();
    config.database.path = ":memory:".to_string();
    config.engine.typing_enabled = false;
    config
}

fn sample_bot(id: &str) -> Bot {
    Bot {
        id: id.into(),
        name: "Ventas".into(),
        provider: Provider::Gemini,
        model: "gemini-2.0-flash".into(),
        capabilities: Capabilities::default(),
        system_prompt: "Eres un asistente.".into(),
        knowledge_base: String::new(),
        api_key: None,
        credential_id: None,
        chatwoot_credential_id: None,
        allowed_chats: vec![],
        created_at: String::new(),
        updated_at: String::new(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn webhook_simple_reply() {
    let state = AppState::build(
        test_config(),
        Arc::new(EchoProvider),
        ChannelManager::new(),
    )
    .unwrap();
    state.bots.save_bot(&sample_bot("bot-1")).unwrap();
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::post("/bots/bot-1/webhook")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"memory_id":"m1","input":"  hola  "}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["code"], "SUCCESS");
    assert_eq!(body["results"]["bot_id"], "bot-1");
    assert_eq!(body["results"]["memory_id"], "m1");
    assert_eq!(body["results"]["input"], "hola");
    assert_eq!(body["results"]["reply"], "respuesta");
}

#[tokio::test]
async fn webhook_unknown_bot_is_404() {
    let state = AppState::build(
        test_config(),
        Arc::new(EchoProvider),
        ChannelManager::new(),
    )
    .unwrap();
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::post("/bots/ghost/webhook")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"memory_id":"m1","input":"hola"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn webhook_queue_full_is_429() {
    let mut config = test_config();
    config.pools.bot_webhook_pool_size = 1;
    config.pools.bot_webhook_queue_size = 1;
    let state = AppState::build(config, Arc::new(EchoProvider), ChannelManager::new()).unwrap();
    state.bots.save_bot(&sample_bot("bot-1")).unwrap();

    // Occupy the only worker, then fill its single queue slot.
    let pool = state.webhook_pool.clone().unwrap();
    pool.try_dispatch(charla_pool::Job::new("bot-1", "m1", async {
        std::future::pending::<()>().await;
        Ok(())
    }))
    .unwrap();
    for _ in 0..100 {
        if pool.stats().active_workers == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    pool.try_dispatch(charla_pool::Job::new("bot-1", "m1", async { Ok(()) }))
        .unwrap();

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::post("/bots/bot-1/webhook")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"memory_id":"m1","input":"hola"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["code"], "TOO_MANY_REQUESTS");
}

#[tokio::test]
async fn pool_stats_shape() {
    let state = AppState::build(
        test_config(),
        Arc::new(EchoProvider),
        ChannelManager::new(),
    )
    .unwrap();
    let router = build_router(state);

    for path in ["/api/worker-pool/stats", "/api/bot-webhook-pool/stats"] {
        let response = router
            .clone()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["num_workers"].as_u64().unwrap() >= 1);
        assert!(body.get("total_dispatched").is_some());
        assert!(body.get("worker_stats").unwrap().is_array());
        assert!(body.get("active_chats").unwrap().is_object());
    }
}

#[tokio::test]
async fn chatwoot_route_is_inert_when_capture_disabled() {
    let state = AppState::build(
        test_config(),
        Arc::new(EchoProvider),
        ChannelManager::new(),
    )
    .unwrap();
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::post("/instances/wa-main/chatwoot/webhook")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"event":"message_created"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
