//! Tally Assistant - Prompt 解析服务
//!
//! 不持有任何数据库句柄：上下文与执行都通过 writer 的 HTTP 面。
//!
//! 运行方式：
//! ```bash
//! cargo run --bin tally-assistant --features server
//! ```

#![cfg(feature = "server")]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tally::assistant::{Assistant, HttpWriterClient, ParseRequest};
use tally::config::load_config;
use tally::error::AssistantError;
use tally::history::{ChatMessage, HistoryManager, Role};
use tally::llm::OpenAiClient;

type SharedAssistant = Arc<Assistant<HttpWriterClient>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).unwrap_or_default();

    let llm = Arc::new(OpenAiClient::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        cfg.llm.api_key.as_deref(),
    ));
    let writer = HttpWriterClient::new(
        &cfg.writer.base_url,
        Duration::from_secs(cfg.writer.timeout_secs),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    let history = HistoryManager::new(
        cfg.history.max_entries,
        cfg.history.max_entry_chars,
        Duration::from_secs(cfg.history.idle_timeout_secs),
    );

    let assistant: SharedAssistant = Arc::new(Assistant::new(
        llm,
        writer,
        history,
        cfg.llm.max_retries,
        Duration::from_secs(cfg.llm.request_timeout_secs),
    ));

    let app = Router::new()
        .route("/ai/health", get(|| async { "OK" }))
        .route("/ai/parse", post(ai_parse))
        .route("/ai/history", get(ai_history))
        .route("/ai/history/append", post(ai_history_append))
        .with_state(assistant);

    let bind = cfg.app.assistant_bind.clone();
    tracing::info!(%bind, model = %cfg.llm.model, writer = %cfg.writer.base_url, "tally-assistant listening");

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// POST /ai/parse — 自然语言 → 动作 → 作答或执行
async fn ai_parse(
    State(assistant): State<SharedAssistant>,
    Json(req): Json<ParseRequest>,
) -> (StatusCode, Json<Value>) {
    match assistant.handle_parse(&req).await {
        Ok(reply) => match serde_json::to_value(&reply) {
            Ok(body) => (StatusCode::OK, Json(body)),
            Err(e) => {
                tracing::error!(error = %e, "reply serialization failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"ok": false, "message": "internal error"})),
                )
            }
        },
        Err(e) => {
            let status = match &e {
                AssistantError::UpstreamUnavailable(_) | AssistantError::WriterUnavailable(_) => {
                    StatusCode::BAD_GATEWAY
                }
                AssistantError::Malformed(_) | AssistantError::WriterRejected(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
            };
            tracing::info!(error = %e, "parse refused");
            (status, Json(json!({"ok": false, "message": e.user_message()})))
        }
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    conversation_id: Option<String>,
}

/// GET /ai/history — 当前对话缓冲的只读快照
async fn ai_history(
    State(assistant): State<SharedAssistant>,
    axum::extract::Query(q): axum::extract::Query<HistoryQuery>,
) -> Json<Value> {
    let conversation_id = q.conversation_id.as_deref().unwrap_or("default");
    let messages = assistant.history_snapshot(conversation_id);
    Json(json!({"ok": true, "messages": messages}))
}

#[derive(Deserialize)]
struct HistoryAppendRequest {
    #[serde(default)]
    conversation_id: Option<String>,
    role: Role,
    content: String,
}

/// POST /ai/history/append — 前端把页面侧产生的消息补进对话历史
async fn ai_history_append(
    State(assistant): State<SharedAssistant>,
    Json(req): Json<HistoryAppendRequest>,
) -> (StatusCode, Json<Value>) {
    let conversation_id = req.conversation_id.as_deref().unwrap_or("default");
    assistant.append_history(
        conversation_id,
        ChatMessage {
            role: req.role,
            content: req.content,
        },
    );
    (StatusCode::OK, Json(json!({"ok": true})))
}
