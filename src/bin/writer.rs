//! Tally Writer - 唯一写入方服务
//!
//! 持有系统里唯一的数据库句柄：只读快照与事务执行都从这里走。
//!
//! 运行方式：
//! ```bash
//! cargo run --bin tally-writer --features server
//! ```

#![cfg(feature = "server")]

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tally::config::load_config;
use tally::contract::ValidateError;
use tally::error::{ExecuteError, StoreError};
use tally::store::{db, fetch_snapshot, Executor, SessionRef};

struct WriterState {
    executor: Executor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).unwrap_or_default();

    let pool = db::open_rw(&cfg.store.db_path).await?;
    db::init_schema(&pool).await?;

    let state = Arc::new(WriterState {
        executor: Executor::new(pool),
    });

    let app = Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/context/:reference", get(api_context))
        .route("/api/execute", post(api_execute))
        .with_state(state);

    let bind = cfg.writer.bind.clone();
    tracing::info!(%bind, db = %cfg.store.db_path.display(), "tally-writer listening");

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /api/context/:reference — 按 id 或标题片段取会话快照
async fn api_context(
    State(state): State<Arc<WriterState>>,
    Path(reference): Path<String>,
) -> (StatusCode, Json<Value>) {
    let session_ref = SessionRef::parse(&reference);
    let mut conn = match state.executor.pool().acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(error = %e, "pool acquire failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "message": "store unavailable"})),
            );
        }
    };
    match fetch_snapshot(&mut *conn, &session_ref).await {
        Ok(snapshot) => match serde_json::to_value(&snapshot) {
            Ok(body) => (StatusCode::OK, Json(body)),
            Err(e) => {
                tracing::error!(error = %e, "snapshot serialization failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"ok": false, "message": "internal error"})),
                )
            }
        },
        Err(StoreError::SessionNotFound(r)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"ok": false, "message": format!("session not found: {r}")})),
        ),
        Err(StoreError::Db(e)) => {
            tracing::error!(error = %e, "context query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "message": "store unavailable"})),
            )
        }
    }
}

/// POST /api/execute — 第二道合同校验 + 事务执行一个动作
async fn api_execute(
    State(state): State<Arc<WriterState>>,
    Json(action): Json<Value>,
) -> (StatusCode, Json<Value>) {
    match state.executor.execute(&action).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "message": outcome.message,
                "redirect_target": outcome.redirect_target,
                "totals": outcome.totals,
            })),
        ),
        Err(e) => {
            let status = match &e {
                ExecuteError::Rejected(ValidateError::Rejected(_))
                | ExecuteError::Rejected(ValidateError::Batch(_)) => StatusCode::UNPROCESSABLE_ENTITY,
                ExecuteError::ReferenceNotFound { .. } => StatusCode::NOT_FOUND,
                ExecuteError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if matches!(e, ExecuteError::Db(_)) {
                tracing::error!(error = %e, "execute failed");
            } else {
                tracing::info!(error = %e, "action refused");
            }
            (status, Json(json!({"ok": false, "message": e.user_message()})))
        }
    }
}
