//! 跨服务边界：assistant → writer
//!
//! assistant 进程不持有任何数据库句柄，所有读写都走 writer 的 HTTP 面；
//! WriterBoundary 把这条边界抽成 trait，测试里可用进程内实现替换。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AssistantError;
use crate::store::{SessionSnapshot, SessionTotals};

/// writer 对一次执行的应答
#[derive(Debug, Clone, Deserialize)]
pub struct WriterReply {
    pub message: String,
    #[serde(default)]
    pub redirect_target: Option<i64>,
    #[serde(default)]
    pub totals: Option<SessionTotals>,
}

/// assistant 可见的 writer 能力：取会话快照、原子执行一个动作
#[async_trait]
pub trait WriterBoundary: Send + Sync {
    /// 按 id 或标题片段取快照；失败时调用方降级（无上下文继续解析）
    async fn fetch_context(&self, reference: &str) -> Result<SessionSnapshot, AssistantError>;

    /// 转发已过第一道校验的动作；writer 侧再跑第二道并事务执行
    async fn execute(&self, action: &Value) -> Result<WriterReply, AssistantError>;
}

/// 生产实现：reqwest 访问 writer 的 HTTP 面
pub struct HttpWriterClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpWriterClient {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Result<Self, AssistantError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AssistantError::WriterUnavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireReply {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    redirect_target: Option<i64>,
    #[serde(default)]
    totals: Option<SessionTotals>,
}

#[async_trait]
impl WriterBoundary for HttpWriterClient {
    async fn fetch_context(&self, reference: &str) -> Result<SessionSnapshot, AssistantError> {
        let url = format!("{}/api/context/{}", self.base_url, reference);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AssistantError::WriterUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AssistantError::WriterRejected(format!(
                "context fetch failed with status {}",
                response.status()
            )));
        }
        response
            .json::<SessionSnapshot>()
            .await
            .map_err(|e| AssistantError::WriterUnavailable(e.to_string()))
    }

    async fn execute(&self, action: &Value) -> Result<WriterReply, AssistantError> {
        let url = format!("{}/api/execute", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(action)
            .send()
            .await
            .map_err(|e| AssistantError::WriterUnavailable(e.to_string()))?;

        let reply = response
            .json::<WireReply>()
            .await
            .map_err(|e| AssistantError::WriterUnavailable(e.to_string()))?;

        if !reply.ok {
            return Err(AssistantError::WriterRejected(reply.message));
        }
        Ok(WriterReply {
            message: reply.message,
            redirect_target: reply.redirect_target,
            totals: reply.totals,
        })
    }
}
