//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本顺序吐出预置响应，耗尽后回落为 general_inquiry，
//! 便于测试适配层的解析、重试与转发逻辑。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::history::ChatMessage;
use crate::llm::LlmClient;

/// Mock 客户端：每次调用弹出一条脚本响应
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<String>>,
}

impl MockLlmClient {
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete_structured(
        &self,
        _messages: &[ChatMessage],
        _schema: &Value,
    ) -> Result<String, String> {
        let next = self
            .responses
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front();
        Ok(next.unwrap_or_else(|| {
            r#"{"intent": "general_inquiry", "answer": "(mock exhausted)"}"#.to_string()
        }))
    }
}
