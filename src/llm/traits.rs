//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete_structured
//! 接受对话消息与 JSON Schema，要求模型输出受 Schema 约束的单个 JSON 对象。

use async_trait::async_trait;
use serde_json::Value;

use crate::history::ChatMessage;

/// LLM 客户端 trait：Schema 约束的结构化完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 结构化完成：返回模型输出的原始文本（期望为符合 schema 的 JSON）
    async fn complete_structured(
        &self,
        messages: &[ChatMessage],
        schema: &Value,
    ) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
