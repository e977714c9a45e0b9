//! Prompt → Action 适配层
//!
//! 一次解析的固定流程：入历史 → （可选）取会话上下文 → Schema 约束的
//! 模型调用（限时、有界重试）→ 第一道合同校验 → general_inquiry 就地
//! 作答，变更类意图转发 writer。模型输出在重试预算内仍不合合同时明确
//! 报错，不静默吞掉。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assistant::client::{WriterBoundary, WriterReply};
use crate::assistant::prompts::build_system_prompt;
use crate::contract::{action_schema, validate_action, Action};
use crate::error::AssistantError;
use crate::history::{ChatMessage, HistoryManager};
use crate::llm::LlmClient;
use crate::store::SessionTotals;

/// 解析请求（HTTP 面与测试共用的线格式）
#[derive(Debug, Clone, Deserialize)]
pub struct ParseRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// 调用方自带的历史；非空时本次请求用它替代服务端缓冲
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// 前端已在某个会话页面时带上，供上下文与 session_id 回填
    #[serde(default)]
    pub session_id: Option<i64>,
}

/// 解析应答
#[derive(Debug, Clone, Serialize)]
pub struct ParseReply {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_target: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<SessionTotals>,
}

/// 适配器：模型客户端 + writer 边界 + 多路对话历史
pub struct Assistant<W: WriterBoundary> {
    llm: Arc<dyn LlmClient>,
    writer: W,
    history: Mutex<HistoryManager>,
    max_retries: u32,
    request_timeout: Duration,
}

impl<W: WriterBoundary> Assistant<W> {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        writer: W,
        history: HistoryManager,
        max_retries: u32,
        request_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            writer,
            history: Mutex::new(history),
            max_retries,
            request_timeout,
        }
    }

    /// 外部注入一条历史（HTTP 面的 history/append）
    pub fn append_history(&self, conversation_id: &str, message: ChatMessage) {
        if let Ok(mut manager) = self.history.lock() {
            manager.buffer_mut(conversation_id).push(message);
        }
    }

    /// 当前缓冲的只读快照（HTTP 面的 history 查询）
    pub fn history_snapshot(&self, conversation_id: &str) -> Vec<ChatMessage> {
        match self.history.lock() {
            Ok(mut manager) => manager.buffer_mut(conversation_id).messages().to_vec(),
            Err(_) => Vec::new(),
        }
    }

    /// 主入口：自然语言 → 类型化动作 → 作答或转发执行
    pub async fn handle_parse(&self, req: &ParseRequest) -> Result<ParseReply, AssistantError> {
        let request_id = uuid::Uuid::new_v4();
        let message = req.message.trim();
        if message.is_empty() {
            return Err(AssistantError::Malformed("empty message".into()));
        }
        let conversation_id = req.conversation_id.as_deref().unwrap_or("default");
        tracing::info!(%request_id, conversation_id, "parse started");

        // 上下文获取失败不阻塞解析，降级为无上下文
        let context = match req.session_id {
            Some(id) => match self.writer.fetch_context(&id.to_string()).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(session_id = id, error = %e, "context fetch failed, parsing without it");
                    None
                }
            },
            None => None,
        };

        let transcript = {
            let mut manager = self
                .history
                .lock()
                .map_err(|e| AssistantError::Malformed(e.to_string()))?;
            let buffer = manager.buffer_mut(conversation_id);
            if !req.history.is_empty() {
                // 调用方自带历史时整路替换（同样走封顶与截断）
                buffer.clear();
                for entry in &req.history {
                    buffer.push(entry.clone());
                }
            }
            buffer.push(ChatMessage::user(message));
            buffer.messages().to_vec()
        };

        let mut messages = vec![ChatMessage::system(build_system_prompt(context.as_ref()))];
        messages.extend(transcript);

        let (raw, action) = self.parse_with_retries(&messages, req.session_id).await?;

        let reply = match &action {
            Action::GeneralInquiry { answer } => ParseReply {
                ok: true,
                message: answer.clone(),
                redirect_target: None,
                totals: None,
            },
            _ => {
                let WriterReply {
                    message,
                    redirect_target,
                    totals,
                } = self.writer.execute(&raw).await?;
                ParseReply {
                    ok: true,
                    message,
                    redirect_target,
                    totals,
                }
            }
        };

        if let Ok(mut manager) = self.history.lock() {
            manager
                .buffer_mut(conversation_id)
                .push(ChatMessage::assistant(&reply.message));
        }
        Ok(reply)
    }

    /// 限时模型调用 + 有界重试，返回（回填后的原始 JSON，已校验动作）
    async fn parse_with_retries(
        &self,
        messages: &[ChatMessage],
        session_id: Option<i64>,
    ) -> Result<(Value, Action), AssistantError> {
        let schema = action_schema();
        let mut last_error = AssistantError::UpstreamUnavailable("no attempt made".into());

        for attempt in 0..=self.max_retries {
            let completion = tokio::time::timeout(
                self.request_timeout,
                self.llm.complete_structured(messages, &schema),
            )
            .await;

            let text = match completion {
                Err(_) => {
                    tracing::warn!(attempt, "model call timed out");
                    last_error = AssistantError::UpstreamUnavailable("request timed out".into());
                    continue;
                }
                Ok(Err(e)) => {
                    tracing::warn!(attempt, error = %e, "model call failed");
                    last_error = AssistantError::UpstreamUnavailable(e);
                    continue;
                }
                Ok(Ok(text)) => text,
            };

            let mut raw: Value = match serde_json::from_str(text.trim()) {
                Ok(v @ Value::Object(_)) => v,
                Ok(_) | Err(_) => {
                    tracing::warn!(attempt, "model output is not a JSON object");
                    last_error = AssistantError::Malformed("output is not a JSON object".into());
                    continue;
                }
            };

            backfill_session_id(&mut raw, session_id);

            match validate_action(&raw) {
                Ok(action) => return Ok((raw, action)),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "model output failed contract validation");
                    last_error = AssistantError::Malformed(e.user_message());
                }
            }
        }

        Err(last_error)
    }
}

/// 前端在会话页面时模型常省略 session_id：对编辑类意图从请求回填
fn backfill_session_id(raw: &mut Value, session_id: Option<i64>) {
    let Some(session_id) = session_id else { return };
    let Some(object) = raw.as_object_mut() else { return };
    let is_edit = matches!(
        object.get("intent").and_then(Value::as_str),
        Some("edit_session") | Some("edit_person") | Some("edit_item")
            | Some("edit_session_entities")
    );
    if !is_edit {
        return;
    }
    let missing = match object.get("session_id") {
        None | Some(Value::Null) => true,
        _ => false,
    };
    if missing {
        object.insert("session_id".into(), Value::from(session_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::llm::MockLlmClient;
    use crate::store::SessionSnapshot;

    /// 记录转发的动作，按预设应答
    #[derive(Default)]
    struct RecordingWriter {
        executed: Mutex<Vec<Value>>,
        context_calls: AtomicUsize,
        reject_with: Option<String>,
    }

    #[async_trait]
    impl WriterBoundary for RecordingWriter {
        async fn fetch_context(&self, reference: &str) -> Result<SessionSnapshot, AssistantError> {
            self.context_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SessionSnapshot {
                id: reference.parse().unwrap_or(0),
                title: "Dinner".into(),
                tax: 14.0,
                service: 10.0,
                discount: 0.0,
                created_at: "2026-01-01T00:00:00Z".into(),
                subtotal: 120.0,
                total: 150.48,
                people: vec![],
            })
        }

        async fn execute(&self, action: &Value) -> Result<WriterReply, AssistantError> {
            if let Some(msg) = &self.reject_with {
                return Err(AssistantError::WriterRejected(msg.clone()));
            }
            self.executed.lock().unwrap().push(action.clone());
            Ok(WriterReply {
                message: "✅ done".into(),
                redirect_target: Some(1),
                totals: None,
            })
        }
    }

    fn assistant(
        responses: Vec<&str>,
        writer: RecordingWriter,
    ) -> Assistant<RecordingWriter> {
        Assistant::new(
            Arc::new(MockLlmClient::scripted(responses)),
            writer,
            HistoryManager::new(30, 2000, Duration::from_secs(1800)),
            2,
            Duration::from_secs(5),
        )
    }

    fn request(message: &str, session_id: Option<i64>) -> ParseRequest {
        ParseRequest {
            message: message.into(),
            conversation_id: None,
            history: Vec::new(),
            session_id,
        }
    }

    #[tokio::test]
    async fn general_inquiry_is_answered_without_writer() {
        let writer = RecordingWriter::default();
        let assistant = assistant(
            vec![r#"{"intent": "general_inquiry", "answer": "It splits receipts."}"#],
            writer,
        );
        let reply = assistant
            .handle_parse(&request("what does this app do?", None))
            .await
            .unwrap();
        assert!(reply.ok);
        assert_eq!(reply.message, "It splits receipts.");
        assert_eq!(assistant.writer.executed.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn mutation_is_forwarded_to_writer() {
        let writer = RecordingWriter::default();
        let assistant = assistant(
            vec![
                r#"{"intent": "create_session", "session": {"title": "Dinner"}, "people": [{"name": "Ali"}]}"#,
            ],
            writer,
        );
        let reply = assistant
            .handle_parse(&request("new receipt called Dinner with Ali", None))
            .await
            .unwrap();
        assert!(reply.ok);
        assert_eq!(reply.redirect_target, Some(1));
        let executed = assistant.writer.executed.lock().unwrap();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0]["intent"], "create_session");
    }

    #[tokio::test]
    async fn malformed_output_is_retried_then_recovers() {
        let writer = RecordingWriter::default();
        let assistant = assistant(
            vec![
                "this is not json",
                r#"{"intent": "create_session", "session": {"title": "Dinner"}, "people": []}"#,
                r#"{"intent": "general_inquiry", "answer": "recovered"}"#,
            ],
            writer,
        );
        // 第 1 次非 JSON，第 2 次空 people 被合同拒绝，第 3 次合法
        let reply = assistant
            .handle_parse(&request("hello", None))
            .await
            .unwrap();
        assert_eq!(reply.message, "recovered");
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let writer = RecordingWriter::default();
        let assistant = assistant(vec!["junk", "junk", "junk", "junk"], writer);
        let err = assistant.handle_parse(&request("hello", None)).await.unwrap_err();
        assert!(matches!(err, AssistantError::Malformed(_)));
        assert_eq!(assistant.writer.executed.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn session_id_is_backfilled_for_edit_intents() {
        let writer = RecordingWriter::default();
        let assistant = assistant(
            vec![r#"{"intent": "edit_session", "updates": {"vat": 20}}"#],
            writer,
        );
        let reply = assistant
            .handle_parse(&request("set vat to 20%", Some(7)))
            .await
            .unwrap();
        assert!(reply.ok);
        assert_eq!(assistant.writer.context_calls.load(Ordering::SeqCst), 1);
        let executed = assistant.writer.executed.lock().unwrap();
        assert_eq!(executed[0]["session_id"], json!(7));
    }

    #[tokio::test]
    async fn writer_rejection_surfaces_its_message() {
        let writer = RecordingWriter {
            reject_with: Some("I couldn't find that person (#9).".into()),
            ..Default::default()
        };
        let assistant = assistant(
            vec![
                r#"{"intent": "edit_person", "session_id": 1, "operation": "delete", "person_id": 9}"#,
            ],
            writer,
        );
        let err = assistant
            .handle_parse(&request("remove person 9", None))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "I couldn't find that person (#9).");
    }

    #[tokio::test]
    async fn empty_message_is_rejected_up_front() {
        let writer = RecordingWriter::default();
        let assistant = assistant(vec![], writer);
        let err = assistant.handle_parse(&request("   ", None)).await.unwrap_err();
        assert!(matches!(err, AssistantError::Malformed(_)));
    }
}
