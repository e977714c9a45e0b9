//! 对话历史：容量封顶的 FIFO 消息缓冲
//!
//! 每个会话保留最近 N 条消息，单条内容超长截断，供 LLM 上下文复用；
//! HistoryManager 按 conversation_id 管理多路缓冲，闲置超时自动回收。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 容量封顶的对话缓冲：最旧先出，单条内容按字符数截断
#[derive(Clone, Debug)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
    max_entries: usize,
    max_entry_chars: usize,
}

impl ChatHistory {
    pub fn new(max_entries: usize, max_entry_chars: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_entries,
            max_entry_chars,
        }
    }

    /// 追加一条消息；user/assistant 的空白内容直接丢弃
    pub fn push(&mut self, msg: ChatMessage) {
        if msg.role != Role::System && msg.content.trim().is_empty() {
            return;
        }
        let msg = self.truncate(msg);
        self.messages.push(msg);
        self.prune();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 超长内容按字符边界截断（不破坏多字节字符）
    fn truncate(&self, mut msg: ChatMessage) -> ChatMessage {
        if msg.content.chars().count() > self.max_entry_chars {
            msg.content = msg.content.chars().take(self.max_entry_chars).collect();
        }
        msg
    }

    /// 超出容量时丢弃最旧的消息
    fn prune(&mut self) {
        if self.messages.len() > self.max_entries {
            let excess = self.messages.len() - self.max_entries;
            self.messages.drain(..excess);
        }
    }
}

/// 多路对话管理：按 conversation_id 取缓冲，闲置超时整路淘汰
pub struct HistoryManager {
    buffers: HashMap<String, (ChatHistory, Instant)>,
    max_entries: usize,
    max_entry_chars: usize,
    idle_timeout: Duration,
}

impl HistoryManager {
    pub fn new(max_entries: usize, max_entry_chars: usize, idle_timeout: Duration) -> Self {
        Self {
            buffers: HashMap::new(),
            max_entries,
            max_entry_chars,
            idle_timeout,
        }
    }

    /// 取（或新建）一路缓冲，顺带淘汰所有闲置超时的路
    pub fn buffer_mut(&mut self, conversation_id: &str) -> &mut ChatHistory {
        self.sweep();
        let (max_entries, max_entry_chars) = (self.max_entries, self.max_entry_chars);
        let (history, touched) = self
            .buffers
            .entry(conversation_id.to_string())
            .or_insert_with(|| (ChatHistory::new(max_entries, max_entry_chars), Instant::now()));
        *touched = Instant::now();
        history
    }

    pub fn active_count(&self) -> usize {
        self.buffers.len()
    }

    fn sweep(&mut self) {
        let deadline = self.idle_timeout;
        self.buffers
            .retain(|_, (_, touched)| touched.elapsed() < deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_caps_at_max_entries_oldest_first() {
        let mut history = ChatHistory::new(3, 100);
        for i in 0..5 {
            history.push(ChatMessage::user(format!("m{i}")));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.messages()[0].content, "m2");
        assert_eq!(history.messages()[2].content, "m4");
    }

    #[test]
    fn oversized_entry_is_truncated() {
        let mut history = ChatHistory::new(10, 8);
        history.push(ChatMessage::assistant("0123456789abcdef"));
        assert_eq!(history.messages()[0].content, "01234567");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut history = ChatHistory::new(10, 3);
        history.push(ChatMessage::user("日本語テスト"));
        assert_eq!(history.messages()[0].content, "日本語");
    }

    #[test]
    fn blank_user_message_is_dropped() {
        let mut history = ChatHistory::new(10, 100);
        history.push(ChatMessage::user("   "));
        history.push(ChatMessage::assistant(""));
        assert!(history.is_empty());
    }

    #[test]
    fn separate_conversations_do_not_mix() {
        let mut manager = HistoryManager::new(10, 100, Duration::from_secs(60));
        manager.buffer_mut("a").push(ChatMessage::user("hello a"));
        manager.buffer_mut("b").push(ChatMessage::user("hello b"));
        assert_eq!(manager.active_count(), 2);
        assert_eq!(manager.buffer_mut("a").len(), 1);
    }

    #[test]
    fn idle_buffer_is_swept() {
        let mut manager = HistoryManager::new(10, 100, Duration::from_millis(0));
        manager.buffer_mut("stale").push(ChatMessage::user("x"));
        // idle_timeout 为 0：下一次访问任何路都会把它扫掉
        manager.buffer_mut("fresh");
        assert_eq!(manager.active_count(), 1);
    }
}
