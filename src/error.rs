//! 错误分类
//!
//! 按恢复策略分层：校验拒绝在检测到的边界恢复，绝不进入写事务；
//! 引用解析失败在任何写之前中止；提交期失败整体回滚；上游模型失败
//! 有界重试后向调用方明确报错，不会静默吞掉也不会无限挂起。

use thiserror::Error;

use crate::contract::ValidateError;

/// 被解析引用的实体类别（用于 ReferenceNotFound 指明是谁没找到）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Session,
    Person,
    Item,
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefKind::Session => write!(f, "session"),
            RefKind::Person => write!(f, "person"),
            RefKind::Item => write!(f, "item"),
        }
    }
}

/// 只读路径（快照 / 模糊解析）的错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// 写路径（执行器 / 批量编排）的错误
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// 第二道合同校验拒绝（防御纵深：不信任第一道已经跑过）
    #[error("{0}")]
    Rejected(#[from] ValidateError),

    /// 意图引用了不存在的会话/人员/菜目；指明失败的是哪个引用
    #[error("{kind} not found: {reference}")]
    ReferenceNotFound { kind: RefKind, reference: String },

    /// 提交期数据库失败；事务已整体回滚
    #[error("execution failed: {0}")]
    Db(#[from] sqlx::Error),
}

impl ExecuteError {
    /// 面向用户的消息：拒绝与引用缺失给出具体指引，提交期失败保持笼统
    pub fn user_message(&self) -> String {
        match self {
            ExecuteError::Rejected(v) => v.user_message(),
            ExecuteError::ReferenceNotFound { kind, reference } => {
                format!("I couldn't find that {kind} ({reference}).")
            }
            ExecuteError::Db(_) => "Something went wrong while saving. Nothing was changed.".into(),
        }
    }
}

impl From<StoreError> for ExecuteError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SessionNotFound(r) => ExecuteError::ReferenceNotFound {
                kind: RefKind::Session,
                reference: r,
            },
            StoreError::Db(e) => ExecuteError::Db(e),
        }
    }
}

/// assistant 侧（模型调用 + 跨边界转发）的错误
#[derive(Debug, Error)]
pub enum AssistantError {
    /// 上游模型不可达或超时；调用方决定是否整单重试
    #[error("upstream model unavailable: {0}")]
    UpstreamUnavailable(String),

    /// 重试预算耗尽后模型输出仍不合合同
    #[error("model output failed contract validation: {0}")]
    Malformed(String),

    /// writer 服务不可达（网络层面）
    #[error("writer unavailable: {0}")]
    WriterUnavailable(String),

    /// writer 拒绝了请求（校验/引用/执行失败，带用户可读消息）
    #[error("writer rejected: {0}")]
    WriterRejected(String),
}

impl AssistantError {
    /// 转成聊天气泡里的一句话
    pub fn user_message(&self) -> String {
        match self {
            AssistantError::UpstreamUnavailable(_) => {
                "The AI model is busy right now. Please try again in a moment.".into()
            }
            AssistantError::Malformed(_) => {
                "I couldn't understand that. Try asking a question or describing a receipt.".into()
            }
            AssistantError::WriterUnavailable(_) => {
                "The backend is unreachable. Please try again.".into()
            }
            AssistantError::WriterRejected(msg) => msg.clone(),
        }
    }
}
