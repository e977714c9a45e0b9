//! Tally - 收据分账 AI 助手
//!
//! 将自然语言提示转换为封闭集合的类型化「动作」，经两次合同校验后，
//! 由唯一写入方以事务方式执行数据库变更。
//!
//! 模块划分：
//! - **assistant**: Prompt/Completion 适配层（系统提示、结构化输出重试、对话历史、跨服务客户端）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **contract**: 共享合同库（动作 tagged union + 字段级校验器，两个信任边界共用）
//! - **error**: 错误分类（校验拒绝 / 引用缺失 / 上游不可用 / 执行失败）
//! - **history**: 对话历史（容量封顶 FIFO，按会话路由，闲置回收）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock，JSON Schema 约束输出）
//! - **store**: 关系型存储（唯一写入方）：快照读取、动作执行器、批量编排

pub mod assistant;
pub mod config;
pub mod contract;
pub mod error;
pub mod history;
pub mod llm;
pub mod store;

pub use contract::{validate_action, Action};
pub use error::{AssistantError, ExecuteError};
