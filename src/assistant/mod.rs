//! Prompt/Completion 适配层
//!
//! assistant 进程的全部业务：系统提示组装、模型结构化输出的限时调用与
//! 有界重试、第一道合同校验、general_inquiry 就地作答、变更转发 writer。

pub mod adapter;
pub mod client;
pub mod prompts;

pub use adapter::{Assistant, ParseReply, ParseRequest};
pub use client::{HttpWriterClient, WriterBoundary, WriterReply};
pub use prompts::build_system_prompt;
