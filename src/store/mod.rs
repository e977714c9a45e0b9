//! 关系型存储（唯一写入方）
//!
//! 结构性单写者：整个系统里只有 writer 进程通过 [`db::open_rw`]
//! 拿到可写连接池；assistant 侧没有任何数据库配置，只能通过
//! HTTP 的 context / execute 接口与存储交互。
//!
//! - **db**: 连接池与建表（外键 + 级联删除在 schema 上强制）
//! - **models**: 行类型、快照与派生金额（折扣 → 服务费 → VAT 的固定顺序）
//! - **context**: 只读快照读取与模糊会话解析（纯 SELECT，无写锁）
//! - **executor**: 动作执行器与批量编排（每个意图一个事务，全量或零）

pub mod context;
pub mod db;
pub mod executor;
pub mod models;

pub use context::{fetch_snapshot, SessionRef};
pub use executor::{Executor, Outcome, SessionTotals};
pub use models::{ItemSnapshot, PersonSnapshot, SessionSnapshot};
