//! 共享合同库
//!
//! 定义 `{intent, ...}` 信封的封闭 tagged union、字段级约束与校验器。
//! 同一份校验逻辑在两处信任边界运行：模型输出侧（assistant）与
//! 落库前（writer 执行器），保证两次校验永不分叉。

mod types;
mod validate;

pub use types::{
    action_schema, Action, EntityOp, ItemAction, ItemDraft, ItemOp, ItemUpdates, PersonAction,
    PersonDraft, PersonOp, SessionDraft, SessionUpdates, MAX_BATCH_OPERATIONS,
};
pub use validate::{
    validate_action, BatchFailure, RejectReason, Rejection, ValidateError,
};
