//! 意图校验器
//!
//! `validate_action(raw) -> Action | ValidateError`。输入是不受信的
//! `serde_json::Value`；按 `intent` 标签显式派发到各变体的校验函数，
//! 拒绝（而非静默纠正）：未知标签、缺失必填、类型错误、数值越界、
//! 必填序列为空、未知 updates/operation 键。拒绝携带机器可读的
//! 原因码与字段路径，调用方可以据此给出有用的提示或让模型重试。
//!
//! 批量意图逐条独立校验，聚合全部失败项后整体拒绝（fail closed）。

use serde_json::{Map, Value};
use thiserror::Error;

use super::types::{
    Action, EntityOp, ItemAction, ItemDraft, ItemOp, ItemUpdates, PersonAction, PersonDraft,
    PersonOp, SessionDraft, SessionUpdates, MAX_BATCH_OPERATIONS,
};

/// 机器可读的拒绝原因码
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    UnknownIntent,
    MissingField,
    InvalidType,
    OutOfRange,
    EmptySequence,
    UnknownKey,
    TooManyOperations,
    NotExecutable,
}

/// 单条拒绝：原因码 + 出错字段路径 + 可呈现给用户的信息
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize)]
#[error("{path}: {message}")]
pub struct Rejection {
    pub reason: RejectReason,
    pub path: String,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// 批量校验中单条子操作的失败（带下标，全部一起上报）
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BatchFailure {
    pub index: usize,
    pub rejection: Rejection,
}

/// 校验结果错误：单条拒绝，或批量聚合拒绝
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidateError {
    #[error("{0}")]
    Rejected(#[from] Rejection),
    #[error("batch rejected: {0:?}")]
    Batch(Vec<BatchFailure>),
}

impl ValidateError {
    /// 面向用户的一段话（批量时逐条列出）
    pub fn user_message(&self) -> String {
        match self {
            ValidateError::Rejected(r) => r.message.clone(),
            ValidateError::Batch(fails) => fails
                .iter()
                .map(|f| format!("operation #{}: {}", f.index + 1, f.rejection.message))
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

/// 入口：按 intent 标签派发。两个信任边界调用同一个函数。
pub fn validate_action(raw: &Value) -> Result<Action, ValidateError> {
    let obj = as_object(raw, "$")?;
    let intent = match obj.get("intent").and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => s.trim(),
        _ => {
            return Err(Rejection::new(
                RejectReason::MissingField,
                "$.intent",
                "the envelope is missing an intent tag",
            )
            .into())
        }
    };

    match intent {
        "general_inquiry" => validate_general_inquiry(obj).map_err(Into::into),
        "create_session" => validate_create_session(obj).map_err(Into::into),
        "edit_session" => validate_edit_session(obj).map_err(Into::into),
        "edit_person" => validate_person_op(obj, "$", None)
            .map(Action::EditPerson)
            .map_err(Into::into),
        "edit_item" => validate_item_op(obj, "$", None)
            .map(Action::EditItem)
            .map_err(Into::into),
        "edit_session_entities" => validate_entities(obj),
        other => Err(Rejection::new(
            RejectReason::UnknownIntent,
            "$.intent",
            format!("unknown intent '{other}'"),
        )
        .into()),
    }
}

fn validate_general_inquiry(obj: &Map<String, Value>) -> Result<Action, Rejection> {
    let answer = req_string(obj, "$", "answer")?;
    Ok(Action::GeneralInquiry { answer })
}

fn validate_create_session(obj: &Map<String, Value>) -> Result<Action, Rejection> {
    let session_obj = match obj.get("session") {
        Some(v) if !v.is_null() => as_object(v, "$.session").map_err(unwrap_validate)?,
        _ => {
            return Err(Rejection::new(
                RejectReason::MissingField,
                "$.session",
                "create_session needs a session object",
            ))
        }
    };

    let session = SessionDraft {
        title: req_string(session_obj, "$.session", "title")?,
        tax: rate_or_zero(session_obj, "$.session", "vat")?,
        service: rate_or_zero(session_obj, "$.session", "service")?,
        discount: rate_or_zero(session_obj, "$.session", "discount")?,
    };

    let people_raw = match obj.get("people").filter(|v| !v.is_null()) {
        Some(Value::Array(a)) => a,
        Some(_) => {
            return Err(Rejection::new(
                RejectReason::InvalidType,
                "$.people",
                "people must be a list",
            ))
        }
        None => {
            return Err(Rejection::new(
                RejectReason::MissingField,
                "$.people",
                "include at least one person",
            ))
        }
    };
    if people_raw.is_empty() {
        return Err(Rejection::new(
            RejectReason::EmptySequence,
            "$.people",
            "include at least one person",
        ));
    }

    let mut people = Vec::with_capacity(people_raw.len());
    for (p_idx, person_raw) in people_raw.iter().enumerate() {
        let p_path = format!("$.people[{p_idx}]");
        let person_obj = as_object(person_raw, &p_path).map_err(unwrap_validate)?;
        let name = req_string(person_obj, &p_path, "name")?;

        // 人员允许零菜目；出现的菜目逐条严格校验
        let mut items = Vec::new();
        match person_obj.get("items").filter(|v| !v.is_null()) {
            None => {}
            Some(Value::Array(items_raw)) => {
                for (i_idx, item_raw) in items_raw.iter().enumerate() {
                    let i_path = format!("{p_path}.items[{i_idx}]");
                    items.push(validate_item_draft(item_raw, &i_path)?);
                }
            }
            Some(_) => {
                return Err(Rejection::new(
                    RejectReason::InvalidType,
                    format!("{p_path}.items"),
                    format!("items for '{name}' must be a list"),
                ))
            }
        }

        people.push(PersonDraft { name, items });
    }

    Ok(Action::CreateSession { session, people })
}

fn validate_item_draft(raw: &Value, path: &str) -> Result<ItemDraft, Rejection> {
    let obj = as_object(raw, path).map_err(unwrap_validate)?;
    let name = req_string(obj, path, "name")?;
    let price = req_positive_number(obj, path, "price")?;
    let quantity = quantity_or_one(obj, path)?;
    Ok(ItemDraft {
        name,
        price,
        quantity,
    })
}

const SESSION_UPDATE_KEYS: [&str; 4] = ["title", "vat", "service", "discount"];

fn validate_edit_session(obj: &Map<String, Value>) -> Result<Action, Rejection> {
    let session_id = opt_positive_id(obj, "$", "session_id")?;
    let session_query = opt_string(obj, "$", "session_query")?;
    if session_id.is_none() && session_query.is_none() {
        return Err(Rejection::new(
            RejectReason::MissingField,
            "$.session_id",
            "provide session_id or session_query to pick a session",
        ));
    }

    let updates_obj = match obj.get("updates").filter(|v| !v.is_null()) {
        Some(v) => as_object(v, "$.updates").map_err(unwrap_validate)?,
        None => {
            return Err(Rejection::new(
                RejectReason::MissingField,
                "$.updates",
                "tell me what to update (title, VAT, service, discount)",
            ))
        }
    };
    for key in updates_obj.keys() {
        if !SESSION_UPDATE_KEYS.contains(&key.as_str()) {
            return Err(Rejection::new(
                RejectReason::UnknownKey,
                format!("$.updates.{key}"),
                format!("'{key}' is not an updatable session field"),
            ));
        }
    }

    let updates = SessionUpdates {
        title: opt_string(updates_obj, "$.updates", "title")?,
        tax: opt_rate(updates_obj, "$.updates", "vat")?,
        service: opt_rate(updates_obj, "$.updates", "service")?,
        discount: opt_rate(updates_obj, "$.updates", "discount")?,
    };
    if updates.is_empty() {
        return Err(Rejection::new(
            RejectReason::EmptySequence,
            "$.updates",
            "no changes found; nothing to update",
        ));
    }

    Ok(Action::EditSession {
        session_id,
        session_query,
        updates,
    })
}

/// edit_person 校验；批量模式下 `inherited_session_id` 用于回填缺失的 session_id
fn validate_person_op(
    obj: &Map<String, Value>,
    path: &str,
    inherited_session_id: Option<i64>,
) -> Result<PersonOp, Rejection> {
    let session_id = req_session_id(obj, path, inherited_session_id)?;

    let operation = match req_string(obj, path, "operation")?.as_str() {
        "add" => PersonAction::Add,
        "rename" => PersonAction::Rename,
        "delete" => PersonAction::Delete,
        other => {
            return Err(Rejection::new(
                RejectReason::UnknownKey,
                format!("{path}.operation"),
                format!("'{other}' is not a person operation (add/rename/delete)"),
            ))
        }
    };

    let person_id = opt_positive_id(obj, path, "person_id")?;
    let new_name = opt_string(obj, path, "new_name")?;

    if matches!(operation, PersonAction::Rename | PersonAction::Delete) && person_id.is_none() {
        return Err(Rejection::new(
            RejectReason::MissingField,
            format!("{path}.person_id"),
            "person_id is required for rename/delete",
        ));
    }
    if matches!(operation, PersonAction::Add | PersonAction::Rename) && new_name.is_none() {
        return Err(Rejection::new(
            RejectReason::MissingField,
            format!("{path}.new_name"),
            "new_name is required for add/rename",
        ));
    }

    Ok(PersonOp {
        session_id,
        operation,
        person_id: if operation == PersonAction::Add {
            None
        } else {
            person_id
        },
        new_name: if operation == PersonAction::Delete {
            None
        } else {
            new_name
        },
    })
}

const ITEM_UPDATE_KEYS: [&str; 3] = ["name", "price", "quantity"];

fn validate_item_op(
    obj: &Map<String, Value>,
    path: &str,
    inherited_session_id: Option<i64>,
) -> Result<ItemOp, Rejection> {
    let session_id = req_session_id(obj, path, inherited_session_id)?;

    let operation = match req_string(obj, path, "operation")?.as_str() {
        "add" => ItemAction::Add,
        "update" => ItemAction::Update,
        "delete" => ItemAction::Delete,
        "move" => ItemAction::Move,
        other => {
            return Err(Rejection::new(
                RejectReason::UnknownKey,
                format!("{path}.operation"),
                format!("'{other}' is not an item operation (add/update/delete/move)"),
            ))
        }
    };

    let item_id = opt_positive_id(obj, path, "item_id")?;
    let to_person_id = opt_positive_id(obj, path, "to_person_id")?;
    let to_person_ref = opt_string(obj, path, "to_person_ref")?;

    if matches!(
        operation,
        ItemAction::Update | ItemAction::Delete | ItemAction::Move
    ) && item_id.is_none()
    {
        return Err(Rejection::new(
            RejectReason::MissingField,
            format!("{path}.item_id"),
            "item_id is required for update/delete/move",
        ));
    }
    if matches!(operation, ItemAction::Add | ItemAction::Move)
        && to_person_id.is_none()
        && to_person_ref.is_none()
    {
        return Err(Rejection::new(
            RejectReason::MissingField,
            format!("{path}.to_person_id"),
            "to_person_id or to_person_ref is required for add/move",
        ));
    }

    let mut op = ItemOp {
        session_id,
        operation,
        item_id,
        to_person_id,
        to_person_ref,
        name: None,
        price: None,
        quantity: None,
        updates: None,
    };

    match operation {
        ItemAction::Add => {
            op.item_id = None;
            op.name = Some(req_string(obj, path, "name")?);
            op.price = Some(req_positive_number(obj, path, "price")?);
            op.quantity = Some(quantity_or_one(obj, path)?);
        }
        ItemAction::Update => {
            op.to_person_id = None;
            op.to_person_ref = None;
            let updates_obj = match obj.get("updates").filter(|v| !v.is_null()) {
                Some(v) => as_object(v, &format!("{path}.updates")).map_err(unwrap_validate)?,
                None => {
                    return Err(Rejection::new(
                        RejectReason::MissingField,
                        format!("{path}.updates"),
                        "updates must include at least one of: name, price, quantity",
                    ))
                }
            };
            for key in updates_obj.keys() {
                if !ITEM_UPDATE_KEYS.contains(&key.as_str()) {
                    return Err(Rejection::new(
                        RejectReason::UnknownKey,
                        format!("{path}.updates.{key}"),
                        format!("'{key}' is not an updatable item field"),
                    ));
                }
            }
            let updates = ItemUpdates {
                name: opt_string(updates_obj, &format!("{path}.updates"), "name")?,
                price: match opt_number(updates_obj, &format!("{path}.updates"), "price")? {
                    Some(p) if p <= 0.0 => {
                        return Err(Rejection::new(
                            RejectReason::OutOfRange,
                            format!("{path}.updates.price"),
                            "updated price must be greater than 0",
                        ))
                    }
                    other => other,
                },
                quantity: match opt_integer(updates_obj, &format!("{path}.updates"), "quantity")? {
                    Some(q) if q < 1 => {
                        return Err(Rejection::new(
                            RejectReason::OutOfRange,
                            format!("{path}.updates.quantity"),
                            "updated quantity must be an integer >= 1",
                        ))
                    }
                    other => other,
                },
            };
            if updates.is_empty() {
                return Err(Rejection::new(
                    RejectReason::EmptySequence,
                    format!("{path}.updates"),
                    "updates must include at least one of: name, price, quantity",
                ));
            }
            op.updates = Some(updates);
        }
        ItemAction::Delete => {
            op.to_person_id = None;
            op.to_person_ref = None;
        }
        ItemAction::Move => {}
    }

    Ok(op)
}

fn validate_entities(obj: &Map<String, Value>) -> Result<Action, ValidateError> {
    let session_id = match opt_positive_id(obj, "$", "session_id")? {
        Some(id) => id,
        None => {
            return Err(Rejection::new(
                RejectReason::MissingField,
                "$.session_id",
                "missing session_id (open the session and try again)",
            )
            .into())
        }
    };

    let ops_raw = match obj.get("operations").filter(|v| !v.is_null()) {
        Some(Value::Array(a)) => a,
        Some(_) => {
            return Err(Rejection::new(
                RejectReason::InvalidType,
                "$.operations",
                "operations must be a list",
            )
            .into())
        }
        None => {
            return Err(Rejection::new(
                RejectReason::MissingField,
                "$.operations",
                "operations must be a non-empty list",
            )
            .into())
        }
    };
    if ops_raw.is_empty() {
        return Err(Rejection::new(
            RejectReason::EmptySequence,
            "$.operations",
            "operations must be a non-empty list",
        )
        .into());
    }
    if ops_raw.len() > MAX_BATCH_OPERATIONS {
        return Err(Rejection::new(
            RejectReason::TooManyOperations,
            "$.operations",
            format!("too many operations in one request (max {MAX_BATCH_OPERATIONS})"),
        )
        .into());
    }

    // 两阶段的第一阶段：逐条独立校验，聚合全部失败
    let mut operations = Vec::with_capacity(ops_raw.len());
    let mut failures = Vec::new();
    for (idx, op_raw) in ops_raw.iter().enumerate() {
        let path = format!("$.operations[{idx}]");
        match validate_entity_op(op_raw, &path, session_id) {
            Ok(op) => operations.push(op),
            Err(rejection) => failures.push(BatchFailure { index: idx, rejection }),
        }
    }
    if !failures.is_empty() {
        return Err(ValidateError::Batch(failures));
    }

    Ok(Action::EditSessionEntities {
        session_id,
        operations,
    })
}

fn validate_entity_op(raw: &Value, path: &str, session_id: i64) -> Result<EntityOp, Rejection> {
    let obj = as_object(raw, path).map_err(unwrap_validate)?;
    match obj.get("intent").and_then(Value::as_str).map(str::trim) {
        Some("edit_person") => {
            validate_person_op(obj, path, Some(session_id)).map(EntityOp::EditPerson)
        }
        Some("edit_item") => validate_item_op(obj, path, Some(session_id)).map(EntityOp::EditItem),
        Some(other) => Err(Rejection::new(
            RejectReason::UnknownIntent,
            format!("{path}.intent"),
            format!("batch entries must be edit_person or edit_item, got '{other}'"),
        )),
        None => Err(Rejection::new(
            RejectReason::MissingField,
            format!("{path}.intent"),
            "batch entry is missing its intent tag",
        )),
    }
}

// ---- 基础字段提取（拒绝而非纠正）----

fn as_object<'a>(v: &'a Value, path: &str) -> Result<&'a Map<String, Value>, ValidateError> {
    v.as_object().ok_or_else(|| {
        Rejection::new(
            RejectReason::InvalidType,
            path,
            "expected a JSON object",
        )
        .into()
    })
}

// as_object 返回 ValidateError 以便入口直接用 `?`；内部路径只需要 Rejection
fn unwrap_validate(e: ValidateError) -> Rejection {
    match e {
        ValidateError::Rejected(r) => r,
        // as_object 永远只产生单条拒绝
        ValidateError::Batch(mut fails) => fails
            .pop()
            .map(|f| f.rejection)
            .unwrap_or_else(|| Rejection::new(RejectReason::InvalidType, "$", "invalid payload")),
    }
}

fn req_string(obj: &Map<String, Value>, path: &str, key: &str) -> Result<String, Rejection> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(Rejection::new(
            RejectReason::MissingField,
            format!("{path}.{key}"),
            format!("{key} cannot be empty"),
        )),
        Some(v) if !v.is_null() => Err(Rejection::new(
            RejectReason::InvalidType,
            format!("{path}.{key}"),
            format!("{key} must be a string"),
        )),
        _ => Err(Rejection::new(
            RejectReason::MissingField,
            format!("{path}.{key}"),
            format!("{key} is required"),
        )),
    }
}

fn opt_string(obj: &Map<String, Value>, path: &str, key: &str) -> Result<Option<String>, Rejection> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Err(Rejection::new(
                    RejectReason::MissingField,
                    format!("{path}.{key}"),
                    format!("{key} cannot be empty"),
                ))
            } else {
                Ok(Some(s.to_string()))
            }
        }
        Some(_) => Err(Rejection::new(
            RejectReason::InvalidType,
            format!("{path}.{key}"),
            format!("{key} must be a string"),
        )),
    }
}

fn opt_number(obj: &Map<String, Value>, path: &str, key: &str) -> Result<Option<f64>, Rejection> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(_) => Err(Rejection::new(
            RejectReason::InvalidType,
            format!("{path}.{key}"),
            format!("{key} must be a number"),
        )),
    }
}

fn opt_integer(obj: &Map<String, Value>, path: &str, key: &str) -> Result<Option<i64>, Rejection> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
            Rejection::new(
                RejectReason::InvalidType,
                format!("{path}.{key}"),
                format!("{key} must be an integer"),
            )
        }),
        Some(_) => Err(Rejection::new(
            RejectReason::InvalidType,
            format!("{path}.{key}"),
            format!("{key} must be an integer"),
        )),
    }
}

fn opt_positive_id(obj: &Map<String, Value>, path: &str, key: &str) -> Result<Option<i64>, Rejection> {
    match opt_integer(obj, path, key)? {
        Some(id) if id >= 1 => Ok(Some(id)),
        Some(_) => Err(Rejection::new(
            RejectReason::OutOfRange,
            format!("{path}.{key}"),
            format!("{key} must be a positive integer"),
        )),
        None => Ok(None),
    }
}

fn req_session_id(
    obj: &Map<String, Value>,
    path: &str,
    inherited: Option<i64>,
) -> Result<i64, Rejection> {
    match opt_positive_id(obj, path, "session_id")? {
        // 批量子操作不得指向父请求之外的会话
        Some(id) => match inherited {
            Some(parent) if id != parent => Err(Rejection::new(
                RejectReason::OutOfRange,
                format!("{path}.session_id"),
                format!("session_id {id} does not match the batch session {parent}"),
            )),
            _ => Ok(id),
        },
        None => inherited.ok_or_else(|| {
            Rejection::new(
                RejectReason::MissingField,
                format!("{path}.session_id"),
                "missing session_id (open the session and try again)",
            )
        }),
    }
}

fn req_positive_number(obj: &Map<String, Value>, path: &str, key: &str) -> Result<f64, Rejection> {
    match opt_number(obj, path, key)? {
        Some(n) if n > 0.0 => Ok(n),
        Some(_) => Err(Rejection::new(
            RejectReason::OutOfRange,
            format!("{path}.{key}"),
            format!("{key} must be greater than 0"),
        )),
        None => Err(Rejection::new(
            RejectReason::MissingField,
            format!("{path}.{key}"),
            format!("{key} is required"),
        )),
    }
}

/// 百分比字段：缺省为 0，出现则必须落在 [0,100]（两端含）
fn rate_or_zero(obj: &Map<String, Value>, path: &str, key: &str) -> Result<f64, Rejection> {
    Ok(opt_rate(obj, path, key)?.unwrap_or(0.0))
}

fn opt_rate(obj: &Map<String, Value>, path: &str, key: &str) -> Result<Option<f64>, Rejection> {
    match opt_number(obj, path, key)? {
        Some(r) if !(0.0..=100.0).contains(&r) => Err(Rejection::new(
            RejectReason::OutOfRange,
            format!("{path}.{key}"),
            format!("{key} must be between 0 and 100"),
        )),
        other => Ok(other),
    }
}

fn quantity_or_one(obj: &Map<String, Value>, path: &str) -> Result<i64, Rejection> {
    match opt_integer(obj, path, "quantity")? {
        Some(q) if q >= 1 => Ok(q),
        Some(_) => Err(Rejection::new(
            RejectReason::OutOfRange,
            format!("{path}.quantity"),
            "quantity must be an integer >= 1",
        )),
        None => Ok(1),
    }
}
