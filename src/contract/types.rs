//! 动作合同：封闭 tagged union 与生成语法导出
//!
//! 信封以 `intent` 字段为标签；未知标签在校验期即被拒绝，不会成为运行时意外。
//! 对外字段名 `vat` 与内部字段名 `tax` 的换名通过 serde rename 固定在类型上，
//! 读写两个方向自动一致。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 单次批量请求允许的最大子操作数
pub const MAX_BATCH_OPERATIONS: usize = 15;

/// AI 产出的动作信封：`{"intent": "...", ...}`
///
/// 封闭集合：新意图必须新增变体，开放字典式派发被类型系统排除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Action {
    /// 纯问答，永不触达存储
    GeneralInquiry { answer: String },
    /// 新建会话（人员可零菜目）
    CreateSession {
        session: SessionDraft,
        people: Vec<PersonDraft>,
    },
    /// 修改会话字段（title / vat / service / discount）
    EditSession {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_query: Option<String>,
        updates: SessionUpdates,
    },
    /// 人员增删改
    EditPerson(PersonOp),
    /// 菜目增删改移
    EditItem(ItemOp),
    /// 批量实体编辑：先全部校验，后一次事务全量提交
    EditSessionEntities {
        session_id: i64,
        operations: Vec<EntityOp>,
    },
}

impl Action {
    /// 意图标签（与 wire 格式一致的 snake_case）
    pub fn intent(&self) -> &'static str {
        match self {
            Action::GeneralInquiry { .. } => "general_inquiry",
            Action::CreateSession { .. } => "create_session",
            Action::EditSession { .. } => "edit_session",
            Action::EditPerson(_) => "edit_person",
            Action::EditItem(_) => "edit_item",
            Action::EditSessionEntities { .. } => "edit_session_entities",
        }
    }

    /// 是否会触发写事务（general_inquiry 以外都会）
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Action::GeneralInquiry { .. })
    }
}

/// 新建会话的字段；对外 `vat`，内部 `tax`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionDraft {
    pub title: String,
    /// 增值税百分比 [0,100]；数据库字段叫 tax，wire 名固定为 vat
    #[serde(rename = "vat", default)]
    pub tax: f64,
    #[serde(default)]
    pub service: f64,
    #[serde(default)]
    pub discount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PersonDraft {
    pub name: String,
    #[serde(default)]
    pub items: Vec<ItemDraft>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ItemDraft {
    pub name: String,
    pub price: f64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

/// edit_session 的更新集合；键集受限，未知键在校验期拒绝
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "vat", skip_serializing_if = "Option::is_none")]
    pub tax: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<f64>,
}

impl SessionUpdates {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.tax.is_none()
            && self.service.is_none()
            && self.discount.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PersonAction {
    Add,
    Rename,
    Delete,
}

/// edit_person 操作；operation 决定哪些字段必填（校验器保证）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PersonOp {
    pub session_id: i64,
    pub operation: PersonAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    Add,
    Update,
    Delete,
    Move,
}

/// edit_item 操作；同样按 operation 收紧必填项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ItemOp {
    pub session_id: i64,
    pub operation: ItemAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_person_id: Option<i64>,
    /// 目标人员的名字引用；批量里可指向同批次前面刚加入的人
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_person_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updates: Option<ItemUpdates>,
}

/// edit_item / update 的可更新字段（至少一项）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ItemUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
}

impl ItemUpdates {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.price.is_none() && self.quantity.is_none()
    }
}

/// 批量编辑中的单条子操作（仅允许人员/菜目两类）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum EntityOp {
    EditPerson(PersonOp),
    EditItem(ItemOp),
}

/// 导出动作合同的 JSON Schema，作为模型的生成语法（而非仅事后检查）
pub fn action_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(Action)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vat_tax_rename_round_trips() {
        let draft = SessionDraft {
            title: "Dinner".into(),
            tax: 14.0,
            service: 10.0,
            discount: 0.0,
        };
        let wire = serde_json::to_value(&draft).unwrap();
        assert_eq!(wire["vat"], serde_json::json!(14.0));
        assert!(wire.get("tax").is_none());

        let back: SessionDraft = serde_json::from_value(wire).unwrap();
        assert_eq!(back.tax, 14.0);
    }

    #[test]
    fn action_serializes_with_intent_tag() {
        let action = Action::GeneralInquiry {
            answer: "hi".into(),
        };
        let wire = serde_json::to_value(&action).unwrap();
        assert_eq!(wire["intent"], "general_inquiry");
    }

    #[test]
    fn schema_export_is_an_object() {
        let schema = action_schema();
        assert!(schema.is_object());
    }
}
