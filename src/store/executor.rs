//! Action Executor 与批量编排
//!
//! 系统里唯一的写路径。每个意图的生命周期固定为
//! Received → Validated → Resolved → Committed，任何阶段失败即终止：
//! 入口总是先跑第二道合同校验（不信任 assistant 侧跑过第一道），
//! 引用解析在事务内进行，提交前的任何失败都让整个事务回滚。
//!
//! 批量意图（edit_session_entities）两阶段：校验器已聚合校验过全部
//! 子操作，这里在单个事务里按提交顺序执行，任何一条失败全部回滚。

use serde_json::Value;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::contract::{
    validate_action, Action, EntityOp, ItemAction, ItemOp, PersonAction, PersonOp, RejectReason,
    Rejection, SessionUpdates, ValidateError,
};
use crate::error::{ExecuteError, RefKind};
use crate::store::context::{fetch_snapshot, resolve_session, SessionRef};
use crate::store::models::SessionSnapshot;

/// 执行结果：用户可读消息、受影响会话（供调用方跳转）、提交后派生金额
#[derive(Debug, Clone, serde::Serialize)]
pub struct Outcome {
    pub message: String,
    pub redirect_target: Option<i64>,
    pub totals: Option<SessionTotals>,
}

/// 提交后的派生金额摘要
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionTotals {
    pub subtotal: f64,
    pub total: f64,
}

impl From<&SessionSnapshot> for SessionTotals {
    fn from(s: &SessionSnapshot) -> Self {
        Self {
            subtotal: s.subtotal,
            total: s.total,
        }
    }
}

/// 动作执行器：持有系统里唯一的可写池
pub struct Executor {
    pool: SqlitePool,
}

impl Executor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 入口：接受不受信的原始信封，校验 → 解析 → 原子执行
    pub async fn execute(&self, raw: &Value) -> Result<Outcome, ExecuteError> {
        let action = validate_action(raw)?;
        self.execute_validated(&action).await
    }

    async fn execute_validated(&self, action: &Action) -> Result<Outcome, ExecuteError> {
        match action {
            // general_inquiry 由 assistant 直接作答，到达这里说明有一跳越权
            Action::GeneralInquiry { .. } => Err(ExecuteError::Rejected(
                ValidateError::Rejected(Rejection::new(
                    RejectReason::NotExecutable,
                    "$.intent",
                    "general_inquiry never executes against the store",
                )),
            )),
            Action::CreateSession { session, people } => {
                self.create_session(session, people).await
            }
            Action::EditSession {
                session_id,
                session_query,
                updates,
            } => {
                self.edit_session(*session_id, session_query.as_deref(), updates)
                    .await
            }
            Action::EditPerson(op) => {
                let mut tx = self.pool.begin().await?;
                ensure_session(&mut tx, op.session_id).await?;
                let fragment = apply_person_op(&mut tx, op).await?;
                tx.commit().await?;
                self.committed(op.session_id, format!("✅ {fragment}")).await
            }
            Action::EditItem(op) => {
                let mut tx = self.pool.begin().await?;
                ensure_session(&mut tx, op.session_id).await?;
                let fragment = apply_item_op(&mut tx, op).await?;
                tx.commit().await?;
                self.committed(op.session_id, format!("✅ {fragment}")).await
            }
            Action::EditSessionEntities {
                session_id,
                operations,
            } => self.edit_entities(*session_id, operations).await,
        }
    }

    async fn create_session(
        &self,
        session: &crate::contract::SessionDraft,
        people: &[crate::contract::PersonDraft],
    ) -> Result<Outcome, ExecuteError> {
        let mut tx = self.pool.begin().await?;

        let session_id = sqlx::query(
            "INSERT INTO sessions (title, tax, service, discount, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.title)
        .bind(session.tax)
        .bind(session.service)
        .bind(session.discount)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let mut people_created = 0usize;
        let mut items_created = 0usize;
        for person in people {
            let person_id = sqlx::query("INSERT INTO people (session_id, name) VALUES (?, ?)")
                .bind(session_id)
                .bind(&person.name)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid();
            people_created += 1;

            for item in &person.items {
                sqlx::query(
                    "INSERT INTO items (person_id, name, price, quantity) VALUES (?, ?, ?, ?)",
                )
                .bind(person_id)
                .bind(&item.name)
                .bind(item.price)
                .bind(item.quantity)
                .execute(&mut *tx)
                .await?;
                items_created += 1;
            }
        }

        tx.commit().await?;
        tracing::info!(session_id, people_created, items_created, "session created");

        let message = if items_created > 0 {
            format!(
                "✅ Created session '{}' with {people_created} people and {items_created} items.",
                session.title
            )
        } else {
            format!(
                "✅ Created session '{}' with {people_created} people (no items yet).",
                session.title
            )
        };
        self.committed(session_id, message).await
    }

    async fn edit_session(
        &self,
        session_id: Option<i64>,
        session_query: Option<&str>,
        updates: &SessionUpdates,
    ) -> Result<Outcome, ExecuteError> {
        let session_ref = match (session_id, session_query) {
            (Some(id), _) => SessionRef::Id(id),
            (None, Some(q)) => SessionRef::Query(q.to_string()),
            // 校验器保证二者必有其一
            (None, None) => {
                return Err(ExecuteError::ReferenceNotFound {
                    kind: RefKind::Session,
                    reference: "(none)".into(),
                })
            }
        };

        let mut tx = self.pool.begin().await?;
        let session = resolve_session(&mut *tx, &session_ref).await?;

        let mut changed = Vec::new();
        if let Some(ref title) = updates.title {
            sqlx::query("UPDATE sessions SET title = ? WHERE id = ?")
                .bind(title)
                .bind(session.id)
                .execute(&mut *tx)
                .await?;
            changed.push(format!("title='{title}'"));
        }
        // 对外 vat，库里 tax
        if let Some(tax) = updates.tax {
            sqlx::query("UPDATE sessions SET tax = ? WHERE id = ?")
                .bind(tax)
                .bind(session.id)
                .execute(&mut *tx)
                .await?;
            changed.push(format!("vat={tax}%"));
        }
        if let Some(service) = updates.service {
            sqlx::query("UPDATE sessions SET service = ? WHERE id = ?")
                .bind(service)
                .bind(session.id)
                .execute(&mut *tx)
                .await?;
            changed.push(format!("service={service}%"));
        }
        if let Some(discount) = updates.discount {
            sqlx::query("UPDATE sessions SET discount = ? WHERE id = ?")
                .bind(discount)
                .bind(session.id)
                .execute(&mut *tx)
                .await?;
            changed.push(format!("discount={discount}%"));
        }

        tx.commit().await?;
        tracing::info!(session_id = session.id, ?changed, "session updated");

        self.committed(session.id, format!("✅ Updated session: {}", changed.join(", ")))
            .await
    }

    async fn edit_entities(
        &self,
        session_id: i64,
        operations: &[EntityOp],
    ) -> Result<Outcome, ExecuteError> {
        let mut tx = self.pool.begin().await?;
        ensure_session(&mut tx, session_id).await?;

        // 按提交顺序执行：后面的操作可以引用前面刚插入的人（to_person_ref）
        let mut fragments = Vec::with_capacity(operations.len());
        for op in operations {
            let fragment = match op {
                EntityOp::EditPerson(p) => apply_person_op(&mut tx, p).await?,
                EntityOp::EditItem(i) => apply_item_op(&mut tx, i).await?,
            };
            fragments.push(fragment);
        }

        tx.commit().await?;
        tracing::info!(session_id, count = operations.len(), "batch committed");

        self.committed(
            session_id,
            format!("✅ Applied {} operations: {}", fragments.len(), fragments.join(" ")),
        )
        .await
    }

    /// 提交后的收尾：重取快照，带上派生金额与跳转目标
    async fn committed(&self, session_id: i64, message: String) -> Result<Outcome, ExecuteError> {
        let mut conn = self.pool.acquire().await?;
        let snapshot = fetch_snapshot(&mut *conn, &SessionRef::Id(session_id)).await?;
        Ok(Outcome {
            message,
            redirect_target: Some(session_id),
            totals: Some(SessionTotals::from(&snapshot)),
        })
    }
}

/// 会话必须存在（批量与单条人员/菜目操作的共同前置）
async fn ensure_session(tx: &mut Transaction<'_, Sqlite>, session_id: i64) -> Result<(), ExecuteError> {
    let found = sqlx::query_scalar::<_, i64>("SELECT id FROM sessions WHERE id = ?")
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(ExecuteError::ReferenceNotFound {
            kind: RefKind::Session,
            reference: format!("#{session_id}"),
        }),
    }
}

async fn apply_person_op(
    tx: &mut Transaction<'_, Sqlite>,
    op: &PersonOp,
) -> Result<String, ExecuteError> {
    match op.operation {
        PersonAction::Add => {
            // 校验器保证 new_name 存在
            let name = op.new_name.as_deref().unwrap_or_default();
            sqlx::query("INSERT INTO people (session_id, name) VALUES (?, ?)")
                .bind(op.session_id)
                .bind(name)
                .execute(&mut **tx)
                .await?;
            Ok(format!("Added {name}."))
        }
        PersonAction::Rename => {
            let name = op.new_name.as_deref().unwrap_or_default();
            let person_id = op.person_id.unwrap_or_default();
            let affected = sqlx::query("UPDATE people SET name = ? WHERE id = ? AND session_id = ?")
                .bind(name)
                .bind(person_id)
                .bind(op.session_id)
                .execute(&mut **tx)
                .await?
                .rows_affected();
            if affected == 0 {
                return Err(person_not_found(person_id));
            }
            Ok(format!("Renamed person #{person_id} to {name}."))
        }
        PersonAction::Delete => {
            let person_id = op.person_id.unwrap_or_default();
            // 菜目随人级联删除（schema 外键兜底）
            let affected = sqlx::query("DELETE FROM people WHERE id = ? AND session_id = ?")
                .bind(person_id)
                .bind(op.session_id)
                .execute(&mut **tx)
                .await?
                .rows_affected();
            if affected == 0 {
                return Err(person_not_found(person_id));
            }
            Ok(format!("Removed person #{person_id}."))
        }
    }
}

async fn apply_item_op(
    tx: &mut Transaction<'_, Sqlite>,
    op: &ItemOp,
) -> Result<String, ExecuteError> {
    match op.operation {
        ItemAction::Add => {
            let person_id = resolve_target_person(tx, op).await?;
            let name = op.name.as_deref().unwrap_or_default();
            sqlx::query("INSERT INTO items (person_id, name, price, quantity) VALUES (?, ?, ?, ?)")
                .bind(person_id)
                .bind(name)
                .bind(op.price.unwrap_or_default())
                .bind(op.quantity.unwrap_or(1))
                .execute(&mut **tx)
                .await?;
            Ok(format!("Added item '{name}'."))
        }
        ItemAction::Update => {
            let item_id = op.item_id.unwrap_or_default();
            let current = fetch_item_in_session(tx, item_id, op.session_id).await?;
            let updates = op.updates.clone().unwrap_or_default();
            let name = updates.name.unwrap_or(current.name);
            let price = updates.price.unwrap_or(current.price);
            let quantity = updates.quantity.unwrap_or(current.quantity);
            sqlx::query("UPDATE items SET name = ?, price = ?, quantity = ? WHERE id = ?")
                .bind(&name)
                .bind(price)
                .bind(quantity)
                .bind(item_id)
                .execute(&mut **tx)
                .await?;
            Ok(format!("Updated item '{name}'."))
        }
        ItemAction::Delete => {
            let item_id = op.item_id.unwrap_or_default();
            fetch_item_in_session(tx, item_id, op.session_id).await?;
            sqlx::query("DELETE FROM items WHERE id = ?")
                .bind(item_id)
                .execute(&mut **tx)
                .await?;
            Ok(format!("Removed item #{item_id}."))
        }
        ItemAction::Move => {
            let item_id = op.item_id.unwrap_or_default();
            fetch_item_in_session(tx, item_id, op.session_id).await?;
            let person_id = resolve_target_person(tx, op).await?;
            sqlx::query("UPDATE items SET person_id = ? WHERE id = ?")
                .bind(person_id)
                .bind(item_id)
                .execute(&mut **tx)
                .await?;
            Ok(format!("Moved item #{item_id}."))
        }
    }
}

/// 目标人员：优先 id；否则按名字引用（大小写无关，命中最近加入者），
/// 在批量事务里能看到同批次前面刚插入的人
async fn resolve_target_person(
    tx: &mut Transaction<'_, Sqlite>,
    op: &ItemOp,
) -> Result<i64, ExecuteError> {
    if let Some(person_id) = op.to_person_id {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM people WHERE id = ? AND session_id = ?",
        )
        .bind(person_id)
        .bind(op.session_id)
        .fetch_optional(&mut **tx)
        .await?;
        return found.ok_or_else(|| person_not_found(person_id));
    }

    let reference = op.to_person_ref.as_deref().unwrap_or_default();
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM people WHERE session_id = ? AND lower(name) = lower(?)
         ORDER BY id DESC LIMIT 1",
    )
    .bind(op.session_id)
    .bind(reference)
    .fetch_optional(&mut **tx)
    .await?;
    found.ok_or_else(|| ExecuteError::ReferenceNotFound {
        kind: RefKind::Person,
        reference: format!("'{reference}'"),
    })
}

async fn fetch_item_in_session(
    tx: &mut Transaction<'_, Sqlite>,
    item_id: i64,
    session_id: i64,
) -> Result<crate::store::models::ItemRow, ExecuteError> {
    let row = sqlx::query_as::<_, crate::store::models::ItemRow>(
        "SELECT i.id, i.person_id, i.name, i.price, i.quantity
         FROM items i JOIN people p ON p.id = i.person_id
         WHERE i.id = ? AND p.session_id = ?",
    )
    .bind(item_id)
    .bind(session_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.ok_or(ExecuteError::ReferenceNotFound {
        kind: RefKind::Item,
        reference: format!("#{item_id}"),
    })
}

fn person_not_found(person_id: i64) -> ExecuteError {
    ExecuteError::ReferenceNotFound {
        kind: RefKind::Person,
        reference: format!("#{person_id}"),
    }
}
