//! Context Fetcher：只读快照与模糊会话解析
//!
//! `session_ref` 可以是数字 id，也可以是一段口语化描述（"the dinner one"）。
//! 模糊解析策略：归一化（小写、去标点、去填充词）后对标题做大小写
//! 无关的子串匹配，按创建时间倒序取最近一个；零命中报 SessionNotFound。
//! 纯读路径，全部 SELECT，幂等可重试。

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use sqlx::SqliteConnection;

use crate::error::StoreError;
use crate::store::models::{
    assemble_snapshot, ItemRow, PersonRow, SessionRow, SessionSnapshot,
};

/// 会话引用：数字 id 或模糊文本查询
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SessionRef {
    Id(i64),
    Query(String),
}

impl SessionRef {
    /// 路径片段 / 用户输入解析：纯数字按 id，其余按查询文本
    pub fn parse(s: &str) -> SessionRef {
        match s.trim().parse::<i64>() {
            Ok(id) if id >= 1 => SessionRef::Id(id),
            _ => SessionRef::Query(s.trim().to_string()),
        }
    }
}

impl std::fmt::Display for SessionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionRef::Id(id) => write!(f, "#{id}"),
            SessionRef::Query(q) => write!(f, "'{q}'"),
        }
    }
}

/// 查询归一化会丢掉的填充词
const STOP_WORDS: [&str; 11] = [
    "receipt", "session", "sessions", "the", "a", "an", "my", "in", "on", "called", "named",
];

static NON_ALNUM_RE: OnceLock<Regex> = OnceLock::new();

/// 小写、去标点、压缩空白、去填充词
pub fn normalize_query(q: &str) -> String {
    let re = NON_ALNUM_RE.get_or_init(|| Regex::new(r"[^a-z0-9\s]+").unwrap());
    let lowered = q.trim().to_lowercase();
    re.replace_all(&lowered, " ")
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 解析会话引用为一行；供只读快照与执行器事务内共用
pub async fn resolve_session(
    conn: &mut SqliteConnection,
    session_ref: &SessionRef,
) -> Result<SessionRow, StoreError> {
    match session_ref {
        SessionRef::Id(id) => sqlx::query_as::<_, SessionRow>(
            "SELECT id, title, tax, service, discount, created_at FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::SessionNotFound(format!("#{id}"))),

        SessionRef::Query(q) => {
            let needle = normalize_query(q);
            if needle.is_empty() {
                return Err(StoreError::SessionNotFound(q.clone()));
            }
            // 多命中时取最近创建的一个
            sqlx::query_as::<_, SessionRow>(
                "SELECT id, title, tax, service, discount, created_at FROM sessions
                 WHERE lower(title) LIKE '%' || ? || '%'
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
            )
            .bind(&needle)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound(q.clone()))
        }
    }
}

/// 读取完整快照（会话 + 人员 + 菜目 + 派生金额）
pub async fn fetch_snapshot(
    conn: &mut SqliteConnection,
    session_ref: &SessionRef,
) -> Result<SessionSnapshot, StoreError> {
    let session = resolve_session(&mut *conn, session_ref).await?;

    let people = sqlx::query_as::<_, PersonRow>(
        "SELECT id, session_id, name FROM people WHERE session_id = ? ORDER BY id",
    )
    .bind(session.id)
    .fetch_all(&mut *conn)
    .await?;

    let items = sqlx::query_as::<_, ItemRow>(
        "SELECT i.id, i.person_id, i.name, i.price, i.quantity
         FROM items i JOIN people p ON p.id = i.person_id
         WHERE p.session_id = ? ORDER BY i.id",
    )
    .bind(session.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(assemble_snapshot(session, people, items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_fillers_and_punctuation() {
        assert_eq!(normalize_query("The Dinner receipt!"), "dinner");
        assert_eq!(normalize_query("my session called Homes"), "homes");
        assert_eq!(normalize_query("  "), "");
    }

    #[test]
    fn parse_prefers_numeric_ids() {
        assert_eq!(SessionRef::parse("42"), SessionRef::Id(42));
        assert_eq!(
            SessionRef::parse("the dinner one"),
            SessionRef::Query("the dinner one".into())
        );
        // 非正数不是合法 id，按文本处理
        assert_eq!(SessionRef::parse("0"), SessionRef::Query("0".into()));
    }

    #[tokio::test]
    async fn fuzzy_match_picks_most_recent() {
        let pool = crate::store::db::open_in_memory().await.unwrap();
        crate::store::db::init_schema(&pool).await.unwrap();
        for (title, created) in [
            ("Dinner with team", "2026-01-01T00:00:00Z"),
            ("Dinner again", "2026-02-01T00:00:00Z"),
        ] {
            sqlx::query("INSERT INTO sessions (title, created_at) VALUES (?, ?)")
                .bind(title)
                .bind(created)
                .execute(&pool)
                .await
                .unwrap();
        }

        let mut conn = pool.acquire().await.unwrap();
        let row = resolve_session(&mut *conn, &SessionRef::Query("the dinner".into()))
            .await
            .unwrap();
        assert_eq!(row.title, "Dinner again");

        let missing = resolve_session(&mut *conn, &SessionRef::Query("breakfast".into())).await;
        assert!(matches!(missing, Err(StoreError::SessionNotFound(_))));
    }
}
