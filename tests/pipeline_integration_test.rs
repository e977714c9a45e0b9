//! 全链路集成测试
//!
//! 用脚本化 Mock 模型 + 进程内 writer 边界把整条链路跑通：
//! 自然语言 → 适配层 → 合同校验 → 事务执行 → 派生金额。

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use tally::assistant::{Assistant, ParseRequest, WriterBoundary, WriterReply};
    use tally::error::AssistantError;
    use tally::history::HistoryManager;
    use tally::llm::MockLlmClient;
    use tally::store::{db, fetch_snapshot, Executor, SessionRef, SessionSnapshot};

    /// 进程内 writer：真实 Executor + 真实 SQLite 文件，只省掉 HTTP 一跳
    struct LocalWriter {
        executor: Arc<Executor>,
    }

    #[async_trait]
    impl WriterBoundary for LocalWriter {
        async fn fetch_context(&self, reference: &str) -> Result<SessionSnapshot, AssistantError> {
            let mut conn = self
                .executor
                .pool()
                .acquire()
                .await
                .map_err(|e| AssistantError::WriterUnavailable(e.to_string()))?;
            fetch_snapshot(&mut *conn, &SessionRef::parse(reference))
                .await
                .map_err(|e| AssistantError::WriterRejected(e.to_string()))
        }

        async fn execute(&self, action: &Value) -> Result<WriterReply, AssistantError> {
            match self.executor.execute(action).await {
                Ok(outcome) => Ok(WriterReply {
                    message: outcome.message,
                    redirect_target: outcome.redirect_target,
                    totals: outcome.totals,
                }),
                Err(e) => Err(AssistantError::WriterRejected(e.user_message())),
            }
        }
    }

    async fn file_backed_executor() -> (tempfile::TempDir, Arc<Executor>) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::open_rw(&dir.path().join("tally.db")).await.unwrap();
        db::init_schema(&pool).await.unwrap();
        (dir, Arc::new(Executor::new(pool)))
    }

    fn pipeline(
        responses: Vec<&str>,
        executor: Arc<Executor>,
    ) -> Assistant<LocalWriter> {
        Assistant::new(
            Arc::new(MockLlmClient::scripted(responses)),
            LocalWriter { executor },
            HistoryManager::new(30, 2000, Duration::from_secs(1800)),
            2,
            Duration::from_secs(5),
        )
    }

    fn parse(message: &str, session_id: Option<i64>) -> ParseRequest {
        ParseRequest {
            message: message.into(),
            conversation_id: None,
            history: Vec::new(),
            session_id,
        }
    }

    async fn count(executor: &Executor, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(executor.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn prompt_to_committed_session_with_totals() {
        let (_dir, executor) = file_backed_executor().await;
        let assistant = pipeline(
            vec![
                r#"{"intent": "create_session",
                    "session": {"title": "Dinner", "vat": 14, "service": 10, "discount": 0},
                    "people": [{"name": "Ali", "items": [{"name": "Burger", "price": 120}]}]}"#,
            ],
            executor.clone(),
        );

        let reply = assistant
            .handle_parse(&parse(
                "new receipt Dinner, Ali had a burger for 120, vat 14 service 10",
                None,
            ))
            .await
            .unwrap();

        assert!(reply.ok);
        assert_eq!(reply.redirect_target, Some(1));
        let totals = reply.totals.unwrap();
        assert_eq!(totals.subtotal, 120.0);
        assert_eq!(totals.total, 150.48);
        assert_eq!(count(&executor, "sessions").await, 1);
    }

    #[tokio::test]
    async fn invalid_model_output_commits_nothing() {
        let (_dir, executor) = file_backed_executor().await;
        // 三次输出全部带非法项（price 为 0），重试预算耗尽
        let bad = r#"{"intent": "create_session",
            "session": {"title": "Dinner"},
            "people": [{"name": "Ali", "items": [{"name": "Water", "price": 0}]}]}"#;
        let assistant = pipeline(vec![bad, bad, bad], executor.clone());

        let err = assistant
            .handle_parse(&parse("receipt with free water", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::Malformed(_)));
        assert_eq!(count(&executor, "sessions").await, 0);
        assert_eq!(count(&executor, "items").await, 0);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing_through_the_pipeline() {
        let (_dir, executor) = file_backed_executor().await;
        let assistant = pipeline(
            vec![
                r#"{"intent": "create_session", "session": {"title": "Lunch"},
                    "people": [{"name": "Ali", "items": [{"name": "Salad", "price": 40}]}]}"#,
                // 第 2 条改名引用了不存在的 person_id：第 1 条的新增也必须回滚
                r#"{"intent": "edit_session_entities", "session_id": 1, "operations": [
                    {"intent": "edit_person", "operation": "add", "new_name": "Sara"},
                    {"intent": "edit_person", "operation": "rename", "person_id": 77, "new_name": "X"}
                ]}"#,
            ],
            executor.clone(),
        );

        assistant.handle_parse(&parse("lunch for Ali", None)).await.unwrap();
        let err = assistant
            .handle_parse(&parse("add Sara and rename someone", Some(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::WriterRejected(_)));
        assert_eq!(count(&executor, "people").await, 1);
    }

    #[tokio::test]
    async fn batch_in_order_lets_new_person_receive_items() {
        let (_dir, executor) = file_backed_executor().await;
        let assistant = pipeline(
            vec![
                r#"{"intent": "create_session", "session": {"title": "Drinks"},
                    "people": [{"name": "Ali"}]}"#,
                r#"{"intent": "edit_session_entities", "session_id": 1, "operations": [
                    {"intent": "edit_person", "operation": "add", "new_name": "Sara"},
                    {"intent": "edit_item", "operation": "add", "to_person_ref": "Sara",
                     "name": "Mojito", "price": 9.5, "quantity": 2}
                ]}"#,
            ],
            executor.clone(),
        );

        assistant.handle_parse(&parse("drinks with Ali", None)).await.unwrap();
        let reply = assistant
            .handle_parse(&parse("add Sara with two mojitos at 9.5", Some(1)))
            .await
            .unwrap();

        assert!(reply.ok);
        assert_eq!(reply.totals.unwrap().subtotal, 19.0);
        let owner: String = sqlx::query_scalar(
            "SELECT p.name FROM items i JOIN people p ON p.id = i.person_id
             WHERE i.name = 'Mojito'",
        )
        .fetch_one(executor.pool())
        .await
        .unwrap();
        assert_eq!(owner, "Sara");
    }

    #[tokio::test]
    async fn edit_by_title_fragment_renames_vat_both_ways() {
        let (_dir, executor) = file_backed_executor().await;
        let assistant = pipeline(
            vec![
                r#"{"intent": "create_session", "session": {"title": "Family Dinner", "vat": 14},
                    "people": [{"name": "Ali", "items": [{"name": "Pasta", "price": 100}]}]}"#,
                r#"{"intent": "edit_session", "session_query": "family dinner",
                    "updates": {"vat": 20}}"#,
            ],
            executor.clone(),
        );

        assistant
            .handle_parse(&parse("family dinner, Ali had pasta for 100, vat 14", None))
            .await
            .unwrap();
        let reply = assistant
            .handle_parse(&parse("raise the vat on the family dinner to 20%", None))
            .await
            .unwrap();

        assert!(reply.ok);
        // 对外字段叫 vat，落库列叫 tax
        let tax: f64 = sqlx::query_scalar("SELECT tax FROM sessions WHERE id = 1")
            .fetch_one(executor.pool())
            .await
            .unwrap();
        assert_eq!(tax, 20.0);
        assert_eq!(reply.totals.unwrap().total, 120.0);
    }

    #[tokio::test]
    async fn context_snapshot_exposes_external_field_names() {
        let (_dir, executor) = file_backed_executor().await;
        let assistant = pipeline(
            vec![
                r#"{"intent": "create_session", "session": {"title": "Brunch", "vat": 5},
                    "people": [{"name": "Ali"}]}"#,
            ],
            executor.clone(),
        );
        assistant.handle_parse(&parse("brunch with Ali, vat 5", None)).await.unwrap();

        let writer = LocalWriter { executor };
        let snapshot = writer.fetch_context("1").await.unwrap();
        let wire = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(wire["vat"], json!(5.0));
        assert!(wire.get("tax").is_none());
    }

    #[tokio::test]
    async fn concurrent_mutations_serialize_on_the_single_writer() {
        let (_dir, executor) = file_backed_executor().await;
        executor
            .execute(&json!({
                "intent": "create_session",
                "session": {"title": "Shared"},
                "people": [
                    {"name": "A", "items": [{"name": "x", "price": 10}]},
                    {"name": "B", "items": [{"name": "y", "price": 20}]}
                ]
            }))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for (item_id, price) in [(1_i64, 11.0_f64), (2, 22.0)] {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .execute(&json!({
                        "intent": "edit_item",
                        "session_id": 1,
                        "operation": "update",
                        "item_id": item_id,
                        "updates": {"price": price}
                    }))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let subtotal: f64 = sqlx::query_scalar("SELECT SUM(price * quantity) FROM items")
            .fetch_one(executor.pool())
            .await
            .unwrap();
        assert_eq!(subtotal, 33.0);
    }

    #[tokio::test]
    async fn concurrent_updates_to_one_item_end_deterministic() {
        let (_dir, executor) = file_backed_executor().await;
        executor
            .execute(&json!({
                "intent": "create_session",
                "session": {"title": "Shared"},
                "people": [{"name": "A", "items": [{"name": "x", "price": 10, "quantity": 1}]}]
            }))
            .await
            .unwrap();

        // 两个事务串行提交：末态必须恰好等于其中一次提交的完整值，不得混合
        let mut handles = Vec::new();
        for (price, quantity) in [(11.0_f64, 3_i64), (22.0, 5)] {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .execute(&json!({
                        "intent": "edit_item",
                        "session_id": 1,
                        "operation": "update",
                        "item_id": 1,
                        "updates": {"price": price, "quantity": quantity}
                    }))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let (price, quantity): (f64, i64) =
            sqlx::query_as("SELECT price, quantity FROM items WHERE id = 1")
                .fetch_one(executor.pool())
                .await
                .unwrap();
        assert!(
            (price, quantity) == (11.0, 3) || (price, quantity) == (22.0, 5),
            "blended write: price={price} quantity={quantity}"
        );
    }
}
