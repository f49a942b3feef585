#[cfg(test)]
mod chat_pipeline_integration_tests {
    use async_trait::async_trait;
    use deskserver::insights::executor::{ExecutionError, QueryExecutor, ResultRow};
    use deskserver::insights::guard::{CallerScope, QueryGuard, DEFAULT_DENYLIST};
    use deskserver::insights::prompts::{ChatPrompts, Prompts};
    use deskserver::insights::{ChatPipeline, ChatReply};
    use deskserver::llm::{ChatMessage, CompletionOptions, DecisionModel, ModelError};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct ScriptedModel {
        responses: Mutex<VecDeque<Result<String, ModelError>>>,
    }

    #[async_trait]
    impl DecisionModel for ScriptedModel {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _options: CompletionOptions,
        ) -> Result<String, ModelError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Request("script exhausted".to_string())))
        }
    }

    struct RecordingExecutor {
        rows: Vec<ResultRow>,
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryExecutor for RecordingExecutor {
        async fn select(&self, sql: &str) -> Result<Vec<ResultRow>, ExecutionError> {
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(self.rows.clone())
        }
    }

    fn prompts() -> Prompts {
        Prompts {
            chat: ChatPrompts {
                system: "company {company_id}, manager {manager_id}".to_string(),
                analytics: "summarize".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_company_scoping_reaches_the_database() {
        // The canonical flow: the model proposes an unscoped aggregate and
        // the executed statement carries the caller's company filter.
        let model = Arc::new(ScriptedModel {
            responses: Mutex::new(
                vec![
                    Ok(serde_json::json!({
                        "type": "query",
                        "query": "SELECT segment, COUNT(*) FROM tickets GROUP BY segment",
                    })
                    .to_string()),
                    Ok("Counts by segment.".to_string()),
                ]
                .into(),
            ),
        });
        let mut row = ResultRow::new();
        row.insert("segment".to_string(), Value::from("VIP"));
        row.insert("count".to_string(), Value::from(4));
        let executor = Arc::new(RecordingExecutor {
            rows: vec![row],
            executed: Mutex::new(Vec::new()),
        });

        let pipeline = ChatPipeline::new(
            model,
            executor.clone(),
            QueryGuard::new(DEFAULT_DENYLIST),
            prompts(),
            Duration::from_secs(20),
            Duration::from_secs(15),
        );
        let reply = pipeline
            .run(
                &[ChatMessage::user("show ticket counts by segment")],
                &CallerScope {
                    company_id: 7,
                    manager_id: None,
                },
            )
            .await
            .unwrap();

        let executed = executor.executed.lock().unwrap().clone();
        assert_eq!(
            executed,
            vec![
                "SELECT segment, COUNT(*) FROM tickets WHERE tickets.company_id = 7 GROUP BY segment"
                    .to_string()
            ]
        );
        let ChatReply::Result { columns, rows, .. } = reply else {
            panic!("expected a result reply");
        };
        assert_eq!(columns, vec!["segment", "count"]);
        assert_eq!(rows, vec![vec![Value::from("VIP"), Value::from(4)]]);
    }
}
