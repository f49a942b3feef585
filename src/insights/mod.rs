//! Natural-language analytics over the ticket database.
//!
//! One chat turn walks DECIDE -> VALIDATE -> EXECUTE (-> REPAIR) -> ANALYZE.
//! The decision model proposes either a textual answer or a candidate
//! query; candidates are validated and scope-rewritten before every
//! execution attempt, and database rejections are fed back to the model for
//! up to two repair rounds.

pub mod chart;
pub mod executor;
pub mod guard;
pub mod prompts;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{manager_id_for_user, AuthUser, ROLE_MANAGER};
use crate::llm::{ChatMessage, CompletionOptions, DecisionModel, ModelError};
use crate::shared::state::AppState;
use crate::shared::utils::truncate_chars;
use chart::infer_chart_type;
use executor::{QueryExecutor, ResultRow};
use guard::{CallerScope, GuardError, QueryGuard};
use prompts::Prompts;

/// Total VALIDATE -> EXECUTE attempts per turn, counting the first one.
const MAX_EXECUTION_ATTEMPTS: u32 = 3;
/// Byte cap on the row JSON handed to the analysis call.
const ANALYSIS_SAMPLE_BYTES: usize = 3000;

const NO_DATA_TEXT: &str = "No data was found for your request.";
const FALLBACK_ANALYSIS_TEXT: &str = "Here is the data for your request:";

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("The language model is unavailable or returned an error: {0}")]
    ModelUnavailable(String),
    #[error(transparent)]
    Policy(#[from] GuardError),
    #[error("Could not build a working query after {attempts} attempts.\nDatabase error: {last_error}")]
    Failed { attempts: u32, last_error: String },
}

#[derive(Debug)]
enum Decision {
    Text(String),
    Query {
        query: String,
        chart_title: Option<String>,
    },
}

fn parse_decision(raw: &str) -> Result<Decision, ModelError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| ModelError::Malformed(format!("decision is not valid JSON: {e}")))?;
    match value["type"].as_str() {
        Some("text") => Ok(Decision::Text(
            value["text"].as_str().unwrap_or_default().to_string(),
        )),
        Some("query") => Ok(Decision::Query {
            query: value["query"].as_str().unwrap_or_default().to_string(),
            chart_title: value["chart_title"].as_str().map(|s| s.to_string()),
        }),
        _ => Err(ModelError::Malformed(format!(
            "unknown decision type in {raw:?}"
        ))),
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatReply {
    Text {
        text: String,
    },
    Result {
        text: String,
        query: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        chart_type: String,
        chart_title: String,
    },
    Error {
        text: String,
    },
}

pub struct ChatPipeline {
    model: Arc<dyn DecisionModel>,
    executor: Arc<dyn QueryExecutor>,
    guard: QueryGuard,
    prompts: Prompts,
    decide_timeout: Duration,
    analyze_timeout: Duration,
}

impl ChatPipeline {
    pub fn new(
        model: Arc<dyn DecisionModel>,
        executor: Arc<dyn QueryExecutor>,
        guard: QueryGuard,
        prompts: Prompts,
        decide_timeout: Duration,
        analyze_timeout: Duration,
    ) -> Self {
        Self {
            model,
            executor,
            guard,
            prompts,
            decide_timeout,
            analyze_timeout,
        }
    }

    /// Run one caller-scoped chat turn to completion.
    pub async fn run(
        &self,
        messages: &[ChatMessage],
        scope: &CallerScope,
    ) -> Result<ChatReply, TurnError> {
        let turn = Uuid::new_v4();
        let question = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let mut conversation = vec![ChatMessage::system(self.prompts.render_system(scope))];
        conversation.extend_from_slice(messages);
        let raw = self
            .model
            .complete(
                &conversation,
                CompletionOptions {
                    structured: true,
                    temperature: 0.1,
                    timeout: Some(self.decide_timeout),
                },
            )
            .await
            .map_err(|e| TurnError::ModelUnavailable(e.to_string()))?;
        let decision =
            parse_decision(&raw).map_err(|e| TurnError::ModelUnavailable(e.to_string()))?;

        let (mut candidate, chart_title) = match decision {
            Decision::Text(text) => {
                debug!("turn {turn}: answered with text");
                return Ok(ChatReply::Text { text });
            }
            Decision::Query { query, chart_title } => (query, chart_title),
        };

        let mut last_error = String::new();
        let mut attempts = 0u32;
        while attempts < MAX_EXECUTION_ATTEMPTS {
            let finalized = self.guard.finalize(&candidate, scope)?;
            attempts += 1;
            debug!("turn {turn}: executing attempt {attempts}: {finalized}");
            match self.executor.select(&finalized).await {
                Ok(rows) => {
                    info!("turn {turn}: query succeeded with {} rows", rows.len());
                    return Ok(self
                        .render_result(&question, finalized, rows, chart_title.clone())
                        .await);
                }
                Err(e) => {
                    last_error = e.0;
                    warn!("turn {turn}: attempt {attempts} failed: {last_error}");
                    if attempts < MAX_EXECUTION_ATTEMPTS {
                        match self.repair(scope, &question, &candidate, &last_error).await {
                            Ok(repaired) => candidate = repaired,
                            Err(e) => {
                                // A broken repair call is not worth retrying;
                                // surface the database error we already have.
                                warn!("turn {turn}: repair call failed, giving up: {e}");
                                break;
                            }
                        }
                    }
                }
            }
        }

        Err(TurnError::Failed {
            attempts,
            last_error,
        })
    }

    async fn repair(
        &self,
        scope: &CallerScope,
        question: &str,
        candidate: &str,
        db_error: &str,
    ) -> Result<String, ModelError> {
        let prior = serde_json::json!({"type": "query", "query": candidate}).to_string();
        let messages = vec![
            ChatMessage::system(self.prompts.render_system(scope)),
            ChatMessage::user(question),
            ChatMessage::assistant(prior),
            ChatMessage::user(format!(
                "Your query was rejected by PostgreSQL:\n{db_error}\n\nFix it and return a new JSON object with a \"query\" field."
            )),
        ];
        let raw = self
            .model
            .complete(
                &messages,
                CompletionOptions {
                    structured: true,
                    temperature: 0.1,
                    timeout: None,
                },
            )
            .await?;
        match parse_decision(&raw)? {
            Decision::Query { query, .. } => Ok(query),
            Decision::Text(_) => Err(ModelError::Malformed(
                "repair produced no query".to_string(),
            )),
        }
    }

    async fn render_result(
        &self,
        question: &str,
        query: String,
        rows: Vec<ResultRow>,
        chart_title: Option<String>,
    ) -> ChatReply {
        let columns: Vec<String> = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        let text = if rows.is_empty() {
            NO_DATA_TEXT.to_string()
        } else {
            self.analyze(question, &rows).await
        };
        let row_values = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|col| row.get(col).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        ChatReply::Result {
            text,
            query,
            columns,
            rows: row_values,
            chart_type: infer_chart_type(question).to_string(),
            chart_title: chart_title.unwrap_or_else(|| question.to_string()),
        }
    }

    /// Ask the model for a prose summary of the rows. Failures here are
    /// non-fatal; the caller still gets the raw rows.
    async fn analyze(&self, question: &str, rows: &[ResultRow]) -> String {
        let sample = serde_json::to_string(rows).unwrap_or_default();
        let messages = vec![
            ChatMessage::system(self.prompts.chat.analytics.clone()),
            ChatMessage::user(format!(
                "User question: {question}\nData (JSON, truncated): {}",
                truncate_chars(&sample, ANALYSIS_SAMPLE_BYTES)
            )),
        ];
        match self
            .model
            .complete(
                &messages,
                CompletionOptions {
                    structured: false,
                    temperature: 0.3,
                    timeout: Some(self.analyze_timeout),
                },
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("analysis call failed, falling back to generic text: {e}");
                FALLBACK_ANALYSIS_TEXT.to_string()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, (StatusCode, Json<ChatReply>)> {
    if req.messages.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ChatReply::Error {
                text: "History is empty".to_string(),
            }),
        ));
    }

    let manager_id = if user.role == ROLE_MANAGER {
        manager_id_for_user(&state.conn, user.user_id)
    } else {
        None
    };
    let scope = CallerScope {
        company_id: user.company_id,
        manager_id,
    };

    match state.pipeline.run(&req.messages, &scope).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            let status = match e {
                TurnError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                TurnError::Policy(_) | TurnError::Failed { .. } => StatusCode::BAD_REQUEST,
            };
            Err((status, Json(ChatReply::Error { text: e.to_string() })))
        }
    }
}

pub fn configure_insights_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/insights/chat", post(chat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use super::executor::ExecutionError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedModel {
        responses: Mutex<VecDeque<Result<String, ModelError>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<String, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DecisionModel for ScriptedModel {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _options: CompletionOptions,
        ) -> Result<String, ModelError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Request("script exhausted".to_string())))
        }
    }

    struct ScriptedExecutor {
        responses: Mutex<VecDeque<Result<Vec<ResultRow>, ExecutionError>>>,
        executed: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(responses: Vec<Result<Vec<ResultRow>, ExecutionError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                executed: Mutex::new(Vec::new()),
            })
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueryExecutor for ScriptedExecutor {
        async fn select(&self, sql: &str) -> Result<Vec<ResultRow>, ExecutionError> {
            self.executed.lock().unwrap().push(sql.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ExecutionError("script exhausted".to_string())))
        }
    }

    fn pipeline(model: Arc<ScriptedModel>, executor: Arc<ScriptedExecutor>) -> ChatPipeline {
        ChatPipeline::new(
            model,
            executor,
            QueryGuard::default(),
            Prompts {
                chat: prompts::ChatPrompts {
                    system: "scope {company_id}/{manager_id}".to_string(),
                    analytics: "summarize".to_string(),
                },
            },
            Duration::from_secs(20),
            Duration::from_secs(15),
        )
    }

    fn scope() -> CallerScope {
        CallerScope {
            company_id: 7,
            manager_id: None,
        }
    }

    fn question(text: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::user(text)]
    }

    fn row(pairs: &[(&str, Value)]) -> ResultRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn decision_query(query: &str) -> Result<String, ModelError> {
        Ok(serde_json::json!({"type": "query", "query": query}).to_string())
    }

    #[tokio::test]
    async fn test_text_decision_passes_through() {
        let model = ScriptedModel::new(vec![Ok(
            r#"{"type": "text", "text": "We have 12 offices."}"#.to_string()
        )]);
        let executor = ScriptedExecutor::new(vec![]);
        let reply = pipeline(model.clone(), executor.clone())
            .run(&question("how many offices?"), &scope())
            .await
            .unwrap();
        assert!(matches!(reply, ChatReply::Text { text } if text == "We have 12 offices."));
        assert!(executor.executed().is_empty());
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_query_success_returns_rows_and_analysis() {
        let model = ScriptedModel::new(vec![
            decision_query("SELECT segment, COUNT(*) AS count FROM tickets GROUP BY segment"),
            Ok("Mostly VIP tickets.".to_string()),
        ]);
        let executor = ScriptedExecutor::new(vec![Ok(vec![
            row(&[("segment", Value::from("VIP")), ("count", Value::from(9))]),
            row(&[("segment", Value::from("Mass")), ("count", Value::from(3))]),
        ])]);
        let reply = pipeline(model.clone(), executor.clone())
            .run(&question("ticket counts by segment"), &scope())
            .await
            .unwrap();

        let ChatReply::Result {
            text,
            query,
            columns,
            rows,
            chart_type,
            chart_title,
        } = reply
        else {
            panic!("expected a result reply");
        };
        assert_eq!(text, "Mostly VIP tickets.");
        assert_eq!(
            query,
            "SELECT segment, COUNT(*) AS count FROM tickets WHERE tickets.company_id = 7 GROUP BY segment"
        );
        assert_eq!(columns, vec!["segment", "count"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Value::from("VIP"), Value::from(9)]);
        assert_eq!(chart_type, "bar");
        assert_eq!(chart_title, "ticket counts by segment");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_zero_rows_short_circuits_analysis() {
        let model = ScriptedModel::new(vec![decision_query("SELECT id FROM tickets")]);
        let executor = ScriptedExecutor::new(vec![Ok(vec![])]);
        let reply = pipeline(model.clone(), executor.clone())
            .run(&question("any tickets?"), &scope())
            .await
            .unwrap();
        let ChatReply::Result { text, columns, rows, .. } = reply else {
            panic!("expected a result reply");
        };
        assert_eq!(text, NO_DATA_TEXT);
        assert!(columns.is_empty());
        assert!(rows.is_empty());
        // Only the decision call; analysis must not run on empty results.
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_three_failures_surface_last_error() {
        let model = ScriptedModel::new(vec![
            decision_query("SELECT bogus FROM tickets"),
            decision_query("SELECT still_bogus FROM tickets"),
            decision_query("SELECT nope FROM tickets"),
        ]);
        let executor = ScriptedExecutor::new(vec![
            Err(ExecutionError("column \"bogus\" does not exist".to_string())),
            Err(ExecutionError("column \"still_bogus\" does not exist".to_string())),
            Err(ExecutionError("column \"nope\" does not exist".to_string())),
        ]);
        let err = pipeline(model.clone(), executor.clone())
            .run(&question("broken"), &scope())
            .await
            .unwrap_err();
        match err {
            TurnError::Failed { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "column \"nope\" does not exist");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(executor.executed().len(), 3);
        // One decision call plus two repair calls.
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_repair_call_abandons_immediately() {
        let model = ScriptedModel::new(vec![
            decision_query("SELECT bogus FROM tickets"),
            Err(ModelError::Request("connection refused".to_string())),
        ]);
        let executor = ScriptedExecutor::new(vec![Err(ExecutionError(
            "column \"bogus\" does not exist".to_string(),
        ))]);
        let err = pipeline(model.clone(), executor.clone())
            .run(&question("broken"), &scope())
            .await
            .unwrap_err();
        match err {
            TurnError::Failed { attempts, last_error } => {
                assert_eq!(attempts, 1);
                assert_eq!(last_error, "column \"bogus\" does not exist");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_analysis_failure_falls_back_to_generic_text() {
        let model = ScriptedModel::new(vec![
            decision_query("SELECT id FROM tickets"),
            Err(ModelError::Request("timed out".to_string())),
        ]);
        let executor =
            ScriptedExecutor::new(vec![Ok(vec![row(&[("id", Value::from(1))])])]);
        let reply = pipeline(model.clone(), executor.clone())
            .run(&question("tickets"), &scope())
            .await
            .unwrap();
        let ChatReply::Result { text, rows, .. } = reply else {
            panic!("expected a result reply");
        };
        assert_eq!(text, FALLBACK_ANALYSIS_TEXT);
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_at_decide_is_terminal() {
        let model = ScriptedModel::new(vec![Err(ModelError::Request(
            "connection refused".to_string(),
        ))]);
        let executor = ScriptedExecutor::new(vec![]);
        let err = pipeline(model, executor.clone())
            .run(&question("anything"), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::ModelUnavailable(_)));
        assert!(executor.executed().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_decision_is_model_unavailable() {
        let model = ScriptedModel::new(vec![Ok("not json at all".to_string())]);
        let executor = ScriptedExecutor::new(vec![]);
        let err = pipeline(model, executor.clone())
            .run(&question("anything"), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_policy_violation_never_reaches_executor() {
        let model = ScriptedModel::new(vec![decision_query("DELETE FROM tickets")]);
        let executor = ScriptedExecutor::new(vec![]);
        let err = pipeline(model.clone(), executor.clone())
            .run(&question("wipe it"), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Policy(GuardError::ForbiddenOperation)));
        assert!(executor.executed().is_empty());
        // Policy violations are terminal; no repair call happens.
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_repaired_query_is_revalidated() {
        let model = ScriptedModel::new(vec![
            decision_query("SELECT bogus FROM tickets"),
            decision_query("DROP TABLE tickets"),
        ]);
        let executor = ScriptedExecutor::new(vec![Err(ExecutionError(
            "column \"bogus\" does not exist".to_string(),
        ))]);
        let err = pipeline(model.clone(), executor.clone())
            .run(&question("broken"), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Policy(_)));
        assert_eq!(executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_manager_scope_reaches_executed_query() {
        let model = ScriptedModel::new(vec![
            decision_query("SELECT id FROM tickets"),
            Ok("One ticket.".to_string()),
        ]);
        let executor =
            ScriptedExecutor::new(vec![Ok(vec![row(&[("id", Value::from(5))])])]);
        pipeline(model, executor.clone())
            .run(
                &question("my tickets"),
                &CallerScope {
                    company_id: 7,
                    manager_id: Some(3),
                },
            )
            .await
            .unwrap();
        let executed = executor.executed();
        assert!(executed[0].contains("assignments.manager_id = 3"), "got: {}", executed[0]);
        assert!(executed[0].contains("tickets.company_id = 7"));
    }

    #[test]
    fn test_parse_decision_variants() {
        assert!(matches!(
            parse_decision(r#"{"type": "text", "text": "hi"}"#),
            Ok(Decision::Text(t)) if t == "hi"
        ));
        assert!(matches!(
            parse_decision(r#"{"type": "query", "query": "SELECT 1", "chart_title": "t"}"#),
            Ok(Decision::Query { chart_title: Some(t), .. }) if t == "t"
        ));
        assert!(parse_decision(r#"{"type": "mystery"}"#).is_err());
        assert!(parse_decision("garbage").is_err());
    }
}
