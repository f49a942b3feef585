use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::Text;
use serde_json::Value;

use crate::shared::utils::DbPool;

pub type ResultRow = serde_json::Map<String, Value>;

/// Database rejection, carrying the driver's message verbatim so it can be
/// fed back to the model for repair and surfaced to the caller unchanged.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ExecutionError(pub String);

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn select(&self, sql: &str) -> Result<Vec<ResultRow>, ExecutionError>;
}

#[derive(QueryableByName)]
struct JsonRow {
    #[diesel(sql_type = Text)]
    row_data: String,
}

/// Runs finalized queries against the read-only pool. Rows come back as a
/// `row_to_json` projection so arbitrary SELECT lists keep their column
/// order without compile-time row types.
pub struct PgReadOnlyExecutor {
    pool: DbPool,
}

impl PgReadOnlyExecutor {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for PgReadOnlyExecutor {
    async fn select(&self, sql: &str) -> Result<Vec<ResultRow>, ExecutionError> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| ExecutionError(e.to_string()))?;
        let wrapped = format!(
            "SELECT row_to_json(q)::text AS row_data FROM ({}) q",
            sql.trim().trim_end_matches(';')
        );
        let rows: Vec<JsonRow> = diesel::sql_query(&wrapped)
            .load(&mut conn)
            .map_err(|e| ExecutionError(e.to_string()))?;
        rows.into_iter()
            .map(|row| match serde_json::from_str::<Value>(&row.row_data) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(ExecutionError(format!("unexpected row shape: {other}"))),
                Err(e) => Err(ExecutionError(e.to_string())),
            })
            .collect()
    }
}
