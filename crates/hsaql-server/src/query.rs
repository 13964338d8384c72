//! Query execution for the server
//!
//! DuckDB work is blocking, so every statement runs on the blocking pool
//! under a wall-clock limit. A timed-out query is interrupted inside the
//! engine and yields an error, never a partial table.

use hsaql_duck::{ExecutionError, QueryCancel, SqlEngine, Table};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::translate::{QueryTranslator, TranslationError};

/// Canned questions offered to new users
pub const EXAMPLE_QUESTIONS: [&str; 3] = [
    "Calculate the average total_charges by zip_cd_of_residence",
    "For each zip_cd_of_residence, calculate the sum of total_charges",
    "SELECT * FROM hsa_data WHERE total_days_of_care > 40 LIMIT 30;",
];

#[derive(Debug, Error)]
pub enum AskError {
    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error("Error executing query: {source}")]
    Execution {
        sql: String,
        #[source]
        source: ExecutionError,
    },
}

/// SQL that was run together with its result
#[derive(Debug)]
pub struct Answer {
    pub sql: String,
    pub table: Table,
}

#[derive(Clone)]
pub struct QueryService {
    engine: Arc<dyn SqlEngine>,
    timeout: Duration,
}

impl QueryService {
    pub fn new(engine: Arc<dyn SqlEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Run `sql` against the dataset and materialize the result
    pub async fn execute(&self, sql: &str) -> Result<Table, ExecutionError> {
        let engine = Arc::clone(&self.engine);
        let statement = sql.to_string();
        let started = Instant::now();
        let cancel = QueryCancel::new();
        let worker_cancel = cancel.clone();

        let task = tokio::task::spawn_blocking(move || engine.execute(&statement, &worker_cancel));

        let table = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                // Interrupt the statement still running on the blocking pool
                cancel.cancel();
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "Query timed out");
                return Err(ExecutionError::Timeout(self.timeout.as_millis() as u64));
            }
            Ok(Err(join_error)) => return Err(ExecutionError::Worker(join_error.to_string())),
            Ok(Ok(result)) => result?,
        };

        crate::log_event!(
            level: tracing::Level::INFO,
            event: "query_executed",
            duration_ms: started.elapsed().as_millis(),
            rows: table.row_count()
        );

        Ok(table)
    }
}

/// Whether `input` is already SQL rather than a question
pub fn is_direct_sql(input: &str) -> bool {
    input
        .trim_start()
        .get(..6)
        .map(|head| head.eq_ignore_ascii_case("select"))
        .unwrap_or(false)
}

/// Run SQL directly, or translate a question first and run the result
pub async fn ask(
    translator: &QueryTranslator,
    queries: &QueryService,
    input: &str,
) -> Result<Answer, AskError> {
    let sql = if is_direct_sql(input) {
        input.trim().to_string()
    } else {
        translator.translate(input).await?
    };

    match queries.execute(&sql).await {
        Ok(table) => Ok(Answer { sql, table }),
        Err(source) => Err(AskError::Execution { sql, source }),
    }
}

/// Convert a table to row objects keyed by column name
pub fn table_to_json(table: &Table) -> serde_json::Value {
    let names = table.column_names();

    let rows: Vec<serde_json::Value> = table
        .rows()
        .map(|row| {
            let mut row_obj = serde_json::Map::new();
            for (name, value) in names.iter().zip(row) {
                row_obj.insert(name.to_string(), value.clone());
            }
            serde_json::Value::Object(row_obj)
        })
        .collect();

    json!({
        "columns": names,
        "rows": rows,
        "row_count": table.row_count()
    })
}
