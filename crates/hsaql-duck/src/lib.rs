//! DuckDB executor for SQL against the HSA dataset
//!
//! Every call opens a fresh in-memory DuckDB session, registers the dataset as
//! a view, runs the statement and materializes the full result before the
//! session is dropped. Nothing survives between calls.
//!
//! CSV files are read with the declared column types forced, so a zip code
//! stays text even when every value looks numeric. Parquet files carry their
//! own types; disagreements there show up in `SchemaDescriptor::diff`.

use duckdb::Connection;
use hsaql_schema::{get_schema, ColumnDef, SchemaDescriptor};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod cancel;
mod table;
mod value;

pub use cancel::QueryCancel;
pub use table::{Table, TableColumn};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Dataset file not found: {}", .0.display())]
    DatasetMissing(PathBuf),

    #[error("Unsupported dataset format: {} (expected .parquet or .csv)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Query timeout after {0} ms")]
    Timeout(u64),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Row {row} has {actual} values, expected {expected}")]
    ShapeMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Query worker failed: {0}")]
    Worker(String),
}

/// Resource limits applied to each session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionBudget {
    pub max_memory_mb: Option<u64>,
    pub max_rows: Option<u64>,
    pub threads: Option<u64>,
}

/// Where the queried table comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    /// Parquet or CSV file on disk, read through DuckDB's table functions
    File(PathBuf),
    /// SQL run at session start that creates the table itself
    Fixture(String),
}

impl DatasetSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        DatasetSource::File(path.into())
    }

    pub fn fixture(setup_sql: impl Into<String>) -> Self {
        DatasetSource::Fixture(setup_sql.into())
    }
}

/// Run SQL against the dataset table
///
/// The seam between callers and the embedded engine. Implementations must
/// give up promptly once `cancel` fires, returning an error rather than a
/// partial table.
pub trait SqlEngine: Send + Sync {
    fn execute(&self, sql: &str, cancel: &QueryCancel) -> Result<Table, ExecutionError>;
}

pub struct DuckExecutor {
    source: DatasetSource,
    table: String,
    columns: Vec<ColumnDef>,
    budget: ExecutionBudget,
}

impl DuckExecutor {
    /// Executor for the HSA table over `source`
    pub fn new(source: DatasetSource) -> Self {
        Self::for_schema(source, get_schema())
    }

    /// Executor registering `source` under the schema's table name and types
    pub fn for_schema(source: DatasetSource, schema: &SchemaDescriptor) -> Self {
        Self {
            source,
            table: schema.table().to_string(),
            columns: schema.columns().to_vec(),
            budget: ExecutionBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: ExecutionBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Fail early when a file-backed source cannot be read
    pub fn check_source(&self) -> Result<(), ExecutionError> {
        if let DatasetSource::File(path) = &self.source {
            if !path.is_file() {
                return Err(ExecutionError::DatasetMissing(path.clone()));
            }
            reader_function(path)?;
        }
        Ok(())
    }

    /// Column names and DuckDB types the source actually exposes
    pub fn describe_source(&self) -> Result<Vec<(String, String)>, ExecutionError> {
        let conn = self.open_session()?;

        let query = format!("DESCRIBE SELECT * FROM {}", quote_ident(&self.table));
        let mut stmt = conn.prepare(&query)?;
        let columns = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(columns)
    }

    /// Open an in-memory session with the budget applied and the table registered
    fn open_session(&self) -> Result<Connection, ExecutionError> {
        let conn = Connection::open_in_memory()?;
        self.apply_budget(&conn)?;

        match &self.source {
            DatasetSource::File(path) => {
                if !path.is_file() {
                    return Err(ExecutionError::DatasetMissing(path.clone()));
                }
                let view = format!(
                    "CREATE OR REPLACE VIEW {} AS SELECT * FROM {}",
                    quote_ident(&self.table),
                    self.reader_call(path)?
                );
                conn.execute_batch(&view)?;
            }
            DatasetSource::Fixture(setup_sql) => {
                conn.execute_batch(setup_sql)?;
            }
        }

        Ok(conn)
    }

    /// Table function call reading `path`, with declared types forced for CSV
    fn reader_call(&self, path: &Path) -> Result<String, ExecutionError> {
        let literal = sql_string(&path.to_string_lossy());

        match reader_function(path)? {
            "read_csv" => {
                let types: Vec<String> = self
                    .columns
                    .iter()
                    .map(|c| format!("{}: '{}'", sql_string(&c.name), c.column_type.sql_name()))
                    .collect();
                Ok(format!(
                    "read_csv({}, header = true, types = {{{}}})",
                    literal,
                    types.join(", ")
                ))
            }
            reader => Ok(format!("{}({})", reader, literal)),
        }
    }

    fn apply_budget(&self, conn: &Connection) -> Result<(), ExecutionError> {
        if let Some(max_memory_mb) = self.budget.max_memory_mb {
            let pragma = format!("PRAGMA memory_limit='{}MB'", max_memory_mb);
            conn.execute_batch(&pragma)?;
        }
        if let Some(threads) = self.budget.threads {
            conn.execute_batch(&format!("PRAGMA threads={}", threads))?;
        }
        Ok(())
    }

    fn materialize(&self, conn: &Connection, sql: &str) -> Result<Table, ExecutionError> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;

        let mut names: Option<Vec<String>> = None;
        let mut data = Vec::new();

        while let Some(row) = rows.next()? {
            let meta = row.as_ref();
            let width = meta.column_count();
            if names.is_none() {
                names = Some(meta.column_names());
            }

            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(value::to_json(row.get_ref(i)?));
            }
            data.push(values);

            if let Some(max_rows) = self.budget.max_rows {
                if data.len() as u64 > max_rows {
                    return Err(ExecutionError::BudgetExceeded(format!(
                        "Max rows ({}) exceeded",
                        max_rows
                    )));
                }
            }
        }

        drop(rows);
        // Empty results still carry the projected column names
        let names = names.unwrap_or_else(|| stmt.column_names());

        Table::from_rows(names, data)
    }
}

impl SqlEngine for DuckExecutor {
    fn execute(&self, sql: &str, cancel: &QueryCancel) -> Result<Table, ExecutionError> {
        let conn = self.open_session()?;
        cancel.attach(conn.interrupt_handle())?;

        let table = self.materialize(&conn, sql).map_err(|e| {
            if cancel.is_cancelled() {
                ExecutionError::Cancelled
            } else {
                e
            }
        })?;

        tracing::debug!(
            rows = table.row_count(),
            columns = table.columns().len(),
            "Query materialized"
        );

        Ok(table)
    }
}

fn reader_function(path: &Path) -> Result<&'static str, ExecutionError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("parquet") => Ok("read_parquet"),
        Some("csv") => Ok("read_csv"),
        _ => Err(ExecutionError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_string(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_function() {
        assert_eq!(reader_function(Path::new("hsas.parquet")).unwrap(), "read_parquet");
        assert_eq!(reader_function(Path::new("data/HSAS.CSV")).unwrap(), "read_csv");
        assert!(matches!(
            reader_function(Path::new("hsas.db")),
            Err(ExecutionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("hsa_data"), "\"hsa_data\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(sql_string("o'brien.csv"), "'o''brien.csv'");
    }

    #[test]
    fn test_csv_reader_forces_declared_types() {
        let executor = DuckExecutor::new(DatasetSource::file("data/hsas.csv"));

        let call = executor.reader_call(Path::new("data/hsas.csv")).unwrap();

        assert!(call.starts_with("read_csv('data/hsas.csv', header = true, types = {"));
        assert!(call.contains("'zip_cd_of_residence': 'VARCHAR'"));
        assert!(call.contains("'total_charges': 'BIGINT'"));
        assert_eq!(
            executor.reader_call(Path::new("hsas.parquet")).unwrap(),
            "read_parquet('hsas.parquet')"
        );
    }

    #[test]
    fn test_missing_file_is_reported() {
        let executor = DuckExecutor::new(DatasetSource::file("/nonexistent/hsas.parquet"));

        assert!(matches!(
            executor.check_source(),
            Err(ExecutionError::DatasetMissing(_))
        ));
        assert!(matches!(
            executor.execute("SELECT 1", &QueryCancel::new()),
            Err(ExecutionError::DatasetMissing(_))
        ));
    }

    #[test]
    fn test_fixture_source_needs_no_file() {
        let executor = DuckExecutor::new(DatasetSource::fixture(
            "CREATE TABLE hsa_data (total_cases BIGINT)",
        ));

        assert!(executor.check_source().is_ok());
        assert_eq!(executor.table, hsaql_schema::HSA_TABLE);
    }

    #[test]
    fn test_cancelled_before_start_runs_nothing() {
        let executor = DuckExecutor::new(DatasetSource::fixture(
            "CREATE TABLE hsa_data (total_cases BIGINT)",
        ));
        let cancel = QueryCancel::new();
        cancel.cancel();

        assert!(matches!(
            executor.execute("SELECT * FROM hsa_data", &cancel),
            Err(ExecutionError::Cancelled)
        ));
    }
}
