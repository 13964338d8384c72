//! Schema registry for the HSA dataset
//!
//! Holds the fixed description of the `hsa_data` table. The same descriptor is
//! serialized into every translation prompt and names the view the executor
//! registers, so the model and the engine always agree on column names.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Name of the view every query runs against
pub const HSA_TABLE: &str = "hsa_data";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Duplicate column in schema: {0}")]
    DuplicateColumn(String),

    #[error("Table name must not be empty")]
    EmptyTableName,
}

/// Declared column type, named after the DuckDB type it maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    #[serde(rename = "BIGINT")]
    Integer,
    #[serde(rename = "VARCHAR")]
    Text,
    #[serde(rename = "DOUBLE")]
    Float,
    #[serde(rename = "BOOLEAN")]
    Boolean,
    #[serde(rename = "DATE")]
    Date,
}

impl ColumnType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Text => "VARCHAR",
            ColumnType::Float => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    #[serde(rename = "column_name")]
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Ordered column list for a single named table
///
/// Column names are unique. Order is kept for display and prompting only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaDescriptor {
    table: String,
    columns: Vec<ColumnDef>,
}

/// Differences between the declared schema and a dataset's real columns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDrift {
    /// Declared but absent from the dataset
    pub missing: Vec<String>,
    /// Present in the dataset but not declared
    pub undeclared: Vec<String>,
    /// Present in both, with a different type in the dataset
    pub mismatched: Vec<TypeMismatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMismatch {
    pub column: String,
    pub declared: ColumnType,
    pub actual: String,
}

impl SchemaDrift {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.undeclared.is_empty() && self.mismatched.is_empty()
    }
}

impl SchemaDescriptor {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDef>) -> Result<Self, SchemaError> {
        let table = table.into();
        if table.trim().is_empty() {
            return Err(SchemaError::EmptyTableName);
        }

        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
        }

        Ok(Self { table, columns })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Pretty JSON column list embedded in translation prompts
    pub fn to_prompt_json(&self) -> String {
        // Vec<ColumnDef> of plain strings and unit variants cannot fail to serialize
        serde_json::to_string_pretty(&self.columns).unwrap_or_default()
    }

    /// Format the schema as a markdown table
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!("## Table: `{}`\n\n", self.table));
        md.push_str("| Column | Type |\n");
        md.push_str("|--------|------|\n");

        for col in &self.columns {
            md.push_str(&format!("| `{}` | {} |\n", col.name, col.column_type));
        }

        md
    }

    /// Compare declared columns against the `(name, type)` pairs a dataset exposes
    ///
    /// Types are compared by DuckDB type name, ignoring case.
    pub fn diff<N: AsRef<str>, T: AsRef<str>>(&self, actual: &[(N, T)]) -> SchemaDrift {
        let mut drift = SchemaDrift::default();

        for col in &self.columns {
            match actual.iter().find(|(name, _)| name.as_ref() == col.name) {
                None => drift.missing.push(col.name.clone()),
                Some((_, ty)) if !ty.as_ref().eq_ignore_ascii_case(col.column_type.sql_name()) => {
                    drift.mismatched.push(TypeMismatch {
                        column: col.name.clone(),
                        declared: col.column_type,
                        actual: ty.as_ref().to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        drift.undeclared = actual
            .iter()
            .map(|(name, _)| name.as_ref())
            .filter(|name| !self.contains(name))
            .map(String::from)
            .collect();

        drift
    }
}

fn hsa_schema() -> SchemaDescriptor {
    let columns = vec![
        ColumnDef::new("total_charges", ColumnType::Integer),
        ColumnDef::new("medicare_prov_num", ColumnType::Integer),
        ColumnDef::new("zip_cd_of_residence", ColumnType::Text),
        ColumnDef::new("total_days_of_care", ColumnType::Integer),
        ColumnDef::new("total_cases", ColumnType::Integer),
    ];

    // Static definition; uniqueness is covered by test_builtin_schema_is_valid
    SchemaDescriptor {
        table: HSA_TABLE.to_string(),
        columns,
    }
}

/// The HSA dataset schema, built on first use and shared afterwards
pub fn get_schema() -> &'static SchemaDescriptor {
    static SCHEMA: OnceLock<SchemaDescriptor> = OnceLock::new();
    SCHEMA.get_or_init(hsa_schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_schema_is_cached() {
        let first = get_schema();
        let second = get_schema();

        assert!(std::ptr::eq(first, second));
        assert_eq!(first, second);
        assert_eq!(first.table(), HSA_TABLE);
        assert_eq!(
            first.column_names(),
            vec![
                "total_charges",
                "medicare_prov_num",
                "zip_cd_of_residence",
                "total_days_of_care",
                "total_cases",
            ]
        );
    }

    #[test]
    fn test_builtin_schema_is_valid() {
        let schema = get_schema();
        let rebuilt = SchemaDescriptor::new(schema.table(), schema.columns().to_vec()).unwrap();
        assert_eq!(&rebuilt, schema);
    }

    #[test]
    fn test_column_lookup() {
        let schema = get_schema();

        let zip = schema.column("zip_cd_of_residence").unwrap();
        assert_eq!(zip.column_type, ColumnType::Text);
        assert!(schema.contains("total_cases"));
        assert!(!schema.contains("state"));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = SchemaDescriptor::new(
            "t",
            vec![
                ColumnDef::new("a", ColumnType::Integer),
                ColumnDef::new("a", ColumnType::Text),
            ],
        )
        .unwrap_err();

        assert_eq!(err, SchemaError::DuplicateColumn("a".to_string()));
    }

    #[test]
    fn test_empty_table_rejected() {
        let err = SchemaDescriptor::new("  ", vec![]).unwrap_err();
        assert_eq!(err, SchemaError::EmptyTableName);
    }

    #[test]
    fn test_prompt_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&get_schema().to_prompt_json()).unwrap();
        let cols = json.as_array().unwrap();

        assert_eq!(cols.len(), 5);
        assert_eq!(cols[2]["column_name"], "zip_cd_of_residence");
        assert_eq!(cols[2]["column_type"], "VARCHAR");
        assert_eq!(cols[0]["column_type"], "BIGINT");
    }

    #[test]
    fn test_markdown_lists_every_column() {
        let md = get_schema().to_markdown();

        assert!(md.contains("`hsa_data`"));
        for name in get_schema().column_names() {
            assert!(md.contains(name));
        }
    }

    fn declared_pairs() -> Vec<(String, String)> {
        get_schema()
            .columns()
            .iter()
            .map(|c| (c.name.clone(), c.column_type.sql_name().to_string()))
            .collect()
    }

    #[test]
    fn test_diff_reports_drift() {
        let drift = get_schema().diff(&[
            ("total_charges", "BIGINT"),
            ("medicare_prov_num", "BIGINT"),
            ("zip_cd_of_residence", "VARCHAR"),
            ("total_cases", "BIGINT"),
            ("state", "VARCHAR"),
        ]);

        assert_eq!(drift.missing, vec!["total_days_of_care".to_string()]);
        assert_eq!(drift.undeclared, vec!["state".to_string()]);
        assert!(drift.mismatched.is_empty());
        assert!(!drift.is_empty());

        let clean = get_schema().diff(&declared_pairs());
        assert!(clean.is_empty());
    }

    #[test]
    fn test_diff_reports_type_mismatch() {
        let mut actual = declared_pairs();
        actual[2].1 = "BIGINT".to_string();
        actual[0].1 = "bigint".to_string();

        let drift = get_schema().diff(&actual);

        assert!(drift.missing.is_empty());
        assert!(drift.undeclared.is_empty());
        assert_eq!(
            drift.mismatched,
            vec![TypeMismatch {
                column: "zip_cd_of_residence".to_string(),
                declared: ColumnType::Text,
                actual: "BIGINT".to_string(),
            }]
        );
    }
}
