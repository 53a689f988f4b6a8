//! Tasks and schema rendering
//!
//! A task is one benchmark item: a question, optional evidence, and the
//! schemas of the tables in its database. Tasks are read-only once loaded.

use crate::error::{GuidedSqlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub column_name: String,
    pub data_type: String,

    /// Human-readable column name, when it differs from the identifier
    #[serde(default)]
    pub expanded_name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub value_description: Option<String>,

    #[serde(default)]
    pub value_examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Copy of this table keeping only the named columns, in schema order
    pub fn project(&self, column_names: &[String]) -> TableSchema {
        let wanted: HashSet<String> = column_names.iter().map(|c| c.to_lowercase()).collect();
        TableSchema {
            table_name: self.table_name.clone(),
            columns: self
                .columns
                .iter()
                .filter(|c| wanted.contains(&c.column_name.to_lowercase()))
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub question_id: u64,
    pub db_id: String,
    pub question: String,

    /// Evidence / hint text accompanying the question
    #[serde(default)]
    pub evidence: String,

    #[serde(default)]
    pub table_schemas: Vec<TableSchema>,
}

#[derive(Debug, Deserialize)]
struct SubsetEntry {
    question_id: u64,
}

/// Load a JSON array of tasks
pub fn load_tasks(path: impl AsRef<Path>) -> Result<Vec<Task>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        GuidedSqlError::Task(format!("Failed to read tasks file {}: {}", path.display(), e))
    })?;
    let tasks: Vec<Task> = serde_json::from_str(&content)?;
    Ok(tasks)
}

/// Keep only the tasks listed in a subset file
pub fn filter_by_subset(tasks: Vec<Task>, subset_path: impl AsRef<Path>) -> Result<Vec<Task>> {
    let content = std::fs::read_to_string(subset_path.as_ref())?;
    let entries: Vec<SubsetEntry> = serde_json::from_str(&content)?;
    let ids: HashSet<u64> = entries.into_iter().map(|e| e.question_id).collect();
    Ok(tasks.into_iter().filter(|t| ids.contains(&t.question_id)).collect())
}

/// `<db_root>/<db_id>/<db_id>.sqlite`
pub fn db_path(db_root: impl AsRef<Path>, db_id: &str) -> PathBuf {
    db_root.as_ref().join(db_id).join(format!("{}.sqlite", db_id))
}

/// Render a table as a `CREATE TABLE` statement with column comments
pub fn render_table_ddl(table: &TableSchema) -> String {
    let mut lines = Vec::with_capacity(table.columns.len() + 2);
    lines.push(format!("CREATE TABLE `{}` (", table.table_name));

    let count = table.columns.len();
    for (idx, column) in table.columns.iter().enumerate() {
        let separator = if idx + 1 < count { "," } else { "" };
        let mut line = format!("    `{}` {}{}", column.column_name, column.data_type, separator);

        let mut notes = Vec::new();
        if let Some(name) = column.expanded_name.as_deref().filter(|n| !n.is_empty()) {
            notes.push(format!("name: {}", name));
        }
        if let Some(desc) = column.description.as_deref().filter(|d| !d.is_empty()) {
            notes.push(format!("description: {}", desc));
        }
        if let Some(values) = column.value_description.as_deref().filter(|v| !v.is_empty()) {
            notes.push(format!("values: {}", values));
        }
        if !column.value_examples.is_empty() {
            notes.push(format!("examples: {}", column.value_examples.join(", ")));
        }
        if !notes.is_empty() {
            line.push_str(&format!(" -- {}", notes.join("; ")));
        }
        lines.push(line);
    }

    lines.push(");".to_string());
    lines.join("\n")
}

/// Render every table of a schema, separated by newlines
pub fn render_schema(tables: &[TableSchema]) -> String {
    tables.iter().map(render_table_ddl).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_table() -> TableSchema {
        TableSchema {
            table_name: "account".to_string(),
            columns: vec![
                ColumnSchema {
                    column_name: "account_id".to_string(),
                    data_type: "INTEGER".to_string(),
                    expanded_name: None,
                    description: None,
                    value_description: None,
                    value_examples: vec![],
                },
                ColumnSchema {
                    column_name: "frequency".to_string(),
                    data_type: "TEXT".to_string(),
                    expanded_name: Some("statement frequency".to_string()),
                    description: None,
                    value_description: Some("POPLATEK MESICNE = monthly".to_string()),
                    value_examples: vec!["POPLATEK MESICNE".to_string()],
                },
            ],
        }
    }

    #[test]
    fn test_render_table_ddl() {
        let ddl = render_table_ddl(&account_table());
        assert!(ddl.starts_with("CREATE TABLE `account` ("));
        assert!(ddl.contains("`account_id` INTEGER,"));
        assert!(ddl.contains("`frequency` TEXT -- name: statement frequency"));
        assert!(ddl.ends_with(");"));
    }

    #[test]
    fn test_project_is_case_insensitive() {
        let projected = account_table().project(&["FREQUENCY".to_string()]);
        assert_eq!(projected.columns.len(), 1);
        assert_eq!(projected.columns[0].column_name, "frequency");
    }

    #[test]
    fn test_db_path() {
        let path = db_path("/data/dev", "financial");
        assert_eq!(path, PathBuf::from("/data/dev/financial/financial.sqlite"));
    }

    #[test]
    fn test_filter_by_subset() {
        let dir = tempfile::tempdir().unwrap();
        let subset = dir.path().join("subset.json");
        std::fs::write(&subset, r#"[{"question_id": 2}]"#).unwrap();

        let tasks = (1..=3)
            .map(|id| Task {
                question_id: id,
                db_id: "financial".to_string(),
                question: format!("q{}", id),
                evidence: String::new(),
                table_schemas: vec![],
            })
            .collect();

        let filtered = filter_by_subset(tasks, &subset).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].question_id, 2);
    }
}
