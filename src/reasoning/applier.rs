//! LLM Action Applier
//!
//! Default `ActionApplier`: renders a prompt for the chosen action, asks the
//! model for candidate continuations, and turns each parseable completion
//! into a child state. Unparseable completions are dropped, so an action can
//! legitimately yield no children.

use crate::error::Result;
use crate::execution::{execute_blocking, format_execution_result, SqlOracle};
use crate::llm::{LanguageModel, ModelSession};
use crate::reasoning::actions::{ActionApplier, ActionKind};
use crate::reasoning::node::{NodeState, PathView};
use crate::task::{render_schema, TableSchema};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

lazy_static! {
    static ref SQL_BLOCK: Regex = Regex::new(r"(?s)```sql\s*(.*?)```").unwrap();
    pub(crate) static ref JSON_BLOCK: Regex = Regex::new(r"(?s)```json\s*(.*?)```").unwrap();
    static ref BARE_SQL: Regex = Regex::new(r"(?is)^\s*(SELECT|WITH)\b").unwrap();
}

/// Sampling parameters for action prompts
#[derive(Debug, Clone)]
pub struct ApplierSettings {
    pub temperature: f64,
    pub max_tokens: u32,
    pub candidates_per_action: usize,
    pub sql_timeout: Duration,
}

pub struct LlmActionApplier<M, O> {
    model: M,
    oracle: Arc<O>,
    settings: ApplierSettings,
}

impl<M: LanguageModel, O: SqlOracle + 'static> LlmActionApplier<M, O> {
    pub fn new(model: M, oracle: O, settings: ApplierSettings) -> Self {
        Self {
            model,
            oracle: Arc::new(oracle),
            settings,
        }
    }

    async fn prompt_for(&self, action: ActionKind, view: &PathView<'_>) -> String {
        let ctx = view.context();
        let state = &view.current().state;
        let question = state
            .rephrased_question
            .as_deref()
            .unwrap_or(&ctx.task.question);
        let schema = state
            .selected_schema_context
            .as_deref()
            .unwrap_or(&ctx.schema_context);

        let mut parts = vec![
            format!("Database Schema:\n{}", schema),
            format!("Question: {}", question),
        ];
        if !ctx.task.evidence.is_empty() {
            parts.push(format!("Hint: {}", ctx.task.evidence));
        }
        if let Some(values) = &state.identified_column_values {
            parts.push(format!("Identified Column Values:\n{}", values));
        }
        if let Some(functions) = &state.identified_column_functions {
            parts.push(format!("Identified Column Functions:\n{}", functions));
        }

        let instruction = match action {
            ActionKind::Rephrase => format!(
                "Rephrase the question so it is unambiguous and self-contained. Original question: {}\nReply with the rephrased question only.",
                ctx.task.question
            ),
            ActionKind::SchemaSelection => "Select the tables and columns needed to answer the question. Respond with\n```json\n{\"tables\": {\"<table>\": [\"<column>\", ...]}}\n```".to_string(),
            ActionKind::IdentifyColumnValues => "List the concrete column values mentioned in the question, one per line as `table.column = value`.".to_string(),
            ActionKind::IdentifyColumnFunctions => "List the SQL functions and aggregations needed (COUNT, SUM, AVG, date functions, ...), one per line with the column they apply to.".to_string(),
            ActionKind::SqlGeneration => "Write one SQLite query answering the question. Respond with\n```sql\n<query>\n```".to_string(),
            ActionKind::SqlRevision => {
                let current_sql = view.final_sql_query().unwrap_or_default();
                let result = execute_blocking(
                    Arc::clone(&self.oracle),
                    &ctx.db_path,
                    current_sql,
                    self.settings.sql_timeout,
                )
                .await;
                format!(
                    "Current SQL:\n{}\nExecution result:\n{}\nFix any error and make the result answer the question. Respond with\n```sql\n<query>\n```",
                    current_sql,
                    format_execution_result(&result, 5, 50)
                )
            }
            ActionKind::End => String::new(),
        };
        parts.push(instruction);
        parts.join("\n\n")
    }

    fn parse_candidate(&self, action: ActionKind, view: &PathView<'_>, text: &str) -> Option<NodeState> {
        let mut state = view.current().state.clone();
        match action {
            ActionKind::Rephrase => {
                let rephrased = text.trim();
                if rephrased.is_empty() {
                    return None;
                }
                state.rephrased_question = Some(rephrased.to_string());
            }
            ActionKind::SchemaSelection => {
                let selected = parse_schema_selection(text, &view.context().task.table_schemas)?;
                state.selected_schema_context = Some(render_schema(&selected));
                state.selected_schema = Some(selected);
            }
            ActionKind::IdentifyColumnValues => {
                state.identified_column_values = Some(text.trim().to_string());
            }
            ActionKind::IdentifyColumnFunctions => {
                state.identified_column_functions = Some(text.trim().to_string());
            }
            ActionKind::SqlGeneration => {
                let sql = extract_sql(text)?;
                state.sql_query = Some(sql.clone());
                state.emit_sql(sql);
            }
            ActionKind::SqlRevision => {
                let sql = extract_sql(text)?;
                state.revised_sql_query = Some(sql.clone());
                state.emit_sql(sql);
            }
            ActionKind::End => {}
        }
        Some(state)
    }
}

#[async_trait]
impl<M: LanguageModel, O: SqlOracle + 'static> ActionApplier for LlmActionApplier<M, O> {
    async fn candidates(
        &self,
        action: ActionKind,
        view: &PathView<'_>,
        session: &mut ModelSession,
    ) -> Result<Vec<NodeState>> {
        if action == ActionKind::End {
            // End only closes the path; final_sql_query is carried forward
            return Ok(vec![view.current().state.clone()]);
        }

        let prompt = self.prompt_for(action, view).await;
        let request = session.request(
            prompt,
            self.settings.temperature,
            self.settings.max_tokens,
            self.settings.candidates_per_action.max(1),
        );
        let completion = session.complete(&self.model, action.purpose(), &request).await?;

        let states: Vec<NodeState> = completion
            .choices
            .iter()
            .filter_map(|text| self.parse_candidate(action, view, text))
            .collect();
        debug!(
            "{} produced {} of {} parseable candidates",
            action,
            states.len(),
            completion.choices.len()
        );
        Ok(states)
    }
}

/// SQL from a fenced `sql` block, or the whole reply if it is bare SQL
pub fn extract_sql(text: &str) -> Option<String> {
    let sql = match SQL_BLOCK.captures(text) {
        Some(caps) => caps.get(1).map(|m| m.as_str().trim().to_string())?,
        None if BARE_SQL.is_match(text) => text.trim().to_string(),
        None => return None,
    };
    if sql.is_empty() {
        None
    } else {
        Some(sql)
    }
}

/// Resolve a `{"tables": {...}}` selection against the task schema
///
/// Unknown tables and columns are ignored; a table listed with no columns
/// keeps all of its columns. Returns `None` when nothing valid was selected.
pub fn parse_schema_selection(text: &str, schema: &[TableSchema]) -> Option<Vec<TableSchema>> {
    let body = JSON_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let tables = value.get("tables")?.as_object()?;

    let requested: HashMap<String, Vec<String>> = tables
        .iter()
        .map(|(name, columns)| {
            let columns = columns
                .as_array()
                .map(|cols| {
                    cols.iter()
                        .filter_map(|c| c.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            (name.to_lowercase(), columns)
        })
        .collect();

    let selected: Vec<TableSchema> = schema
        .iter()
        .filter_map(|table| {
            let columns = requested.get(&table.table_name.to_lowercase())?;
            if columns.is_empty() {
                return Some(table.clone());
            }
            let projected = table.project(columns);
            if projected.columns.is_empty() {
                None
            } else {
                Some(projected)
            }
        })
        .collect();

    if selected.is_empty() {
        None
    } else {
        Some(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ColumnSchema;

    fn column(name: &str) -> ColumnSchema {
        ColumnSchema {
            column_name: name.to_string(),
            data_type: "TEXT".to_string(),
            expanded_name: None,
            description: None,
            value_description: None,
            value_examples: vec![],
        }
    }

    fn schema() -> Vec<TableSchema> {
        vec![
            TableSchema {
                table_name: "account".to_string(),
                columns: vec![column("account_id"), column("district_id")],
            },
            TableSchema {
                table_name: "loan".to_string(),
                columns: vec![column("loan_id"), column("amount")],
            },
        ]
    }

    #[test]
    fn test_extract_sql_from_block() {
        let text = "Here you go:\n```sql\nSELECT COUNT(*) FROM account\n```\nDone.";
        assert_eq!(extract_sql(text).as_deref(), Some("SELECT COUNT(*) FROM account"));
    }

    #[test]
    fn test_extract_bare_sql() {
        assert_eq!(extract_sql("  select 1 ").as_deref(), Some("select 1"));
        assert_eq!(extract_sql("I cannot answer that"), None);
        assert_eq!(extract_sql("```sql\n```"), None);
    }

    #[test]
    fn test_parse_schema_selection() {
        let text = "```json\n{\"tables\": {\"Account\": [\"account_id\"], \"loan\": [], \"ghost\": [\"x\"]}}\n```";
        let selected = parse_schema_selection(text, &schema()).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].columns.len(), 1);
        assert_eq!(selected[1].columns.len(), 2);
    }

    #[test]
    fn test_parse_schema_selection_rejects_unknown() {
        let text = "```json\n{\"tables\": {\"ghost\": [\"x\"]}}\n```";
        assert!(parse_schema_selection(text, &schema()).is_none());
        assert!(parse_schema_selection("not json", &schema()).is_none());
    }
}
