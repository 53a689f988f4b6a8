//! Self-Consistency Selection
//!
//! Groups the final SQL of every persisted path by execution result and
//! picks the representative of the largest group, breaking score ties in
//! favour of the faster query.
//!
//! Paths whose SQL fails are dropped. Successful results that the validity
//! predicate rejects only enter the fallback partition, which is ranked the
//! same way when the primary partition is empty.

pub mod batch;

pub use batch::{fill_gaps, format_prediction, select_all, write_predictions};

use crate::config::SelectionConfig;
use crate::error::{GuidedSqlError, Result};
use crate::execution::{LatencyMeter, RowSet, SqlOracle};
use crate::reasoning::node::ReasoningPath;
use crate::solver::{artifact_id, load_paths};
use crate::task::db_path;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Paths whose final SQL produced the same row set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultGroup {
    pub rows: RowSet,

    /// Indices into the path list, in input order
    pub path_indices: Vec<usize>,
}

impl ResultGroup {
    /// First-seen member
    pub fn representative(&self) -> usize {
        self.path_indices[0]
    }

    pub fn len(&self) -> usize {
        self.path_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_indices.is_empty()
    }
}

/// Primary and fallback partitions of one path set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partitions {
    pub primary: Vec<ResultGroup>,
    pub fallback: Vec<ResultGroup>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedGroup {
    pub representative: usize,
    pub score: f64,
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionDecision {
    pub question_id: u64,
    pub db_id: String,
    pub sql: String,
}

pub struct SelfConsistencySelector<O, L> {
    oracle: O,
    meter: L,
    config: SelectionConfig,
}

impl<O: SqlOracle, L: LatencyMeter> SelfConsistencySelector<O, L> {
    pub fn new(oracle: O, meter: L, config: SelectionConfig) -> Self {
        Self { oracle, meter, config }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Execute every path's final SQL and partition by row set
    pub fn partition(&self, db_path: &Path, paths: &[ReasoningPath]) -> Partitions {
        let mut partitions = Partitions::default();
        let mut primary_index: BTreeMap<RowSet, usize> = BTreeMap::new();
        let mut fallback_index: BTreeMap<RowSet, usize> = BTreeMap::new();

        for (idx, path) in paths.iter().enumerate() {
            let sql = match path.final_sql_query() {
                Some(sql) => sql,
                None => continue,
            };
            let result = self.oracle.execute(db_path, sql, self.config.sql_timeout());
            let rows = match result.row_set() {
                Some(rows) => rows,
                None => {
                    debug!("path {} failed: {}", idx, result.error_message().unwrap_or_default());
                    continue;
                }
            };

            if self.config.validity.is_valid(&result) {
                add_to_group(&mut partitions.primary, &mut primary_index, rows.clone(), idx);
            }
            add_to_group(&mut partitions.fallback, &mut fallback_index, rows, idx);
        }
        partitions
    }

    /// Score and latency per group, best first
    pub fn rank(&self, db_path: &Path, groups: &[ResultGroup], paths: &[ReasoningPath]) -> Vec<RankedGroup> {
        let total: usize = groups.iter().map(ResultGroup::len).sum();
        let mut ranked: Vec<RankedGroup> = groups
            .iter()
            .map(|group| {
                let representative = group.representative();
                let sql = paths[representative].final_sql_query().unwrap_or_default();
                RankedGroup {
                    representative,
                    score: group.len() as f64 / total as f64,
                    latency: self.meter.measure(db_path, sql, self.config.execution_time_repeat),
                }
            })
            .collect();

        // Stable: equal (score, latency) keep first-seen order
        ranked.sort_by(|a, b| match b.score.total_cmp(&a.score) {
            Ordering::Equal => a.latency.cmp(&b.latency),
            other => other,
        });
        ranked
    }

    /// Index of the chosen path, or `None` when nothing executed successfully
    pub fn select(&self, db_path: &Path, paths: &[ReasoningPath]) -> Option<usize> {
        let partitions = self.partition(db_path, paths);
        let groups = if !partitions.primary.is_empty() {
            &partitions.primary
        } else if !partitions.fallback.is_empty() {
            warn!("⚠️  No valid result groups, ranking invalid results");
            &partitions.fallback
        } else {
            return None;
        };
        self.rank(db_path, groups, paths)
            .first()
            .map(|best| best.representative)
    }

    /// Decide the final SQL for one task's paths
    pub fn decide(&self, question_id: u64, db_root_dir: &Path, paths: &[ReasoningPath]) -> SelectionDecision {
        let db_id = match paths.first() {
            Some(path) => path.db_id.clone(),
            None => return self.error_decision(question_id),
        };
        let db = db_path(db_root_dir, &db_id);

        match self.select(&db, paths) {
            Some(idx) => SelectionDecision {
                question_id,
                db_id,
                sql: paths[idx].final_sql_query().unwrap_or_default().to_string(),
            },
            None => self.error_decision(question_id),
        }
    }

    /// Load a `<question_id>.json` artifact and decide its final SQL
    pub fn select_for_artifact(&self, file: &Path, db_root_dir: &Path) -> Result<SelectionDecision> {
        let question_id = artifact_id(file).ok_or_else(|| {
            GuidedSqlError::Selection(format!("Not a result artifact: {}", file.display()))
        })?;
        let paths = load_paths(file)?;
        Ok(self.decide(question_id, db_root_dir, &paths))
    }

    fn error_decision(&self, question_id: u64) -> SelectionDecision {
        SelectionDecision {
            question_id,
            db_id: self.config.default_db_id.clone(),
            sql: self.config.error_marker.clone(),
        }
    }
}

fn add_to_group(groups: &mut Vec<ResultGroup>, index: &mut BTreeMap<RowSet, usize>, rows: RowSet, path_idx: usize) {
    match index.get(&rows) {
        Some(&slot) => groups[slot].path_indices.push(path_idx),
        None => {
            index.insert(rows.clone(), groups.len());
            groups.push(ResultGroup {
                rows,
                path_indices: vec![path_idx],
            });
        }
    }
}
