//! Prediction Comparison
//!
//! Executes two line-per-question prediction files against the gold SQL of
//! a benchmark split and reports execution accuracy for each.

use crate::error::{GuidedSqlError, Result};
use crate::execution::SqlOracle;
use crate::task::db_path;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// One gold entry of the benchmark split
#[derive(Debug, Clone, Deserialize)]
pub struct GoldEntry {
    pub question_id: u64,
    pub db_id: String,
    #[serde(rename = "SQL")]
    pub sql: String,
    pub question: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    pub total: usize,
    pub correct: usize,
    pub execution_error: usize,
    pub result_mismatch: usize,
    pub sql_exact_match: usize,
}

impl FileStats {
    fn record(&mut self, outcome: &PredictionOutcome) {
        self.total += 1;
        if outcome.is_match {
            self.correct += 1;
        } else if outcome.error.is_some() {
            self.execution_error += 1;
        } else {
            self.result_mismatch += 1;
        }
        if outcome.exact_match {
            self.sql_exact_match += 1;
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub sql: String,
    pub is_match: bool,
    pub exact_match: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonDetail {
    pub question_id: u64,
    pub db_id: String,
    pub question: String,
    pub golden_sql: String,
    pub file1: PredictionOutcome,
    pub file2: PredictionOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub stats: FileStats,
}

#[derive(Debug, Clone)]
pub struct ComparisonReport {
    pub file1: FileReport,
    pub file2: FileReport,
    pub details: Vec<ComparisonDetail>,
}

pub struct Comparator<O> {
    oracle: O,
    db_root_dir: PathBuf,
    timeout: Duration,
}

impl<O: SqlOracle> Comparator<O> {
    pub fn new(oracle: O, db_root_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            oracle,
            db_root_dir: db_root_dir.into(),
            timeout,
        }
    }

    /// Execute a prediction and the gold SQL, comparing row sets
    pub fn evaluate(&self, db: &Path, predicted: &str, gold: &str) -> PredictionOutcome {
        let pred_result = self.oracle.execute(db, predicted, self.timeout);
        let gold_result = self.oracle.execute(db, gold, self.timeout);

        let (is_match, error) = match (pred_result.row_set(), gold_result.row_set()) {
            (Some(p), Some(g)) => (p == g, None),
            _ => {
                let mut errors = Vec::new();
                if let Some(e) = pred_result.error_message() {
                    errors.push(format!("Predicted SQL error: {}", e));
                }
                if let Some(e) = gold_result.error_message() {
                    errors.push(format!("Golden SQL error: {}", e));
                }
                (false, Some(errors.join("; ")))
            }
        };

        PredictionOutcome {
            sql: predicted.to_string(),
            is_match,
            exact_match: normalize_sql(predicted) == normalize_sql(gold),
            error,
        }
    }

    pub fn compare_files(&self, gold: &[GoldEntry], file1: &Path, file2: &Path) -> Result<ComparisonReport> {
        let sqls1 = read_sql_file(file1)?;
        let sqls2 = read_sql_file(file2)?;
        for (path, sqls) in [(file1, &sqls1), (file2, &sqls2)] {
            if sqls.len() != gold.len() {
                warn!(
                    "⚠️  {} has {} lines, but gold data has {} entries",
                    path.display(),
                    sqls.len(),
                    gold.len()
                );
            }
        }

        let mut stats1 = FileStats::default();
        let mut stats2 = FileStats::default();
        let mut details = Vec::new();

        for (idx, entry) in gold.iter().enumerate() {
            let db = db_path(&self.db_root_dir, &entry.db_id);
            if !db.exists() {
                continue;
            }
            let sql1 = sqls1.get(idx).map(String::as_str).unwrap_or("SELECT");
            let sql2 = sqls2.get(idx).map(String::as_str).unwrap_or("SELECT");

            let outcome1 = self.evaluate(&db, sql1, &entry.sql);
            let outcome2 = self.evaluate(&db, sql2, &entry.sql);
            stats1.record(&outcome1);
            stats2.record(&outcome2);

            details.push(ComparisonDetail {
                question_id: entry.question_id,
                db_id: entry.db_id.clone(),
                question: entry.question.clone(),
                golden_sql: entry.sql.clone(),
                file1: outcome1,
                file2: outcome2,
            });
        }

        for (path, stats) in [(file1, &stats1), (file2, &stats2)] {
            info!(
                "{}: {} / {} correct ({:.2}%), {} exact, {} errors, {} mismatches",
                path.display(),
                stats.correct,
                stats.total,
                stats.accuracy() * 100.0,
                stats.sql_exact_match,
                stats.execution_error,
                stats.result_mismatch
            );
        }

        Ok(ComparisonReport {
            file1: FileReport {
                path: file1.to_path_buf(),
                stats: stats1,
            },
            file2: FileReport {
                path: file2.to_path_buf(),
                stats: stats2,
            },
            details,
        })
    }
}

pub fn load_gold(path: &Path) -> Result<Vec<GoldEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GuidedSqlError::Task(format!("Failed to read gold file {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// One SQL per line, trimmed
pub fn read_sql_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().map(|line| line.trim().to_string()).collect())
}

/// Lowercase, collapse whitespace, strip trailing `;`
pub fn normalize_sql(sql: &str) -> String {
    let lowered = sql.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(';').to_string()
}

/// Write `comparison_stats.json` and `comparison_details.json`
pub fn write_report(report: &ComparisonReport, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let stats = serde_json::json!({
        "file1": report.file1,
        "file2": report.file2,
    });
    std::fs::write(
        output_dir.join("comparison_stats.json"),
        serde_json::to_string_pretty(&stats)?,
    )?;
    std::fs::write(
        output_dir.join("comparison_details.json"),
        serde_json::to_string_pretty(&report.details)?,
    )?;
    info!("Comparison saved to {}", output_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sql() {
        assert_eq!(normalize_sql("SELECT  *\n FROM t;"), "select * from t");
        assert_eq!(normalize_sql("select 1"), normalize_sql("SELECT 1;"));
    }

    #[test]
    fn test_stats_classification() {
        let mut stats = FileStats::default();
        let base = PredictionOutcome {
            sql: "SELECT 1".into(),
            is_match: true,
            exact_match: true,
            error: None,
        };
        stats.record(&base);
        stats.record(&PredictionOutcome {
            is_match: false,
            exact_match: false,
            error: Some("boom".into()),
            ..base.clone()
        });
        stats.record(&PredictionOutcome {
            is_match: false,
            exact_match: false,
            ..base
        });

        assert_eq!(stats.total, 3);
        assert_eq!(stats.correct, 1);
        assert_eq!(stats.execution_error, 1);
        assert_eq!(stats.result_mismatch, 1);
        assert_eq!(stats.sql_exact_match, 1);
    }
}
