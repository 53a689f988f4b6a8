//! Batch selection over a results directory.

use super::{SelectionDecision, SelfConsistencySelector};
use crate::config::SelectionConfig;
use crate::error::{GuidedSqlError, Result};
use crate::execution::{LatencyMeter, SqlOracle};
use crate::solver::list_artifacts;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

const BIRD_SEPARATOR: &str = "\t----- bird -----\t";

/// `"<sql>\t----- bird -----\t<db_id>"`
pub fn format_prediction(sql: &str, db_id: &str) -> String {
    format!("{}{}{}", sql, BIRD_SEPARATOR, db_id)
}

/// Decide every artifact in `results_dir` on a pool of `workers` threads
///
/// Artifacts that cannot be read are logged and left as gaps.
pub fn select_all<O, L>(
    selector: &SelfConsistencySelector<O, L>,
    results_dir: &Path,
    db_root_dir: &Path,
    workers: usize,
) -> Result<BTreeMap<u64, String>>
where
    O: SqlOracle,
    L: LatencyMeter,
{
    let artifacts = list_artifacts(results_dir)?;
    info!("Selecting final SQL for {} artifacts", artifacts.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| GuidedSqlError::Selection(format!("Failed to build worker pool: {}", e)))?;

    let decisions: Vec<SelectionDecision> = pool.install(|| {
        artifacts
            .par_iter()
            .filter_map(|(id, file)| match selector.select_for_artifact(file, db_root_dir) {
                Ok(decision) => Some(decision),
                Err(e) => {
                    error!("Failed to select for question {}: {}", id, e);
                    None
                }
            })
            .collect()
    });

    let mut predictions: BTreeMap<u64, String> = decisions
        .into_iter()
        .map(|d| (d.question_id, format_prediction(&d.sql, &d.db_id)))
        .collect();
    fill_gaps(&mut predictions, selector.config());
    Ok(predictions)
}

/// Back-fill every missing id between the smallest and largest present
pub fn fill_gaps(predictions: &mut BTreeMap<u64, String>, config: &SelectionConfig) {
    let (min, max) = match (predictions.keys().next(), predictions.keys().next_back()) {
        (Some(&min), Some(&max)) => (min, max),
        _ => return,
    };
    let marker = format_prediction(&config.error_marker, &config.default_db_id);
    for id in min..=max {
        predictions.entry(id).or_insert_with(|| marker.clone());
    }
}

/// Write predictions as one JSON object keyed by id, in numeric order
pub fn write_predictions(predictions: &BTreeMap<u64, String>, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output_path, serde_json::to_string_pretty(predictions)?)?;
    info!("✅ Wrote {} predictions to {}", predictions.len(), output_path.display());
    Ok(())
}
