//! Offline Summaries
//!
//! Reads every artifact of a results directory and writes:
//! - `summary_sqls.txt`: one final SQL per id in `[min, max]`, `SELECT` for gaps
//! - `summary_paths.json`: id -> path number -> node type names
//! - `summary_statistics.md`: path signatures with their counts
//!
//! `summarize_tree` walks a results root and summarises every folder that
//! holds artifacts, writing the files into that folder's parent.

use crate::error::Result;
use crate::solver::{list_artifacts, load_paths};
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryReport {
    pub processed_files: usize,
    pub unique_paths: usize,
    pub path_instances: usize,
    pub outputs: Vec<PathBuf>,
}

/// Summarise `results_dir`, writing the three files into `output_dir`
pub fn summarize(results_dir: &Path, output_dir: &Path) -> Result<SummaryReport> {
    let artifacts = list_artifacts(results_dir)?;
    if artifacts.is_empty() {
        warn!("⚠️  No result artifacts found in {}", results_dir.display());
        return Ok(SummaryReport::default());
    }

    let mut sqls: BTreeMap<u64, String> = BTreeMap::new();
    let mut paths_by_id: BTreeMap<u64, BTreeMap<usize, Vec<&'static str>>> = BTreeMap::new();
    let mut signatures: Vec<String> = Vec::new();

    for (id, file) in &artifacts {
        let paths = match load_paths(file) {
            Ok(paths) => paths,
            Err(e) => {
                warn!("⚠️  Skipping {}: {}", file.display(), e);
                continue;
            }
        };

        let per_path = paths_by_id.entry(*id).or_default();
        for (number, path) in paths.iter().enumerate().filter(|(_, p)| !p.nodes.is_empty()) {
            // The last path carrying SQL wins
            if let Some(sql) = path.final_sql_query().filter(|s| !s.is_empty()) {
                sqls.insert(*id, sql.replace('\n', " ").trim().to_string());
            }
            per_path.insert(number + 1, path.nodes.iter().map(|n| n.node_type.as_str()).collect());
            signatures.push(path.signature());
        }
    }

    std::fs::create_dir_all(output_dir)?;

    let (min, max) = (artifacts[0].0, artifacts[artifacts.len() - 1].0);
    let sql_lines: String = (min..=max)
        .map(|id| format!("{}\n", sqls.get(&id).map(String::as_str).unwrap_or("SELECT")))
        .collect();
    let sqls_path = output_dir.join("summary_sqls.txt");
    std::fs::write(&sqls_path, sql_lines)?;

    let paths_path = output_dir.join("summary_paths.json");
    std::fs::write(&paths_path, serde_json::to_string_pretty(&paths_by_id)?)?;

    let counts: Vec<(String, usize)> = signatures
        .into_iter()
        .counts()
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .collect();
    let path_instances: usize = counts.iter().map(|(_, c)| c).sum();

    let mut md = String::from("# Path Statistics\n\n## Path Patterns and Counts\n\n");
    for (signature, count) in &counts {
        let _ = write!(md, "[{}]: {}\n\n", signature, count);
    }
    let _ = write!(
        md,
        "\n## Summary\n\n- Total unique paths: {}\n- Total path instances: {}\n- Total processed files: {}\n",
        counts.len(),
        path_instances,
        artifacts.len()
    );
    let stats_path = output_dir.join("summary_statistics.md");
    std::fs::write(&stats_path, md)?;

    info!("✅ Summarised {} artifacts into {}", artifacts.len(), output_dir.display());
    Ok(SummaryReport {
        processed_files: artifacts.len(),
        unique_paths: counts.len(),
        path_instances,
        outputs: vec![sqls_path, paths_path, stats_path],
    })
}

/// Summarise every artifact folder under `root`, recursively
///
/// Each folder's summaries land in its parent directory (the root itself
/// writes into its own parent, or in place when it has none). Folders are
/// visited in path order, so siblings sharing a parent overwrite each other
/// and the last one wins.
pub fn summarize_tree(root: &Path) -> Result<Vec<SummaryReport>> {
    let mut dirs = Vec::new();
    collect_artifact_dirs(root, &mut dirs)?;
    if dirs.is_empty() {
        warn!("⚠️  No result artifacts found under {}", root.display());
    }

    let mut reports = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let output_dir = dir.parent().unwrap_or(&dir).to_path_buf();
        reports.push(summarize(&dir, &output_dir)?);
    }
    Ok(reports)
}

fn collect_artifact_dirs(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    if !list_artifacts(dir)?.is_empty() {
        found.push(dir.to_path_buf());
    }

    let mut children: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    children.sort();
    for child in children {
        collect_artifact_dirs(&child, found)?;
    }
    Ok(())
}
