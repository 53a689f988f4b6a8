use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guided_sql::compare::{load_gold, write_report, Comparator};
use guided_sql::config::{RunConfig, SelectionConfig};
use guided_sql::execution::{CachedOracle, OracleLatencyMeter, SqliteOracle};
use guided_sql::runner::BatchRunner;
use guided_sql::selection::{select_all, write_predictions, SelfConsistencySelector};
use guided_sql::summary::{summarize, summarize_tree};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "guided-sql")]
#[command(about = "LLM-guided text-to-SQL path generation with self-consistency selection")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate reasoning paths for every task in a run config
    Generate {
        /// Run config (.json or .yaml)
        config: PathBuf,
    },

    /// Pick one SQL per task from persisted paths
    Select {
        #[arg(long)]
        results_dir: PathBuf,

        #[arg(long)]
        db_root_dir: PathBuf,

        #[arg(long)]
        output_path: PathBuf,

        #[arg(long, default_value_t = 32)]
        workers: usize,

        /// Latency measurement repeats per representative query
        #[arg(long, default_value_t = 20)]
        execution_time_repeat: usize,
    },

    /// Write SQL, path and statistics summaries for a results directory
    ///
    /// Without --output-dir, every folder under the results directory that
    /// holds artifacts is summarised into its parent folder.
    Summarize {
        #[arg(long)]
        results_dir: PathBuf,

        /// Summarise only the results directory itself, into this folder
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Compare two prediction files against gold SQL
    Compare {
        #[arg(long)]
        gold: PathBuf,

        #[arg(long)]
        db_root_dir: PathBuf,

        #[arg(long)]
        file1: PathBuf,

        #[arg(long)]
        file2: PathBuf,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Generate { config } => {
            let config = RunConfig::load(&config)
                .with_context(|| format!("loading config {}", config.display()))?;
            info!("Guided SQL generation starting, results in {}", config.save_root_dir.display());
            let runner = BatchRunner::from_config(config)?;
            runner.run_all().await?;
        }
        Command::Select {
            results_dir,
            db_root_dir,
            output_path,
            workers,
            execution_time_repeat,
        } => {
            let config = SelectionConfig {
                execution_time_repeat,
                ..SelectionConfig::default()
            };
            let timeout = config.sql_timeout();
            let selector = SelfConsistencySelector::new(
                CachedOracle::new(SqliteOracle::new()),
                OracleLatencyMeter::new(SqliteOracle::new(), timeout),
                config,
            );
            let predictions = tokio::task::spawn_blocking(move || {
                select_all(&selector, &results_dir, &db_root_dir, workers)
            })
            .await??;
            write_predictions(&predictions, &output_path)?;
        }
        Command::Summarize {
            results_dir,
            output_dir,
        } => {
            let reports = match output_dir {
                Some(output_dir) => vec![summarize(&results_dir, &output_dir)?],
                None => summarize_tree(&results_dir)?,
            };
            for report in reports {
                info!(
                    "{} files, {} unique paths, {} path instances",
                    report.processed_files, report.unique_paths, report.path_instances
                );
            }
        }
        Command::Compare {
            gold,
            db_root_dir,
            file1,
            file2,
            output_dir,
        } => {
            let gold = load_gold(&gold)?;
            let comparator = Comparator::new(
                SqliteOracle::new(),
                db_root_dir,
                SelectionConfig::default().sql_timeout(),
            );
            let report = comparator.compare_files(&gold, &file1, &file2)?;
            if let Some(dir) = output_dir {
                write_report(&report, &dir)?;
            }
        }
    }

    Ok(())
}
