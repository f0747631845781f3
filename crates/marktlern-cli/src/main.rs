//! CLI for marktlern.
//!
//! Replays recorded decision/outcome streams through the online-learning
//! loop, against a remote training endpoint or a local dry-run backend,
//! and scores individual records. It serves as the operational interface
//! for the feedback loop.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use marktlern_core::{
    DecisionModel, DecisionRecord, ModelError, OutcomeRecord, TrainOutcome, TrainingBatch,
};
use marktlern_learning::reward::shape_reward;
use marktlern_learning::{LearnError, LearningConfig, OnlineLearner, UpdateAttempt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded decision/outcome pairs through the learning loop
    Replay {
        /// Input JSONL file, one {"decision":..,"outcome":..} record per line
        #[arg(long)]
        path: PathBuf,

        /// Training endpoint; omit to use the local dry-run backend
        #[arg(long)]
        model_url: Option<String>,

        /// Experiences per training batch
        #[arg(long, default_value = "32")]
        batch_size: usize,

        /// Experiences observed between updates
        #[arg(long, default_value = "10")]
        frequency: usize,

        /// Minimum pause between updates, in seconds
        #[arg(long, default_value = "300")]
        cooldown_secs: u64,

        /// Replay buffer capacity
        #[arg(long, default_value = "10000")]
        capacity: usize,

        /// Write the full learning export here after the replay
        #[arg(long)]
        export: Option<PathBuf>,

        /// Path to the replay stats file
        #[arg(long, default_value = "data/marktlern.replay.stats.json")]
        stats_file: PathBuf,
    },
    /// Shape rewards only, without touching a model
    Score {
        /// Input JSONL file
        #[arg(long)]
        path: PathBuf,
    },
}

/// One line of replay input. The outcome may be omitted while a position
/// is still open; it then contributes no reward terms.
#[derive(Deserialize, Debug)]
struct ReplayRecord {
    decision: DecisionRecord,
    #[serde(default)]
    outcome: OutcomeRecord,
}

#[derive(Serialize, Deserialize, Debug)]
struct ReplayStats {
    total_processed: u64,
    rejected: u64,
    malformed_lines: u64,
    updates_completed: u64,
    updates_failed: u64,
    last_reward: Option<f32>,
    #[serde(with = "time::serde::iso8601")]
    last_updated: OffsetDateTime,
}

impl Default for ReplayStats {
    fn default() -> Self {
        Self {
            total_processed: 0,
            rejected: 0,
            malformed_lines: 0,
            updates_completed: 0,
            updates_failed: 0,
            last_reward: None,
            last_updated: OffsetDateTime::now_utc(),
        }
    }
}

impl ReplayStats {
    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let file = File::open(path)?;
        let stats = serde_json::from_reader(file)?;
        Ok(stats)
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

/// Remote training backend speaking the POST contract:
/// `TrainingBatch` in, `TrainOutcome` out, errors as non-2xx statuses.
struct RemoteModel {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl RemoteModel {
    fn new(endpoint: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { endpoint, client })
    }
}

impl DecisionModel for RemoteModel {
    fn train(&self, batch: &TrainingBatch) -> std::result::Result<TrainOutcome, ModelError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(batch)
            .send()
            .map_err(|e| ModelError::Backend(format!("POST {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::Backend(format!(
                "{} returned {status}",
                self.endpoint
            )));
        }

        response
            .json::<TrainOutcome>()
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))
    }
}

/// Local fallback backend: reports the batch reward variance as its loss
/// and never leaves the process. Useful for rehearsing a replay before
/// pointing it at a live endpoint.
struct DryRunModel;

impl DecisionModel for DryRunModel {
    fn train(&self, batch: &TrainingBatch) -> std::result::Result<TrainOutcome, ModelError> {
        if batch.is_empty() {
            return Err(ModelError::Backend("empty training batch".to_string()));
        }
        #[allow(clippy::cast_precision_loss)]
        let n = batch.rewards.len() as f32;
        let mean = batch.rewards.iter().sum::<f32>() / n;
        let variance = batch.rewards.iter().map(|r| (r - mean) * (r - mean)).sum::<f32>() / n;
        Ok(TrainOutcome {
            loss: variance,
            version: Some("dry-run".to_string()),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn run_replay(
    path: &Path,
    model_url: Option<String>,
    batch_size: usize,
    frequency: usize,
    cooldown_secs: u64,
    capacity: usize,
    export: Option<&Path>,
    stats_file: &Path,
) -> Result<()> {
    let config = LearningConfig {
        batch_size,
        learning_frequency: frequency,
        max_memory_size: capacity,
        min_update_interval_ms: i64::try_from(cooldown_secs.saturating_mul(1_000))
            .unwrap_or(i64::MAX),
        ..LearningConfig::default()
    };

    let model: Arc<dyn DecisionModel> = match model_url {
        Some(url) => {
            println!("Training against remote endpoint {url}");
            Arc::new(RemoteModel::new(url)?)
        }
        None => {
            println!("No --model-url given; using the local dry-run backend");
            Arc::new(DryRunModel)
        }
    };
    let learner = OnlineLearner::new(config, model);

    let mut stats = ReplayStats::load(stats_file).unwrap_or_else(|e| {
        eprintln!(
            "Warning: failed to read stats from {:?}; starting fresh: {}",
            stats_file, e
        );
        ReplayStats::default()
    });

    let file = File::open(path).context("Failed to open input file")?;
    let reader = BufReader::new(file);

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record: ReplayRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                eprintln!("Skipping malformed line {}: {}", idx + 1, e);
                stats.malformed_lines += 1;
                continue;
            }
        };

        match learner.record_outcome(&record.decision, &record.outcome) {
            Ok(receipt) => {
                stats.total_processed += 1;
                stats.last_reward = Some(receipt.reward);
                match receipt.update {
                    UpdateAttempt::Completed(report) => {
                        stats.updates_completed += 1;
                        println!(
                            "Update: batch {} loss {:.4} mean reward {:+.3}{}",
                            report.batch_size,
                            report.loss,
                            report.mean_reward,
                            report
                                .model_version
                                .map(|v| format!(" (model {v})"))
                                .unwrap_or_default()
                        );
                    }
                    UpdateAttempt::Failed(err) => {
                        stats.updates_failed += 1;
                        eprintln!("Update failed at line {}: {}", idx + 1, err);
                    }
                    UpdateAttempt::NotDue => {}
                }
            }
            Err(LearnError::InvalidInput(reason)) => {
                eprintln!("Rejected line {}: {}", idx + 1, reason);
                stats.rejected += 1;
            }
            Err(e) => return Err(e).context("Replay aborted"),
        }
    }

    stats.last_updated = OffsetDateTime::now_utc();

    let metrics = learner.metrics();
    println!(
        "Replayed {} records ({} rejected, {} malformed): {} updates, latest loss {:.4}",
        stats.total_processed,
        stats.rejected,
        stats.malformed_lines,
        metrics.total_updates,
        metrics.average_loss
    );

    stats.save(stats_file).context("Failed to save stats")?;

    if let Some(export_path) = export {
        let snapshot = learner.export();
        if let Some(parent) = export_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(export_path)
            .with_context(|| format!("Failed to create export file {export_path:?}"))?;
        serde_json::to_writer_pretty(file, &snapshot).context("Failed to write export")?;
        println!(
            "Exported {} experiences to {:?}",
            snapshot.experiences.len(),
            export_path
        );
    }

    Ok(())
}

fn run_score(path: &Path) -> Result<()> {
    let file = File::open(path).context("Failed to open input file")?;
    let reader = BufReader::new(file);

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ReplayRecord>(&line) {
            Ok(record) => {
                let reward = shape_reward(&record.decision, &record.outcome);
                println!("{:.4}\t{}", reward, record.decision.item_id);
            }
            Err(e) => eprintln!("Skipping malformed line {}: {}", idx + 1, e),
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            path,
            model_url,
            batch_size,
            frequency,
            cooldown_secs,
            capacity,
            export,
            stats_file,
        } => run_replay(
            &path,
            model_url,
            batch_size,
            frequency,
            cooldown_secs,
            capacity,
            export.as_deref(),
            &stats_file,
        ),
        Commands::Score { path } => run_score(&path),
    }
}
