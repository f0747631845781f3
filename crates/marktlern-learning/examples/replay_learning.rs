//! Example demonstrating the online-learning feedback loop end to end.
//!
//! A stream of synthetic decision/outcome pairs is recorded into the replay
//! buffer; once enough evidence has accumulated, a recency-biased batch is
//! submitted to a toy model and the learning metrics advance.
//!
//! Run with: cargo run -p marktlern-learning --example replay_learning

use std::error::Error;
use std::sync::Arc;

use marktlern_core::{
    DecisionModel, DecisionRecord, ModelError, OutcomeRecord, TrainOutcome, TrainingBatch,
};
use marktlern_learning::{LearningConfig, OnlineLearner, UpdateAttempt};

/// Toy backend: the "loss" is the mean squared batch reward, shrinking as
/// the rewards it sees approach zero.
struct ToyModel;

impl DecisionModel for ToyModel {
    fn train(&self, batch: &TrainingBatch) -> Result<TrainOutcome, ModelError> {
        let n = batch.rewards.len().max(1) as f32;
        let loss = batch.rewards.iter().map(|r| r * r).sum::<f32>() / n;
        Ok(TrainOutcome {
            loss,
            version: Some("toy-1".to_string()),
        })
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("=== marktlern: online-learning feedback loop ===\n");

    let config = LearningConfig {
        batch_size: 8,
        learning_frequency: 4,
        min_update_interval_ms: 0,
        max_memory_size: 64,
        ..LearningConfig::default()
    };
    let learner = OnlineLearner::new(config, Arc::new(ToyModel));

    println!("📥 Recording 20 decision/outcome pairs...\n");
    for i in 0..20 {
        let decision = make_decision(i);
        let outcome = make_outcome(i);
        let receipt = learner.record_outcome(&decision, &outcome)?;

        match &receipt.update {
            UpdateAttempt::Completed(report) => println!(
                "  #{i:02} reward {:+.3} → update: batch {} loss {:.4} (model {})",
                receipt.reward,
                report.batch_size,
                report.loss,
                report.model_version.as_deref().unwrap_or("?")
            ),
            UpdateAttempt::Failed(err) => {
                println!("  #{i:02} reward {:+.3} → update failed: {err}", receipt.reward);
            }
            UpdateAttempt::NotDue => {
                println!("  #{i:02} reward {:+.3}", receipt.reward);
            }
        }
    }

    let metrics = learner.metrics();
    println!("\n📊 Metrics:");
    println!("  Updates completed: {}", metrics.total_updates);
    println!("  Latest batch loss: {:.4}", metrics.average_loss);
    println!("  Latest batch reward: {:+.3}", metrics.average_reward);
    if let Some(ts) = &metrics.last_update {
        println!("  Last update at: {ts}");
    }

    println!("\n📄 Export snapshot (truncated to metrics + config):");
    let export = learner.export();
    println!("  Experiences retained: {}", export.experiences.len());
    let json = serde_json::to_string_pretty(&export.config)?;
    println!("{json}");

    println!("\n🧹 Clearing memory: {} experiences removed", learner.clear_memory());

    Ok(())
}

fn make_decision(seq: usize) -> DecisionRecord {
    let bias = (seq % 5) as f32 / 10.0;
    DecisionRecord {
        features: vec![bias, 1.0 - bias, 0.5],
        action: if seq % 3 == 0 { "buy" } else { "sell" }.to_string(),
        confidence: 0.5 + bias,
        expected_return: Some(0.01 * (seq % 4) as f32),
        risk_score: Some(30.0 + (seq % 7) as f32 * 10.0),
        item_id: format!("demo-{seq}"),
    }
}

fn make_outcome(seq: usize) -> OutcomeRecord {
    let win = seq % 2 == 0;
    OutcomeRecord {
        actual_profit: Some(if win { 25_000.0 } else { -15_000.0 }),
        actual_return: Some(if win { 0.015 } else { -0.01 }),
        trade_duration_ms: Some(600_000 + (seq as i64) * 60_000),
        was_successful: Some(win),
        trade_closed: Some(true),
        new_market_state: Some(vec![(seq % 10) as f32 / 10.0, 0.4, 0.6]),
    }
}
