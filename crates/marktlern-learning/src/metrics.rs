//! Running counters describing update history.

use serde::{Deserialize, Serialize};

use crate::learner::UpdateReport;

/// Metrics over completed model updates.
///
/// `average_loss` and `average_reward` are the batch-level means of the
/// *latest* update, not a running mean across history; each update
/// overwrites them. Counters are only ever extended, never rewritten
/// retroactively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningMetrics {
    pub total_updates: u64,
    pub average_loss: f32,
    pub average_reward: f32,
    /// RFC 3339 timestamp of the latest update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
}

impl LearningMetrics {
    pub(crate) fn record(&mut self, report: &UpdateReport) {
        self.total_updates += 1;
        self.average_loss = report.loss;
        self.average_reward = report.mean_reward;
        self.last_update = Some(report.completed_at.clone());
    }
}
