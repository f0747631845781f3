#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Online-learning feedback loop for adaptive trading decisions.
//!
//! Decisions and their later-observed outcomes are shaped into scalar
//! rewards, accumulated in a bounded replay buffer, and, once enough
//! evidence has piled up, turned into a recency-biased training batch for
//! an injected [`DecisionModel`](marktlern_core::DecisionModel). The crate
//! owns the data flow, admission policy, sampling policy, and the
//! at-most-one-in-flight discipline around model updates; it prescribes
//! nothing about the model itself.

use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub mod buffer;
pub mod learner;
pub mod metrics;
pub mod reward;
pub mod sampler;
pub mod trigger;

mod error;

pub use buffer::{Experience, ExperienceBuffer, ExperienceMeta};
pub use error::{LearnError, Result};
pub use learner::{
    LearningExport, OnlineLearner, RecordReceipt, UpdateAttempt, UpdateReport, UpdateStatus,
};
pub use metrics::LearningMetrics;
pub use trigger::TriggerState;

/// Fallback timestamp when formatting fails
const FALLBACK_TIMESTAMP: &str = "1970-01-01T00:00:00Z";

/// Tunables of the feedback loop. All fields are independently overridable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Master switch for online updates. Experiences are still recorded
    /// when disabled; only the update path is gated off.
    pub enable_online_learning: bool,
    /// Minimum number of experiences observed since the last update before
    /// the next one is due.
    pub learning_frequency: usize,
    /// Reserved for future gating on realized performance. Carried in the
    /// export, not consulted by the trigger.
    pub performance_threshold: f32,
    /// Number of experiences per training batch.
    pub batch_size: usize,
    /// Capacity of the experience buffer.
    pub max_memory_size: usize,
    /// Minimum wall-clock pause between two updates, in milliseconds.
    pub min_update_interval_ms: i64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enable_online_learning: true,
            learning_frequency: 10,
            performance_threshold: 0.6,
            batch_size: 32,
            max_memory_size: 10_000,
            min_update_interval_ms: 300_000,
        }
    }
}

pub(crate) fn iso8601_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| FALLBACK_TIMESTAMP.to_string())
}
