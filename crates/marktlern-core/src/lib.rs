#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Core types shared across the marktlern workspace.
//!
//! This crate defines the closed action set, the wire records exchanged with
//! the trading host, and the [`DecisionModel`] training contract that any
//! concrete backend (local, remote, mocked) satisfies.

pub mod report;

pub use report::{DecisionRecord, OutcomeRecord};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of trading actions.
///
/// The integer tags are part of the training contract and must stay stable:
/// buy = 0, sell = 1, hold = 2. Unrecognized input maps to [`TradeAction::Hold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    #[default]
    Hold,
}

impl TradeAction {
    /// Integer tag used in [`TrainingBatch::actions`].
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            TradeAction::Buy => 0,
            TradeAction::Sell => 1,
            TradeAction::Hold => 2,
        }
    }

    /// Inverse of [`TradeAction::tag`]; unknown tags resolve to `Hold`.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Self {
        match tag {
            0 => TradeAction::Buy,
            1 => TradeAction::Sell,
            _ => TradeAction::Hold,
        }
    }

    /// Parses a raw action label, case-insensitively.
    ///
    /// Anything that is not `buy` or `sell` resolves to `Hold`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("buy") {
            TradeAction::Buy
        } else if raw.eq_ignore_ascii_case("sell") {
            TradeAction::Sell
        } else {
            TradeAction::Hold
        }
    }
}

/// One training request: parallel sequences of equal length.
///
/// Field names follow the upstream trading service's JSON contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingBatch {
    pub states: Vec<Vec<f32>>,
    pub actions: Vec<u8>,
    pub rewards: Vec<f32>,
    pub next_states: Vec<Vec<f32>>,
    pub dones: Vec<bool>,
}

impl TrainingBatch {
    /// Pre-sizes all five sequences.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            states: Vec::with_capacity(capacity),
            actions: Vec::with_capacity(capacity),
            rewards: Vec::with_capacity(capacity),
            next_states: Vec::with_capacity(capacity),
            dones: Vec::with_capacity(capacity),
        }
    }

    /// Batch size (length of every parallel sequence).
    #[must_use]
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    /// All five sequences share one length.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        let n = self.rewards.len();
        self.states.len() == n
            && self.actions.len() == n
            && self.next_states.len() == n
            && self.dones.len() == n
    }
}

/// Successful training response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainOutcome {
    /// Batch loss reported by the backend.
    pub loss: f32,
    /// Model version after the update, if the backend tracks one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Failures of the training contract. Backends must signal errors
/// explicitly; a partial or malformed response is never returned as success.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model backend error: {0}")]
    Backend(String),
    #[error("malformed training response: {0}")]
    InvalidResponse(String),
}

/// Training capability of the external decision model.
///
/// Implementations may block for non-trivial time (network or compute);
/// callers are expected to keep hot paths off this call.
pub trait DecisionModel: Send + Sync {
    fn train(&self, batch: &TrainingBatch) -> Result<TrainOutcome, ModelError>;
}
