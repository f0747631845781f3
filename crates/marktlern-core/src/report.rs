//! Wire records reported by the trading host.
//!
//! A [`DecisionRecord`] captures what the model decided and under which
//! beliefs; an [`OutcomeRecord`] captures what the market later did to that
//! decision. Field names follow the host's camelCase JSON contract, so these
//! structs deserialize the host's payloads verbatim.

use serde::{Deserialize, Serialize};

use crate::TradeAction;

/// A decision at the moment it was made.
///
/// `action` and `item_id` are identity fields: a payload without them is
/// rejected at deserialization. Everything else is optional and merely
/// omits reward terms downstream when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    /// Feature vector observed at decision time. Owned by the receiver;
    /// the sender's copy may be discarded after submission.
    pub features: Vec<f32>,
    /// Raw action label. Unrecognized labels resolve to hold.
    pub action: String,
    /// Stated confidence in [0, 1].
    pub confidence: f32,
    /// Forecast return, in the host's normalized return units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_return: Option<f32>,
    /// Risk score on a 0–100 scale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f32>,
    /// Identifier of the traded item this decision refers to.
    pub item_id: String,
}

impl DecisionRecord {
    /// Resolves the raw action label into the closed action set.
    #[must_use]
    pub fn trade_action(&self) -> TradeAction {
        TradeAction::parse(&self.action)
    }
}

/// The realized result of a decision, reported once known.
///
/// Every field is optional: the host reports whatever it has observed so
/// far, and absent fields simply contribute nothing to the reward.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    /// Realized profit, in the host's currency units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_profit: Option<f32>,
    /// Realized return, in the same normalized units as the forecast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_return: Option<f32>,
    /// How long the trade was open, in milliseconds.
    #[serde(rename = "tradeDuration", skip_serializing_if = "Option::is_none")]
    pub trade_duration_ms: Option<i64>,
    /// Whether the host classified the decision as successful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_successful: Option<bool>,
    /// Whether the position/episode is closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_closed: Option<bool>,
    /// Market state after the outcome, if the host captured one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_market_state: Option<Vec<f32>>,
}
