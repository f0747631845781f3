//! Reward shaping: profit, forecast accuracy, timing, risk and calibration
//! signals composed into one scalar learning signal.
//!
//! Every term is independently optional (a missing outcome field omits its
//! term, it never errors) and the sum is clamped to a fixed symmetric range
//! so that no single runaway trade dominates the training signal.

use marktlern_core::{DecisionRecord, OutcomeRecord};

/// Lower bound of the shaped reward.
pub const REWARD_MIN: f32 = -10.0;
/// Upper bound of the shaped reward.
pub const REWARD_MAX: f32 = 10.0;

// Profit term
/// Profit at which the squashed term reaches tanh(1) of its weight.
const PROFIT_SCALE: f32 = 1_000_000.0;
/// Weight of the squashed profit term.
const PROFIT_WEIGHT: f32 = 10.0;

// Forecast accuracy term
/// Weight of the forecast-accuracy term; zero contribution once the
/// absolute forecast error reaches 1.0 in normalized return units.
const ACCURACY_WEIGHT: f32 = 2.0;

// Time-efficiency term
/// Reference duration (24h in milliseconds); trades open this long or
/// longer contribute nothing.
const DURATION_REFERENCE_MS: f32 = 86_400_000.0;
/// Weight of the time-efficiency term.
const TIME_WEIGHT: f32 = 0.5;

// Risk penalty
/// Risk score (0–100 scale) above which losing trades are penalized.
const RISK_PENALTY_FLOOR: f32 = 60.0;
/// Span over which the penalty ramps from zero to full weight.
const RISK_PENALTY_SPAN: f32 = 40.0;
/// Penalty weight at the top of the risk scale.
const RISK_PENALTY_WEIGHT: f32 = 2.0;

/// Shapes a decision/outcome pair into a reward in
/// [[`REWARD_MIN`], [`REWARD_MAX`]].
///
/// Deterministic and side-effect free. Terms are added in a fixed order:
/// profit, forecast accuracy, time efficiency, risk penalty, confidence
/// calibration; the running total is clamped once at the end.
#[must_use]
pub fn shape_reward(decision: &DecisionRecord, outcome: &OutcomeRecord) -> f32 {
    let mut reward = 0.0f32;

    if let Some(profit) = finite(outcome.actual_profit) {
        reward += (profit / PROFIT_SCALE).tanh() * PROFIT_WEIGHT;
    }

    if let (Some(actual), Some(expected)) = (
        finite(outcome.actual_return),
        finite(decision.expected_return),
    ) {
        reward += (1.0 - (actual - expected).abs()).max(0.0) * ACCURACY_WEIGHT;
    }

    if let Some(duration_ms) = outcome.trade_duration_ms {
        #[allow(clippy::cast_precision_loss)]
        let duration_ms = duration_ms as f32;
        reward += (1.0 - duration_ms / DURATION_REFERENCE_MS).max(0.0) * TIME_WEIGHT;
    }

    if let (Some(profit), Some(risk)) = (finite(outcome.actual_profit), finite(decision.risk_score))
    {
        if profit < 0.0 && risk > RISK_PENALTY_FLOOR {
            reward -= (risk - RISK_PENALTY_FLOOR) / RISK_PENALTY_SPAN * RISK_PENALTY_WEIGHT;
        }
    }

    if let Some(successful) = outcome.was_successful {
        let confidence = decision.confidence.clamp(0.0, 1.0);
        reward += if successful { confidence } else { 1.0 - confidence };
    }

    reward.clamp(REWARD_MIN, REWARD_MAX)
}

/// Non-finite inputs are treated as absent, not as an error.
fn finite(value: Option<f32>) -> Option<f32> {
    value.filter(|v| v.is_finite())
}
