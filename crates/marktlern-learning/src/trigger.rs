//! Conjunctive gate deciding when enough evidence justifies a model update.

use time::OffsetDateTime;

use crate::LearningConfig;

/// Counters advanced by the update coordinator after each completed update.
#[derive(Debug, Clone, Default)]
pub struct TriggerState {
    /// Wall-clock time of the last completed update; `None` until the
    /// first one, which passes the cooldown gate.
    pub last_update: Option<OffsetDateTime>,
    /// Buffer length observed when the last update completed.
    pub buffer_len_at_last_update: usize,
    /// Experiences recorded over the lifetime of the service.
    pub total_experiences: u64,
}

/// Re-evaluated statelessly on every insertion; idempotent, so repeated
/// evaluation with no new insertions yields the same answer.
///
/// An update is due iff learning is enabled, the buffer can fill a batch,
/// enough experiences were observed since the last update, and the cooldown
/// has elapsed.
#[must_use]
pub fn update_due(
    config: &LearningConfig,
    state: &TriggerState,
    buffer_len: usize,
    now: OffsetDateTime,
) -> bool {
    if !config.enable_online_learning {
        return false;
    }
    if buffer_len < config.batch_size {
        return false;
    }
    // A length difference, not a true arrival count: once FIFO eviction is
    // active (or after a clear) this undercounts, matching the upstream
    // "experiences observed since last update" semantics.
    if buffer_len.saturating_sub(state.buffer_len_at_last_update) < config.learning_frequency {
        return false;
    }
    match state.last_update {
        None => true,
        Some(last) => (now - last).whole_milliseconds() >= i128::from(config.min_update_interval_ms),
    }
}
