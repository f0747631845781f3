//! Bounded, insertion-ordered experience store with FIFO eviction.

use std::collections::VecDeque;

use marktlern_core::TradeAction;
use serde::{Deserialize, Serialize};

/// One labeled decision/outcome transition.
///
/// Immutable once created; only the buffer's membership changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    /// Feature vector at decision time.
    pub state: Vec<f32>,
    pub action: TradeAction,
    /// Shaped reward, already clamped by [`crate::reward::shape_reward`].
    pub reward: f32,
    /// Market state after the outcome; falls back to `state` when the
    /// outcome carried none.
    pub next_state: Vec<f32>,
    /// True when the position/episode is closed.
    pub done: bool,
    pub meta: ExperienceMeta,
}

/// Audit trail carried alongside each experience. Exported, never fed to
/// the training contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceMeta {
    /// RFC 3339 creation timestamp.
    pub recorded_at: String,
    /// Identifier of the originating item.
    pub item_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_return: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_return: Option<f32>,
    /// Confidence the decision was made with.
    pub confidence: f32,
}

/// Ordered sequence of experiences, oldest first.
///
/// Length never exceeds capacity: insertion appends at the tail and evicts
/// from the head, purely by age; reward and recency-of-use play no part.
#[derive(Debug)]
pub struct ExperienceBuffer {
    entries: VecDeque<Experience>,
    capacity: usize,
}

impl ExperienceBuffer {
    /// Creates an empty buffer. A capacity of zero is clamped to one so
    /// that `record` is never a silent no-op.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends at the tail, evicting the oldest entries once over capacity.
    pub fn record(&mut self, experience: Experience) {
        self.entries.push_back(experience);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Empties the buffer, returning how many experiences were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Entry by age rank: index 0 is the oldest surviving experience.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Experience> {
        self.entries.get(index)
    }

    /// Iterates oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        self.entries.iter()
    }

    /// Owned copy of the current contents, oldest first. Later buffer
    /// mutation is not observable through it.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Experience> {
        self.entries.iter().cloned().collect()
    }
}
