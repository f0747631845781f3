//! Recency-biased batch sampling over the experience buffer.

use rand::Rng;

use crate::buffer::{Experience, ExperienceBuffer};

/// Share of the batch taken verbatim from the newest end of the buffer,
/// in percent, rounded down.
const RECENT_SHARE_PERCENT: usize = 80;

/// Draws `min(batch_size, buffer.len())` experiences.
///
/// The recent share is the newest slice of the buffer in insertion order;
/// the remainder is drawn uniformly over the whole buffer *with
/// replacement*. Draws may repeat and may land inside the recent slice;
/// the exploration mix is deliberately not deduplicated.
#[must_use]
pub fn sample(buffer: &ExperienceBuffer, batch_size: usize) -> Vec<Experience> {
    let len = buffer.len();
    let take = batch_size.min(len);
    if take == 0 {
        return Vec::new();
    }

    let recent = take * RECENT_SHARE_PERCENT / 100;
    let mut batch = Vec::with_capacity(take);
    batch.extend(buffer.iter().skip(len - recent).cloned());

    let mut rng = rand::thread_rng();
    for _ in recent..take {
        let index = rng.gen_range(0..len);
        if let Some(pick) = buffer.get(index) {
            batch.push(pick.clone());
        }
    }

    batch
}
