//! Score Update Engine: the only place persisted scores and counters change.
//! Each operation is a read-modify-write of one record followed by its index
//! upsert; none depends on another having run first.

use anyhow::Result;

use super::store::CardStore;
use super::{clamp_score, round_score};

pub struct ScoreEngine<'a> {
    store: &'a CardStore,
}

impl<'a> ScoreEngine<'a> {
    pub fn new(store: &'a CardStore) -> Self {
        Self { store }
    }

    /// `score = clamp(score + delta, 0, 1)`. Returns the persisted score, or
    /// `None` when the card no longer exists.
    pub fn apply_delta(&self, name: &str, delta: f64) -> Result<Option<f64>> {
        let Some(mut card) = self.store.get(name)? else {
            return Ok(None);
        };
        card.score = round_score(clamp_score(card.score + delta));
        let stored = self.store.upsert(card)?;
        Ok(Some(stored.score))
    }

    /// `false` when the card is missing.
    pub fn increment_surfaced(&self, name: &str) -> Result<bool> {
        let Some(mut card) = self.store.get(name)? else {
            return Ok(false);
        };
        card.times_surfaced = card.times_surfaced.saturating_add(1);
        self.store.upsert(card)?;
        Ok(true)
    }

    /// `false` when the card is missing.
    pub fn increment_useful(&self, name: &str) -> Result<bool> {
        let Some(mut card) = self.store.get(name)? else {
            return Ok(false);
        };
        card.times_useful = card.times_useful.saturating_add(1);
        self.store.upsert(card)?;
        Ok(true)
    }
}
