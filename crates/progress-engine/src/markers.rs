//! Declared achievement markers and their derived render state.

use progress_core::{MarkerConfig, ProgressProfile};
use std::collections::BTreeMap;

/// What a marker's claim control should currently show.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkerState {
    /// Already claimed: a disabled control showing the recorded amount.
    Completed { amount: u64 },
    /// Claimable: an enabled control showing the configured award.
    Claimable { xp_award: u64 },
}

/// The set of markers registered for the current lab.
#[derive(Default)]
pub struct MarkerSet {
    configs: BTreeMap<String, MarkerConfig>,
}

impl MarkerSet {
    pub fn new(configs: Vec<MarkerConfig>) -> Self {
        Self {
            configs: configs.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&MarkerConfig> {
        self.configs.get(id)
    }

    /// The award amount for a claim of `id`: the declared amount when a
    /// marker exists, otherwise the signal's own fallback amount.
    pub fn resolve_award(&self, id: &str, fallback: Option<u64>) -> Option<u64> {
        self.configs
            .get(id)
            .map(|m| m.xp_award)
            .or(fallback)
    }

    /// Idempotent re-render projection for one marker.
    pub fn state(&self, id: &str, profile: &ProgressProfile) -> Option<MarkerState> {
        let config = self.configs.get(id)?;
        Some(match profile.completed.get(id) {
            Some(entry) => MarkerState::Completed {
                amount: entry.amount,
            },
            None => MarkerState::Claimable {
                xp_award: config.xp_award,
            },
        })
    }

    /// Render state for every declared marker.
    pub fn states(&self, profile: &ProgressProfile) -> Vec<(String, MarkerState)> {
        self.configs
            .keys()
            .filter_map(|id| self.state(id, profile).map(|s| (id.clone(), s)))
            .collect()
    }
}
