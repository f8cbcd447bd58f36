//! Tip vaults: cost-gated hint containers with an independent reveal toggle.
//!
//! The unlock is a ledger fact and persists; the reveal flag is transient
//! session state. On load (and after namespace switch) an already-unlocked
//! vault starts revealed and a locked one starts hidden.

use crate::store::{ProgressStore, SpendError, SpendOutcome};
use progress_core::{ProgressProfile, VaultConfig};
use std::collections::BTreeMap;
use thiserror::Error;

/// Observable state of one vault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VaultState {
    Locked,
    UnlockedHidden,
    UnlockedVisible,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("unknown vault: {0}")]
    Unknown(String),
    /// The reveal toggle only exists once the vault is unlocked.
    #[error("vault {0} is locked")]
    Locked(String),
    #[error(transparent)]
    Spend(#[from] SpendError),
}

/// The set of vaults registered for the current lab.
#[derive(Default)]
pub struct VaultSet {
    configs: BTreeMap<String, VaultConfig>,
    revealed: BTreeMap<String, bool>,
}

impl VaultSet {
    pub fn new(configs: Vec<VaultConfig>) -> Self {
        Self {
            configs: configs.into_iter().map(|v| (v.id.clone(), v)).collect(),
            revealed: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&VaultConfig> {
        self.configs.get(id)
    }

    /// Reinitialize reveal flags from the profile: unlocked vaults show
    /// their body, locked ones hide it. Called on load, reset, and
    /// namespace switch.
    pub fn sync(&mut self, profile: &ProgressProfile) {
        self.revealed = self
            .configs
            .keys()
            .map(|id| (id.clone(), profile.is_spent(id)))
            .collect();
    }

    pub fn state(&self, id: &str, profile: &ProgressProfile) -> Option<VaultState> {
        self.configs.get(id)?;
        Some(if !profile.is_spent(id) {
            VaultState::Locked
        } else if *self.revealed.get(id).unwrap_or(&false) {
            VaultState::UnlockedVisible
        } else {
            VaultState::UnlockedHidden
        })
    }

    /// Pay for the vault through the progress store. A successful first
    /// spend moves `Locked -> UnlockedHidden`; a failed spend changes
    /// nothing and surfaces the specific reason.
    pub fn unlock(
        &mut self,
        id: &str,
        store: &mut ProgressStore,
    ) -> Result<SpendOutcome, VaultError> {
        let config = self
            .configs
            .get(id)
            .ok_or_else(|| VaultError::Unknown(id.to_string()))?;
        let outcome = store.spend_tip(id, config.cost)?;
        if outcome == SpendOutcome::Spent(config.cost) {
            self.revealed.insert(id.to_string(), false);
        }
        Ok(outcome)
    }

    /// Flip the reveal toggle of an unlocked vault.
    pub fn toggle_reveal(
        &mut self,
        id: &str,
        profile: &ProgressProfile,
    ) -> Result<VaultState, VaultError> {
        if !self.configs.contains_key(id) {
            return Err(VaultError::Unknown(id.to_string()));
        }
        if !profile.is_spent(id) {
            return Err(VaultError::Locked(id.to_string()));
        }
        let flag = self.revealed.entry(id.to_string()).or_insert(false);
        *flag = !*flag;
        Ok(if *flag {
            VaultState::UnlockedVisible
        } else {
            VaultState::UnlockedHidden
        })
    }

    /// State of every declared vault.
    pub fn states(&self, profile: &ProgressProfile) -> Vec<(String, VaultState)> {
        self.configs
            .keys()
            .filter_map(|id| self.state(id, profile).map(|s| (id.clone(), s)))
            .collect()
    }
}
