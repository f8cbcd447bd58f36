//! Single source of truth for the progress profile. Every mutation of the
//! ledger passes through here; other components hold read-only views and
//! request changes via [`ProgressStore::award`], [`ProgressStore::spend_tip`]
//! or [`ProgressStore::reset`].

use persistence::{profile_key, DualBackend};
use progress_core::{Clock, CompletedEntry, ProgressProfile, SpentEntry};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Structured failure of a spend request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SpendError {
    /// Empty id or zero amount.
    #[error("invalid spend request")]
    Invalid,
    /// Balance too low; the request is rejected, never clamped.
    #[error("insufficient XP: have {have}, need {need}")]
    Insufficient { have: u64, need: u64 },
}

/// Successful spend results.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpendOutcome {
    /// The hint was already paid for; nothing was charged.
    Already,
    /// The hint was charged now, for this many XP.
    Spent(u64),
}

/// Owns the per-namespace [`ProgressProfile`] and its persistence.
pub struct ProgressStore {
    namespace: String,
    profile: ProgressProfile,
    backend: DualBackend,
    clock: Rc<dyn Clock>,
}

impl ProgressStore {
    /// Load the profile for `namespace`. A missing or malformed persisted
    /// profile is replaced by an empty one; loading never fails.
    pub fn load(namespace: &str, backend: DualBackend, clock: Rc<dyn Clock>) -> Self {
        let profile = backend
            .read_json::<ProgressProfile>(&profile_key(namespace))
            .unwrap_or_default();
        debug!(namespace, total_xp = profile.total_xp, "profile loaded");
        Self {
            namespace: namespace.to_string(),
            profile,
            backend,
            clock,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Read-only view of the profile.
    pub fn profile(&self) -> &ProgressProfile {
        &self.profile
    }

    pub fn total_xp(&self) -> u64 {
        self.profile.total_xp
    }

    /// Persist the profile to both backends. Failures cost durability only;
    /// the in-memory profile stays authoritative for the session.
    fn save(&self) {
        if let Err(e) = self
            .backend
            .write_json(&profile_key(&self.namespace), &self.profile)
        {
            warn!(namespace = %self.namespace, error = %e, "profile not persisted");
        }
    }

    /// Grant `amount` XP for achievement `id`. Fails closed (no mutation)
    /// for an empty id, a zero amount, or an id already awarded. This is the
    /// sole growth path for XP, idempotent by construction.
    pub fn award(&mut self, id: &str, amount: u64) -> bool {
        if id.trim().is_empty() || amount == 0 || self.profile.is_completed(id) {
            return false;
        }
        self.profile.total_xp += amount;
        self.profile.completed.insert(
            id.to_string(),
            CompletedEntry {
                amount,
                awarded_at: self.clock.now(),
            },
        );
        self.save();
        info!(id, amount, total_xp = self.profile.total_xp, "xp awarded");
        true
    }

    /// Charge `amount` XP to unlock hint `id`. Already-unlocked hints are
    /// confirmed without a second charge.
    pub fn spend_tip(&mut self, id: &str, amount: u64) -> Result<SpendOutcome, SpendError> {
        if self.profile.is_spent(id) {
            return Ok(SpendOutcome::Already);
        }
        if id.trim().is_empty() || amount == 0 {
            return Err(SpendError::Invalid);
        }
        if self.profile.total_xp < amount {
            return Err(SpendError::Insufficient {
                have: self.profile.total_xp,
                need: amount,
            });
        }
        self.profile.total_xp -= amount;
        self.profile.spent_hints.insert(
            id.to_string(),
            SpentEntry {
                cost: amount,
                unlocked_at: self.clock.now(),
            },
        );
        self.save();
        info!(id, amount, total_xp = self.profile.total_xp, "tip unlocked");
        Ok(SpendOutcome::Spent(amount))
    }

    /// Learner-initiated wipe: clear the profile and persist the empty state.
    pub fn reset(&mut self) {
        self.profile = ProgressProfile::default();
        self.save();
        info!(namespace = %self.namespace, "profile reset");
    }

    /// Replace in-memory state with the profile of a different namespace.
    /// Profiles never merge across namespaces.
    pub fn switch_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
        self.profile = self
            .backend
            .read_json::<ProgressProfile>(&profile_key(namespace))
            .unwrap_or_default();
        info!(namespace, total_xp = self.profile.total_xp, "namespace switched");
    }
}
