#![deny(warnings)]

//! Core domain models and invariants for the lab progression engine.
//!
//! This crate defines the serializable types shared across the engine with
//! validation helpers to guarantee basic invariants of a lab configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// One awarded achievement in a learner's ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedEntry {
    /// XP granted when the achievement was claimed.
    pub amount: u64,
    /// Wall-clock time of the award.
    pub awarded_at: DateTime<Utc>,
}

/// One purchased hint in a learner's ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentEntry {
    /// XP charged when the hint was unlocked.
    pub cost: u64,
    /// Wall-clock time of the unlock.
    pub unlocked_at: DateTime<Utc>,
}

/// Per-namespace progression state. Created empty on first load and mutated
/// only through the progress store's award/spend/reset operations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressProfile {
    /// Earned-minus-spent XP balance. Never allowed to underflow.
    pub total_xp: u64,
    /// Awarded achievements, keyed by achievement id.
    pub completed: BTreeMap<String, CompletedEntry>,
    /// Purchased hints, keyed by vault id.
    pub spent_hints: BTreeMap<String, SpentEntry>,
}

impl ProgressProfile {
    /// True when the achievement has already been claimed.
    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.contains_key(id)
    }

    /// True when the hint has already been paid for.
    pub fn is_spent(&self, id: &str) -> bool {
        self.spent_hints.contains_key(id)
    }
}

/// A declared unit of progress with a stable id and XP value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Stable achievement id, e.g. "stored-xss-done".
    pub id: String,
    /// Human-readable label shown on the claim control.
    pub label: String,
    /// XP granted on claim (> 0).
    pub xp_award: u64,
}

/// A cost-gated, optionally-revealable hint container.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Stable vault id, e.g. "hint-dom-sink".
    pub id: String,
    /// XP charged to unlock (> 0).
    pub cost: u64,
}

/// One step of a prerequisite-gated exercise sequence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Stable scenario id, e.g. "s2".
    pub id: String,
    /// Declaration order; used when falling back to the first unlocked node.
    pub index: u32,
    /// Achievement that must be completed before this node unlocks.
    #[serde(default)]
    pub requires: Option<String>,
}

/// A single playback step of a walkthrough script.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkthroughStep {
    /// Text shown for this step.
    pub text: String,
    /// Suggested pause before the next step, in milliseconds.
    pub pause_ms: u64,
}

/// A scripted demonstration gated behind a tip vault's unlock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkthroughScript {
    /// Vault whose unlock gates playback.
    pub vault_id: String,
    /// Ordered playback steps (non-empty).
    pub steps: Vec<WalkthroughStep>,
}

/// Configuration for the timed challenge over a level pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpeedrunConfig {
    /// Level keys eligible for a run (non-empty).
    pub level_pool: Vec<String>,
    /// Default number of items sampled per run.
    pub default_count: usize,
    /// Achievement id raised when a run completes.
    pub achievement_id: String,
    /// XP attached to the completion signal.
    pub xp_award: u64,
}

/// Full declarative configuration for one lab, registered with the engine
/// at construction instead of being scanned out of rendered markup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LabConfig {
    #[serde(default)]
    pub markers: Vec<MarkerConfig>,
    #[serde(default)]
    pub vaults: Vec<VaultConfig>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioConfig>,
    #[serde(default)]
    pub walkthroughs: Vec<WalkthroughScript>,
    #[serde(default)]
    pub speedrun: Option<SpeedrunConfig>,
    /// Marker claimed by the exploit bridge when no current marker is set.
    #[serde(default)]
    pub default_exploit_marker: Option<String>,
}

/// Validation errors for lab configuration invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// An id field was empty where a stable id is required.
    #[error("empty id in {0}")]
    EmptyId(&'static str),
    /// The same id was declared twice within one component kind.
    #[error("duplicate id: {0}")]
    DuplicateId(String),
    /// An XP award or cost of zero can never be claimed or charged.
    #[error("non-positive amount for {0}")]
    NonPositiveAmount(String),
    /// A scenario requirement or walkthrough gate refers to nothing declared.
    #[error("unknown reference: {0}")]
    UnknownReference(String),
    /// The speedrun level pool was empty.
    #[error("speedrun level pool is empty")]
    EmptyLevelPool,
    /// A walkthrough script declared no steps.
    #[error("walkthrough for vault {0} has no steps")]
    EmptyWalkthrough(String),
}

/// Validate a lab configuration, including cross-references like scenario
/// requirements and walkthrough vault gates.
pub fn validate_lab(lab: &LabConfig) -> Result<(), ValidationError> {
    let mut marker_ids: BTreeSet<&str> = BTreeSet::new();
    for m in &lab.markers {
        if m.id.trim().is_empty() {
            return Err(ValidationError::EmptyId("marker"));
        }
        if m.xp_award == 0 {
            return Err(ValidationError::NonPositiveAmount(m.id.clone()));
        }
        if !marker_ids.insert(&m.id) {
            return Err(ValidationError::DuplicateId(m.id.clone()));
        }
    }

    let mut vault_ids: BTreeSet<&str> = BTreeSet::new();
    for v in &lab.vaults {
        if v.id.trim().is_empty() {
            return Err(ValidationError::EmptyId("vault"));
        }
        if v.cost == 0 {
            return Err(ValidationError::NonPositiveAmount(v.id.clone()));
        }
        if !vault_ids.insert(&v.id) {
            return Err(ValidationError::DuplicateId(v.id.clone()));
        }
    }

    let mut scenario_ids: BTreeSet<&str> = BTreeSet::new();
    for s in &lab.scenarios {
        if s.id.trim().is_empty() {
            return Err(ValidationError::EmptyId("scenario"));
        }
        if !scenario_ids.insert(&s.id) {
            return Err(ValidationError::DuplicateId(s.id.clone()));
        }
        // Requirements must name a declared marker. The requirement graph is
        // otherwise arbitrary; cycles are a configuration mistake the engine
        // tolerates (the affected nodes simply never unlock).
        if let Some(req) = &s.requires {
            if !marker_ids.contains(req.as_str()) {
                return Err(ValidationError::UnknownReference(req.clone()));
            }
        }
    }

    for w in &lab.walkthroughs {
        if !vault_ids.contains(w.vault_id.as_str()) {
            return Err(ValidationError::UnknownReference(w.vault_id.clone()));
        }
        if w.steps.is_empty() {
            return Err(ValidationError::EmptyWalkthrough(w.vault_id.clone()));
        }
    }

    if let Some(sr) = &lab.speedrun {
        if sr.level_pool.is_empty() {
            return Err(ValidationError::EmptyLevelPool);
        }
        if sr.achievement_id.trim().is_empty() {
            return Err(ValidationError::EmptyId("speedrun achievement"));
        }
        if sr.xp_award == 0 {
            return Err(ValidationError::NonPositiveAmount(sr.achievement_id.clone()));
        }
    }

    if let Some(def) = &lab.default_exploit_marker {
        if !marker_ids.contains(def.as_str()) {
            return Err(ValidationError::UnknownReference(def.clone()));
        }
    }

    Ok(())
}

/// Wall-clock source. Injected so tests can drive time deterministically.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Real clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: std::cell::Cell<i64>,
}

impl ManualClock {
    /// Start at the given UNIX millisecond timestamp.
    pub fn at_millis(ms: i64) -> Self {
        Self {
            now: std::cell::Cell::new(ms),
        }
    }

    /// Advance by the given number of milliseconds.
    pub fn advance_millis(&self, ms: i64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.now.get()).unwrap_or_default()
    }
}
