//! Scenario unlock graph: a derived navigation view over the achievement
//! ledger. Nodes carry no persistence of their own; only the transient
//! selection lives here, optionally reflected into a deep-link parameter.

use progress_core::{ProgressProfile, ScenarioConfig};
use thiserror::Error;
use tracing::debug;

/// Rejection of a navigation request. No state changes on denial; the
/// caller owns user-facing feedback.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NavDenied {
    #[error("unknown scenario: {0}")]
    Unknown(String),
    #[error("scenario {id} requires achievement {requires}")]
    Locked { id: String, requires: String },
}

/// Dependency-gated set of scenario nodes plus the current selection.
#[derive(Default)]
pub struct ScenarioGraph {
    nodes: Vec<ScenarioConfig>,
    selected: Option<String>,
}

impl ScenarioGraph {
    /// Nodes are kept in declaration order (by `index`); the requirement
    /// graph itself may be arbitrary. A cycle simply leaves its nodes
    /// permanently locked.
    pub fn new(mut nodes: Vec<ScenarioConfig>) -> Self {
        nodes.sort_by_key(|n| n.index);
        Self {
            nodes,
            selected: None,
        }
    }

    fn node(&self, id: &str) -> Option<&ScenarioConfig> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn is_locked(node: &ScenarioConfig, profile: &ProgressProfile) -> bool {
        node.requires
            .as_deref()
            .map(|req| !profile.is_completed(req))
            .unwrap_or(false)
    }

    /// Recompute every node's locked flag from the completed set; the
    /// `applyLockStyles` projection the navigation chrome renders from.
    pub fn lock_states(&self, profile: &ProgressProfile) -> Vec<(String, bool)> {
        self.nodes
            .iter()
            .map(|n| (n.id.clone(), Self::is_locked(n, profile)))
            .collect()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Select a node. Locked and unknown nodes are rejected with no state
    /// change.
    pub fn select(&mut self, id: &str, profile: &ProgressProfile) -> Result<(), NavDenied> {
        let node = self
            .node(id)
            .ok_or_else(|| NavDenied::Unknown(id.to_string()))?;
        if Self::is_locked(node, profile) {
            return Err(NavDenied::Locked {
                id: id.to_string(),
                requires: node.requires.clone().unwrap_or_default(),
            });
        }
        self.selected = Some(id.to_string());
        Ok(())
    }

    /// If the current selection is missing or became locked (after a reset
    /// or namespace switch), fall back to the first unlocked node in
    /// declaration order. Returns the new selection when it changed.
    pub fn ensure_visible(&mut self, profile: &ProgressProfile) -> Option<String> {
        let still_valid = self
            .selected
            .as_deref()
            .and_then(|id| self.node(id))
            .map(|n| !Self::is_locked(n, profile))
            .unwrap_or(false);
        if still_valid {
            return None;
        }
        let fallback = self
            .nodes
            .iter()
            .find(|n| !Self::is_locked(n, profile))
            .map(|n| n.id.clone());
        if fallback != self.selected {
            debug!(?fallback, "selection fell back to first unlocked node");
            self.selected = fallback.clone();
            fallback
        } else {
            None
        }
    }

    /// Address-bar fragment for the current selection.
    pub fn deep_link(&self) -> Option<String> {
        self.selected.as_deref().map(|id| format!("scenario={id}"))
    }

    /// Apply a `scenario=<id>` query parameter read once at startup.
    /// A missing, unknown, or locked target falls back like any other
    /// invalid selection.
    pub fn select_from_deep_link(&mut self, query: &str, profile: &ProgressProfile) {
        let target = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("scenario="))
            .filter(|id| !id.is_empty());
        if let Some(id) = target {
            if self.select(id, profile).is_ok() {
                return;
            }
        }
        self.ensure_visible(profile);
    }
}
