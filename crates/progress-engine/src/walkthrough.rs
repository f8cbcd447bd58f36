//! Scripted demonstration playback, gated by a tip vault's unlock.
//!
//! The player sequences declarative steps; pacing (the per-step pause) is
//! advisory and left to the embedder's scheduler.

use progress_core::{WalkthroughScript, WalkthroughStep};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WalkthroughError {
    #[error("no walkthrough for vault: {0}")]
    Unknown(String),
    /// Playback never starts while the gating vault is still locked.
    #[error("walkthrough for vault {0} is still locked")]
    Gated(String),
}

/// Where playback currently stands.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Playback {
    #[default]
    Idle,
    Playing { vault_id: String, step: usize },
    Finished { vault_id: String },
}

/// Sequencer over the registered walkthrough scripts.
#[derive(Default)]
pub struct WalkthroughPlayer {
    scripts: BTreeMap<String, WalkthroughScript>,
    playback: Playback,
}

impl WalkthroughPlayer {
    pub fn new(scripts: Vec<WalkthroughScript>) -> Self {
        Self {
            scripts: scripts
                .into_iter()
                .map(|s| (s.vault_id.clone(), s))
                .collect(),
            playback: Playback::Idle,
        }
    }

    pub fn has_script(&self, vault_id: &str) -> bool {
        self.scripts.contains_key(vault_id)
    }

    pub fn playback(&self) -> &Playback {
        &self.playback
    }

    /// Begin playback of the script gated by `vault_id`. The caller (the
    /// engine) is responsible for having settled the vault's unlock first;
    /// `unlocked` carries that verdict.
    pub fn start(&mut self, vault_id: &str, unlocked: bool) -> Result<&WalkthroughStep, WalkthroughError> {
        let script = self
            .scripts
            .get(vault_id)
            .ok_or_else(|| WalkthroughError::Unknown(vault_id.to_string()))?;
        if !unlocked {
            return Err(WalkthroughError::Gated(vault_id.to_string()));
        }
        // Scripts are validated non-empty at registration.
        let first = script
            .steps
            .first()
            .ok_or_else(|| WalkthroughError::Unknown(vault_id.to_string()))?;
        self.playback = Playback::Playing {
            vault_id: vault_id.to_string(),
            step: 0,
        };
        Ok(first)
    }

    /// The step playback currently points at, if any.
    pub fn current(&self) -> Option<&WalkthroughStep> {
        match &self.playback {
            Playback::Playing { vault_id, step } => {
                self.scripts.get(vault_id).and_then(|s| s.steps.get(*step))
            }
            _ => None,
        }
    }

    /// Move to the next step. Returns `None` once the script is exhausted,
    /// at which point playback is `Finished`.
    pub fn advance(&mut self) -> Option<&WalkthroughStep> {
        let (id, next) = match &self.playback {
            Playback::Playing { vault_id, step } => (vault_id.clone(), step + 1),
            _ => return None,
        };
        let len = self.scripts.get(&id).map(|s| s.steps.len()).unwrap_or(0);
        if next < len {
            self.playback = Playback::Playing {
                vault_id: id.clone(),
                step: next,
            };
            self.scripts.get(&id).and_then(|s| s.steps.get(next))
        } else {
            self.playback = Playback::Finished { vault_id: id };
            None
        }
    }

    /// Abort playback.
    pub fn stop(&mut self) {
        self.playback = Playback::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> WalkthroughPlayer {
        WalkthroughPlayer::new(vec![WalkthroughScript {
            vault_id: "hint-sink".into(),
            steps: vec![
                WalkthroughStep {
                    text: "Open the search box".into(),
                    pause_ms: 800,
                },
                WalkthroughStep {
                    text: "Paste the payload".into(),
                    pause_ms: 1200,
                },
            ],
        }])
    }

    #[test]
    fn new_player_starts_idle() {
        let p = player();
        assert_eq!(p.playback(), &Playback::Idle);
        assert!(p.current().is_none());
    }

    #[test]
    fn locked_vault_gates_playback() {
        let mut p = player();
        assert_eq!(
            p.start("hint-sink", false),
            Err(WalkthroughError::Gated("hint-sink".into()))
        );
        assert_eq!(p.playback(), &Playback::Idle);
        assert_eq!(
            p.start("nope", true),
            Err(WalkthroughError::Unknown("nope".into()))
        );
    }

    #[test]
    fn plays_steps_in_order_then_finishes() {
        let mut p = player();
        let first = p.start("hint-sink", true).unwrap();
        assert_eq!(first.text, "Open the search box");
        assert_eq!(p.current().unwrap().pause_ms, 800);
        let second = p.advance().unwrap();
        assert_eq!(second.text, "Paste the payload");
        assert!(p.advance().is_none());
        assert_eq!(
            p.playback(),
            &Playback::Finished {
                vault_id: "hint-sink".into()
            }
        );
        assert!(p.current().is_none());
    }

    #[test]
    fn stop_returns_to_idle() {
        let mut p = player();
        p.start("hint-sink", true).unwrap();
        p.stop();
        assert_eq!(p.playback(), &Playback::Idle);
        assert!(p.advance().is_none());
    }
}
