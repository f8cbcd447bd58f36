//! Exploit signal bridge: turns an observed dialog-style side effect into a
//! claim request, without any cooperation from the injected payload.
//!
//! The bridge is an explicit instrumentation point rather than a patch over
//! shared globals: the embedder reports every alert/confirm/prompt-style
//! invocation through the engine, which resolves a marker and attempts the
//! claim before the real dialog runs. The heuristic is inherently
//! best-effort: it cannot tell a proof-of-concept call from an accidental
//! one, and the idempotent ledger caps it at one award per marker.

/// The three ambient user-interaction shapes the bridge instruments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DialogKind {
    Alert,
    Confirm,
    Prompt,
}

/// What a single observation did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeReport {
    /// A marker resolved and its claim was attempted (the claim itself may
    /// still have been a no-op if already awarded).
    Observed { marker: String, awarded: bool },
    /// No current or default marker was configured; nothing happened.
    Ignored,
}

/// Marker resolution state for the bridge.
#[derive(Default)]
pub struct ExploitBridge {
    current: Option<String>,
    default: Option<String>,
}

impl ExploitBridge {
    pub fn new(default_marker: Option<String>) -> Self {
        Self {
            current: None,
            default: default_marker,
        }
    }

    /// Point the bridge at the exercise currently on screen. `None` falls
    /// back to the page-declared default marker.
    pub fn set_current_marker(&mut self, marker: Option<String>) {
        self.current = marker;
    }

    /// The marker a dialog observation would claim right now.
    pub fn resolve(&self) -> Option<&str> {
        self.current.as_deref().or(self.default.as_deref())
    }
}
