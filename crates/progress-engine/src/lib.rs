#![deny(warnings)]

//! Progression and unlock engine for the security-training lab.
//!
//! The engine is the single stateful core behind the exercise pages: it owns
//! the XP ledger, gates scenario navigation behind achievements, sells hints
//! for earned credit, times challenge runs, and converts observed dialog
//! side effects into awards. Exercise pages stay external: they register
//! declarative configuration up front through [`EngineBuilder`] and report
//! completion through typed [`Signal`]s; the engine reports back through
//! drained [`EngineEvent`]s and derived render-state projections.

pub mod bridge;
pub mod markers;
pub mod scenarios;
pub mod store;
pub mod vault;
pub mod walkthrough;

pub use bridge::{BridgeReport, DialogKind, ExploitBridge};
pub use markers::{MarkerSet, MarkerState};
pub use scenarios::{NavDenied, ScenarioGraph};
pub use store::{ProgressStore, SpendError, SpendOutcome};
pub use vault::{VaultError, VaultSet, VaultState};
pub use walkthrough::{Playback, WalkthroughError, WalkthroughPlayer};

use persistence::{BackendHandle, DualBackend, MemoryBackend};
use progress_core::{
    validate_lab, Clock, LabConfig, ProgressProfile, SystemClock, ValidationError, WalkthroughStep,
};
pub use speedrun::{RunOutcome, RunState, SpeedrunItem, TickToken};

use speedrun::SpeedrunTimer;
use std::rc::Rc;
use tracing::debug;

/// Application-level completion signal raised by exercise pages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    /// A lab exercise was solved. `amount` is only consulted when no marker
    /// is declared for `id`.
    LabSolved { id: String, amount: Option<u64> },
}

/// Outbound effects for the embedding UI, drained after each engine call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// A claim succeeded; show the XP delta.
    XpAwarded {
        id: String,
        amount: u64,
        total_xp: u64,
    },
    /// The selected scenario changed (claim unlock, deep link, or fallback
    /// after reset/namespace switch).
    ScenarioFocused { id: String },
    /// A speedrun finished.
    SpeedrunFinished {
        elapsed_ms: i64,
        best_ms: i64,
        improved: bool,
    },
    ProfileReset,
    NamespaceSwitched { namespace: String },
}

/// Builder for [`Engine`]: explicit configuration registration in place of
/// any markup scanning.
pub struct EngineBuilder {
    lab: LabConfig,
    namespace: String,
    primary: Option<BackendHandle>,
    secondary: Option<BackendHandle>,
    clock: Option<Rc<dyn Clock>>,
    rng_seed: u64,
    deep_link: Option<String>,
}

impl EngineBuilder {
    pub fn new(lab: LabConfig) -> Self {
        Self {
            lab,
            namespace: "guest".to_string(),
            primary: None,
            secondary: None,
            clock: None,
            rng_seed: 42,
            deep_link: None,
        }
    }

    /// Profile namespace to load (defaults to `guest`).
    pub fn namespace(mut self, ns: &str) -> Self {
        self.namespace = ns.to_string();
        self
    }

    pub fn primary_backend(mut self, backend: BackendHandle) -> Self {
        self.primary = Some(backend);
        self
    }

    pub fn secondary_backend(mut self, backend: BackendHandle) -> Self {
        self.secondary = Some(backend);
        self
    }

    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Seed for speedrun sampling; fixed default keeps runs reproducible.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Startup query string, e.g. `scenario=s2`, read once.
    pub fn deep_link(mut self, query: &str) -> Self {
        self.deep_link = Some(query.to_string());
        self
    }

    pub fn build(self) -> Result<Engine, ValidationError> {
        validate_lab(&self.lab)?;
        let primary = self
            .primary
            .unwrap_or_else(|| Rc::new(MemoryBackend::new()));
        let secondary = self
            .secondary
            .unwrap_or_else(|| Rc::new(MemoryBackend::new()));
        let clock: Rc<dyn Clock> = self.clock.unwrap_or_else(|| Rc::new(SystemClock));
        let backend = DualBackend::new(primary, secondary);

        let store = ProgressStore::load(&self.namespace, backend.clone(), clock.clone());
        let mut vaults = VaultSet::new(self.lab.vaults);
        vaults.sync(store.profile());
        let mut graph = ScenarioGraph::new(self.lab.scenarios);
        match &self.deep_link {
            Some(query) => graph.select_from_deep_link(query, store.profile()),
            None => {
                graph.ensure_visible(store.profile());
            }
        }
        let timer = self.lab.speedrun.map(|cfg| {
            SpeedrunTimer::new(cfg, &self.namespace, backend, clock, self.rng_seed)
        });

        Ok(Engine {
            store,
            markers: MarkerSet::new(self.lab.markers),
            vaults,
            graph,
            player: WalkthroughPlayer::new(self.lab.walkthroughs),
            bridge: ExploitBridge::new(self.lab.default_exploit_marker),
            timer,
            events: Vec::new(),
        })
    }
}

/// The composed progression engine.
pub struct Engine {
    store: ProgressStore,
    markers: MarkerSet,
    vaults: VaultSet,
    graph: ScenarioGraph,
    player: WalkthroughPlayer,
    bridge: ExploitBridge,
    timer: Option<SpeedrunTimer>,
    events: Vec<EngineEvent>,
}

impl Engine {
    /// Pending UI effects since the last drain.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn namespace(&self) -> &str {
        self.store.namespace()
    }

    pub fn total_xp(&self) -> u64 {
        self.store.total_xp()
    }

    pub fn profile(&self) -> &ProgressProfile {
        self.store.profile()
    }

    /// Route one inbound signal.
    pub fn dispatch(&mut self, signal: Signal) {
        match signal {
            Signal::LabSolved { id, amount } => {
                self.claim_with_fallback(&id, amount);
            }
        }
    }

    // ---- achievement markers ----

    /// Claim a declared marker. Returns false (and mutates nothing) if the
    /// marker is unknown or already awarded.
    pub fn claim(&mut self, id: &str) -> bool {
        self.claim_with_fallback(id, None)
    }

    fn claim_with_fallback(&mut self, id: &str, fallback: Option<u64>) -> bool {
        let Some(amount) = self.markers.resolve_award(id, fallback) else {
            debug!(id, "claim ignored: no marker and no fallback amount");
            return false;
        };
        if !self.store.award(id, amount) {
            return false;
        }
        self.events.push(EngineEvent::XpAwarded {
            id: id.to_string(),
            amount,
            total_xp: self.store.total_xp(),
        });
        // Completion may change scenario lock state downstream.
        if let Some(focused) = self.graph.ensure_visible(self.store.profile()) {
            self.events.push(EngineEvent::ScenarioFocused { id: focused });
        }
        true
    }

    /// Render state of one marker.
    pub fn marker_state(&self, id: &str) -> Option<MarkerState> {
        self.markers.state(id, self.store.profile())
    }

    /// Render state of every declared marker.
    pub fn marker_states(&self) -> Vec<(String, MarkerState)> {
        self.markers.states(self.store.profile())
    }

    // ---- tip vaults & walkthroughs ----

    /// Spend XP to unlock a vault.
    pub fn unlock_vault(&mut self, id: &str) -> Result<SpendOutcome, VaultError> {
        self.vaults.unlock(id, &mut self.store)
    }

    /// Toggle the reveal state of an unlocked vault.
    pub fn toggle_vault(&mut self, id: &str) -> Result<VaultState, VaultError> {
        self.vaults.toggle_reveal(id, self.store.profile())
    }

    pub fn vault_state(&self, id: &str) -> Option<VaultState> {
        self.vaults.state(id, self.store.profile())
    }

    pub fn vault_states(&self) -> Vec<(String, VaultState)> {
        self.vaults.states(self.store.profile())
    }

    /// Start the walkthrough gated by `vault_id`, paying for the vault
    /// first when it is still locked. An unpayable vault leaves playback
    /// untouched and surfaces the spend failure.
    pub fn start_walkthrough(&mut self, vault_id: &str) -> Result<WalkthroughStep, VaultError> {
        if !self.player.has_script(vault_id) {
            return Err(VaultError::Unknown(vault_id.to_string()));
        }
        self.vaults.unlock(vault_id, &mut self.store)?;
        self.player
            .start(vault_id, self.store.profile().is_spent(vault_id))
            .map(|step| step.clone())
            .map_err(|_| VaultError::Locked(vault_id.to_string()))
    }

    pub fn advance_walkthrough(&mut self) -> Option<WalkthroughStep> {
        self.player.advance().cloned()
    }

    pub fn stop_walkthrough(&mut self) {
        self.player.stop();
    }

    pub fn walkthrough_playback(&self) -> &Playback {
        self.player.playback()
    }

    // ---- scenario graph ----

    /// Locked flag per node, in declaration order.
    pub fn scenario_lock_states(&self) -> Vec<(String, bool)> {
        self.graph.lock_states(self.store.profile())
    }

    pub fn selected_scenario(&self) -> Option<&str> {
        self.graph.selected()
    }

    /// Navigate to a scenario node; locked nodes are denied.
    pub fn select_scenario(&mut self, id: &str) -> Result<(), NavDenied> {
        self.graph.select(id, self.store.profile())?;
        self.events.push(EngineEvent::ScenarioFocused {
            id: id.to_string(),
        });
        Ok(())
    }

    /// Deep-link fragment for the current selection.
    pub fn scenario_deep_link(&self) -> Option<String> {
        self.graph.deep_link()
    }

    // ---- speedrun ----

    pub fn speedrun_state(&self) -> Option<RunState> {
        self.timer.as_ref().map(|t| t.state())
    }

    pub fn speedrun_items(&self) -> &[SpeedrunItem] {
        self.timer.as_ref().map(|t| t.items()).unwrap_or(&[])
    }

    pub fn speedrun_best_time(&self) -> Option<chrono::Duration> {
        self.timer.as_ref().and_then(|t| t.best_time())
    }

    /// Start a timed run; `None` when the lab declares no speedrun.
    pub fn speedrun_start(&mut self, desired: usize) -> Option<TickToken> {
        self.timer.as_mut().map(|t| t.start(desired))
    }

    /// Elapsed time for display, `None` for stale tokens.
    pub fn speedrun_tick(&self, token: TickToken) -> Option<chrono::Duration> {
        self.timer.as_ref().and_then(|t| t.tick(token))
    }

    /// Mark one run item complete; the final item ends the run and raises
    /// the challenge's completion signal through the normal claim path.
    pub fn speedrun_mark_complete(&mut self, item_id: &str) {
        let Some(outcome) = self
            .timer
            .as_mut()
            .and_then(|t| t.mark_complete(item_id))
        else {
            return;
        };
        self.events.push(EngineEvent::SpeedrunFinished {
            elapsed_ms: outcome.elapsed.num_milliseconds(),
            best_ms: outcome.best.num_milliseconds(),
            improved: outcome.improved,
        });
        self.dispatch(Signal::LabSolved {
            id: outcome.achievement_id,
            amount: Some(outcome.xp_award),
        });
    }

    pub fn speedrun_stop(&mut self) {
        if let Some(t) = self.timer.as_mut() {
            t.stop();
        }
    }

    // ---- exploit bridge ----

    /// Point the bridge at the exercise currently on screen.
    pub fn set_current_exploit_marker(&mut self, marker: Option<String>) {
        self.bridge.set_current_marker(marker);
    }

    /// Report an ambient dialog invocation. Resolves the current (or
    /// default) marker and attempts its claim; every failure is swallowed
    /// so the observed dialog itself is never affected.
    pub fn observe_dialog(&mut self, kind: DialogKind) -> BridgeReport {
        let Some(marker) = self.bridge.resolve().map(str::to_string) else {
            return BridgeReport::Ignored;
        };
        debug!(?kind, marker, "dialog observed");
        let awarded = self.claim_with_fallback(&marker, None);
        BridgeReport::Observed { marker, awarded }
    }

    /// Wrap a dialog closure: the observation fires first, then the dialog
    /// runs unchanged. The instrumented replacement for patching globals.
    pub fn with_dialog<R>(&mut self, kind: DialogKind, dialog: impl FnOnce() -> R) -> R {
        let _ = self.observe_dialog(kind);
        dialog()
    }

    // ---- lifecycle ----

    /// Learner-initiated wipe of the current namespace's profile. Vaults
    /// relock, playback stops, and the scenario selection falls back.
    pub fn reset(&mut self) {
        self.store.reset();
        self.vaults.sync(self.store.profile());
        self.player.stop();
        self.events.push(EngineEvent::ProfileReset);
        if let Some(focused) = self.graph.ensure_visible(self.store.profile()) {
            self.events.push(EngineEvent::ScenarioFocused { id: focused });
        }
    }

    /// Login/logout: replace all in-memory state with the target
    /// namespace's persisted profile. Nothing merges.
    pub fn switch_namespace(&mut self, namespace: &str) {
        self.store.switch_namespace(namespace);
        self.vaults.sync(self.store.profile());
        self.player.stop();
        if let Some(t) = self.timer.as_mut() {
            t.switch_namespace(namespace);
        }
        self.events.push(EngineEvent::NamespaceSwitched {
            namespace: namespace.to_string(),
        });
        if let Some(focused) = self.graph.ensure_visible(self.store.profile()) {
            self.events.push(EngineEvent::ScenarioFocused { id: focused });
        }
    }
}
