#![deny(warnings)]

//! Timed challenge runs over a sampled subset of a level pool.
//!
//! A session is ephemeral: it never survives a reload. Only the per-namespace
//! best time is persisted, under its own storage key, since it is not an XP
//! concern. Completion of a run is reported back to the caller as a
//! [`RunOutcome`] so the progression engine can raise the completion signal.

use chrono::{DateTime, Duration, Utc};
use persistence::{best_time_key, DualBackend};
use progress_core::{Clock, SpeedrunConfig};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::rc::Rc;
use tracing::{debug, info};

/// One sampled level inside a running session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeedrunItem {
    /// Session-local item id, stable for the duration of the run.
    pub id: String,
    /// Level drawn from the configured pool.
    pub level_key: String,
    /// Display label.
    pub label: String,
    /// Whether the learner has finished this item.
    pub complete: bool,
}

/// Session lifecycle: `Idle -> Running -> Complete -> Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Complete,
}

/// Handle to the recurring display tick of one session generation.
///
/// `start()` and `stop()` invalidate all previously issued tokens, so a
/// scheduled driver holding a stale token can never mutate a newer session's
/// display. This replaces interval cancellation in a callback runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickToken(u64);

/// Result of finishing the last item of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// Wall time from `start` to the final completion.
    pub elapsed: Duration,
    /// Best time on record after this run.
    pub best: Duration,
    /// Whether this run improved (or established) the best time.
    pub improved: bool,
    /// Achievement to claim for finishing the challenge.
    pub achievement_id: String,
    /// XP attached to the completion signal.
    pub xp_award: u64,
}

/// Timed multi-item challenge session with best-time tracking.
pub struct SpeedrunTimer {
    config: SpeedrunConfig,
    namespace: String,
    backend: DualBackend,
    clock: Rc<dyn Clock>,
    rng: ChaCha8Rng,
    state: RunState,
    items: Vec<SpeedrunItem>,
    started_at: Option<DateTime<Utc>>,
    generation: u64,
}

impl SpeedrunTimer {
    pub fn new(
        config: SpeedrunConfig,
        namespace: &str,
        backend: DualBackend,
        clock: Rc<dyn Clock>,
        seed: u64,
    ) -> Self {
        Self {
            config,
            namespace: namespace.to_string(),
            backend,
            clock,
            rng: ChaCha8Rng::seed_from_u64(seed),
            state: RunState::Idle,
            items: Vec::new(),
            started_at: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn items(&self) -> &[SpeedrunItem] {
        &self.items
    }

    /// Best time on record for the current namespace, if any.
    pub fn best_time(&self) -> Option<Duration> {
        self.backend
            .read(&best_time_key(&self.namespace))
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(Duration::milliseconds)
    }

    /// Begin a run over `desired` items sampled from the pool without
    /// replacement. Any previous session's tick token becomes stale.
    pub fn start(&mut self, desired: usize) -> TickToken {
        self.generation += 1;
        let count = desired.clamp(1, self.config.level_pool.len());
        let mut working = self.config.level_pool.clone();
        self.items = (0..count)
            .map(|i| {
                let idx = self.rng.gen_range(0..working.len());
                let level_key = working.remove(idx);
                SpeedrunItem {
                    id: format!("run-{i}"),
                    label: format!("Level {level_key}"),
                    level_key,
                    complete: false,
                }
            })
            .collect();
        self.started_at = Some(self.clock.now());
        self.state = RunState::Running;
        info!(count, "speedrun started");
        TickToken(self.generation)
    }

    /// Elapsed time for display. Returns `None` for a stale token or when no
    /// run is in progress, so at most one live ticker exists per session.
    pub fn tick(&self, token: TickToken) -> Option<Duration> {
        if token.0 != self.generation || self.state != RunState::Running {
            return None;
        }
        self.started_at.map(|t0| self.clock.now() - t0)
    }

    /// Mark one item finished. A no-op unless a run is in progress and the
    /// item exists and is still incomplete. Finishing the last item ends the
    /// run and returns the outcome.
    pub fn mark_complete(&mut self, item_id: &str) -> Option<RunOutcome> {
        if self.state != RunState::Running {
            return None;
        }
        let item = self
            .items
            .iter_mut()
            .find(|it| it.id == item_id && !it.complete)?;
        item.complete = true;
        debug!(item_id, "speedrun item complete");

        if self.items.iter().any(|it| !it.complete) {
            return None;
        }

        let elapsed = self
            .started_at
            .map(|t0| self.clock.now() - t0)
            .unwrap_or_else(Duration::zero);
        self.generation += 1; // cancel the display tick
        self.state = RunState::Complete;

        // Absent best counts as infinitely large, so a first run always wins.
        let prior = self.best_time();
        let improved = prior.map_or(true, |p| elapsed < p);
        let best = if improved {
            let ms = elapsed.num_milliseconds().max(0);
            if let Err(e) = self
                .backend
                .write(&best_time_key(&self.namespace), &ms.to_string())
            {
                tracing::warn!(error = %e, "best time not persisted");
            }
            elapsed
        } else {
            prior.unwrap_or(elapsed)
        };
        info!(
            elapsed_ms = elapsed.num_milliseconds(),
            improved, "speedrun complete"
        );

        Some(RunOutcome {
            elapsed,
            best,
            improved,
            achievement_id: self.config.achievement_id.clone(),
            xp_award: self.config.xp_award,
        })
    }

    /// Abandon the current session and return to `Idle`.
    pub fn stop(&mut self) {
        self.generation += 1;
        self.state = RunState::Idle;
        self.items.clear();
        self.started_at = None;
    }

    /// Point the best-time key at a different profile namespace. The current
    /// session, if any, is abandoned; sessions never cross namespaces.
    pub fn switch_namespace(&mut self, namespace: &str) {
        self.stop();
        self.namespace = namespace.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::MemoryBackend;
    use progress_core::ManualClock;
    use std::collections::BTreeSet;

    fn config() -> SpeedrunConfig {
        SpeedrunConfig {
            level_pool: vec!["l1".into(), "l2".into(), "l3".into(), "l4".into(), "l5".into()],
            default_count: 3,
            achievement_id: "speedrun-done".into(),
            xp_award: 100,
        }
    }

    fn timer_with_clock(clock: Rc<ManualClock>) -> SpeedrunTimer {
        let backend = DualBackend::new(
            Rc::new(MemoryBackend::new()),
            Rc::new(MemoryBackend::new()),
        );
        SpeedrunTimer::new(config(), "guest", backend, clock, 42)
    }

    #[test]
    fn start_samples_distinct_items() {
        let clock = Rc::new(ManualClock::at_millis(0));
        let mut t = timer_with_clock(clock);
        t.start(3);
        assert_eq!(t.state(), RunState::Running);
        assert_eq!(t.items().len(), 3);
        let keys: BTreeSet<_> = t.items().iter().map(|i| i.level_key.clone()).collect();
        assert_eq!(keys.len(), 3, "sampled levels must be distinct");
    }

    #[test]
    fn desired_count_is_clamped_to_pool() {
        let clock = Rc::new(ManualClock::at_millis(0));
        let mut t = timer_with_clock(clock);
        t.start(99);
        assert_eq!(t.items().len(), 5);
        t.start(0);
        assert_eq!(t.items().len(), 1);
    }

    #[test]
    fn completing_all_items_finishes_the_run() {
        let clock = Rc::new(ManualClock::at_millis(1_000));
        let mut t = timer_with_clock(clock.clone());
        t.start(3);
        let ids: Vec<String> = t.items().iter().map(|i| i.id.clone()).collect();
        clock.advance_millis(4_500);
        assert!(t.mark_complete(&ids[0]).is_none());
        assert!(t.mark_complete(&ids[1]).is_none());
        let out = t.mark_complete(&ids[2]).expect("run should finish");
        assert_eq!(t.state(), RunState::Complete);
        assert_eq!(out.elapsed, Duration::milliseconds(4_500));
        assert!(out.improved, "first run always sets the best");
        assert_eq!(out.achievement_id, "speedrun-done");
        assert_eq!(t.best_time(), Some(Duration::milliseconds(4_500)));
    }

    #[test]
    fn best_time_only_improves_downward() {
        let clock = Rc::new(ManualClock::at_millis(0));
        let mut t = timer_with_clock(clock.clone());

        t.start(1);
        let id = t.items()[0].id.clone();
        clock.advance_millis(3_000);
        assert!(t.mark_complete(&id).unwrap().improved);

        // Slower second run leaves the record alone.
        t.start(1);
        let id = t.items()[0].id.clone();
        clock.advance_millis(8_000);
        let out = t.mark_complete(&id).unwrap();
        assert!(!out.improved);
        assert_eq!(out.best, Duration::milliseconds(3_000));
        assert_eq!(t.best_time(), Some(Duration::milliseconds(3_000)));

        // Faster third run takes it.
        t.start(1);
        let id = t.items()[0].id.clone();
        clock.advance_millis(1_000);
        let out = t.mark_complete(&id).unwrap();
        assert!(out.improved);
        assert_eq!(t.best_time(), Some(Duration::milliseconds(1_000)));
    }

    #[test]
    fn mark_complete_ignores_idle_and_repeats() {
        let clock = Rc::new(ManualClock::at_millis(0));
        let mut t = timer_with_clock(clock);
        assert!(t.mark_complete("run-0").is_none());
        t.start(2);
        let id = t.items()[0].id.clone();
        assert!(t.mark_complete(&id).is_none());
        // Second completion of the same item changes nothing.
        assert!(t.mark_complete(&id).is_none());
        assert_eq!(t.items().iter().filter(|i| i.complete).count(), 1);
    }

    #[test]
    fn stale_tick_tokens_are_rejected() {
        let clock = Rc::new(ManualClock::at_millis(0));
        let mut t = timer_with_clock(clock.clone());
        let first = t.start(2);
        clock.advance_millis(100);
        assert_eq!(t.tick(first), Some(Duration::milliseconds(100)));

        // Restarting cancels the previous ticker.
        let second = t.start(2);
        assert_eq!(t.tick(first), None);
        assert!(t.tick(second).is_some());

        t.stop();
        assert_eq!(t.tick(second), None);
        assert_eq!(t.state(), RunState::Idle);
    }

    #[test]
    fn namespace_switch_isolates_best_times() {
        let clock = Rc::new(ManualClock::at_millis(0));
        let mut t = timer_with_clock(clock.clone());
        t.start(1);
        let id = t.items()[0].id.clone();
        clock.advance_millis(2_000);
        t.mark_complete(&id).unwrap();
        assert!(t.best_time().is_some());

        t.switch_namespace("alice");
        assert_eq!(t.best_time(), None);
        t.switch_namespace("guest");
        assert_eq!(t.best_time(), Some(Duration::milliseconds(2_000)));
    }
}
