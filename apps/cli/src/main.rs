#![deny(warnings)]

//! Headless CLI for driving the lab progression engine against a declarative
//! lab configuration, with file-backed dual persistence.

use anyhow::{Context, Result};
use persistence::FileBackend;
use progress_core::{LabConfig, MarkerConfig, ScenarioConfig, SpeedrunConfig, VaultConfig};
use progress_engine::{EngineBuilder, Signal};
use std::rc::Rc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

struct Args {
    lab: Option<String>,
    namespace: String,
    save_dir: String,
    reset: bool,
    claim: Vec<String>,
    speedrun: Option<usize>,
}

fn parse_args() -> Args {
    let mut args = Args {
        lab: None,
        namespace: "guest".to_string(),
        save_dir: "./saves".to_string(),
        reset: false,
        claim: Vec::new(),
        speedrun: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--lab" => args.lab = it.next(),
            "--namespace" => {
                if let Some(ns) = it.next() {
                    args.namespace = ns;
                }
            }
            "--save-dir" => {
                if let Some(dir) = it.next() {
                    args.save_dir = dir;
                }
            }
            "--reset" => args.reset = true,
            "--claim" => {
                if let Some(id) = it.next() {
                    args.claim.push(id);
                }
            }
            "--speedrun" => args.speedrun = it.next().and_then(|s| s.parse().ok()),
            _ => {}
        }
    }
    args
}

/// Built-in two-scenario lab used when no `--lab` file is given.
fn minimal_lab() -> LabConfig {
    LabConfig {
        markers: vec![
            MarkerConfig {
                id: "s1-done".into(),
                label: "Reflected payload fired".into(),
                xp_award: 25,
            },
            MarkerConfig {
                id: "s2-done".into(),
                label: "Stored payload fired".into(),
                xp_award: 40,
            },
            MarkerConfig {
                id: "speedrun-done".into(),
                label: "Speedrun finished".into(),
                xp_award: 100,
            },
        ],
        vaults: vec![VaultConfig {
            id: "hint-sink".into(),
            cost: 20,
        }],
        scenarios: vec![
            ScenarioConfig {
                id: "s1".into(),
                index: 0,
                requires: None,
            },
            ScenarioConfig {
                id: "s2".into(),
                index: 1,
                requires: Some("s1-done".into()),
            },
        ],
        walkthroughs: vec![],
        speedrun: Some(SpeedrunConfig {
            level_pool: vec![
                "l1".into(),
                "l2".into(),
                "l3".into(),
                "l4".into(),
                "l5".into(),
            ],
            default_count: 3,
            achievement_id: "speedrun-done".into(),
            xp_award: 100,
        }),
        default_exploit_marker: Some("s1-done".into()),
    }
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    info!(namespace = %args.namespace, lab = ?args.lab, "starting CLI");

    let lab: LabConfig = match &args.lab {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading lab config {path}"))?;
            serde_yaml::from_str(&text).with_context(|| format!("parsing lab config {path}"))?
        }
        None => minimal_lab(),
    };

    let mut engine = EngineBuilder::new(lab)
        .namespace(&args.namespace)
        .primary_backend(Rc::new(FileBackend::new(format!(
            "{}/primary",
            args.save_dir
        ))))
        .secondary_backend(Rc::new(FileBackend::new(format!(
            "{}/secondary",
            args.save_dir
        ))))
        .build()
        .context("invalid lab configuration")?;

    if args.reset {
        engine.reset();
    }
    for id in &args.claim {
        engine.dispatch(Signal::LabSolved {
            id: id.clone(),
            amount: None,
        });
    }

    if let Some(count) = args.speedrun {
        if let Some(token) = engine.speedrun_start(count) {
            let ids: Vec<String> = engine
                .speedrun_items()
                .iter()
                .map(|i| i.id.clone())
                .collect();
            for id in &ids {
                engine.speedrun_mark_complete(id);
            }
            let _ = engine.speedrun_tick(token);
        }
    }

    println!(
        "Profile | namespace: {} | XP: {} | achievements: {} | hints: {}",
        engine.namespace(),
        engine.total_xp(),
        engine.profile().completed.len(),
        engine.profile().spent_hints.len()
    );
    for (id, locked) in engine.scenario_lock_states() {
        let mark = if Some(id.as_str()) == engine.selected_scenario() {
            "*"
        } else {
            " "
        };
        println!(
            "Scenario {mark} {id} | {}",
            if locked { "locked" } else { "open" }
        );
    }
    for (id, state) in engine.vault_states() {
        println!("Vault     {id} | {state:?}");
    }
    if let Some(best) = engine.speedrun_best_time() {
        println!("Speedrun best: {} ms", best.num_milliseconds());
    }
    for event in engine.drain_events() {
        println!("Event | {event:?}");
    }

    Ok(())
}
