#![deny(warnings)]

//! Key-value persistence for progression state.
//!
//! The engine talks to a string-valued [`Backend`] and never to concrete
//! storage. Two backends are composed through [`DualBackend`]: reads consult
//! the primary and fall back to the secondary, writes go through to both.
//! Write failures are reported but callers are expected to log and carry on;
//! the in-memory state stays authoritative for the session.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use thiserror::Error;
use tracing::warn;

/// Errors a backend write can report. Callers treat these as a loss of
/// durability, never as a fatal condition.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The store refused or failed the write (quota, permissions, I/O).
    #[error("write failed for key {key}: {reason}")]
    WriteFailed { key: String, reason: String },
}

/// Minimal string key-value contract shared by all stores.
///
/// `get` is infallible by contract: an unreadable entry is indistinguishable
/// from an absent one, which is what the engine's fallback path wants.
pub trait Backend {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;
}

/// Shared handle to a backend. The engine is single-threaded, so `Rc` is
/// enough to let the progress store and the speedrun timer share one store.
pub type BackendHandle = Rc<dyn Backend>;

/// In-memory backend, used by tests and as a session-only fallback.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RefCell<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// File-per-key backend rooted at a directory. Keys are percent-escaped into
/// file names so namespace-prefixed keys stay flat on disk.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    // Escaping is injective: distinct keys always map to distinct files.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len());
        for b in key.bytes() {
            match b {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => name.push(b as char),
                _ => name.push_str(&format!("%{b:02X}")),
            }
        }
        self.root.join(format!("{name}.json"))
    }
}

impl Backend for FileBackend {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        if let Err(e) = fs::create_dir_all(&self.root) {
            return Err(BackendError::WriteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            });
        }
        fs::write(self.path_for(key), value).map_err(|e| BackendError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Write-through-both, read-primary-then-secondary composition of two
/// backends. Cloning shares the underlying stores.
#[derive(Clone)]
pub struct DualBackend {
    primary: BackendHandle,
    secondary: BackendHandle,
}

impl DualBackend {
    pub fn new(primary: BackendHandle, secondary: BackendHandle) -> Self {
        Self { primary, secondary }
    }

    /// Read the primary; on a miss, consult the secondary.
    pub fn read(&self, key: &str) -> Option<String> {
        self.primary.get(key).or_else(|| self.secondary.get(key))
    }

    /// Write both stores unconditionally. A failure in either is logged and
    /// reported, but the other write still happens.
    pub fn write(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut first_err = None;
        for store in [&self.primary, &self.secondary] {
            if let Err(e) = store.set(key, value) {
                warn!(key, error = %e, "backend write failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Read and deserialize. A malformed entry in the primary is discarded
    /// and the secondary is consulted, so corruption of one store never
    /// costs more than that store's copy.
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        for store in [&self.primary, &self.secondary] {
            if let Some(raw) = store.get(key) {
                match serde_json::from_str(&raw) {
                    Ok(value) => return Some(value),
                    Err(e) => warn!(key, error = %e, "discarding malformed entry"),
                }
            }
        }
        None
    }

    /// Serialize and write through to both stores.
    pub fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), BackendError> {
        let raw = serde_json::to_string(value).map_err(|e| BackendError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.write(key, &raw)
    }
}

/// Storage key for a namespace's progress profile.
pub fn profile_key(namespace: &str) -> String {
    format!("lab:{namespace}:progress")
}

/// Storage key for a namespace's speedrun best time.
pub fn best_time_key(namespace: &str) -> String {
    format!("lab:{namespace}:best-time")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that accepts nothing, for exercising the failure path.
    struct RejectingBackend;

    impl Backend for RejectingBackend {
        fn get(&self, _key: &str) -> Option<String> {
            None
        }
        fn set(&self, key: &str, _value: &str) -> Result<(), BackendError> {
            Err(BackendError::WriteFailed {
                key: key.to_string(),
                reason: "quota exceeded".into(),
            })
        }
    }

    #[test]
    fn memory_round_trip() {
        let b = MemoryBackend::new();
        assert_eq!(b.get("k"), None);
        b.set("k", "v").unwrap();
        assert_eq!(b.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn dual_reads_fall_back_to_secondary() {
        let primary = Rc::new(MemoryBackend::new());
        let secondary = Rc::new(MemoryBackend::new());
        secondary.set("k", "from-secondary").unwrap();
        let dual = DualBackend::new(primary.clone(), secondary);
        assert_eq!(dual.read("k").as_deref(), Some("from-secondary"));
        // Primary wins once it holds the key.
        primary.set("k", "from-primary").unwrap();
        assert_eq!(dual.read("k").as_deref(), Some("from-primary"));
    }

    #[test]
    fn dual_writes_reach_both_stores() {
        let primary = Rc::new(MemoryBackend::new());
        let secondary = Rc::new(MemoryBackend::new());
        let dual = DualBackend::new(primary.clone(), secondary.clone());
        dual.write("k", "v").unwrap();
        assert_eq!(primary.get("k").as_deref(), Some("v"));
        assert_eq!(secondary.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn dual_write_survives_one_failing_store() {
        let secondary = Rc::new(MemoryBackend::new());
        let dual = DualBackend::new(Rc::new(RejectingBackend), secondary.clone());
        assert!(dual.write("k", "v").is_err());
        // The healthy store still received the value.
        assert_eq!(secondary.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn malformed_primary_falls_back_to_secondary() {
        let primary = Rc::new(MemoryBackend::new());
        let secondary = Rc::new(MemoryBackend::new());
        primary.set("k", "{not json").unwrap();
        secondary.set("k", "[1,2,3]").unwrap();
        let dual = DualBackend::new(primary, secondary);
        let v: Option<Vec<u32>> = dual.read_json("k");
        assert_eq!(v, Some(vec![1, 2, 3]));
    }

    #[test]
    fn json_round_trip_through_both_stores() {
        let primary = Rc::new(MemoryBackend::new());
        let secondary = Rc::new(MemoryBackend::new());
        let dual = DualBackend::new(primary, secondary.clone());
        dual.write_json("k", &vec![7u32, 9]).unwrap();
        // A later read that misses the primary still sees the value.
        let from_secondary = DualBackend::new(Rc::new(MemoryBackend::new()), secondary);
        let v: Option<Vec<u32>> = from_secondary.read_json("k");
        assert_eq!(v, Some(vec![7, 9]));
    }

    #[test]
    fn keys_are_namespace_scoped() {
        assert_eq!(profile_key("guest"), "lab:guest:progress");
        assert_eq!(best_time_key("alice"), "lab:alice:best-time");
        assert_ne!(profile_key("guest"), profile_key("alice"));
    }

    #[test]
    fn file_backend_round_trip() {
        let dir = std::env::temp_dir().join(format!("lab-persist-{}", std::process::id()));
        let b = FileBackend::new(&dir);
        assert_eq!(b.get("lab:guest:progress"), None);
        b.set("lab:guest:progress", "{\"total_xp\":0}").unwrap();
        assert_eq!(
            b.get("lab:guest:progress").as_deref(),
            Some("{\"total_xp\":0}")
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn file_backend_keys_never_collide() {
        let dir = std::env::temp_dir().join(format!("lab-collide-{}", std::process::id()));
        let b = FileBackend::new(&dir);
        // Keys that a lossy many-to-one sanitizer would map to one file.
        b.set("lab:a_b:progress", "one").unwrap();
        b.set("lab:a:b:progress", "two").unwrap();
        b.set("lab_a_b_progress", "three").unwrap();
        assert_eq!(b.get("lab:a_b:progress").as_deref(), Some("one"));
        assert_eq!(b.get("lab:a:b:progress").as_deref(), Some("two"));
        assert_eq!(b.get("lab_a_b_progress").as_deref(), Some("three"));
        let _ = fs::remove_dir_all(dir);
    }
}
