//! Persistent store of set/directory configuration.
//!
//! All `SetInfo` mutation flows through this store under a single
//! configuration lock held only for in-memory structural edits, never
//! across I/O. Every mutation clears the derived caches (configured sets,
//! configured formats, enabled-sets query, enabled/disabled views), which
//! are recomputed lazily on the next read, and bumps a monotonic
//! status-modified stamp that dependent counters compare against.
//!
//! The full configuration is persisted as one JSON document, rewritten
//! atomically (temp file + rename) after each mutation.

use crate::error::{RepositoryError, Result};
use crate::set_info::SetInfo;
use metarepo_index::Query;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Default)]
struct DerivedCaches {
    configured_sets: Option<Vec<String>>,
    configured_formats: Option<Vec<String>>,
    enabled_sets: Option<Vec<String>>,
    disabled_sets: Option<Vec<String>>,
    enabled_sets_query: Option<Option<Query>>,
}

struct Inner {
    set_infos: Vec<SetInfo>,
    caches: DerivedCaches,
    status_stamp: u64,
}

/// Configuration store for `SetInfo` records.
pub struct SetConfigStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl SetConfigStore {
    /// In-memory store with no persistence (tests, embedded use).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner {
                set_infos: Vec::new(),
                caches: DerivedCaches::default(),
                status_stamp: 0,
            }),
        }
    }

    /// Load the store from a JSON file, creating an empty store when the
    /// file does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let set_infos: Vec<SetInfo> = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            Vec::new()
        };

        if let Some(max) = set_infos.iter().map(SetInfo::unique_id).max() {
            SetInfo::ensure_uid_floor(max);
        }

        Ok(Self {
            path: Some(path),
            inner: Mutex::new(Inner {
                set_infos,
                caches: DerivedCaches::default(),
                status_stamp: 0,
            }),
        })
    }

    /// All configured `SetInfo`s, as copies.
    pub fn list(&self) -> Vec<SetInfo> {
        self.inner.lock().set_infos.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().set_infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().set_infos.is_empty()
    }

    /// Add a new `SetInfo`.
    ///
    /// Fails when the set has no directories, when the set spec is already
    /// configured, or when any of its directories is registered to another
    /// set.
    pub fn add(&self, set_info: SetInfo) -> Result<()> {
        let snapshot = {
            let mut inner = self.inner.lock();

            if set_info.dir_infos().is_empty() {
                return Err(RepositoryError::Config(
                    "The SetInfo does not have any directories defined".to_string(),
                ));
            }
            if inner
                .set_infos
                .iter()
                .any(|si| si.set_spec() == set_info.set_spec())
            {
                return Err(RepositoryError::Config(format!(
                    "A set with setSpec '{}' is already configured",
                    set_info.set_spec()
                )));
            }
            for dir_info in set_info.dir_infos() {
                if inner.set_infos.iter().any(|si| {
                    si.dir_infos()
                        .iter()
                        .any(|d| d.directory() == dir_info.directory())
                }) {
                    return Err(RepositoryError::DuplicateDirectory(
                        dir_info.directory().display().to_string(),
                    ));
                }
            }

            inner.set_infos.push(set_info);
            Self::mark_modified(&mut inner);
            inner.set_infos.clone()
        };
        self.persist(&snapshot);
        Ok(())
    }

    /// Replace the set stored under `key`, returning the previous value,
    /// or `None` (no change) when the key is not configured.
    pub fn replace(&self, key: &str, new_set_info: SetInfo) -> Option<SetInfo> {
        let (old, snapshot) = {
            let mut inner = self.inner.lock();
            let pos = inner
                .set_infos
                .iter()
                .position(|si| si.set_spec() == key)?;
            let old = std::mem::replace(&mut inner.set_infos[pos], new_set_info);
            Self::mark_modified(&mut inner);
            (old, inner.set_infos.clone())
        };
        self.persist(&snapshot);
        Some(old)
    }

    /// Remove the set stored under `key`, returning it if it existed.
    pub fn remove(&self, key: &str) -> Option<SetInfo> {
        let (removed, snapshot) = {
            let mut inner = self.inner.lock();
            let pos = inner
                .set_infos
                .iter()
                .position(|si| si.set_spec() == key)?;
            let removed = inner.set_infos.remove(pos);
            Self::mark_modified(&mut inner);
            (removed, inner.set_infos.clone())
        };
        self.persist(&snapshot);
        Some(removed)
    }

    /// Copy of the set stored under `key`, if any.
    pub fn by_key(&self, key: &str) -> Option<SetInfo> {
        self.inner
            .lock()
            .set_infos
            .iter()
            .find(|si| si.set_spec() == key)
            .cloned()
    }

    /// Copy of the set owning the given directory, if any.
    pub fn by_directory(&self, directory: &Path) -> Option<SetInfo> {
        self.inner
            .lock()
            .set_infos
            .iter()
            .find(|si| si.dir_infos().iter().any(|d| d.directory() == directory))
            .cloned()
    }

    pub fn is_set_configured(&self, key: &str) -> bool {
        self.by_key(key).is_some()
    }

    pub fn is_directory_configured(&self, directory: &Path) -> bool {
        self.by_directory(directory).is_some()
    }

    /// Flip the enabled flag of the set with the given unique id. Returns
    /// the set spec of the affected set.
    pub fn set_enabled_by_uid(&self, unique_id: u64, enabled: bool) -> Option<String> {
        let (spec, snapshot) = {
            let mut inner = self.inner.lock();
            let si = inner
                .set_infos
                .iter_mut()
                .find(|si| si.unique_id() == unique_id)?;
            si.set_enabled(enabled);
            let spec = si.set_spec().to_string();
            Self::mark_modified(&mut inner);
            (spec, inner.set_infos.clone())
        };
        self.persist(&snapshot);
        Some(spec)
    }

    /// Set specs of all configured sets.
    pub fn configured_sets(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        if inner.caches.configured_sets.is_none() {
            let sets = inner
                .set_infos
                .iter()
                .map(|si| si.set_spec().to_string())
                .collect();
            inner.caches.configured_sets = Some(sets);
        }
        inner.caches.configured_sets.clone().unwrap()
    }

    /// Distinct native formats across all configured sets.
    pub fn configured_formats(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        if inner.caches.configured_formats.is_none() {
            let mut formats: Vec<String> = Vec::new();
            for si in &inner.set_infos {
                for di in si.dir_infos() {
                    if !formats.iter().any(|f| f == di.format()) {
                        formats.push(di.format().to_string());
                    }
                }
            }
            inner.caches.configured_formats = Some(formats);
        }
        inner.caches.configured_formats.clone().unwrap()
    }

    pub fn enabled_sets(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        if inner.caches.enabled_sets.is_none() {
            let sets = inner
                .set_infos
                .iter()
                .filter(|si| si.is_enabled())
                .map(|si| si.set_spec().to_string())
                .collect();
            inner.caches.enabled_sets = Some(sets);
        }
        inner.caches.enabled_sets.clone().unwrap()
    }

    pub fn disabled_sets(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        if inner.caches.disabled_sets.is_none() {
            let sets = inner
                .set_infos
                .iter()
                .filter(|si| !si.is_enabled())
                .map(|si| si.set_spec().to_string())
                .collect();
            inner.caches.disabled_sets = Some(sets);
        }
        inner.caches.disabled_sets.clone().unwrap()
    }

    pub fn is_set_enabled(&self, key: &str) -> bool {
        self.by_key(key).map(|si| si.is_enabled()).unwrap_or(false)
    }

    pub fn is_set_disabled(&self, key: &str) -> bool {
        self.by_key(key).map(|si| !si.is_enabled()).unwrap_or(false)
    }

    /// Disjunction over the enabled sets, or `None` when no set is enabled
    /// (an empty disjunction; callers decide whether that means "no
    /// restriction" or "nothing matches").
    pub fn enabled_sets_query(&self) -> Option<Query> {
        let mut inner = self.inner.lock();
        if inner.caches.enabled_sets_query.is_none() {
            let enabled: Vec<&SetInfo> = inner
                .set_infos
                .iter()
                .filter(|si| si.is_enabled())
                .collect();
            let query = if enabled.is_empty() {
                None
            } else {
                Some(Query::any_of(
                    enabled
                        .iter()
                        .map(|si| Query::term("collection", si.set_spec()))
                        .collect(),
                ))
            };
            inner.caches.enabled_sets_query = Some(query);
        }
        inner.caches.enabled_sets_query.clone().unwrap()
    }

    /// Disjunction over the disabled sets, or `None` when none are
    /// disabled.
    pub fn disabled_sets_query(&self) -> Option<Query> {
        let disabled = self.disabled_sets();
        if disabled.is_empty() {
            return None;
        }
        Some(Query::any_of(
            disabled
                .iter()
                .map(|s| Query::term("collection", s.as_str()))
                .collect(),
        ))
    }

    /// Monotonic stamp bumped on every configuration mutation.
    pub fn status_stamp(&self) -> u64 {
        self.inner.lock().status_stamp
    }

    fn mark_modified(inner: &mut Inner) {
        inner.caches = DerivedCaches::default();
        inner.status_stamp += 1;
    }

    // Write the snapshot outside the configuration lock.
    fn persist(&self, snapshot: &[SetInfo]) {
        let Some(path) = &self.path else {
            return;
        };
        let result = (|| -> Result<()> {
            let json = serde_json::to_string_pretty(snapshot)?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, path)?;
            Ok(())
        })();
        if let Err(e) = result {
            warn!("Failed to persist set configuration to {:?}: {}", path, e);
        }
    }
}
