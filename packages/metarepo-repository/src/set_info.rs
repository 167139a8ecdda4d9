//! Set and directory configuration records.
//!
//! A `SetInfo` describes one configured collection: its stable external key
//! (`set_spec`), display name, enabled flag, accession status and the
//! directories of record files that feed it. Directory ownership is
//! exclusive: a directory belongs to at most one `SetInfo` system-wide,
//! enforced when sets are added to the configuration store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// A directory of record files in a single XML format.
///
/// Identity is structural equality of both fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirInfo {
    directory: PathBuf,
    format: String,
}

impl DirInfo {
    pub fn new(directory: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            format: format.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn set_directory(&mut self, directory: impl Into<PathBuf>) {
        self.directory = directory.into();
    }

    pub fn set_format(&mut self, format: impl Into<String>) {
        self.format = format.into();
    }
}

/// Configuration for one set/collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetInfo {
    set_spec: String,
    name: String,
    description: String,
    enabled: bool,
    accession_status: String,
    dir_infos: Vec<DirInfo>,
    record_id: String,
    unique_id: u64,
}

impl SetInfo {
    /// Create a `SetInfo` with a single backing directory.
    pub fn new(
        name: impl Into<String>,
        set_spec: impl Into<String>,
        description: impl Into<String>,
        enabled: bool,
        directory: impl Into<PathBuf>,
        format: impl Into<String>,
        record_id: impl Into<String>,
    ) -> Self {
        Self {
            set_spec: set_spec.into(),
            name: name.into(),
            description: description.into(),
            enabled,
            accession_status: String::new(),
            dir_infos: vec![DirInfo::new(directory, format)],
            record_id: record_id.into(),
            unique_id: NEXT_UID.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Advance the unique-id counter past ids restored from persistence.
    pub(crate) fn ensure_uid_floor(floor: u64) {
        let mut current = NEXT_UID.load(Ordering::SeqCst);
        while current <= floor {
            match NEXT_UID.compare_exchange(
                current,
                floor + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn set_spec(&self) -> &str {
        &self.set_spec
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn accession_status(&self) -> &str {
        &self.accession_status
    }

    pub fn set_accession_status(&mut self, status: impl Into<String>) {
        self.accession_status = status.into();
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn dir_infos(&self) -> &[DirInfo] {
        &self.dir_infos
    }

    pub fn add_dir_info(&mut self, dir_info: DirInfo) {
        self.dir_infos.push(dir_info);
    }

    pub fn contains_dir_info(&self, dir_info: &DirInfo) -> bool {
        self.dir_infos.contains(dir_info)
    }

    /// Primary backing directory (the first `DirInfo`).
    pub fn directory(&self) -> &Path {
        self.dir_infos[0].directory()
    }

    /// Native format of the primary backing directory.
    pub fn format(&self) -> &str {
        self.dir_infos[0].format()
    }
}

// Equality is structural over the configuration content. The opaque
// unique_id is excluded so a reloaded definition compares equal to the one
// it replaces.
impl PartialEq for SetInfo {
    fn eq(&self, other: &Self) -> bool {
        self.set_spec == other.set_spec
            && self.name == other.name
            && self.description == other.description
            && self.enabled == other.enabled
            && self.accession_status == other.accession_status
            && self.dir_infos == other.dir_infos
            && self.record_id == other.record_id
    }
}

impl Eq for SetInfo {}

/// Derived per-set counters, recomputed on demand and never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetCounts {
    pub num_indexed: usize,
    pub num_errors: usize,
    pub num_files: usize,
    pub num_deleted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(spec: &str, dir: &str) -> SetInfo {
        let mut si = SetInfo::new("Name", spec, "", true, dir, "adn", "REC-001");
        si.set_accession_status("accessioned");
        si
    }

    #[test]
    fn test_dir_info_identity() {
        let a = DirInfo::new("/data/adn/dcc", "adn");
        let b = DirInfo::new("/data/adn/dcc", "adn");
        let c = DirInfo::new("/data/adn/dcc", "oai_dc");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_unique_ids_monotonic() {
        let a = set("a", "/data/a");
        let b = set("b", "/data/b");
        assert!(b.unique_id() > a.unique_id());
    }

    #[test]
    fn test_equality_ignores_unique_id() {
        let a = set("dcc", "/data/adn/dcc");
        let b = set("dcc", "/data/adn/dcc");
        assert_ne!(a.unique_id(), b.unique_id());
        assert_eq!(a, b);
    }

    #[test]
    fn test_primary_directory_and_format() {
        let mut si = set("dcc", "/data/adn/dcc");
        si.add_dir_info(DirInfo::new("/data/extra/dcc", "oai_dc"));
        assert_eq!(si.directory(), Path::new("/data/adn/dcc"));
        assert_eq!(si.format(), "adn");
        assert_eq!(si.dir_infos().len(), 2);
    }

    #[test]
    fn test_uid_floor() {
        SetInfo::ensure_uid_floor(1_000_000);
        let si = set("x", "/data/x");
        assert!(si.unique_id() > 1_000_000);
    }
}
