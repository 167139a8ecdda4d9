//! Directory-wide indexing passes over the configured sets.
//!
//! A pass walks every configured directory, indexing new and modified
//! record files in parallel and pruning index entries whose backing files
//! are gone. A single file's failure becomes an error-placeholder
//! document, and the pass continues past the bad record. Cancellation is
//! honored between files, never mid-file.

use crate::manager::{fields, RepositoryManager};
use crate::records::deletion_tombstone;
use crate::set_info::{DirInfo, SetInfo};
use crate::writers::IndexingWriter;
use chrono::{DateTime, Utc};
use metarepo_index::Query;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one indexing pass.
#[derive(Debug, Clone)]
pub struct IndexingPassReport {
    pub pass_id: Uuid,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub halted: bool,
}

impl IndexingPassReport {
    fn new() -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            files_indexed: 0,
            files_skipped: 0,
            files_removed: 0,
            errors: Vec::new(),
            duration_ms: 0,
            halted: false,
        }
    }
}

enum FileOutcome {
    Indexed,
    Skipped,
    Failed(String),
    Halted,
}

impl RepositoryManager {
    /// Whether an indexing pass is currently running.
    pub fn is_indexing(&self) -> bool {
        self.indexing_active.load(Ordering::SeqCst)
    }

    /// Index all files of every configured set. `index_all` forces a full
    /// pass; otherwise only files modified since their last indexing are
    /// processed. Only one pass runs at a time; a second caller gets an
    /// empty, halted report.
    pub fn index_files(&self, index_all: bool, cancel: &CancellationToken) -> IndexingPassReport {
        let mut report = IndexingPassReport::new();

        if self
            .indexing_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("index_files() skipped: an indexing pass is already running");
            report.halted = true;
            return report;
        }

        let start = Instant::now();
        info!(
            "Indexing pass {} started ({}, {} workers)",
            report.pass_id,
            if index_all { "full" } else { "incremental" },
            (num_cpus::get() * 3 / 4).max(1)
        );
        self.add_message(format!(
            "Indexing pass started: {} indexing of all collections",
            if index_all { "full" } else { "incremental" }
        ));

        for set_info in self.set_infos() {
            if cancel.is_cancelled() {
                report.halted = true;
                break;
            }
            for dir_info in set_info.dir_infos() {
                self.index_directory(&set_info, dir_info, index_all, cancel, &mut report);
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        self.add_message(format!(
            "Indexing pass finished: {} indexed, {} skipped, {} removed, {} errors in {}ms{}",
            report.files_indexed,
            report.files_skipped,
            report.files_removed,
            report.errors.len(),
            report.duration_ms,
            if report.halted { " (halted)" } else { "" }
        ));
        info!(
            "Indexing pass {} finished: {} indexed, {} errors in {}ms",
            report.pass_id,
            report.files_indexed,
            report.errors.len(),
            report.duration_ms
        );

        self.indexing_active.store(false, Ordering::SeqCst);
        report
    }

    /// Index the files of one configured set. Returns false when the set
    /// is not configured.
    pub fn index_collection(
        &self,
        set_spec: &str,
        index_all: bool,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(set_info) = self.set_info(set_spec) else {
            warn!(
                "index_collection(): collection '{}' is not configured in the repository",
                set_spec
            );
            return false;
        };
        let mut report = IndexingPassReport::new();
        for dir_info in set_info.dir_infos() {
            self.index_directory(&set_info, dir_info, index_all, cancel, &mut report);
        }
        self.add_message(format!(
            "Indexed collection '{}': {} files, {} errors",
            set_spec,
            report.files_indexed,
            report.errors.len()
        ));
        true
    }

    fn index_directory(
        &self,
        set_info: &SetInfo,
        dir_info: &DirInfo,
        index_all: bool,
        cancel: &CancellationToken,
        report: &mut IndexingPassReport,
    ) {
        let dir = dir_info.directory();
        let format = dir_info.format();
        let set_spec = set_info.set_spec();

        let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map(|x| x == "xml").unwrap_or(false))
                .collect(),
            // A configured directory that does not exist yet has nothing
            // to index.
            Err(_) => Vec::new(),
        };
        files.sort();

        let writer = self.writers.writer_for(format);
        let outcomes: Vec<FileOutcome> = files
            .par_iter()
            .map(|path| {
                if cancel.is_cancelled() {
                    return FileOutcome::Halted;
                }
                if !index_all && self.is_file_current(path) {
                    return FileOutcome::Skipped;
                }
                match self.index_one_file(path, set_spec, format, dir, &writer) {
                    Ok(()) => FileOutcome::Indexed,
                    Err(message) => {
                        let error_doc = self.build_error_document(
                            &path.display().to_string(),
                            set_spec,
                            format,
                            dir,
                            &message,
                        );
                        if let Err(e) = self.index.put(error_doc) {
                            warn!("Could not store error document for {:?}: {}", path, e);
                        }
                        FileOutcome::Failed(format!("{}: {}", path.display(), message))
                    }
                }
            })
            .collect();

        for outcome in outcomes {
            match outcome {
                FileOutcome::Indexed => report.files_indexed += 1,
                FileOutcome::Skipped => report.files_skipped += 1,
                FileOutcome::Failed(message) => {
                    warn!("Indexing error: {}", message);
                    report.errors.push(message);
                }
                FileOutcome::Halted => report.halted = true,
            }
        }

        if cancel.is_cancelled() {
            report.halted = true;
            return;
        }

        self.prune_missing_files(dir, report);
    }

    // A file is current when its index entry is at least as new as the
    // file on disk.
    fn is_file_current(&self, path: &Path) -> bool {
        let Some(doc) = self.index.get(&path.display().to_string()) else {
            return false;
        };
        if doc.has_value(fields::DELETED, "true") {
            return false;
        }
        let Ok(metadata) = path.metadata() else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        let modified: DateTime<Utc> = modified.into();
        doc.datestamp >= modified
    }

    fn index_one_file(
        &self,
        path: &Path,
        set_spec: &str,
        format: &str,
        dir: &Path,
        writer: &Arc<dyn IndexingWriter>,
    ) -> std::result::Result<(), String> {
        let xml = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let record_fields = writer.parse(&xml).map_err(|e| e.to_string())?;
        let record_id = record_fields
            .id
            .clone()
            .ok_or_else(|| "record XML carries no id".to_string())?;

        let doc = self.build_record_document(
            &path.display().to_string(),
            &record_id,
            set_spec,
            format,
            dir,
            &record_fields,
            &xml,
            true,
            Utc::now(),
        );
        self.index.put(doc).map_err(|e| e.to_string())?;
        Ok(())
    }

    // Entries whose backing file disappeared are removed, or replaced by
    // deletion tombstones when tombstone retention is configured. Records
    // put without disk persistence are left alone.
    fn prune_missing_files(&self, dir: &Path, report: &mut IndexingPassReport) {
        let dir_query = Query::term(fields::DOC_DIR, dir.display().to_string());
        for doc in self.index.search(&dir_query, None) {
            if doc.has_value(fields::PERSISTED, "false")
                || doc.has_value(fields::DELETED, "true")
            {
                continue;
            }
            if Path::new(&doc.key).exists() {
                continue;
            }
            if self.keep_deletion_tombstones {
                if let Err(e) = self.index.put(deletion_tombstone(&doc)) {
                    warn!("Could not write deletion tombstone for {}: {}", doc.key, e);
                    continue;
                }
            } else {
                self.index.remove_by_key(&doc.key);
            }
            report.files_removed += 1;
        }
    }
}
