//! The repository manager service object.
//!
//! All shared mutable state lives behind this struct and its two locks:
//! the exclusive, reentrant update lock guarding record mutation
//! (`put_record` / `delete_record` / `reindex_record`) and the
//! configuration lock inside [`SetConfigStore`]. Handlers receive the
//! manager by `Arc`; there is no ambient/static lookup.

use crate::admin::AdminSettings;
use crate::config_store::SetConfigStore;
use crate::convert::ConversionRegistry;
use crate::error::{RepositoryError, Result};
use crate::mapper::SetQueryMapper;
use crate::rules::{self, SetDefinition};
use crate::set_info::{SetCounts, SetInfo};
use crate::writers::{IndexingWriter, RecordFields, WriterRegistry};
use chrono::{DateTime, Utc};
use metarepo_index::{Document, DocumentIndex, Query};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

/// Index field names used across the repository core.
pub mod fields {
    pub const ID: &str = "id";
    pub const COLLECTION: &str = "collection";
    pub const XML_FORMAT: &str = "xmlformat";
    pub const DOC_DIR: &str = "docdir";
    pub const DOC_TYPE: &str = "doctype";
    pub const DELETED: &str = "deleted";
    pub const ERROR: &str = "error";
    pub const ERROR_MSG: &str = "errormsg";
    pub const ALL_RECORDS: &str = "allrecords";
    pub const ACCESSION_STATUS: &str = "accessionstatus";
    pub const PERSISTED: &str = "persisted";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const URL: &str = "url";
    pub const DEFAULT: &str = "default";
    /// Related ids that currently resolve to records in the repository.
    pub const RELATED_IDS: &str = "relatedids";
    /// Related ids exactly as declared in the record XML.
    pub const ASSIGNED_RELATION_IDS: &str = "assignedrelationids";
    pub const ASSIGNED_RELATION_URLS: &str = "assignedrelationurls";
    /// Ids of records that declare a relationship to this record.
    pub const REFERENCED_BY: &str = "referencedby";
    pub const KEY: &str = "key";
    pub const FORMAT_OF_RECORDS: &str = "formatofrecords";
    /// Set by plugin writers for records that are part of the reviewed
    /// collection; drives administrator-configured boosting.
    pub const PART_OF_DRC: &str = "partofdrc";
    /// Set by plugin writers for resources described by multiple records.
    pub const MULTIRECORD: &str = "multirecord";
}

/// Document type values.
pub const DOCTYPE_RECORD: &str = "record";
pub const DOCTYPE_ERRORDOC: &str = "errordoc";

/// The accepted accession status, the one status that is discoverable.
pub const STATUS_ACCESSIONED: &str = "accessioned";

/// Native format of collection-descriptor records.
pub const COLLECT_FORMAT: &str = "metarepo_collect";

/// The internally managed set holding collection-descriptor records.
pub const COLLECT_SET: &str = "collect";

const NUM_INDEXING_MESSAGES: usize = 750;

/// Locations and behavior flags for a repository.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Directory for persisted configuration (set infos, admin settings,
    /// the ListSets config document).
    pub data_dir: PathBuf,
    /// Directory of collection-level descriptor records.
    pub collection_records_dir: PathBuf,
    /// Root directory for item-level records, laid out as
    /// `<metadata_records_dir>/<format>/<setSpec>/`.
    pub metadata_records_dir: PathBuf,
    /// Keep deletion tombstones in the index instead of removing entries.
    /// Drives the advertised deleted-record policy.
    pub keep_deletion_tombstones: bool,
}

impl RepositoryConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            collection_records_dir: data_dir.join("collection_records"),
            metadata_records_dir: data_dir.join("metadata_records"),
            keep_deletion_tombstones: false,
            data_dir,
        }
    }

    pub fn with_tombstones(mut self, keep: bool) -> Self {
        self.keep_deletion_tombstones = keep;
        self
    }
}

pub(crate) struct DiscoverableCounts {
    pub index_mod: u64,
    pub sets_stamp: u64,
    pub num_discoverable: usize,
    pub valid: bool,
}

pub(crate) struct OaiQueryCache {
    pub discoverable_status: Option<Query>,
    pub oai_discoverable: Option<(u64, Query)>,
}

/// The repository manager core.
pub struct RepositoryManager {
    pub(crate) index: Arc<dyn DocumentIndex>,
    pub(crate) sets: SetConfigStore,
    pub(crate) admin: AdminSettings,
    pub(crate) mapper: RwLock<SetQueryMapper>,
    pub(crate) writers: WriterRegistry,
    pub(crate) conversions: RwLock<ConversionRegistry>,
    pub(crate) update_lock: ReentrantMutex<()>,
    pub(crate) collection_records_dir: PathBuf,
    pub(crate) metadata_records_dir: PathBuf,
    pub(crate) sets_config_file: PathBuf,
    pub(crate) keep_deletion_tombstones: bool,
    pub(crate) oai_filter: RwLock<Option<Query>>,
    pub(crate) messages: Mutex<VecDeque<String>>,
    pub(crate) discoverable_counts: Mutex<DiscoverableCounts>,
    pub(crate) oai_cache: Mutex<OaiQueryCache>,
    pub(crate) indexing_active: AtomicBool,
}

impl RepositoryManager {
    /// Create a manager over the given document index, loading persisted
    /// set configuration, admin settings and the ListSets config document
    /// from the config's data directory.
    pub fn new(config: RepositoryConfig, index: Arc<dyn DocumentIndex>) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.collection_records_dir)?;
        std::fs::create_dir_all(&config.metadata_records_dir)?;

        let sets = SetConfigStore::load(config.data_dir.join("set_infos.json"))?;
        let admin = AdminSettings::load(config.data_dir.join("admin_settings.json"))?;
        let sets_config_file = config.data_dir.join("list_sets_config.xml");

        let mapper = if sets_config_file.exists() {
            let xml = std::fs::read_to_string(&sets_config_file)?;
            SetQueryMapper::rebuild(rules::read_list_sets(&xml)?)?
        } else {
            SetQueryMapper::new()
        };

        let writers = WriterRegistry::new();
        writers.set_writer(
            COLLECT_FORMAT,
            Arc::new(crate::writers::CollectionIndexingWriter),
        );

        let manager = Self {
            index,
            sets,
            admin,
            mapper: RwLock::new(mapper),
            writers,
            conversions: RwLock::new(ConversionRegistry::new()),
            update_lock: ReentrantMutex::new(()),
            collection_records_dir: config.collection_records_dir,
            metadata_records_dir: config.metadata_records_dir,
            sets_config_file,
            keep_deletion_tombstones: config.keep_deletion_tombstones,
            oai_filter: RwLock::new(None),
            messages: Mutex::new(VecDeque::new()),
            discoverable_counts: Mutex::new(DiscoverableCounts {
                index_mod: 0,
                sets_stamp: 0,
                num_discoverable: 0,
                valid: false,
            }),
            oai_cache: Mutex::new(OaiQueryCache {
                discoverable_status: None,
                oai_discoverable: None,
            }),
            indexing_active: AtomicBool::new(false),
        };
        manager.add_message("Repository manager started");
        Ok(manager)
    }

    pub fn index(&self) -> &Arc<dyn DocumentIndex> {
        &self.index
    }

    pub fn admin(&self) -> &AdminSettings {
        &self.admin
    }

    pub fn collection_records_dir(&self) -> &Path {
        &self.collection_records_dir
    }

    pub fn metadata_records_dir(&self) -> &Path {
        &self.metadata_records_dir
    }

    /// Register a conversion supported by the external conversion service.
    pub fn add_format_conversion(&self, from: &str, to: &str) {
        self.conversions.write().add_conversion(from, to);
    }

    /// Register an indexing writer for a native format tag.
    pub fn set_indexing_writer(&self, format: &str, writer: Arc<dyn IndexingWriter>) {
        self.writers.set_writer(format, writer);
    }

    // ── Set configuration ───────────────────────────────────────────────

    /// Add a new set. Fails with a duplicate-directory error when any of
    /// its directories already belongs to another set.
    pub fn add_set_info(&self, set_info: SetInfo) -> Result<()> {
        info!("Adding set '{}'", set_info.set_spec());
        self.sets.add(set_info)
    }

    /// Remove a set and delete its documents from the index.
    pub fn remove_set_info(&self, key: &str) -> Option<SetInfo> {
        let removed = self.sets.remove(key)?;
        self.remove_set_docs(&removed);
        info!("Removed set '{}'", key);
        Some(removed)
    }

    /// Remove a set by its spec; alias kept for call sites that mirror the
    /// collection API.
    pub fn remove_set_by_spec(&self, set_spec: &str) -> Option<SetInfo> {
        self.remove_set_info(set_spec)
    }

    /// Replace a set definition, diffing the old and new directory lists
    /// to decide the minimal index cleanup.
    pub fn replace_set_info(&self, key: &str, new_set_info: SetInfo) {
        let Some(current) = self.sets.by_key(key) else {
            warn!("replace_set_info: no set configured under '{}'", key);
            return;
        };
        if current == new_set_info {
            return;
        }

        // setSpec or primary directory changed: the whole set's documents
        // are stale.
        let full_reindex = current.set_spec() != new_set_info.set_spec()
            || current.directory() != new_set_info.directory();

        if full_reindex {
            self.remove_set_docs(&current);
        } else {
            // Directories dropped from the definition lose their index
            // entries; added directories are picked up by the next pass.
            for dir_info in current.dir_infos() {
                if !new_set_info.contains_dir_info(dir_info) {
                    self.index.remove_by_term(
                        fields::DOC_DIR,
                        &dir_info.directory().display().to_string(),
                    );
                }
            }
        }

        self.sets.replace(key, new_set_info);
    }

    fn remove_set_docs(&self, set_info: &SetInfo) {
        for dir_info in set_info.dir_infos() {
            let removed = self.index.remove_by_term(
                fields::DOC_DIR,
                &dir_info.directory().display().to_string(),
            );
            if removed > 0 {
                info!(
                    "Removed {} documents for directory {:?}",
                    removed,
                    dir_info.directory()
                );
            }
        }
    }

    pub fn enable_set(&self, unique_id: u64) -> Option<String> {
        self.sets.set_enabled_by_uid(unique_id, true)
    }

    pub fn disable_set(&self, unique_id: u64) -> Option<String> {
        self.sets.set_enabled_by_uid(unique_id, false)
    }

    pub fn set_infos(&self) -> Vec<SetInfo> {
        self.sets.list()
    }

    pub fn set_info(&self, key: &str) -> Option<SetInfo> {
        self.sets.by_key(key)
    }

    pub fn is_set_configured(&self, key: &str) -> bool {
        self.sets.is_set_configured(key)
    }

    pub fn is_directory_configured(&self, directory: &Path) -> bool {
        self.sets.is_directory_configured(directory)
    }

    pub fn is_set_enabled(&self, key: &str) -> bool {
        self.sets.is_set_enabled(key)
    }

    pub fn is_set_disabled(&self, key: &str) -> bool {
        self.sets.is_set_disabled(key)
    }

    pub fn configured_sets(&self) -> Vec<String> {
        self.sets.configured_sets()
    }

    pub fn configured_formats(&self) -> Vec<String> {
        self.sets.configured_formats()
    }

    pub fn enabled_sets(&self) -> Vec<String> {
        self.sets.enabled_sets()
    }

    pub fn disabled_sets(&self) -> Vec<String> {
        self.sets.disabled_sets()
    }

    /// Monotonic stamp bumped on every set-configuration change.
    pub fn set_status_modified_stamp(&self) -> u64 {
        self.sets.status_stamp()
    }

    /// Derived counters for one set, recomputed on demand.
    pub fn set_counts(&self, key: &str) -> Option<SetCounts> {
        let set_info = self.sets.by_key(key)?;
        let mut counts = SetCounts::default();
        for dir_info in set_info.dir_infos() {
            let dir = dir_info.directory();
            if let Ok(entries) = std::fs::read_dir(dir) {
                counts.num_files += entries
                    .filter_map(|e| e.ok())
                    .filter(|e| {
                        e.path().extension().map(|x| x == "xml").unwrap_or(false)
                    })
                    .count();
            }
            let dir_term = dir.display().to_string();
            let dir_query = Query::term(fields::DOC_DIR, &dir_term);
            for doc in self.index.search(&dir_query, None) {
                if doc.has_value(fields::ERROR, "true") {
                    counts.num_errors += 1;
                } else if doc.has_value(fields::DELETED, "true") {
                    counts.num_deleted += 1;
                } else {
                    counts.num_indexed += 1;
                }
            }
        }
        Some(counts)
    }

    // ── OAI set definitions (ListSets config document) ──────────────────

    /// Define or redefine an OAI set, rewriting the whole ListSets config
    /// document and rebuilding the compiled mapping table.
    pub fn set_definition(&self, definition: SetDefinition) -> Result<()> {
        if definition.set_spec.trim().is_empty() {
            return Err(RepositoryError::Config(
                "setSpec must not be empty".to_string(),
            ));
        }
        if definition.name.trim().is_empty() {
            return Err(RepositoryError::Config(
                "setName must not be empty".to_string(),
            ));
        }

        let mut defs: Vec<SetDefinition> = self
            .mapper
            .read()
            .definitions()
            .iter()
            .filter(|d| d.set_spec != definition.set_spec)
            .cloned()
            .collect();
        defs.push(definition);
        self.reload_definitions(defs)
    }

    /// Remove an OAI set definition. Returns false when no such set is
    /// defined.
    pub fn remove_set_definition(&self, set_spec: &str) -> Result<bool> {
        let defs: Vec<SetDefinition> = self
            .mapper
            .read()
            .definitions()
            .iter()
            .filter(|d| d.set_spec != set_spec)
            .cloned()
            .collect();
        if defs.len() == self.mapper.read().num_configured() {
            return Ok(false);
        }
        self.reload_definitions(defs)?;
        Ok(true)
    }

    fn reload_definitions(&self, defs: Vec<SetDefinition>) -> Result<()> {
        let xml = rules::write_list_sets(&defs)?;
        let rebuilt = SetQueryMapper::rebuild(defs)?;
        std::fs::write(&self.sets_config_file, &xml)?;
        *self.mapper.write() = rebuilt;
        Ok(())
    }

    /// The raw ListSets config XML, regenerated from the current table.
    pub fn list_sets_config_xml(&self) -> Result<String> {
        rules::write_list_sets(self.mapper.read().definitions())
    }

    /// Replace the whole set-definition table from a config document.
    pub fn load_list_sets_config(&self, xml: &str) -> Result<()> {
        let defs = rules::read_list_sets(xml)?;
        let rebuilt = SetQueryMapper::rebuild(defs)?;
        std::fs::write(&self.sets_config_file, xml)?;
        *self.mapper.write() = rebuilt;
        Ok(())
    }

    pub fn has_oai_sets_configured(&self) -> bool {
        self.mapper.read().num_configured() > 0
    }

    pub fn has_oai_set_configured(&self, set_spec: &str) -> bool {
        self.mapper.read().is_configured(set_spec)
    }

    pub fn oai_sets(&self) -> Vec<String> {
        self.mapper
            .read()
            .set_specs()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Compiled membership predicate for a set, if defined.
    pub fn oai_set_query(&self, set_spec: &str) -> Option<Query> {
        self.mapper.read().query_for(set_spec).cloned()
    }

    /// The OAI sets that claim this record id.
    pub fn sets_for_record(&self, id: &str) -> Vec<String> {
        let id_query = Query::term(fields::ID, id);
        let mapper = self.mapper.read();
        let mut sets = Vec::new();
        for spec in mapper.set_specs() {
            if let Some(set_query) = mapper.query_for(spec) {
                let q = id_query.clone().and(set_query.clone());
                if !self.index.search(&q, None).is_empty() {
                    sets.push(spec.to_string());
                }
            }
        }
        sets
    }

    // ── Record lookup and counters ──────────────────────────────────────

    pub(crate) fn find_record_docs(&self, id: &str) -> Vec<Arc<Document>> {
        self.index.search(&Query::term(fields::ID, id), None)
    }

    /// The indexed document for a record id, if any.
    pub fn get_record(&self, id: &str) -> Option<Arc<Document>> {
        if id.trim().is_empty() {
            return None;
        }
        let docs = self.find_record_docs(id);
        if docs.len() > 1 {
            warn!("More than one document in index for id '{}'", id);
        }
        docs.into_iter().next()
    }

    pub fn is_id_in_repository(&self, id: &str) -> bool {
        !self.find_record_docs(id).is_empty()
    }

    pub fn is_set_in_index(&self, set_spec: &str) -> bool {
        self.indexed_sets().iter().any(|s| s == set_spec)
    }

    /// Set specs present in the index (term enumeration).
    pub fn indexed_sets(&self) -> Vec<String> {
        self.index.terms(fields::COLLECTION)
    }

    /// Native formats present in the index.
    pub fn indexed_formats(&self) -> Vec<String> {
        self.index.terms(fields::XML_FORMAT)
    }

    /// Accession statuses present in the index.
    pub fn indexed_accession_statuses(&self) -> Vec<String> {
        self.index.terms(fields::ACCESSION_STATUS)
    }

    pub fn num_records_in_index(&self) -> usize {
        self.index
            .search(&Query::term(fields::DELETED, "false"), None)
            .len()
    }

    pub fn num_deleted_docs(&self) -> usize {
        self.index
            .search(&Query::term(fields::DELETED, "true"), None)
            .len()
    }

    pub fn num_indexing_errors(&self) -> usize {
        self.indexing_error_docs().len()
    }

    pub fn indexing_error_docs(&self) -> Vec<Arc<Document>> {
        self.index.search(&Query::term(fields::ERROR, "true"), None)
    }

    /// Non-deleted records in the given OAI set, or `None` when no such
    /// set is defined.
    pub fn num_records_in_set(&self, set_spec: &str) -> Option<usize> {
        let set_query = self.oai_set_query(set_spec)?;
        let q = Query::term(fields::DELETED, "false").and(set_query);
        Some(self.index.search(&q, None).len())
    }

    /// Deleted records in the given OAI set, or `None` when no such set is
    /// defined.
    pub fn num_deleted_records_in_set(&self, set_spec: &str) -> Option<usize> {
        let set_query = self.oai_set_query(set_spec)?;
        let q = Query::term(fields::DELETED, "true").and(set_query);
        Some(self.index.search(&q, None).len())
    }

    pub fn index_last_modified_count(&self) -> u64 {
        self.index.last_modified_count()
    }

    // ── Indexing messages ───────────────────────────────────────────────

    pub(crate) fn add_message(&self, message: impl Into<String>) {
        let message = message.into();
        let mut messages = self.messages.lock();
        messages.push_back(format!("{} {}", Utc::now().format("%Y-%m-%d %H:%M:%S"), message));
        while messages.len() > NUM_INDEXING_MESSAGES {
            messages.pop_front();
        }
    }

    /// Recent indexing status messages, oldest first.
    pub fn indexing_messages(&self) -> Vec<String> {
        self.messages.lock().iter().cloned().collect()
    }

    // ── Document construction ───────────────────────────────────────────

    /// Build the index document for one record.
    ///
    /// Derived relation fields are resolved against the current index:
    /// `relatedids` keeps only declared ids that resolve to records, and
    /// `referencedby` collects the ids of records that declare a
    /// relationship to this one.
    pub(crate) fn build_record_document(
        &self,
        key: &str,
        record_id: &str,
        set_spec: &str,
        format: &str,
        dir: &Path,
        record_fields: &RecordFields,
        xml: &str,
        persisted: bool,
        datestamp: DateTime<Utc>,
    ) -> Document {
        let mut doc = Document::new(key);
        doc.set_datestamp(datestamp);
        doc.set_xml(xml);
        doc.set_field(fields::ID, record_id)
            .set_field(fields::COLLECTION, set_spec)
            .set_field(fields::XML_FORMAT, format)
            .set_field(fields::DOC_DIR, dir.display().to_string())
            .set_field(fields::DOC_TYPE, DOCTYPE_RECORD)
            .set_field(fields::DELETED, "false")
            .set_field(fields::ALL_RECORDS, "true")
            .set_field(fields::PERSISTED, persisted.to_string())
            .set_field(
                fields::ACCESSION_STATUS,
                record_fields
                    .accession_status
                    .clone()
                    .unwrap_or_else(|| STATUS_ACCESSIONED.to_string()),
            );

        if let Some(title) = &record_fields.title {
            doc.set_field(fields::TITLE, title);
        }
        if let Some(description) = &record_fields.description {
            doc.set_field(fields::DESCRIPTION, description);
        }
        for url in &record_fields.urls {
            doc.add_field(fields::URL, url);
        }
        for text in &record_fields.default_text {
            doc.add_field(fields::DEFAULT, text);
        }
        for (name, value) in &record_fields.extra {
            doc.add_field(name.as_str(), value);
        }

        for related in &record_fields.related_ids {
            doc.add_field(fields::ASSIGNED_RELATION_IDS, related);
            // Only ids that resolve to live records appear in the
            // related-ids view.
            let resolves = self
                .find_record_docs(related)
                .iter()
                .any(|d| d.has_value(fields::DELETED, "false"));
            if resolves {
                doc.add_field(fields::RELATED_IDS, related);
            }
        }
        for url in &record_fields.related_urls {
            doc.add_field(fields::ASSIGNED_RELATION_URLS, url);
        }

        for referer in self
            .index
            .search(&Query::term(fields::ASSIGNED_RELATION_IDS, record_id), None)
        {
            if referer.has_value(fields::DELETED, "true") {
                continue;
            }
            if let Some(referer_id) = referer.first(fields::ID) {
                if referer_id != record_id {
                    doc.add_field(fields::REFERENCED_BY, referer_id);
                }
            }
        }

        doc
    }

    /// Build an error-placeholder document for a file that failed to index.
    pub(crate) fn build_error_document(
        &self,
        key: &str,
        set_spec: &str,
        format: &str,
        dir: &Path,
        message: &str,
    ) -> Document {
        let mut doc = Document::new(key);
        doc.set_field(fields::COLLECTION, set_spec)
            .set_field(fields::XML_FORMAT, format)
            .set_field(fields::DOC_DIR, dir.display().to_string())
            .set_field(fields::DOC_TYPE, DOCTYPE_ERRORDOC)
            .set_field(fields::ERROR, "true")
            .set_field(fields::ERROR_MSG, message)
            .set_field(fields::DELETED, "false")
            .set_field(fields::ALL_RECORDS, "true");
        doc
    }
}

/// Encode a record id into a safe file name.
pub(crate) fn encode_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
