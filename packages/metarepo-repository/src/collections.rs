//! Collection API: descriptor records plus their `SetInfo` configuration.
//!
//! A collection is a descriptor record in the internally managed
//! `collect` set plus a `SetInfo` pointing at its directory of item
//! records. The two are kept in step here, and the collection-records
//! reload pass re-derives the whole set configuration from the descriptor
//! directory, exactly the diff a manual edit would produce.

use crate::error::{PutCollectionError, PutCollectionErrorCode, RepositoryError, Result};
use crate::manager::{
    fields, RepositoryManager, COLLECT_FORMAT, COLLECT_SET, STATUS_ACCESSIONED,
};
use crate::set_info::SetInfo;
use crate::writers::{CollectionIndexingWriter, IndexingWriter};
use chrono::{DateTime, Utc};
use metarepo_index::{Document, Query};
use quick_xml::escape::escape;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const MASTER_COLLECTION_ID: &str = "COLLECTIONS-COLLECTION-001";

impl RepositoryManager {
    /// Create or update a collection: its descriptor record and its
    /// `SetInfo`. Returns the id of the collection's descriptor record.
    pub fn put_collection(
        &self,
        key: &str,
        xml_format: &str,
        title: &str,
        description: Option<&str>,
        additional_metadata: Option<&str>,
    ) -> std::result::Result<String, PutCollectionError> {
        let _guard = self.update_lock.lock();

        if key.is_empty() || !is_valid_specifier(key) {
            return Err(PutCollectionError::new(
                PutCollectionErrorCode::BadKey,
                format!("key must match [a-zA-Z0-9_.-]+ but found: '{}'", key),
            ));
        }
        if xml_format.is_empty() || !is_valid_specifier(xml_format) {
            return Err(PutCollectionError::new(
                PutCollectionErrorCode::BadFormatSpecifier,
                format!("xmlFormat must match [a-zA-Z0-9_.-]+ but found: '{}'", xml_format),
            ));
        }
        if title.trim().is_empty() {
            return Err(PutCollectionError::new(
                PutCollectionErrorCode::BadTitle,
                "title must not be empty",
            ));
        }
        if let Some(extra) = additional_metadata {
            let wrapped = format!("<additionalMetadata>{}</additionalMetadata>", extra);
            if let Err(e) = CollectionIndexingWriter.parse(&wrapped) {
                return Err(PutCollectionError::new(
                    PutCollectionErrorCode::BadAdditionalMetadata,
                    format!("Error processing additionalMetadata argument: {}", e),
                ));
            }
        }

        // Set up the collection of collections, if not already configured.
        self.ensure_collect_set().map_err(|e| {
            PutCollectionError::new(PutCollectionErrorCode::InternalError, e.to_string())
        })?;

        let existing_doc = self.find_collection_doc(key);
        let existing_set = self.set_info(key);

        // Update an existing collection.
        if let (Some(doc), Some(set)) = (&existing_doc, &existing_set) {
            let current_format = doc.first(fields::FORMAT_OF_RECORDS).unwrap_or_default();
            if current_format != xml_format {
                return Err(PutCollectionError::new(
                    PutCollectionErrorCode::CollectionExistsInAnotherFormat,
                    format!(
                        "Collection '{}' already exists with xmlFormat '{}'. \
                         Changing the xmlFormat is not allowed.",
                        key, current_format
                    ),
                ));
            }
            let record_id = doc.first(fields::ID).unwrap_or(key).to_string();
            let xml = collection_record_xml(
                key,
                xml_format,
                title,
                description,
                additional_metadata,
                &record_id,
                None,
            );
            self.put_record(&xml, COLLECT_FORMAT, COLLECT_SET, Some(record_id.as_str()), true)
                .map_err(|e| {
                    PutCollectionError::new(PutCollectionErrorCode::InternalError, e.to_string())
                })?;

            let mut updated = set.clone();
            updated.set_name(title);
            updated.set_description(description.unwrap_or(""));
            self.replace_set_info(key, updated);
            return Ok(record_id);
        }

        // Create a new collection: descriptor record first, then the set.
        let xml = collection_record_xml(
            key,
            xml_format,
            title,
            description,
            additional_metadata,
            key,
            Some(Utc::now()),
        );
        let record_id = self
            .put_record(&xml, COLLECT_FORMAT, COLLECT_SET, Some(key), true)
            .map_err(|e| {
                PutCollectionError::new(PutCollectionErrorCode::InternalError, e.to_string())
            })?;

        let dir = self.metadata_records_dir.join(xml_format).join(key);
        let mut set = SetInfo::new(
            title,
            key,
            description.unwrap_or(""),
            true,
            dir,
            xml_format,
            &record_id,
        );
        set.set_accession_status(STATUS_ACCESSIONED);

        if let Err(e) = self.add_set_info(set) {
            // Roll back the descriptor record we just created.
            if let Err(e2) = self.delete_record(&record_id) {
                return Err(PutCollectionError::new(
                    PutCollectionErrorCode::InternalError,
                    format!(
                        "There was an error creating the collection: {} \
                         plus an additional error removing the descriptor record: {}",
                        e, e2
                    ),
                ));
            }
            return Err(PutCollectionError::new(
                PutCollectionErrorCode::InternalError,
                e.to_string(),
            ));
        }

        info!("put_collection() created collection '{}' ({})", key, xml_format);
        Ok(record_id)
    }

    /// Delete a collection: its descriptor record, its `SetInfo` and its
    /// on-disk directory tree. A partial directory delete surfaces a
    /// warning but does not fail the call once the index and configuration
    /// are already updated. Returns `false` when no such collection
    /// exists.
    pub fn delete_collection(&self, key: &str) -> Result<bool> {
        let _guard = self.update_lock.lock();

        let Some(set) = self.set_info(key) else {
            return Ok(false);
        };
        if key == COLLECT_SET {
            return Err(RepositoryError::Config(
                "The 'collect' collection is managed internally and cannot be deleted."
                    .to_string(),
            ));
        }
        let files_dir = set.directory().to_path_buf();

        if let Some(doc) = self.find_collection_doc(key) {
            if let Some(id) = doc.first(fields::ID).map(String::from) {
                if let Err(e) = self.delete_record(&id) {
                    warn!("delete_collection() could not delete descriptor record '{}': {}", id, e);
                }
            }
        }

        self.remove_set_by_spec(key);

        if files_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&files_dir) {
                let msg = format!(
                    "Collection '{}' was removed from the index and repository, however there \
                     was a problem deleting record files from disk: {}",
                    key, e
                );
                warn!("{}", msg);
                self.add_message(msg);
            }
        }

        info!("delete_collection() removed collection '{}'", key);
        Ok(true)
    }

    /// Reload the set configuration from the collection-level records
    /// directory, applying add/replace/remove against the configuration
    /// store exactly as a manual edit would.
    pub fn load_collection_records(&self, index_records: bool) -> Result<()> {
        let mut discovered: HashMap<PathBuf, SetInfo> = HashMap::new();

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.collection_records_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == "xml").unwrap_or(false))
            .collect();
        paths.sort();

        for path in paths {
            let xml = match std::fs::read_to_string(&path) {
                Ok(xml) => xml,
                Err(e) => {
                    warn!("Error reading collection record {:?}: {}", path, e);
                    continue;
                }
            };
            let parsed = match CollectionIndexingWriter.parse(&xml) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Error parsing collection record {:?}: {}", path, e);
                    continue;
                }
            };

            let key = extra_field(&parsed.extra, fields::KEY);
            let format = extra_field(&parsed.extra, fields::FORMAT_OF_RECORDS);
            let (Some(key), Some(format)) = (key, format) else {
                warn!("Collection record {:?} is missing its key or format", path);
                continue;
            };

            let dir = if key == COLLECT_SET {
                self.collection_records_dir.clone()
            } else {
                self.metadata_records_dir.join(&format).join(&key)
            };
            let status = parsed
                .accession_status
                .clone()
                .unwrap_or_else(|| STATUS_ACCESSIONED.to_string());

            let mut set_info = SetInfo::new(
                parsed.title.clone().unwrap_or_else(|| key.clone()),
                &key,
                parsed.description.clone().unwrap_or_default(),
                status == STATUS_ACCESSIONED,
                &dir,
                &format,
                parsed.id.clone().unwrap_or_default(),
            );
            set_info.set_accession_status(status);

            // An operator's enabled/disabled choice survives reloads.
            if let Some(existing) = self.sets.by_directory(&dir) {
                set_info.set_enabled(existing.is_enabled());
            }

            discovered.insert(dir, set_info);
        }

        // Apply the diff: remove sets whose record is gone, replace
        // changed definitions, add new ones.
        for existing in self.set_infos() {
            match discovered.remove(&existing.directory().to_path_buf()) {
                None => {
                    self.remove_set_info(existing.set_spec());
                }
                Some(new_set_info) => {
                    if new_set_info != existing {
                        self.replace_set_info(existing.set_spec(), new_set_info);
                    }
                }
            }
        }
        for (_, set_info) in discovered {
            if let Err(e) = self.add_set_info(set_info) {
                warn!("load_collection_records() could not add set: {}", e);
            }
        }

        if index_records {
            let token = tokio_util::sync::CancellationToken::new();
            self.index_collection(COLLECT_SET, false, &token);
        }
        Ok(())
    }

    // Bootstrap the internally managed `collect` set and its master
    // descriptor record.
    fn ensure_collect_set(&self) -> Result<()> {
        if self.is_set_configured(COLLECT_SET) {
            return Ok(());
        }

        let mut set = SetInfo::new(
            "Master Collection of Collections",
            COLLECT_SET,
            "Individual descriptor records for each collection in this repository",
            true,
            &self.collection_records_dir,
            COLLECT_FORMAT,
            MASTER_COLLECTION_ID,
        );
        set.set_accession_status(STATUS_ACCESSIONED);
        self.add_set_info(set)?;

        let xml = collection_record_xml(
            COLLECT_SET,
            COLLECT_FORMAT,
            "Master Collection of Collections",
            Some("Individual descriptor records for each collection in this repository"),
            None,
            MASTER_COLLECTION_ID,
            Some(Utc::now()),
        );
        self.put_record(&xml, COLLECT_FORMAT, COLLECT_SET, Some(MASTER_COLLECTION_ID), true)
            .map_err(|e| RepositoryError::Config(e.to_string()))?;
        Ok(())
    }

    // The live descriptor record for a collection key, if any.
    pub(crate) fn find_collection_doc(&self, key: &str) -> Option<Arc<Document>> {
        let q = Query::term(fields::KEY, key).and(Query::term(fields::DELETED, "false"));
        self.index.search(&q, None).into_iter().next()
    }
}

fn extra_field(extra: &[(String, String)], name: &str) -> Option<String> {
    extra
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
}

fn is_valid_specifier(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Synthesize a collection descriptor record from the template shape.
fn collection_record_xml(
    key: &str,
    xml_format: &str,
    title: &str,
    description: Option<&str>,
    additional_metadata: Option<&str>,
    id: &str,
    accession_date: Option<DateTime<Utc>>,
) -> String {
    let description = match description {
        Some(d) if !d.trim().is_empty() => d,
        _ => title,
    };

    let mut xml = String::from("<collectionRecord>\n");
    xml.push_str(&format!("  <id>{}</id>\n", escape(id)));
    xml.push_str(&format!(
        "  <key format=\"{}\">{}</key>\n",
        escape(xml_format),
        escape(key)
    ));
    xml.push_str(&format!("  <title>{}</title>\n", escape(title)));
    xml.push_str(&format!(
        "  <description>{}</description>\n",
        escape(description)
    ));
    xml.push_str(&format!(
        "  <accessionStatus>{}</accessionStatus>\n",
        STATUS_ACCESSIONED
    ));
    if let Some(date) = accession_date {
        xml.push_str(&format!(
            "  <accessionDate>{}</accessionDate>\n",
            date.format("%Y-%m-%dT%H:%M:%SZ")
        ));
    }
    if let Some(extra) = additional_metadata {
        if !extra.trim().is_empty() {
            xml.push_str(&format!(
                "  <additionalMetadata>{}</additionalMetadata>\n",
                extra
            ));
        }
    }
    xml.push_str("</collectionRecord>\n");
    xml
}
