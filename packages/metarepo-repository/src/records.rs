//! Record lifecycle: put, delete, reindex.
//!
//! All three operations serialize on the manager's exclusive, reentrant
//! update lock; reindex re-enters put while already holding it. The
//! related-record cascade is bounded to one hop by an explicit flag;
//! cascades never cascade further. Cascade failures are logged, never
//! propagated: the primary mutation has already committed.

use crate::error::{RecordUpdateError, RepositoryError, Result};
use crate::manager::{encode_id, fields, RepositoryManager, DOCTYPE_RECORD};
use crate::writers::{IndexingWriter, RecordFields};
use chrono::Utc;
use metarepo_index::{Document, Query};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

impl RepositoryManager {
    /// Put a record into the repository, replacing any existing record
    /// with the same id.
    ///
    /// The definitive id is derived from the record XML; the `id` argument
    /// is a fallback used only when the XML carries none. Returns the id
    /// of the record as inserted.
    pub fn put_record(
        &self,
        record_xml: &str,
        xml_format: &str,
        set_spec: &str,
        id: Option<&str>,
        persist_to_disk: bool,
    ) -> std::result::Result<String, RecordUpdateError> {
        self.do_put_record(record_xml, xml_format, set_spec, id, None, persist_to_disk, true)
    }

    /// Like [`RepositoryManager::put_record`], with a caller-supplied
    /// indexing writer that takes precedence over any registered one.
    pub fn put_record_with_writer(
        &self,
        record_xml: &str,
        xml_format: &str,
        set_spec: &str,
        id: Option<&str>,
        writer: Arc<dyn IndexingWriter>,
        persist_to_disk: bool,
    ) -> std::result::Result<String, RecordUpdateError> {
        self.do_put_record(
            record_xml,
            xml_format,
            set_spec,
            id,
            Some(writer),
            persist_to_disk,
            true,
        )
    }

    fn do_put_record(
        &self,
        record_xml: &str,
        xml_format: &str,
        set_spec: &str,
        id: Option<&str>,
        writer_override: Option<Arc<dyn IndexingWriter>>,
        persist_to_disk: bool,
        index_relations: bool,
    ) -> std::result::Result<String, RecordUpdateError> {
        let _guard = self.update_lock.lock();

        if xml_format.trim().is_empty() {
            return Err(RecordUpdateError::new("Format specified is empty"));
        }
        if set_spec.trim().is_empty() {
            return Err(RecordUpdateError::new("Collection specified is empty"));
        }
        if record_xml.trim().is_empty() {
            return Err(RecordUpdateError::new("Record XML specified is empty"));
        }

        let set_info = self.set_info(set_spec).ok_or_else(|| {
            RecordUpdateError::new(format!(
                "Collection '{}' is not configured in this repository. \
                 The collection must exist before records can be put.",
                set_spec
            ))
        })?;
        if set_info.format() != xml_format {
            return Err(RecordUpdateError::new(format!(
                "Format '{}' was specified, however collection '{}' is configured for format '{}'",
                xml_format,
                set_spec,
                set_info.format()
            )));
        }
        let dir = set_info.directory().to_path_buf();

        // Verify the record can be indexed before anything touches disk.
        let writer = writer_override.unwrap_or_else(|| self.writers.writer_for(xml_format));
        let record_fields = writer.parse(record_xml).map_err(|e| {
            RecordUpdateError::new(format!("Unable to index record: {}", e))
        })?;

        let record_id = match record_fields.id.clone() {
            Some(id) => id,
            None => match id {
                Some(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => {
                    return Err(RecordUpdateError::new(
                        "ID cannot be determined from the record XML and no id argument was supplied",
                    ))
                }
            },
        };

        // Cross-set id collisions fail the call.
        let existing = self.find_record_docs(&record_id);
        if let Some(doc) = existing.first() {
            if let Some(current) = doc.first(fields::COLLECTION) {
                if current != set_spec {
                    return Err(RecordUpdateError::new(format!(
                        "Record ID '{}' already exists in the repository, but is in collection '{}'",
                        record_id, current
                    )));
                }
            }
        }

        std::fs::create_dir_all(&dir)
            .map_err(|e| RecordUpdateError::new(format!("Unable to create directory: {}", e)))?;

        let target: PathBuf = existing
            .first()
            .map(|d| PathBuf::from(&d.key))
            .unwrap_or_else(|| dir.join(format!("{}.xml", encode_id(&record_id))));
        let created_new = existing.is_empty();

        if let Err(e) = place_record_file(record_xml, &target) {
            if created_new {
                let _ = std::fs::remove_file(&target);
            }
            return Err(RecordUpdateError::new(format!(
                "Unable to create record file at '{}'. Permissions may not allow writing files: {}",
                target.display(),
                e
            )));
        }

        let doc = self.build_record_document(
            &target.display().to_string(),
            &record_id,
            set_spec,
            xml_format,
            &dir,
            &record_fields,
            record_xml,
            persist_to_disk,
            Utc::now(),
        );
        if let Err(e) = self.index.put(doc) {
            if created_new {
                let _ = std::fs::remove_file(&target);
            }
            return Err(RecordUpdateError::new(format!(
                "Unable to index record '{}': {}",
                record_id, e
            )));
        }

        // Keep the record in the index alone when not persisting to disk.
        if !persist_to_disk {
            let _ = std::fs::remove_file(&target);
        }

        if index_relations {
            self.cascade_relations(&record_id, &record_fields, persist_to_disk);
        }

        info!("put_record() saved record '{}' in set '{}'", record_id, set_spec);
        Ok(record_id)
    }

    /// One-hop cascade after a successful put: reindex the record itself
    /// to pick up back-references, then every record it declares a
    /// relationship to, by id or by shared URL. Best effort throughout.
    fn cascade_relations(
        &self,
        record_id: &str,
        record_fields: &RecordFields,
        persist_to_disk: bool,
    ) {
        if let Err(e) = self.do_reindex(record_id, None, persist_to_disk, false) {
            warn!("put_record() unable to reindex '{}': {}", record_id, e);
        }

        for related in &record_fields.related_ids {
            if let Err(e) = self.reindex_related(related) {
                warn!(
                    "put_record() saved record '{}' but unable to reindex related record '{}': {}",
                    record_id, related, e
                );
            }
        }

        if !record_fields.related_urls.is_empty() {
            let url_query = Query::any_of(
                record_fields
                    .related_urls
                    .iter()
                    .map(|u| Query::term(fields::URL, u.as_str()))
                    .collect(),
            );
            for doc in self.index.search(&url_query, None) {
                let Some(rid) = doc.first(fields::ID).map(String::from) else {
                    continue;
                };
                if rid == record_id {
                    continue;
                }
                if let Err(e) = self.reindex_related(&rid) {
                    warn!(
                        "put_record() saved record '{}' but unable to reindex URL-related record '{}': {}",
                        record_id, rid, e
                    );
                }
            }
        }
    }

    // Reindex a related record without cascading further, persisting only
    // if its file is actually on disk.
    fn reindex_related(&self, id: &str) -> std::result::Result<String, RecordUpdateError> {
        let persist = self
            .get_record(id)
            .map(|d| Path::new(&d.key).exists())
            .unwrap_or(true);
        self.do_reindex(id, None, persist, false)
    }

    /// Delete a record. Returns `false` (not an error) when no record with
    /// the given id exists; the index modification counter is untouched in
    /// that case.
    pub fn delete_record(&self, id: &str) -> Result<bool> {
        let _guard = self.update_lock.lock();

        let docs = self.find_record_docs(id);
        if docs.is_empty() {
            return Ok(false);
        }

        // Records that had assigned a relationship to this id, collected
        // before deletion so they can be repaired afterward.
        let referers: Vec<String> = self
            .index
            .search(&Query::term(fields::ASSIGNED_RELATION_IDS, id), None)
            .iter()
            .filter_map(|d| d.first(fields::ID).map(String::from))
            .filter(|rid| rid != id)
            .collect();

        // Backing files must not silently remain.
        for doc in &docs {
            let path = Path::new(&doc.key);
            if path.exists() {
                std::fs::remove_file(path)?;
                if path.exists() {
                    return Err(RepositoryError::Config(format!(
                        "Unable to delete file {} from disk. Most likely cause is access denied.",
                        path.display()
                    )));
                }
            }
        }

        if self.keep_deletion_tombstones {
            for doc in &docs {
                self.index.put(deletion_tombstone(doc))?;
            }
        } else {
            self.index.remove_by_term(fields::ID, id);
        }

        for rid in referers {
            if let Err(e) = self.reindex_related(&rid) {
                warn!(
                    "delete_record() deleted '{}' but unable to reindex formerly related record '{}': {}",
                    id, rid, e
                );
            }
        }

        info!("delete_record() removed record '{}'", id);
        Ok(true)
    }

    /// Reindex an existing record, replacing its index entry. Equivalent
    /// to fetching the record XML and calling put with the same XML.
    /// `index_relations` controls whether the one-hop related-record
    /// cascade runs again.
    pub fn reindex_record(
        &self,
        id: &str,
        persist_to_disk: bool,
        index_relations: bool,
    ) -> std::result::Result<String, RecordUpdateError> {
        self.do_reindex(id, None, persist_to_disk, index_relations)
    }

    /// Like [`RepositoryManager::reindex_record`], with a caller-supplied
    /// indexing writer.
    pub fn reindex_record_with_writer(
        &self,
        id: &str,
        writer: Arc<dyn IndexingWriter>,
        persist_to_disk: bool,
        index_relations: bool,
    ) -> std::result::Result<String, RecordUpdateError> {
        self.do_reindex(id, Some(writer), persist_to_disk, index_relations)
    }

    fn do_reindex(
        &self,
        id: &str,
        writer_override: Option<Arc<dyn IndexingWriter>>,
        persist_to_disk: bool,
        index_relations: bool,
    ) -> std::result::Result<String, RecordUpdateError> {
        let _guard = self.update_lock.lock();

        let doc = self.get_record(id).ok_or_else(|| {
            RecordUpdateError::new(format!(
                "Unable to reindex record '{}'. Record not found in the repository.",
                id
            ))
        })?;
        if doc.has_value(fields::DELETED, "true") {
            return Err(RecordUpdateError::new(format!(
                "Unable to reindex record '{}'. The record is deleted.",
                id
            )));
        }

        let xml = if doc.xml.is_empty() {
            std::fs::read_to_string(&doc.key).map_err(|e| {
                RecordUpdateError::new(format!("Unable to reindex record '{}': {}", id, e))
            })?
        } else {
            doc.xml.clone()
        };
        let xml_format = doc.first(fields::XML_FORMAT).ok_or_else(|| {
            RecordUpdateError::new(format!("Record '{}' has no format field", id))
        })?;
        let set_spec = doc.first(fields::COLLECTION).ok_or_else(|| {
            RecordUpdateError::new(format!("Record '{}' has no collection field", id))
        })?;

        self.do_put_record(
            &xml,
            xml_format,
            set_spec,
            Some(id),
            writer_override,
            persist_to_disk,
            index_relations,
        )
    }
}

// Write the record to a temp file, then move it into place; copy is the
// fallback when rename crosses filesystems.
fn place_record_file(record_xml: &str, target: &Path) -> std::io::Result<()> {
    let tmp = std::env::temp_dir().join(format!("metarepo-put-{}.xml", Uuid::new_v4()));
    std::fs::write(&tmp, record_xml)?;
    if std::fs::rename(&tmp, target).is_err() {
        let copied = std::fs::copy(&tmp, target);
        let _ = std::fs::remove_file(&tmp);
        copied?;
    }
    Ok(())
}

// A deletion tombstone keeps the record visible to harvesters until the
// index is rebuilt.
pub(crate) fn deletion_tombstone(doc: &Document) -> Document {
    let mut tombstone = Document::new(doc.key.clone());
    for field in [
        fields::ID,
        fields::COLLECTION,
        fields::XML_FORMAT,
        fields::DOC_DIR,
        fields::ACCESSION_STATUS,
    ] {
        for value in doc.values(field) {
            tombstone.add_field(field, value);
        }
    }
    tombstone
        .set_field(fields::DOC_TYPE, DOCTYPE_RECORD)
        .set_field(fields::DELETED, "true")
        .set_field(fields::ALL_RECORDS, "true")
        .set_datestamp(Utc::now());
    tombstone
}
