//! The `DocumentIndex` port and the reference in-memory engine.

use crate::document::Document;
use crate::error::{IndexError, Result};
use crate::query::{DateRange, Query};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Document store abstraction the repository core is written against.
///
/// Mutation is add/replace/remove by key or by term; every successful
/// mutation bumps [`DocumentIndex::last_modified_count`], which dependent
/// caches compare against instead of registering invalidation callbacks.
/// Reads operate on whatever committed state is current; the store's own
/// consistency model bounds staleness, not the repository core.
pub trait DocumentIndex: Send + Sync {
    /// Add or replace the document stored under its key.
    fn put(&self, doc: Document) -> Result<()>;

    /// Remove every document whose field holds the value; returns the
    /// number removed.
    fn remove_by_term(&self, field: &str, value: &str) -> usize;

    /// Remove the document stored under the key, if any.
    fn remove_by_key(&self, key: &str) -> bool;

    /// Fetch the document stored under the key, if any.
    fn get(&self, key: &str) -> Option<Arc<Document>>;

    /// Evaluate the query, optionally restricted to the date range, with
    /// results ordered by descending score (ties broken by storage key).
    fn search(&self, query: &Query, range: Option<&DateRange>) -> Vec<Arc<Document>>;

    /// Distinct values of a field across all documents, sorted.
    fn terms(&self, field: &str) -> Vec<String>;

    /// Number of documents currently stored.
    fn doc_count(&self) -> usize;

    /// Monotonically increasing modification counter.
    fn last_modified_count(&self) -> u64;

    /// Earliest datestamp across all documents, if any are stored.
    fn earliest_datestamp(&self) -> Option<DateTime<Utc>>;
}

/// Reference in-memory document store.
///
/// Good for tests and small repositories; evaluation is a linear scan per
/// query, which keeps the engine honest about being a stand-in rather than
/// a search implementation.
pub struct MemoryIndex {
    docs: DashMap<String, Arc<Document>>,
    mod_count: AtomicU64,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            mod_count: AtomicU64::new(0),
        }
    }

    fn bump(&self) {
        self.mod_count.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentIndex for MemoryIndex {
    fn put(&self, doc: Document) -> Result<()> {
        if doc.key.trim().is_empty() {
            return Err(IndexError::document("document storage key is empty"));
        }
        self.docs.insert(doc.key.clone(), Arc::new(doc));
        self.bump();
        Ok(())
    }

    fn remove_by_term(&self, field: &str, value: &str) -> usize {
        let keys: Vec<String> = self
            .docs
            .iter()
            .filter(|entry| entry.value().has_value(field, value))
            .map(|entry| entry.key().clone())
            .collect();
        for key in &keys {
            self.docs.remove(key);
        }
        if !keys.is_empty() {
            self.bump();
        }
        keys.len()
    }

    fn remove_by_key(&self, key: &str) -> bool {
        let removed = self.docs.remove(key).is_some();
        if removed {
            self.bump();
        }
        removed
    }

    fn get(&self, key: &str) -> Option<Arc<Document>> {
        self.docs.get(key).map(|entry| entry.value().clone())
    }

    fn search(&self, query: &Query, range: Option<&DateRange>) -> Vec<Arc<Document>> {
        let mut hits: Vec<(f32, Arc<Document>)> = self
            .docs
            .iter()
            .filter_map(|entry| {
                let doc = entry.value();
                if let Some(range) = range {
                    if !range.contains(doc.datestamp) {
                        return None;
                    }
                }
                query.score(doc).map(|score| (score, doc.clone()))
            })
            .collect();

        hits.sort_by(|(sa, da), (sb, db)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| da.key.cmp(&db.key))
        });
        hits.into_iter().map(|(_, doc)| doc).collect()
    }

    fn terms(&self, field: &str) -> Vec<String> {
        let mut terms = BTreeSet::new();
        for entry in self.docs.iter() {
            for value in entry.value().values(field) {
                terms.insert(value.clone());
            }
        }
        terms.into_iter().collect()
    }

    fn doc_count(&self) -> usize {
        self.docs.len()
    }

    fn last_modified_count(&self) -> u64 {
        self.mod_count.load(Ordering::SeqCst)
    }

    fn earliest_datestamp(&self) -> Option<DateTime<Utc>> {
        self.docs.iter().map(|entry| entry.value().datestamp).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(key: &str, id: &str, collection: &str, deleted: bool) -> Document {
        let mut doc = Document::new(key);
        doc.set_field("id", id)
            .set_field("collection", collection)
            .set_field("deleted", if deleted { "true" } else { "false" });
        doc
    }

    #[test]
    fn test_put_replaces_by_key() {
        let index = MemoryIndex::new();
        index.put(record("/d/a.xml", "a", "dcc", false)).unwrap();
        index.put(record("/d/a.xml", "a", "comet", false)).unwrap();

        assert_eq!(index.doc_count(), 1);
        let doc = index.get("/d/a.xml").unwrap();
        assert_eq!(doc.first("collection"), Some("comet"));
    }

    #[test]
    fn test_empty_key_rejected() {
        let index = MemoryIndex::new();
        assert!(index.put(Document::new("  ")).is_err());
    }

    #[test]
    fn test_remove_by_term() {
        let index = MemoryIndex::new();
        index.put(record("/d/a.xml", "a", "dcc", false)).unwrap();
        index.put(record("/d/b.xml", "b", "dcc", false)).unwrap();
        index.put(record("/d/c.xml", "c", "comet", false)).unwrap();

        assert_eq!(index.remove_by_term("collection", "dcc"), 2);
        assert_eq!(index.doc_count(), 1);
        assert_eq!(index.remove_by_term("collection", "dcc"), 0);
    }

    #[test]
    fn test_mod_count_monotonic() {
        let index = MemoryIndex::new();
        let c0 = index.last_modified_count();
        index.put(record("/d/a.xml", "a", "dcc", false)).unwrap();
        let c1 = index.last_modified_count();
        assert!(c1 > c0);

        // A removal that matches nothing must not bump the counter.
        index.remove_by_term("id", "nope");
        assert_eq!(index.last_modified_count(), c1);
    }

    #[test]
    fn test_search_score_ordering() {
        let index = MemoryIndex::new();
        index.put(record("/d/a.xml", "a", "dcc", false)).unwrap();
        index.put(record("/d/b.xml", "b", "dcc", true)).unwrap();

        let q = Query::any_of(vec![
            Query::term("deleted", "false").boost(10.0),
            Query::term("deleted", "true"),
        ]);
        let hits = index.search(&q, None);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].first("id"), Some("a"));
        assert_eq!(hits[1].first("id"), Some("b"));
    }

    #[test]
    fn test_search_date_range() {
        let index = MemoryIndex::new();
        let mut old = record("/d/a.xml", "a", "dcc", false);
        old.set_datestamp(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let mut new = record("/d/b.xml", "b", "dcc", false);
        new.set_datestamp(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        index.put(old).unwrap();
        index.put(new).unwrap();

        let range = DateRange::after(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap());
        let hits = index.search(&Query::MatchAll, Some(&range));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].first("id"), Some("b"));
    }

    #[test]
    fn test_terms_enumeration() {
        let index = MemoryIndex::new();
        index.put(record("/d/a.xml", "a", "dcc", false)).unwrap();
        index.put(record("/d/b.xml", "b", "comet", false)).unwrap();
        index.put(record("/d/c.xml", "c", "dcc", false)).unwrap();

        assert_eq!(index.terms("collection"), ["comet", "dcc"]);
    }

    #[test]
    fn test_earliest_datestamp() {
        let index = MemoryIndex::new();
        assert!(index.earliest_datestamp().is_none());

        let early = Utc.with_ymd_and_hms(2019, 3, 1, 0, 0, 0).unwrap();
        let mut doc = record("/d/a.xml", "a", "dcc", false);
        doc.set_datestamp(early);
        index.put(doc).unwrap();
        index.put(record("/d/b.xml", "b", "dcc", false)).unwrap();

        assert_eq!(index.earliest_datestamp(), Some(early));
    }
}
