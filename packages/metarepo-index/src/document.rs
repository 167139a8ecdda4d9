//! Document model committed to the index.
//!
//! One document per metadata record (or per tombstone / error placeholder).
//! Fields are multi-valued strings; the datestamp and the raw XML payload
//! are carried on the document itself so the repository can reindex a
//! record even when its backing file no longer exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An indexed document.
///
/// # Identity
///
/// `key` is the storage key (normally the absolute path of the source
/// file). Committing a document with an existing key replaces the previous
/// entry. Record identity (`id`) is an ordinary field; the repository
/// layer decides its semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Storage key (unique within the index)
    pub key: String,
    /// Named, multi-valued string fields
    pub fields: BTreeMap<String, Vec<String>>,
    /// Modification datestamp (drives OAI date-range harvesting)
    pub datestamp: DateTime<Utc>,
    /// Raw record XML, retained for reindexing
    #[serde(default)]
    pub xml: String,
}

impl Document {
    /// Create an empty document with the given storage key, stamped now.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
            datestamp: Utc::now(),
            xml: String::new(),
        }
    }

    /// Append a value to a field.
    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Replace all values of a field with a single value.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(name.into(), vec![value.into()]);
        self
    }

    /// Attach the raw record XML.
    pub fn set_xml(&mut self, xml: impl Into<String>) -> &mut Self {
        self.xml = xml.into();
        self
    }

    pub fn set_datestamp(&mut self, datestamp: DateTime<Utc>) -> &mut Self {
        self.datestamp = datestamp;
        self
    }

    /// First value of a field, if any.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// All values of a field (empty slice if absent).
    pub fn values(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the field holds the given value (case-insensitive).
    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.values(name)
            .iter()
            .any(|v| v.eq_ignore_ascii_case(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_fields() {
        let mut doc = Document::new("/data/adn/dcc/rec-001.xml");
        doc.set_field("id", "rec-001")
            .add_field("url", "http://example.org/a")
            .add_field("url", "http://example.org/b");

        assert_eq!(doc.first("id"), Some("rec-001"));
        assert_eq!(doc.values("url").len(), 2);
        assert_eq!(doc.first("missing"), None);
        assert!(doc.values("missing").is_empty());
    }

    #[test]
    fn test_set_field_replaces() {
        let mut doc = Document::new("k");
        doc.add_field("deleted", "false");
        doc.set_field("deleted", "true");
        assert_eq!(doc.values("deleted"), ["true"]);
    }

    #[test]
    fn test_has_value_case_insensitive() {
        let mut doc = Document::new("k");
        doc.set_field("collection", "DCC");
        assert!(doc.has_value("collection", "dcc"));
        assert!(!doc.has_value("collection", "comet"));
    }

    #[test]
    fn test_document_serde() {
        let mut doc = Document::new("k");
        doc.set_field("id", "rec-1").set_xml("<record/>");

        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}
