//! Indexing writers: format-tag → field-extraction strategy.
//!
//! A writer turns one record's XML into the fields committed to the
//! Document Store. The registry maps native format tags to writer
//! implementations with a generic fallback; a caller-supplied writer on
//! `put_record` takes precedence over a registered one.

use crate::error::{RepositoryError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::sync::Arc;

/// Fields extracted from one record's XML.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFields {
    /// Definitive record id, when the XML carries one.
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub urls: Vec<String>,
    /// Ids of records this record declares a relationship to.
    pub related_ids: Vec<String>,
    /// URLs this record declares a relationship to.
    pub related_urls: Vec<String>,
    pub accession_status: Option<String>,
    /// Free text aggregated into the default search field.
    pub default_text: Vec<String>,
    /// Writer-specific extra fields.
    pub extra: Vec<(String, String)>,
}

/// One indexing capability: extract fields from a record's XML.
pub trait IndexingWriter: Send + Sync {
    fn parse(&self, xml: &str) -> Result<RecordFields>;
}

/// Generic writer for any metadata format.
///
/// Extraction is element-name driven: the first `<id>`, `<title>`,
/// `<description>` and `<accessionStatus>` texts, every `<url>`, and
/// `<relation idref="…"/>` / `<relation url="…"/>` declarations. All text
/// content feeds the default search field.
pub struct XmlIndexingWriter;

impl IndexingWriter for XmlIndexingWriter {
    fn parse(&self, xml: &str) -> Result<RecordFields> {
        let mut reader = Reader::from_str(xml);

        let mut fields = RecordFields::default();
        let mut leaf: Option<String> = None;
        let mut saw_element = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    saw_element = true;
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    if name == "relation" {
                        read_relation_attrs(&e, &mut fields)?;
                    }
                    leaf = Some(name);
                }
                Ok(Event::Empty(e)) => {
                    saw_element = true;
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    if name == "relation" {
                        read_relation_attrs(&e, &mut fields)?;
                    }
                }
                Ok(Event::End(_)) => leaf = None,
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(RepositoryError::xml)?
                        .trim()
                        .to_string();
                    if text.is_empty() {
                        continue;
                    }
                    match leaf.as_deref() {
                        Some("id") => {
                            if fields.id.is_none() {
                                fields.id = Some(text.clone());
                            }
                        }
                        Some("title") => {
                            if fields.title.is_none() {
                                fields.title = Some(text.clone());
                            }
                        }
                        Some("description") => {
                            if fields.description.is_none() {
                                fields.description = Some(text.clone());
                            }
                        }
                        Some("accessionStatus") => {
                            if fields.accession_status.is_none() {
                                fields.accession_status = Some(text.to_lowercase());
                            }
                        }
                        Some("url") => fields.urls.push(text.clone()),
                        _ => {}
                    }
                    fields.default_text.push(text);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(RepositoryError::xml(e)),
            }
        }

        if !saw_element {
            return Err(RepositoryError::Xml(
                "record XML contains no elements".to_string(),
            ));
        }
        Ok(fields)
    }
}

fn read_relation_attrs(
    e: &quick_xml::events::BytesStart<'_>,
    fields: &mut RecordFields,
) -> Result<()> {
    if let Some(attr) = e
        .try_get_attribute("idref")
        .map_err(RepositoryError::xml)?
    {
        let value = attr.unescape_value().map_err(RepositoryError::xml)?;
        if !value.trim().is_empty() {
            fields.related_ids.push(value.trim().to_string());
        }
    }
    if let Some(attr) = e.try_get_attribute("url").map_err(RepositoryError::xml)? {
        let value = attr.unescape_value().map_err(RepositoryError::xml)?;
        if !value.trim().is_empty() {
            fields.related_urls.push(value.trim().to_string());
        }
    }
    Ok(())
}

/// Writer for collection-descriptor records.
///
/// Adds the collection `key` and the format of the records the collection
/// holds as extra fields so collections can be looked up by key.
pub struct CollectionIndexingWriter;

impl IndexingWriter for CollectionIndexingWriter {
    fn parse(&self, xml: &str) -> Result<RecordFields> {
        let mut fields = XmlIndexingWriter.parse(xml)?;

        let mut reader = Reader::from_str(xml);
        let mut in_key = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    if e.local_name().as_ref() == b"key" {
                        in_key = true;
                        if let Some(attr) = e
                            .try_get_attribute("format")
                            .map_err(RepositoryError::xml)?
                        {
                            let value =
                                attr.unescape_value().map_err(RepositoryError::xml)?;
                            fields
                                .extra
                                .push(("formatofrecords".to_string(), value.to_string()));
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    if e.local_name().as_ref() == b"key" {
                        in_key = false;
                    }
                }
                Ok(Event::Text(t)) => {
                    if in_key {
                        let text = t
                            .unescape()
                            .map_err(RepositoryError::xml)?
                            .trim()
                            .to_string();
                        if !text.is_empty() {
                            fields.extra.push(("key".to_string(), text));
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(RepositoryError::xml(e)),
            }
        }

        Ok(fields)
    }
}

/// Registry of indexing writers keyed by native format tag.
pub struct WriterRegistry {
    writers: parking_lot::RwLock<HashMap<String, Arc<dyn IndexingWriter>>>,
    fallback: Arc<dyn IndexingWriter>,
}

impl WriterRegistry {
    pub fn new() -> Self {
        Self {
            writers: parking_lot::RwLock::new(HashMap::new()),
            fallback: Arc::new(XmlIndexingWriter),
        }
    }

    /// Register (or replace) the writer for a format tag.
    pub fn set_writer(&self, format: impl Into<String>, writer: Arc<dyn IndexingWriter>) {
        self.writers.write().insert(format.into(), writer);
    }

    /// The writer for a format, falling back to the generic XML writer.
    pub fn writer_for(&self, format: &str) -> Arc<dyn IndexingWriter> {
        self.writers
            .read()
            .get(format)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for WriterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"<record>
        <id>REC-000-000-000-001</id>
        <title>Ocean Circulation</title>
        <description>Currents and climate.</description>
        <url>http://example.org/ocean</url>
        <relation idref="REC-000-000-000-002"/>
        <relation url="http://example.org/shared"/>
    </record>"#;

    #[test]
    fn test_xml_writer_extracts_fields() {
        let fields = XmlIndexingWriter.parse(RECORD).unwrap();
        assert_eq!(fields.id.as_deref(), Some("REC-000-000-000-001"));
        assert_eq!(fields.title.as_deref(), Some("Ocean Circulation"));
        assert_eq!(fields.description.as_deref(), Some("Currents and climate."));
        assert_eq!(fields.urls, ["http://example.org/ocean"]);
        assert_eq!(fields.related_ids, ["REC-000-000-000-002"]);
        assert_eq!(fields.related_urls, ["http://example.org/shared"]);
        assert!(fields
            .default_text
            .iter()
            .any(|t| t.contains("Circulation")));
    }

    #[test]
    fn test_record_without_id() {
        let fields = XmlIndexingWriter.parse("<record><title>T</title></record>").unwrap();
        assert!(fields.id.is_none());
    }

    #[test]
    fn test_malformed_xml_rejected() {
        assert!(XmlIndexingWriter.parse("<record><id>x</record>").is_err());
        assert!(XmlIndexingWriter.parse("no xml at all").is_err());
    }

    #[test]
    fn test_collection_writer_key_and_format() {
        let xml = r#"<collectionRecord>
            <id>DCC-COLLECTION-001</id>
            <key format="adn">dcc</key>
            <title>DCC Collection</title>
            <accessionStatus>Accessioned</accessionStatus>
        </collectionRecord>"#;

        let fields = CollectionIndexingWriter.parse(xml).unwrap();
        assert_eq!(fields.id.as_deref(), Some("DCC-COLLECTION-001"));
        assert_eq!(fields.accession_status.as_deref(), Some("accessioned"));
        assert!(fields
            .extra
            .contains(&("key".to_string(), "dcc".to_string())));
        assert!(fields
            .extra
            .contains(&("formatofrecords".to_string(), "adn".to_string())));
    }

    #[test]
    fn test_registry_fallback_and_override() {
        struct FixedIdWriter;
        impl IndexingWriter for FixedIdWriter {
            fn parse(&self, _xml: &str) -> Result<RecordFields> {
                Ok(RecordFields {
                    id: Some("fixed".to_string()),
                    ..Default::default()
                })
            }
        }

        let registry = WriterRegistry::new();
        let fields = registry.writer_for("adn").parse(RECORD).unwrap();
        assert_eq!(fields.id.as_deref(), Some("REC-000-000-000-001"));

        registry.set_writer("adn", Arc::new(FixedIdWriter));
        let fields = registry.writer_for("adn").parse(RECORD).unwrap();
        assert_eq!(fields.id.as_deref(), Some("fixed"));

        // Unregistered formats still fall back
        let fields = registry.writer_for("news_opps").parse(RECORD).unwrap();
        assert_eq!(fields.id.as_deref(), Some("REC-000-000-000-001"));
    }
}
