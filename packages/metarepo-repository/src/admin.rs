//! Persisted administrative settings.
//!
//! A flat key → value string map with last-writer-wins semantics and no
//! versioning, persisted as one JSON document. Typed accessors wrap the
//! raw map: boosting factors are validated non-negative, list-valued keys
//! are stored as JSON arrays inside the flat map, and per-format metadata
//! namespace/schema URLs use key prefixes.

use crate::error::{RepositoryError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

/// Persisted setting keys.
pub mod keys {
    pub const REPOSITORY_NAME: &str = "repositoryName";
    pub const REPOSITORY_IDENTIFIER: &str = "repositoryIdentifier";
    pub const PROTOCOL_VERSION: &str = "protocolVersion";
    pub const GRANULARITY: &str = "granularity";
    pub const PROVIDER_STATUS: &str = "providerStatus";
    pub const HARVESTER_STATUS: &str = "harvesterStatus";
    pub const NUM_IDENTIFIERS_RESULTS: &str = "numIdentifiersResults";
    pub const NUM_RECORDS_RESULTS: &str = "numRecordsResults";
    pub const DRC_BOOST_FACTOR: &str = "drcBoostFactor";
    pub const MULTIDOC_BOOST_FACTOR: &str = "multiDocBoostFactor";
    pub const TITLE_BOOST_FACTOR: &str = "titleBoostFactor";
    pub const STEMMING_BOOST_FACTOR: &str = "stemmingBoostFactor";
    pub const STEMMING_ENABLED: &str = "stemmingEnabled";
    pub const TRUSTED_WS_IPS: &str = "trustedWsIps";
    pub const ADMIN_EMAILS: &str = "adminEmails";
    pub const DESCRIPTIONS: &str = "descriptions";
    pub const COMPRESSIONS: &str = "compressions";
    pub const EXAMPLE_ID: &str = "exampleId";
    pub const METADATA_NAMESPACE_PREFIX: &str = "metadataNamespace:";
    pub const METADATA_SCHEMA_PREFIX: &str = "metadataSchema:";
}

pub const DEFAULT_PROTOCOL_VERSION: &str = "2.0";
pub const DEFAULT_NUM_RESULTS: usize = 500;
pub const DEFAULT_BOOST_FACTOR: f64 = 1.0;

/// OAI datestamp precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Second,
}

impl Granularity {
    /// The OAI granularity string advertised by Identify.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "YYYY-MM-DD",
            Granularity::Second => "YYYY-MM-DDThh:mm:ssZ",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "YYYY-MM-DD" => Some(Granularity::Day),
            "YYYY-MM-DDThh:mm:ssZ" => Some(Granularity::Second),
            _ => None,
        }
    }
}

/// Flat persisted settings map.
pub struct AdminSettings {
    path: Option<PathBuf>,
    map: Mutex<BTreeMap<String, String>>,
}

impl AdminSettings {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            map: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map: BTreeMap<String, String> = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: Some(path),
            map: Mutex::new(map),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let snapshot = {
            let mut map = self.map.lock();
            map.insert(key.into(), value.into());
            map.clone()
        };
        self.persist(&snapshot);
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        let (removed, snapshot) = {
            let mut map = self.map.lock();
            let removed = map.remove(key);
            (removed, map.clone())
        };
        if removed.is_some() {
            self.persist(&snapshot);
        }
        removed
    }

    fn persist(&self, snapshot: &BTreeMap<String, String>) {
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
            warn!("Failed to persist admin settings to {:?}: {}", path, e);
        }
    }

    // ── Typed accessors ─────────────────────────────────────────────────

    pub fn repository_name(&self) -> String {
        self.get(keys::REPOSITORY_NAME).unwrap_or_default()
    }

    pub fn repository_identifier(&self) -> String {
        self.get(keys::REPOSITORY_IDENTIFIER).unwrap_or_default()
    }

    /// OAI identifier prefix, for example `oai:example.org:`, or empty when
    /// no repository identifier is configured.
    pub fn oai_id_prefix(&self) -> String {
        let identifier = self.repository_identifier();
        if identifier.is_empty() {
            String::new()
        } else {
            format!("oai:{}:", identifier)
        }
    }

    pub fn protocol_version(&self) -> String {
        self.get(keys::PROTOCOL_VERSION)
            .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string())
    }

    pub fn granularity(&self) -> Granularity {
        self.get(keys::GRANULARITY)
            .and_then(|s| Granularity::parse(&s))
            .unwrap_or(Granularity::Second)
    }

    pub fn set_granularity(&self, granularity: Granularity) {
        self.set(keys::GRANULARITY, granularity.as_str());
    }

    pub fn is_provider_enabled(&self) -> bool {
        self.get(keys::PROVIDER_STATUS)
            .map(|s| s != "DISABLED")
            .unwrap_or(true)
    }

    pub fn set_provider_enabled(&self, enabled: bool) {
        self.set(
            keys::PROVIDER_STATUS,
            if enabled { "ENABLED" } else { "DISABLED" },
        );
    }

    pub fn is_harvester_enabled(&self) -> bool {
        self.get(keys::HARVESTER_STATUS)
            .map(|s| s != "DISABLED")
            .unwrap_or(true)
    }

    pub fn set_harvester_enabled(&self, enabled: bool) {
        self.set(
            keys::HARVESTER_STATUS,
            if enabled { "ENABLED" } else { "DISABLED" },
        );
    }

    pub fn num_identifiers_results(&self) -> usize {
        self.get_usize(keys::NUM_IDENTIFIERS_RESULTS)
    }

    pub fn num_records_results(&self) -> usize {
        self.get_usize(keys::NUM_RECORDS_RESULTS)
    }

    fn get_usize(&self, key: &str) -> usize {
        self.get(key)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_NUM_RESULTS)
    }

    pub fn drc_boost_factor(&self) -> f64 {
        self.get_boost(keys::DRC_BOOST_FACTOR)
    }

    pub fn multi_doc_boost_factor(&self) -> f64 {
        self.get_boost(keys::MULTIDOC_BOOST_FACTOR)
    }

    pub fn title_boost_factor(&self) -> f64 {
        self.get_boost(keys::TITLE_BOOST_FACTOR)
    }

    pub fn stemming_boost_factor(&self) -> f64 {
        self.get_boost(keys::STEMMING_BOOST_FACTOR)
    }

    fn get_boost(&self, key: &str) -> f64 {
        self.get(key)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BOOST_FACTOR)
    }

    pub fn set_boost_factor(&self, key: &str, factor: f64) -> Result<()> {
        if !factor.is_finite() || factor < 0.0 {
            return Err(RepositoryError::Config(format!(
                "Boosting factor must be a number greater than or equal to zero, found: {}",
                factor
            )));
        }
        self.set(key, factor.to_string());
        Ok(())
    }

    /// Restore all boosting factors to their defaults.
    pub fn reset_boosting_defaults(&self) {
        for key in [
            keys::DRC_BOOST_FACTOR,
            keys::MULTIDOC_BOOST_FACTOR,
            keys::TITLE_BOOST_FACTOR,
            keys::STEMMING_BOOST_FACTOR,
        ] {
            self.set(key, DEFAULT_BOOST_FACTOR.to_string());
        }
    }

    pub fn is_stemming_enabled(&self) -> bool {
        self.get(keys::STEMMING_ENABLED)
            .map(|s| s == "true")
            .unwrap_or(false)
    }

    pub fn set_stemming_enabled(&self, enabled: bool) {
        self.set(keys::STEMMING_ENABLED, enabled.to_string());
    }

    /// Comma-separated trusted IP patterns; `*` matches any run of
    /// characters.
    pub fn trusted_ips(&self) -> Vec<String> {
        self.get(keys::TRUSTED_WS_IPS)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_trusted_ips(&self, patterns: &str) {
        self.set(keys::TRUSTED_WS_IPS, patterns);
    }

    pub fn is_trusted_ip(&self, ip: &str) -> bool {
        self.trusted_ips().iter().any(|p| wildcard_match(p, ip))
    }

    pub fn admin_emails(&self) -> Vec<String> {
        self.get_list(keys::ADMIN_EMAILS)
    }

    pub fn add_admin_email(&self, email: &str) {
        self.push_list(keys::ADMIN_EMAILS, email);
    }

    pub fn remove_admin_email(&self, email: &str) {
        self.remove_from_list(keys::ADMIN_EMAILS, email);
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.get_list(keys::DESCRIPTIONS)
    }

    pub fn add_description(&self, description: &str) {
        self.push_list(keys::DESCRIPTIONS, description);
    }

    pub fn remove_description(&self, description: &str) {
        self.remove_from_list(keys::DESCRIPTIONS, description);
    }

    pub fn compressions(&self) -> Vec<String> {
        self.get_list(keys::COMPRESSIONS)
    }

    pub fn add_compression(&self, compression: &str) {
        self.push_list(keys::COMPRESSIONS, compression);
    }

    fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn push_list(&self, key: &str, value: &str) {
        let mut list = self.get_list(key);
        if !list.iter().any(|v| v == value) {
            list.push(value.to_string());
            self.set(key, serde_json::to_string(&list).unwrap_or_default());
        }
    }

    fn remove_from_list(&self, key: &str, value: &str) {
        let mut list = self.get_list(key);
        list.retain(|v| v != value);
        self.set(key, serde_json::to_string(&list).unwrap_or_default());
    }

    pub fn example_id(&self) -> Option<String> {
        self.get(keys::EXAMPLE_ID)
    }

    pub fn metadata_namespace(&self, format: &str) -> Option<String> {
        self.get(&format!("{}{}", keys::METADATA_NAMESPACE_PREFIX, format))
    }

    pub fn set_metadata_namespace(&self, format: &str, namespace: &str) {
        self.set(
            format!("{}{}", keys::METADATA_NAMESPACE_PREFIX, format),
            namespace,
        );
    }

    pub fn metadata_schema(&self, format: &str) -> Option<String> {
        self.get(&format!("{}{}", keys::METADATA_SCHEMA_PREFIX, format))
    }

    pub fn set_metadata_schema(&self, format: &str, schema: &str) {
        self.set(format!("{}{}", keys::METADATA_SCHEMA_PREFIX, format), schema);
    }
}

/// Match a pattern where `*` stands for any run of characters.
fn wildcard_match(pattern: &str, input: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == input;
    }

    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match input[pos..].find(part) {
            Some(found) => {
                // The first segment is anchored at the start
                if i == 0 && found != 0 {
                    return false;
                }
                pos += found + part.len();
            }
            None => return false,
        }
    }
    // The last segment is anchored at the end
    if let Some(last) = parts.last() {
        if !last.is_empty() && !input.ends_with(last) {
            return false;
        }
    }
    true
}
