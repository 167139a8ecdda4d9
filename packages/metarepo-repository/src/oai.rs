//! Discoverability predicates and the OAI query engine.
//!
//! Four standing predicates are composed into every harvest query:
//! discoverable status, enabled sets, convertible formats and the
//! date-range filter. Each is recomputed lazily and cached until a
//! configuration or index-version change invalidates it. Caches compare
//! modification counters rather than registering invalidation callbacks,
//! and every cache entry is replaced atomically as a whole.

use crate::admin::{keys, Granularity};
use crate::error::OAIError;
use crate::manager::{fields, RepositoryManager, DOCTYPE_ERRORDOC, STATUS_ACCESSIONED};
use crate::query_parser::parse_query;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use metarepo_index::{DateRange, Document, Occur, Query};
use std::collections::BTreeSet;
use std::sync::Arc;

/// How deleted records are advertised through Identify, derived
/// structurally from the repository's tombstone-retention flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedRecordPolicy {
    /// Files and index entries are physically removed on deletion.
    No,
    /// Deletions are marked in place and survive until the index is
    /// rebuilt.
    Transient,
}

impl DeletedRecordPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletedRecordPolicy::No => "no",
            DeletedRecordPolicy::Transient => "transient",
        }
    }
}

/// One entry of a ListSets response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OaiSetListing {
    pub set_spec: String,
    pub name: String,
    pub description: String,
    pub url: String,
}

/// One entry of a ListMetadataFormats response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFormatListing {
    pub prefix: String,
    pub namespace: String,
    pub schema: String,
}

impl RepositoryManager {
    // ── Standing predicates ─────────────────────────────────────────────

    /// Records whose status admits discovery: the one accepted accession
    /// status, and not an error placeholder. Independent of set
    /// membership.
    pub fn discoverable_status_query(&self) -> Query {
        let mut cache = self.oai_cache.lock();
        if cache.discoverable_status.is_none() {
            cache.discoverable_status = Some(Query::Boolean {
                clauses: vec![
                    (Occur::Must, Query::term(fields::ALL_RECORDS, "true")),
                    (
                        Occur::Must,
                        Query::term(fields::ACCESSION_STATUS, STATUS_ACCESSIONED),
                    ),
                    (Occur::MustNot, Query::term(fields::DOC_TYPE, DOCTYPE_ERRORDOC)),
                ],
            });
        }
        cache.discoverable_status.clone().unwrap()
    }

    /// Records discoverable in legacy discovery mode: status plus the
    /// enabled-sets restriction. An empty enabled-set disjunction means no
    /// restriction.
    pub fn discoverable_records_query(&self) -> Query {
        let status = self.discoverable_status_query();
        match self.sets.enabled_sets_query() {
            Some(enabled) => status.and(enabled),
            None => status,
        }
    }

    /// Records accessible for OAI harvesting, including enabled deletion
    /// tombstones: status with documents from disabled sets subtracted.
    pub fn discoverable_oai_records_query(&self) -> Query {
        let stamp = self.sets.status_stamp();
        {
            let cache = self.oai_cache.lock();
            if let Some((cached_stamp, query)) = &cache.oai_discoverable {
                if *cached_stamp == stamp {
                    return query.clone();
                }
            }
        }

        let mut query = self.discoverable_status_query();
        if let Some(disabled) = self.sets.disabled_sets_query() {
            query = query.and_not(disabled);
        }
        self.oai_cache.lock().oai_discoverable = Some((stamp, query.clone()));
        query
    }

    /// Formats that can be disseminated as the requested format through
    /// the conversion closure, or `None` when nothing can, in which case
    /// the request matches no records.
    pub fn convertible_formats_query(&self, to_format: Option<&str>) -> Option<Query> {
        let to_format = to_format?;
        let conversions = self.conversions.read();
        let indexed = self.indexed_formats();
        let convertible = conversions
            .formats_convertible_to(to_format, indexed.iter().map(String::as_str));
        if convertible.is_empty() {
            return None;
        }
        Some(Query::any_of(
            convertible
                .iter()
                .map(|f| Query::term(fields::XML_FORMAT, f.as_str()))
                .collect(),
        ))
    }

    pub fn formats_convertible_to(&self, to_format: &str) -> Vec<String> {
        let conversions = self.conversions.read();
        let indexed = self.indexed_formats();
        conversions.formats_convertible_to(to_format, indexed.iter().map(String::as_str))
    }

    pub fn can_disseminate_format(&self, format: &str) -> bool {
        !self.formats_convertible_to(format).is_empty()
    }

    /// Build the search-time date filter for an OAI request.
    ///
    /// A granularity mismatch between `from` and `until` is rejected
    /// before any query is constructed. Equal bounds nudge the upper bound
    /// forward one granularity unit so an exact-match query still returns
    /// results.
    pub fn oai_date_range(
        &self,
        from: Option<&str>,
        until: Option<&str>,
    ) -> std::result::Result<Option<DateRange>, OAIError> {
        let granularity = self.admin.granularity();
        match (from, until) {
            (None, None) => Ok(None),
            (Some(f), None) => Ok(Some(DateRange::after(parse_datestamp(f, granularity)?))),
            (None, Some(u)) => Ok(Some(DateRange::before(parse_datestamp(u, granularity)?))),
            (Some(f), Some(u)) => {
                if f.len() != u.len() {
                    return Err(OAIError::bad_argument(
                        "Invalid date: 'from' and 'until' date arguments must be of the same granularity.",
                    ));
                }
                let from_dt = parse_datestamp(f, granularity)?;
                let mut until_dt = parse_datestamp(u, granularity)?;
                if f.eq_ignore_ascii_case(u) {
                    until_dt += if f.len() == 10 {
                        Duration::days(1)
                    } else {
                        Duration::seconds(1)
                    };
                }
                Ok(Some(DateRange::new(Some(from_dt), Some(until_dt))))
            }
        }
    }

    // ── Query composition ───────────────────────────────────────────────

    /// Results for a standard OAI-PMH ListRecords / ListIdentifiers
    /// request.
    pub fn oai_query_results(
        &self,
        format: &str,
        set: Option<&str>,
        from: Option<&str>,
        until: Option<&str>,
    ) -> std::result::Result<Vec<Arc<Document>>, OAIError> {
        self.odl_query_results(format, set, from, until, None)
    }

    /// Results for an OAI-PMH request or an ODL search. A `query_string`
    /// indicates ODL search; `"*"` is sugar for all non-deleted records,
    /// and its absence selects the standard OAI corpus with deletion
    /// tombstones boosted to the bottom rather than excluded.
    pub fn odl_query_results(
        &self,
        format: &str,
        set: Option<&str>,
        from: Option<&str>,
        until: Option<&str>,
        query_string: Option<&str>,
    ) -> std::result::Result<Vec<Arc<Document>>, OAIError> {
        let base = match query_string {
            None => {
                if !self.admin.is_provider_enabled() {
                    return Ok(Vec::new());
                }
                Query::any_of(vec![
                    Query::term(fields::DELETED, "false").boost(10.0),
                    Query::term(fields::DELETED, "true"),
                ])
            }
            Some(q) if q.trim().is_empty() => return Ok(Vec::new()),
            Some(q) if q.trim() == "*" => Query::term(fields::DELETED, "false"),
            Some(q) => parse_query(q)
                .map_err(|e| OAIError::bad_argument(e.to_string()))?
                .and(Query::term(fields::DELETED, "false")),
        };

        let Some(convertible) = self.convertible_formats_query(Some(format)) else {
            return Ok(Vec::new());
        };

        let range = self.oai_date_range(from, until)?;

        let mut full = self.apply_boosting(base.and(convertible));
        full = full.and(self.discoverable_oai_records_query());

        if let Some(set_spec) = set {
            // An unknown set matches nothing.
            let Some(set_query) = self.oai_set_query(set_spec) else {
                return Ok(Vec::new());
            };
            full = full.and(set_query);
        }

        if let Some(filter) = self.oai_filter.read().clone() {
            full = full.and_not(filter);
        }

        Ok(self.index.search(&full, range.as_ref()))
    }

    /// A single record restricted to the OAI-discoverable corpus.
    pub fn get_record_oai(&self, id: &str) -> Option<Arc<Document>> {
        if id.trim().is_empty() {
            return None;
        }
        let mut query = Query::term(fields::ID, id).and(self.discoverable_records_query());
        if let Some(filter) = self.oai_filter.read().clone() {
            query = query.and_not(filter);
        }
        self.index.search(&query, None).into_iter().next()
    }

    /// Set (or clear) the administrator block-list filter. Records
    /// matching the filter are never served by the OAI surface.
    pub fn set_oai_filter_query(
        &self,
        query: Option<&str>,
    ) -> std::result::Result<(), crate::error::RepositoryError> {
        let parsed = match query {
            None => None,
            Some(q) => Some(parse_query(q)?),
        };
        *self.oai_filter.write() = parsed;
        Ok(())
    }

    // Layer administrator-configured boosting over a query. The boost
    // alternatives match every record, so they shape ordering without
    // narrowing the result set.
    fn apply_boosting(&self, query: Query) -> Query {
        let drc = self.admin.drc_boost_factor() as f32;
        let multi = self.admin.multi_doc_boost_factor() as f32;
        Query::Boolean {
            clauses: vec![
                (Occur::Must, query),
                (
                    Occur::Should,
                    Query::term(fields::PART_OF_DRC, "true").boost(drc),
                ),
                (
                    Occur::Should,
                    Query::term(fields::MULTIRECORD, "true").boost(multi),
                ),
            ],
        }
    }

    // ── Identify-equivalent accessors ───────────────────────────────────

    pub fn repository_name(&self) -> String {
        self.admin.repository_name()
    }

    pub fn set_repository_name(&self, name: &str) {
        self.admin.set(keys::REPOSITORY_NAME, name);
    }

    pub fn repository_identifier(&self) -> String {
        self.admin.repository_identifier()
    }

    pub fn set_repository_identifier(&self, identifier: &str) {
        self.admin.set(keys::REPOSITORY_IDENTIFIER, identifier);
    }

    pub fn protocol_version(&self) -> String {
        self.admin.protocol_version()
    }

    pub fn granularity(&self) -> Granularity {
        self.admin.granularity()
    }

    pub fn deleted_record_policy(&self) -> DeletedRecordPolicy {
        if self.keep_deletion_tombstones {
            DeletedRecordPolicy::Transient
        } else {
            DeletedRecordPolicy::No
        }
    }

    /// The earliest record datestamp in the repository, formatted at the
    /// configured granularity. Falls back to the current time for an
    /// empty repository.
    pub fn earliest_datestamp(&self) -> String {
        let earliest = self.index.earliest_datestamp().unwrap_or_else(Utc::now);
        match self.admin.granularity() {
            Granularity::Day => earliest.format("%Y-%m-%d").to_string(),
            Granularity::Second => earliest.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }

    /// ListSets-equivalent listing from the set-definition table.
    pub fn list_sets(&self) -> Vec<OaiSetListing> {
        self.mapper
            .read()
            .definitions()
            .iter()
            .map(|d| OaiSetListing {
                set_spec: d.set_spec.clone(),
                name: d.name.clone(),
                description: d.description.clone(),
                url: d.url.clone(),
            })
            .collect()
    }

    /// ListMetadataFormats-equivalent listing: for a record id, the
    /// formats its native format converts to; without an id, every format
    /// reachable from any indexed format.
    pub fn list_metadata_formats(&self, id: Option<&str>) -> Vec<MetadataFormatListing> {
        let conversions = self.conversions.read();
        let prefixes: Vec<String> = match id {
            Some(id) => match self.get_record(id) {
                None => return Vec::new(),
                Some(doc) => {
                    let native = doc.first(fields::XML_FORMAT).unwrap_or_default();
                    conversions.formats_convertible_from(native)
                }
            },
            None => {
                let mut all = BTreeSet::new();
                for native in self.indexed_formats() {
                    for format in conversions.formats_convertible_from(&native) {
                        all.insert(format);
                    }
                }
                all.into_iter().collect()
            }
        };

        prefixes
            .into_iter()
            .map(|prefix| MetadataFormatListing {
                namespace: self.admin.metadata_namespace(&prefix).unwrap_or_default(),
                schema: self.admin.metadata_schema(&prefix).unwrap_or_default(),
                prefix,
            })
            .collect()
    }

    // ── Discoverable counts ─────────────────────────────────────────────

    /// The number of indexed resources currently discoverable, recomputed
    /// only when the index version or the set-status stamp moves.
    pub fn num_discoverable_resources(&self) -> usize {
        let index_mod = self.index.last_modified_count();
        let sets_stamp = self.sets.status_stamp();

        {
            let counts = self.discoverable_counts.lock();
            if counts.valid && counts.index_mod == index_mod && counts.sets_stamp == sets_stamp {
                return counts.num_discoverable;
            }
        }

        let query = self.discoverable_records_query();
        let num = self.index.search(&query, None).len();

        let mut counts = self.discoverable_counts.lock();
        counts.index_mod = index_mod;
        counts.sets_stamp = sets_stamp;
        counts.num_discoverable = num;
        counts.valid = true;
        num
    }
}

// Parse an OAI datestamp at the given repository granularity. Day
// datestamps are always accepted; second datestamps are rejected when the
// repository only supports day granularity.
fn parse_datestamp(
    s: &str,
    granularity: Granularity,
) -> std::result::Result<DateTime<Utc>, OAIError> {
    match s.len() {
        10 => {
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
                OAIError::bad_argument(format!(
                    "Unable to parse date argument '{}'. Dates must be of the form 'YYYY-MM-DD' or '{}'. {}",
                    s,
                    Granularity::Second.as_str(),
                    e
                ))
            })?;
            Ok(date.and_time(NaiveTime::MIN).and_utc())
        }
        20 => {
            if granularity == Granularity::Day {
                return Err(OAIError::bad_argument(format!(
                    "Date argument '{}' is finer than the supported granularity '{}'",
                    s,
                    granularity.as_str()
                )));
            }
            let dt = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ").map_err(|e| {
                OAIError::bad_argument(format!("Unable to parse date argument '{}'. {}", s, e))
            })?;
            Ok(dt.and_utc())
        }
        _ => Err(OAIError::bad_argument(format!(
            "Unable to parse date argument '{}'. Dates must be of the form '{}' or '{}'",
            s,
            Granularity::Day.as_str(),
            Granularity::Second.as_str()
        ))),
    }
}
