//! Boolean query model and search-time date filter.
//!
//! Queries are plain values: the repository core builds them, caches them,
//! and hands them to a [`crate::DocumentIndex`] for evaluation. A clause is
//! one of term match, phrase match, match-all, a boost wrapper, or a nested
//! boolean group of `(Occur, Query)` clauses.
//!
//! Scoring is additive: every matched clause contributes `1.0`, scaled by
//! any enclosing [`Query::Boost`]. That is enough to honor the repository's
//! one scoring contract, boosted `Should` alternatives ordering results (for
//! example deletion tombstones sinking below live records), without
//! reimplementing a ranking function.

use crate::document::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Clause occurrence within a boolean group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Occur {
    Must,
    Should,
    MustNot,
}

/// A boolean query over document fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    /// Matches every document.
    MatchAll,
    /// Matches documents whose field holds the value, either as a whole
    /// value or as a whitespace token (both case-insensitive).
    Term { field: String, value: String },
    /// Matches documents whose field contains the phrase as a contiguous,
    /// whitespace-normalized substring (case-insensitive).
    Phrase { field: String, phrase: String },
    /// Scales the score of the inner query.
    Boost { query: Box<Query>, factor: f32 },
    /// Boolean group of clauses.
    Boolean { clauses: Vec<(Occur, Query)> },
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn phrase(field: impl Into<String>, phrase: impl Into<String>) -> Self {
        Query::Phrase {
            field: field.into(),
            phrase: phrase.into(),
        }
    }

    pub fn boost(self, factor: f32) -> Self {
        Query::Boost {
            query: Box::new(self),
            factor,
        }
    }

    /// OR of the given queries. Empty input yields a group that matches
    /// nothing (an empty disjunction).
    pub fn any_of(queries: Vec<Query>) -> Self {
        Query::Boolean {
            clauses: queries.into_iter().map(|q| (Occur::Should, q)).collect(),
        }
    }

    /// AND of the given queries.
    pub fn all_of(queries: Vec<Query>) -> Self {
        Query::Boolean {
            clauses: queries.into_iter().map(|q| (Occur::Must, q)).collect(),
        }
    }

    /// `self AND other`.
    pub fn and(self, other: Query) -> Self {
        match self {
            Query::Boolean { mut clauses }
                if clauses.iter().all(|(o, _)| *o != Occur::Should) =>
            {
                clauses.push((Occur::Must, other));
                Query::Boolean { clauses }
            }
            q => Query::Boolean {
                clauses: vec![(Occur::Must, q), (Occur::Must, other)],
            },
        }
    }

    /// `self AND NOT other`.
    pub fn and_not(self, other: Query) -> Self {
        match self {
            Query::Boolean { mut clauses }
                if clauses.iter().all(|(o, _)| *o != Occur::Should) =>
            {
                clauses.push((Occur::MustNot, other));
                Query::Boolean { clauses }
            }
            q => Query::Boolean {
                clauses: vec![(Occur::Must, q), (Occur::MustNot, other)],
            },
        }
    }

    /// Score the document against this query, or `None` if it does not
    /// match.
    pub fn score(&self, doc: &Document) -> Option<f32> {
        match self {
            Query::MatchAll => Some(1.0),
            Query::Term { field, value } => term_matches(doc, field, value).then_some(1.0),
            Query::Phrase { field, phrase } => phrase_matches(doc, field, phrase).then_some(1.0),
            Query::Boost { query, factor } => query.score(doc).map(|s| s * factor),
            Query::Boolean { clauses } => {
                let mut score = 0.0f32;
                let mut must_seen = false;
                let mut should_seen = false;
                let mut should_matched = false;

                for (occur, clause) in clauses {
                    match occur {
                        Occur::Must => {
                            must_seen = true;
                            score += clause.score(doc)?;
                        }
                        Occur::Should => {
                            should_seen = true;
                            if let Some(s) = clause.score(doc) {
                                should_matched = true;
                                score += s;
                            }
                        }
                        Occur::MustNot => {
                            if clause.score(doc).is_some() {
                                return None;
                            }
                        }
                    }
                }

                // A pure-Should group needs at least one match; a group with
                // no positive clauses at all matches nothing.
                if should_seen && !should_matched && !must_seen {
                    return None;
                }
                if !must_seen && !should_seen {
                    return None;
                }
                Some(score)
            }
        }
    }

    /// Whether the document matches this query.
    pub fn matches(&self, doc: &Document) -> bool {
        self.score(doc).is_some()
    }
}

fn term_matches(doc: &Document, field: &str, value: &str) -> bool {
    let needle = value.to_lowercase();
    doc.values(field).iter().any(|v| {
        let hay = v.to_lowercase();
        hay == needle || hay.split_whitespace().any(|tok| tok == needle)
    })
}

fn phrase_matches(doc: &Document, field: &str, phrase: &str) -> bool {
    let needle = normalize_ws(&phrase.to_lowercase());
    if needle.is_empty() {
        return false;
    }
    doc.values(field)
        .iter()
        .any(|v| normalize_ws(&v.to_lowercase()).contains(&needle))
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Search-time date filter over the document datestamp.
///
/// Both bounds are inclusive. The filter is applied by the index at search
/// time and is never folded into the boolean query itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self { from, until }
    }

    pub fn after(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            until: None,
        }
    }

    pub fn before(until: DateTime<Utc>) -> Self {
        Self {
            from: None,
            until: Some(until),
        }
    }

    pub fn contains(&self, datestamp: DateTime<Utc>) -> bool {
        if let Some(from) = self.from {
            if datestamp < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if datestamp > until {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc() -> Document {
        let mut d = Document::new("/data/adn/dcc/rec-1.xml");
        d.set_field("id", "rec-1")
            .set_field("collection", "dcc")
            .set_field("deleted", "false")
            .set_field("default", "Ocean circulation and climate records");
        d
    }

    #[test]
    fn test_term_whole_value() {
        let q = Query::term("collection", "dcc");
        assert!(q.matches(&doc()));
        assert!(!Query::term("collection", "comet").matches(&doc()));
    }

    #[test]
    fn test_term_tokenized() {
        assert!(Query::term("default", "climate").matches(&doc()));
        assert!(Query::term("default", "CLIMATE").matches(&doc()));
        assert!(!Query::term("default", "clim").matches(&doc()));
    }

    #[test]
    fn test_phrase() {
        assert!(Query::phrase("default", "circulation and climate").matches(&doc()));
        assert!(!Query::phrase("default", "climate circulation").matches(&doc()));
    }

    #[test]
    fn test_match_all() {
        assert!(Query::MatchAll.matches(&doc()));
    }

    #[test]
    fn test_boolean_must_and_not() {
        let q = Query::term("collection", "dcc").and_not(Query::term("deleted", "true"));
        assert!(q.matches(&doc()));

        let q = Query::term("collection", "dcc").and_not(Query::term("deleted", "false"));
        assert!(!q.matches(&doc()));
    }

    #[test]
    fn test_empty_disjunction_matches_nothing() {
        let q = Query::any_of(vec![]);
        assert!(!q.matches(&doc()));
    }

    #[test]
    fn test_should_requires_one_match() {
        let q = Query::any_of(vec![
            Query::term("collection", "comet"),
            Query::term("collection", "dcc"),
        ]);
        assert!(q.matches(&doc()));

        let q = Query::any_of(vec![
            Query::term("collection", "comet"),
            Query::term("collection", "dwel"),
        ]);
        assert!(!q.matches(&doc()));
    }

    #[test]
    fn test_boost_orders_scores() {
        // deleted:false^10 OR deleted:true: live records outrank tombstones
        let q = Query::any_of(vec![
            Query::term("deleted", "false").boost(10.0),
            Query::term("deleted", "true"),
        ]);

        let live = doc();
        let mut tombstone = doc();
        tombstone.set_field("deleted", "true");

        let live_score = q.score(&live).unwrap();
        let tomb_score = q.score(&tombstone).unwrap();
        assert!(live_score > tomb_score);
    }

    #[test]
    fn test_date_range_inclusive() {
        let from = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap();
        let range = DateRange::new(Some(from), Some(until));

        assert!(range.contains(from));
        assert!(range.contains(until));
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 1, 4, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 1).unwrap()));
    }
}
