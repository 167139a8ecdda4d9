//! Compiles declarative set definitions into index predicates.
//!
//! The mapper owns the setSpec → compiled [`Query`] table. It is rebuilt
//! wholesale whenever the ListSets config document is reloaded; compiled
//! queries are cached here per setSpec and never patched incrementally.

use crate::error::Result;
use crate::query_parser::parse_query;
use crate::rules::{RuleClause, SetDefinition};
use metarepo_index::Query;
use std::collections::HashMap;

/// Compiled set-membership predicates, keyed by setSpec.
#[derive(Default)]
pub struct SetQueryMapper {
    definitions: Vec<SetDefinition>,
    queries: HashMap<String, Query>,
}

impl SetQueryMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mapper from definitions, compiling every rule. A definition
    /// whose raw sub-query fails to parse fails the whole rebuild: a bad
    /// config document is a configuration error, not a partial load.
    pub fn rebuild(definitions: Vec<SetDefinition>) -> Result<Self> {
        let mut queries = HashMap::with_capacity(definitions.len());
        for def in &definitions {
            queries.insert(def.set_spec.clone(), compile_definition(def)?);
        }
        Ok(Self {
            definitions,
            queries,
        })
    }

    /// The compiled membership predicate for a set, if configured.
    pub fn query_for(&self, set_spec: &str) -> Option<&Query> {
        self.queries.get(set_spec)
    }

    pub fn is_configured(&self, set_spec: &str) -> bool {
        self.queries.contains_key(set_spec)
    }

    pub fn num_configured(&self) -> usize {
        self.queries.len()
    }

    /// Set specs in definition order.
    pub fn set_specs(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.set_spec.as_str()).collect()
    }

    pub fn definition(&self, set_spec: &str) -> Option<&SetDefinition> {
        self.definitions.iter().find(|d| d.set_spec == set_spec)
    }

    pub fn definitions(&self) -> &[SetDefinition] {
        &self.definitions
    }
}

/// Compile one definition: OR-group of include clauses (a synthesized
/// catch-all when there are none, so exclude-only sets are not vacuously
/// empty), then each exclude clause as a top-level AND-NOT.
fn compile_definition(def: &SetDefinition) -> Result<Query> {
    let includes: Vec<Query> = if def.include.is_empty() {
        vec![Query::term("allrecords", "true")]
    } else {
        def.include
            .iter()
            .map(compile_clause)
            .collect::<Result<_>>()?
    };

    let mut query = Query::any_of(includes);
    for clause in &def.exclude {
        query = query.and_not(compile_clause(clause)?);
    }
    Ok(query)
}

fn compile_clause(clause: &RuleClause) -> Result<Query> {
    Ok(match clause {
        RuleClause::Term(t) => Query::term("default", t),
        RuleClause::Phrase(p) => Query::phrase("default", p),
        RuleClause::Format(f) => Query::term("xmlformat", f),
        RuleClause::Directory(d) => Query::term("docdir", d),
        RuleClause::RawQuery(q) => parse_query(q)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use metarepo_index::Document;

    fn doc(collection: &str, format: &str, text: &str) -> Document {
        let mut d = Document::new(format!("/data/{}/{}.xml", format, collection));
        d.set_field("collection", collection)
            .set_field("xmlformat", format)
            .set_field("docdir", format!("/data/{}/{}", format, collection))
            .set_field("allrecords", "true")
            .set_field("default", text);
        d
    }

    #[test]
    fn test_include_term_compilation() {
        let def = SetDefinition::new("ocean", "Ocean").include_terms("ocean");
        let mapper = SetQueryMapper::rebuild(vec![def]).unwrap();
        let q = mapper.query_for("ocean").unwrap();

        assert!(q.matches(&doc("dcc", "adn", "deep ocean trench")));
        assert!(!q.matches(&doc("dcc", "adn", "mountain pass")));
    }

    #[test]
    fn test_format_and_directory_clauses() {
        let def = SetDefinition {
            set_spec: "adnsets".to_string(),
            name: "ADN".to_string(),
            include: vec![
                RuleClause::Format("adn".to_string()),
                RuleClause::Directory("/data/oai_dc/special".to_string()),
            ],
            ..Default::default()
        };
        let mapper = SetQueryMapper::rebuild(vec![def]).unwrap();
        let q = mapper.query_for("adnsets").unwrap();

        assert!(q.matches(&doc("dcc", "adn", "")));
        let mut special = doc("x", "oai_dc", "");
        special.set_field("docdir", "/data/oai_dc/special");
        assert!(q.matches(&special));
        assert!(!q.matches(&doc("dcc", "oai_dc", "")));
    }

    #[test]
    fn test_exclude_only_gets_catch_all() {
        // Zero include clauses + one exclude clause: matches every record
        // except those matching the exclusion.
        let def = SetDefinition {
            set_spec: "notdrafts".to_string(),
            name: "Not Drafts".to_string(),
            exclude: vec![RuleClause::Term("draft".to_string())],
            ..Default::default()
        };
        let mapper = SetQueryMapper::rebuild(vec![def]).unwrap();
        let q = mapper.query_for("notdrafts").unwrap();

        assert!(q.matches(&doc("dcc", "adn", "published record")));
        assert!(!q.matches(&doc("dcc", "adn", "draft record")));
    }

    #[test]
    fn test_raw_query_clause() {
        let def = SetDefinition {
            set_spec: "dcconly".to_string(),
            name: "DCC".to_string(),
            include: vec![RuleClause::RawQuery("collection:dcc".to_string())],
            ..Default::default()
        };
        let mapper = SetQueryMapper::rebuild(vec![def]).unwrap();
        let q = mapper.query_for("dcconly").unwrap();

        assert!(q.matches(&doc("dcc", "adn", "")));
        assert!(!q.matches(&doc("comet", "adn", "")));
    }

    #[test]
    fn test_bad_raw_query_fails_rebuild() {
        let def = SetDefinition {
            set_spec: "broken".to_string(),
            name: "Broken".to_string(),
            include: vec![RuleClause::RawQuery("(unbalanced".to_string())],
            ..Default::default()
        };
        assert!(SetQueryMapper::rebuild(vec![def]).is_err());
    }

    #[test]
    fn test_rebuild_replaces_table() {
        let mapper =
            SetQueryMapper::rebuild(vec![SetDefinition::new("a", "A")]).unwrap();
        assert!(mapper.is_configured("a"));

        let mapper = SetQueryMapper::rebuild(vec![SetDefinition::new("b", "B")]).unwrap();
        assert!(!mapper.is_configured("a"));
        assert!(mapper.is_configured("b"));
        assert_eq!(mapper.num_configured(), 1);
        assert_eq!(mapper.set_specs(), ["b"]);
    }
}
