//! Declarative set-definition rules and the ListSets config document.
//!
//! One [`SetDefinition`] per OAI setSpec: an OR of include clauses combined
//! with AND-NOT of exclude clauses. Definitions are pure data: the
//! document is read and rewritten as a whole file, never patched
//! incrementally, and the compiled mapping table is rebuilt wholesale on
//! every reload.

use crate::error::{RepositoryError, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

/// A single include or exclude clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleClause {
    /// Term match against the default search field.
    Term(String),
    /// Phrase match against the default search field.
    Phrase(String),
    /// Native XML format match.
    Format(String),
    /// Source directory match.
    Directory(String),
    /// Free-form sub-query in the repository query language.
    RawQuery(String),
}

/// Declarative definition of one OAI set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetDefinition {
    pub set_spec: String,
    pub name: String,
    pub description: String,
    pub url: String,
    pub include: Vec<RuleClause>,
    pub exclude: Vec<RuleClause>,
}

impl SetDefinition {
    pub fn new(set_spec: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            set_spec: set_spec.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a term-or-phrase include clause; values containing whitespace
    /// become phrase matches.
    pub fn include_terms(mut self, terms: &str) -> Self {
        for t in split_terms(terms) {
            self.include.push(term_or_phrase(&t));
        }
        self
    }

    pub fn exclude_terms(mut self, terms: &str) -> Self {
        for t in split_terms(terms) {
            self.exclude.push(term_or_phrase(&t));
        }
        self
    }
}

fn split_terms(terms: &str) -> Vec<String> {
    terms
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn term_or_phrase(t: &str) -> RuleClause {
    if t.contains(' ') {
        RuleClause::Phrase(t.to_string())
    } else {
        RuleClause::Term(t.to_string())
    }
}

fn clause_tag(clause: &RuleClause) -> (&'static str, &str) {
    match clause {
        RuleClause::Term(v) => ("term", v),
        RuleClause::Phrase(v) => ("phrase", v),
        RuleClause::Format(v) => ("format", v),
        RuleClause::Directory(v) => ("directory", v),
        RuleClause::RawQuery(v) => ("query", v),
    }
}

fn clause_from_tag(tag: &str, value: String) -> Option<RuleClause> {
    match tag {
        "term" => Some(RuleClause::Term(value)),
        "phrase" => Some(RuleClause::Phrase(value)),
        "format" => Some(RuleClause::Format(value)),
        "directory" => Some(RuleClause::Directory(value)),
        "query" => Some(RuleClause::RawQuery(value)),
        _ => None,
    }
}

/// Parse a ListSets config document.
pub fn read_list_sets(xml: &str) -> Result<Vec<SetDefinition>> {
    let mut reader = Reader::from_str(xml);

    let mut defs = Vec::new();
    let mut current: Option<SetDefinition> = None;
    // 0 = none, 1 = include, 2 = exclude
    let mut section = 0u8;
    let mut leaf: Option<String> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "ListSets" => saw_root = true,
                    "set" => current = Some(SetDefinition::default()),
                    "include" => section = 1,
                    "exclude" => section = 2,
                    _ => leaf = Some(name),
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "set" => {
                        if let Some(def) = current.take() {
                            defs.push(def);
                        }
                    }
                    "include" | "exclude" => section = 0,
                    _ => leaf = None,
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(RepositoryError::xml)?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                if let (Some(def), Some(tag)) = (current.as_mut(), leaf.as_deref()) {
                    if section > 0 {
                        if let Some(clause) = clause_from_tag(tag, text) {
                            if section == 1 {
                                def.include.push(clause);
                            } else {
                                def.exclude.push(clause);
                            }
                        }
                    } else {
                        match tag {
                            "setSpec" => def.set_spec = text,
                            "setName" => def.name = text,
                            "description" => def.description = text,
                            "identifier" => def.url = text,
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(RepositoryError::xml(e)),
        }
    }

    if !saw_root {
        return Err(RepositoryError::Xml(
            "Sets config XML is incorrect. Root node is not 'ListSets'".to_string(),
        ));
    }
    Ok(defs)
}

/// Serialize set definitions as a ListSets config document, sorted by set
/// name.
pub fn write_list_sets(defs: &[SetDefinition]) -> Result<String> {
    let mut sorted: Vec<&SetDefinition> = defs.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.set_spec.cmp(&b.set_spec)));

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Start(BytesStart::new("ListSets")))
        .map_err(RepositoryError::xml)?;

    for def in sorted {
        writer
            .write_event(Event::Start(BytesStart::new("set")))
            .map_err(RepositoryError::xml)?;

        write_text_element(&mut writer, "setSpec", &def.set_spec)?;
        write_text_element(&mut writer, "setName", &def.name)?;

        if !def.description.is_empty() || !def.url.is_empty() {
            writer
                .write_event(Event::Start(BytesStart::new("setDescription")))
                .map_err(RepositoryError::xml)?;
            if !def.description.is_empty() {
                write_text_element(&mut writer, "description", &def.description)?;
            }
            if !def.url.is_empty() {
                write_text_element(&mut writer, "identifier", &def.url)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("setDescription")))
                .map_err(RepositoryError::xml)?;
        }

        for (section, clauses) in [("include", &def.include), ("exclude", &def.exclude)] {
            if clauses.is_empty() {
                continue;
            }
            writer
                .write_event(Event::Start(BytesStart::new(section)))
                .map_err(RepositoryError::xml)?;
            for clause in clauses {
                let (tag, value) = clause_tag(clause);
                write_text_element(&mut writer, tag, value)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(section)))
                .map_err(RepositoryError::xml)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("set")))
            .map_err(RepositoryError::xml)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("ListSets")))
        .map_err(RepositoryError::xml)?;

    String::from_utf8(writer.into_inner()).map_err(RepositoryError::xml)
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(RepositoryError::xml)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(RepositoryError::xml)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(RepositoryError::xml)?;
    Ok(())
}
