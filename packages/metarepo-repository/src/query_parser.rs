//! Parser for raw sub-queries used in set definitions and ODL searches.
//!
//! Supports the small query language the repository exposes:
//! `field:value`, `field:"a phrase"`, bare terms against the `default`
//! field, `AND` / `OR` / `NOT` with conventional precedence (NOT > AND >
//! OR), parentheses, and `*` for match-all. Adjacent clauses combine with
//! AND, matching the index's default operator.

use crate::error::RepositoryError;
use metarepo_index::{Occur, Query};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Star,
    /// `field:term`, `field:"phrase"`, `term` or `"phrase"`
    Clause {
        field: Option<String>,
        text: String,
        phrase: bool,
    },
}

/// Parse a raw query string into a boolean [`Query`].
pub fn parse_query(input: &str) -> Result<Query, RepositoryError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(RepositoryError::QueryParse("empty query".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let query = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(RepositoryError::QueryParse(format!(
            "unexpected trailing input in query '{}'",
            input
        )));
    }
    Ok(query)
}

fn tokenize(input: &str) -> Result<Vec<Token>, RepositoryError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let text = read_quoted(&mut chars, input)?;
                tokens.push(Token::Clause {
                    field: None,
                    text,
                    phrase: true,
                });
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }

                // field:"phrase": the quote opens right after the colon
                if word.ends_with(':') && chars.peek() == Some(&'"') {
                    chars.next();
                    let text = read_quoted(&mut chars, input)?;
                    let field = word[..word.len() - 1].to_string();
                    tokens.push(Token::Clause {
                        field: Some(field),
                        text,
                        phrase: true,
                    });
                    continue;
                }

                match word.as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "NOT" | "!" => tokens.push(Token::Not),
                    "*" => tokens.push(Token::Star),
                    _ => {
                        let (field, text) = match word.split_once(':') {
                            Some((f, t)) if !f.is_empty() && !t.is_empty() => {
                                (Some(f.to_string()), t.to_string())
                            }
                            _ => (None, word.clone()),
                        };
                        if text.is_empty() {
                            return Err(RepositoryError::QueryParse(format!(
                                "empty clause in query '{}'",
                                input
                            )));
                        }
                        tokens.push(Token::Clause {
                            field,
                            text,
                            phrase: false,
                        });
                    }
                }
            }
        }
    }
    Ok(tokens)
}

fn read_quoted(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    input: &str,
) -> Result<String, RepositoryError> {
    let mut text = String::new();
    for c in chars.by_ref() {
        if c == '"' {
            return Ok(text);
        }
        text.push(c);
    }
    Err(RepositoryError::QueryParse(format!(
        "unterminated phrase in query '{}'",
        input
    )))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn parse_or(&mut self) -> Result<Query, RepositoryError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            terms.push(self.parse_and()?);
        }
        if terms.len() == 1 {
            Ok(terms.pop().unwrap())
        } else {
            Ok(Query::any_of(terms))
        }
    }

    fn parse_and(&mut self) -> Result<Query, RepositoryError> {
        let mut clauses = vec![(Occur::Must, self.parse_unary()?)];
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.next();
                    clauses.push((Occur::Must, self.parse_unary()?));
                }
                // Implicit AND on adjacency
                Some(Token::LParen) | Some(Token::Star) | Some(Token::Clause { .. }) => {
                    clauses.push((Occur::Must, self.parse_unary()?));
                }
                Some(Token::Not) => {
                    self.next();
                    let negated = self.parse_unary()?;
                    clauses.push((Occur::MustNot, negated));
                }
                _ => break,
            }
        }
        if clauses.len() == 1 {
            Ok(clauses.pop().unwrap().1)
        } else {
            // A group of only MustNot clauses needs a positive anchor.
            if clauses.iter().all(|(o, _)| *o == Occur::MustNot) {
                clauses.insert(0, (Occur::Must, Query::MatchAll));
            }
            Ok(Query::Boolean { clauses })
        }
    }

    fn parse_unary(&mut self) -> Result<Query, RepositoryError> {
        match self.next() {
            Some(Token::Not) => {
                let inner = self.parse_unary()?;
                Ok(Query::Boolean {
                    clauses: vec![(Occur::Must, Query::MatchAll), (Occur::MustNot, inner)],
                })
            }
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(RepositoryError::QueryParse(
                        "unbalanced parentheses".to_string(),
                    )),
                }
            }
            Some(Token::Star) => Ok(Query::MatchAll),
            Some(Token::Clause {
                field,
                text,
                phrase,
            }) => {
                let field = field.unwrap_or_else(|| "default".to_string());
                if phrase {
                    Ok(Query::phrase(field, text))
                } else {
                    Ok(Query::term(field, text))
                }
            }
            other => Err(RepositoryError::QueryParse(format!(
                "unexpected token: {:?}",
                other
            ))),
        }
    }
}
