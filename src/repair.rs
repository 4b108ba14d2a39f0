//! Query Validator / Repairer
//!
//! Best-effort textual repair of identifiers in a candidate query. Every
//! identifier-shaped token is checked against the schema: a case-only mismatch
//! is rewritten to the canonical column name, a near-miss spelling is rewritten
//! to the closest column above the similarity threshold, anything else is left
//! for the engine to judge. Rewrites replace whole identifiers only.
//!
//! SQL keywords are tokens too and go through the same lookup. The relation
//! name is the one token never rewritten, since registration and query must
//! agree on it.

use crate::fuzzy_matcher::FuzzyMatcher;
use crate::schema::SchemaDescriptor;
use crate::synthesizer::RELATION_NAME;
use lazy_static::lazy_static;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairReason {
    /// Same column, different letter case
    Case,
    /// Closest column by similarity
    Fuzzy { similarity: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    pub from: String,
    pub to: String,
    pub reason: RepairReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub query: String,
    pub substitutions: Vec<Substitution>,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        !self.substitutions.is_empty()
    }
}

pub struct QueryRepairer {
    matcher: FuzzyMatcher,
}

impl Default for QueryRepairer {
    fn default() -> Self {
        Self {
            matcher: FuzzyMatcher::default(),
        }
    }
}

impl QueryRepairer {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            matcher: FuzzyMatcher::new(similarity_threshold),
        }
    }

    pub fn repair(&self, query: &str, schema: &SchemaDescriptor) -> String {
        self.repair_with_report(query, schema).query
    }

    pub fn repair_with_report(&self, query: &str, schema: &SchemaDescriptor) -> RepairReport {
        let columns = schema.column_names();
        let mut fixed = query.to_string();
        let mut substitutions = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for token in IDENTIFIER.find_iter(query).map(|m| m.as_str()) {
            if !seen.insert(token) || token.eq_ignore_ascii_case(RELATION_NAME) {
                continue;
            }

            let replacement = match schema.canonical_name(token) {
                Some(canonical) if canonical == token => None,
                Some(canonical) => Some((canonical, RepairReason::Case)),
                None => self
                    .matcher
                    .find_best_match(token, columns.iter().copied())
                    .map(|(column, similarity)| (column, RepairReason::Fuzzy { similarity })),
            };

            let Some((column, reason)) = replacement else {
                continue;
            };

            match replace_identifier(&fixed, token, column) {
                Some(rewritten) => {
                    debug!("repair: '{}' -> '{}' ({:?})", token, column, reason);
                    fixed = rewritten;
                    substitutions.push(Substitution {
                        from: token.to_string(),
                        to: column.to_string(),
                        reason,
                    });
                }
                None => warn!("repair: could not build pattern for token '{}'", token),
            }
        }

        RepairReport {
            query: fixed,
            substitutions,
        }
    }
}

/// Repair with the default similarity threshold.
pub fn repair_query(query: &str, schema: &SchemaDescriptor) -> String {
    QueryRepairer::default().repair(query, schema)
}

/// Replace every whole-identifier occurrence of `token` with `column`.
fn replace_identifier(text: &str, token: &str, column: &str) -> Option<String> {
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(token))).ok()?;
    Some(pattern.replace_all(text, NoExpand(column)).into_owned())
}
