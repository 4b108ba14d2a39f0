//! Query Synthesizer
//!
//! Turns a natural-language question plus the schema descriptor into a single
//! candidate SQL statement. The generation service is untrusted: its output
//! may be wrapped in prose or code fences, or may be an error report, so every
//! response goes through [`extract_sql`], which always yields a statement.

use crate::llm::{is_error_response, ModelVariant, TextGenerator, ERROR_PREFIX};
use crate::schema::SchemaDescriptor;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name the dataset is registered under in every query
pub const RELATION_NAME: &str = "dataset";

/// Statement used whenever no usable query can be produced; returns zero rows
pub const FALLBACK_QUERY: &str = "SELECT * FROM dataset WHERE 1=0;";

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?i)```(?:sql)?").unwrap();
    static ref SELECT_KEYWORD: Regex = Regex::new(r"(?i)\bselect\b").unwrap();
}

pub struct QuerySynthesizer {
    generator: Arc<dyn TextGenerator>,
    variant: ModelVariant,
    timeout: Duration,
}

impl QuerySynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self {
            generator,
            variant: ModelVariant::Default,
            timeout,
        }
    }

    pub fn with_variant(mut self, variant: ModelVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Call the generation service and return its raw text.
    ///
    /// Never fails: a timeout is reported as error text like any other
    /// service failure.
    pub async fn synthesize(&self, question: &str, schema: &SchemaDescriptor) -> String {
        let prompt = build_prompt(question, schema);
        debug!(variant = %self.variant, "prompt length {} chars", prompt.len());

        match tokio::time::timeout(self.timeout, self.generator.generate(&prompt, self.variant)).await {
            Ok(raw) => {
                if is_error_response(&raw) {
                    warn!("generation service reported: {}", raw.trim());
                }
                raw
            }
            Err(_) => {
                warn!("generation timed out after {:?}", self.timeout);
                format!("{}generation timed out after {:?}", ERROR_PREFIX, self.timeout)
            }
        }
    }

    /// Synthesize and extract in one step.
    pub async fn generate_sql_query(&self, question: &str, schema: &SchemaDescriptor) -> String {
        let raw = self.synthesize(question, schema).await;
        let sql = extract_sql(&raw);
        info!("candidate query: {}", sql);
        sql
    }
}

/// Instruction payload sent to the generation service.
pub fn build_prompt(question: &str, schema: &SchemaDescriptor) -> String {
    let schema_json = match schema.to_prompt_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("could not serialize schema for prompt: {}", e);
            "{}".to_string()
        }
    };

    format!(
        "You are an SQL generator. Given the dataset schema below and a user query, \
generate ONLY a valid SQL query that extracts a subset from a table named '{relation}'.\n\n\
Dataset Schema (as JSON):\n{schema}\n\n\
User Query:\n{question}\n\n\
IMPORTANT: Output ONLY a single SQL statement without any commentary, explanation or \
markdown code fences. Use the column names EXACTLY as given in the schema. \
If no valid query can be generated, output: {fallback}\n",
        relation = RELATION_NAME,
        schema = schema_json,
        question = question,
        fallback = FALLBACK_QUERY,
    )
}

/// Pull a single `SELECT` statement out of free-form model output.
///
/// Code fences are stripped, the text from the first `SELECT` keyword up to
/// the first `;` (or the end) is kept, and a terminator is appended when
/// missing. Without a `SELECT` the fallback statement is returned.
pub fn extract_sql(raw: &str) -> String {
    let unfenced = CODE_FENCE.replace_all(raw, "");

    let start = match SELECT_KEYWORD.find(&unfenced) {
        Some(m) => m.start(),
        None => return FALLBACK_QUERY.to_string(),
    };

    let tail = &unfenced[start..];
    let statement = match tail.find(';') {
        Some(end) => &tail[..end],
        None => tail,
    };

    let statement = statement.trim();
    format!("{};", statement)
}
