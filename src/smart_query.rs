//! Smart Query - question in, result table out
//!
//! One request walks a fixed state machine:
//!
//! ```text
//! Idle -> Synthesizing -> Extracting -> Repairing -> Executing -> {ResultReady | FailedEmpty}
//! ```
//!
//! Nothing is carried from one request to the next. Each call to
//! [`SmartQuery::ask`] starts again at `Idle` and gets its own engine session.

use crate::config::SmartQueryConfig;
use crate::execution::executor::QueryExecutor;
use crate::execution::result::{FailureKind, QueryFailure, QueryOutcome};
use crate::llm::{GeneratorPool, ModelVariant, TextGenerator};
use crate::repair::{QueryRepairer, Substitution};
use crate::schema::SchemaDescriptor;
use crate::synthesizer::{extract_sql, QuerySynthesizer};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Shown to the user whenever a question yields no rows
pub const EMPTY_RESULT_MESSAGE: &str =
    "No results found or the question was too ambiguous. Try a different query.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Idle,
    Synthesizing,
    Extracting,
    Repairing,
    Executing,
    ResultReady,
    FailedEmpty,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryState::ResultReady | QueryState::FailedEmpty)
    }
}

/// Everything one request produced
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub request_id: Uuid,
    /// Question as sent to the service (trimmed, possibly truncated)
    pub question: String,
    pub raw_response: Option<String>,
    pub candidate_sql: Option<String>,
    pub repaired_sql: Option<String>,
    pub substitutions: Vec<Substitution>,
    pub transitions: Vec<QueryState>,
    pub outcome: QueryOutcome,
}

impl QueryResponse {
    pub fn state(&self) -> QueryState {
        self.transitions.last().copied().unwrap_or(QueryState::Idle)
    }

    /// `None` when there are rows to show
    pub fn display_message(&self) -> Option<&'static str> {
        if self.outcome.is_empty() {
            Some(EMPTY_RESULT_MESSAGE)
        } else {
            None
        }
    }
}

pub struct SmartQuery {
    synthesizer: QuerySynthesizer,
    executor: QueryExecutor,
    max_question_chars: usize,
}

impl SmartQuery {
    pub fn new(config: &SmartQueryConfig, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            synthesizer: QuerySynthesizer::new(generator, config.generation_timeout)
                .with_variant(ModelVariant::Default),
            executor: QueryExecutor::new(
                QueryRepairer::new(config.similarity_threshold),
                config.execution_timeout,
            ),
            max_question_chars: config.max_question_chars,
        }
    }

    /// Pipeline backed by a pool of live clients built from `config`.
    pub fn from_config(config: &SmartQueryConfig) -> Self {
        Self::new(config, Arc::new(GeneratorPool::from_config(&config.llm)))
    }

    pub async fn ask(
        &self,
        question: &str,
        dataset: &DataFrame,
        schema: &SchemaDescriptor,
    ) -> QueryResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("smart_query", request_id = %request_id);
        self.run(request_id, question, dataset, schema)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        request_id: Uuid,
        question: &str,
        dataset: &DataFrame,
        schema: &SchemaDescriptor,
    ) -> QueryResponse {
        let question = truncate_chars(question.trim(), self.max_question_chars);
        let mut response = QueryResponse {
            request_id,
            question: question.to_string(),
            raw_response: None,
            candidate_sql: None,
            repaired_sql: None,
            substitutions: Vec::new(),
            transitions: vec![QueryState::Idle],
            outcome: QueryOutcome::Failure(QueryFailure::new(
                FailureKind::InvalidInput,
                "no question was asked",
            )),
        };

        if question.is_empty() {
            warn!("rejecting blank question");
            response.transitions.push(QueryState::FailedEmpty);
            return response;
        }
        info!("question: {}", question);

        response.transitions.push(QueryState::Synthesizing);
        let raw = self.synthesizer.synthesize(question, schema).await;

        response.transitions.push(QueryState::Extracting);
        let candidate = extract_sql(&raw);
        info!("candidate query: {}", candidate);

        response.transitions.push(QueryState::Repairing);
        let report = self
            .executor
            .repairer()
            .repair_with_report(&candidate, schema);
        if report.changed() {
            info!("repaired query: {}", report.query);
        }

        response.transitions.push(QueryState::Executing);
        let outcome = self
            .executor
            .execute_repaired(dataset, report.query.clone())
            .await;

        let terminal = match &outcome {
            QueryOutcome::Success(table) => {
                info!("result ready: {} rows", table.row_count());
                QueryState::ResultReady
            }
            QueryOutcome::Failure(failure) => {
                warn!("query failed: {}", failure);
                QueryState::FailedEmpty
            }
        };
        response.transitions.push(terminal);

        response.raw_response = Some(raw);
        response.candidate_sql = Some(candidate);
        response.repaired_sql = Some(report.query);
        response.substitutions = report.substitutions;
        response.outcome = outcome;
        response
    }
}

/// Keep at most `max` characters, cutting on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
