//! Runtime configuration
//!
//! Everything is read from environment variables (a `.env` file is loaded by
//! the binary before this runs). A missing API key is not an error: the LLM
//! client falls back to its offline dummy mode.

use crate::error::{Result, SmartQueryError};
use crate::llm::ModelVariant;
use std::str::FromStr;
use std::time::Duration;

pub const DUMMY_API_KEY: &str = "dummy-api-key";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Connection settings for the text-generation service
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    /// Model used for `ModelVariant::Default`
    pub model: String,
    /// Model used for `ModelVariant::Fast`
    pub fast_model: String,
    /// Model used for `ModelVariant::DeepReasoning`
    pub deep_model: String,
}

impl LlmConfig {
    pub fn model_for(&self, variant: ModelVariant) -> &str {
        match variant {
            ModelVariant::Default => &self.model,
            ModelVariant::Fast => &self.fast_model,
            ModelVariant::DeepReasoning => &self.deep_model,
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.api_key == DUMMY_API_KEY
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: DUMMY_API_KEY.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "gpt-4".to_string(),
            fast_model: "gpt-4o-mini".to_string(),
            deep_model: "o1".to_string(),
        }
    }
}

/// Top-level configuration for the query pipeline
#[derive(Debug, Clone)]
pub struct SmartQueryConfig {
    pub llm: LlmConfig,
    /// Upper bound on a single generation call
    pub generation_timeout: Duration,
    /// Upper bound on a single query execution
    pub execution_timeout: Duration,
    /// Questions longer than this are truncated before prompting
    pub max_question_chars: usize,
    /// Minimum similarity (0.0-1.0) for a fuzzy column correction
    pub similarity_threshold: f64,
}

impl Default for SmartQueryConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            generation_timeout: Duration::from_secs(30),
            execution_timeout: Duration::from_secs(30),
            max_question_chars: 200,
            similarity_threshold: 0.7,
        }
    }
}

impl SmartQueryConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let model = lookup("OPENAI_MODEL").unwrap_or(defaults.llm.model);
        let llm = LlmConfig {
            api_key: lookup("OPENAI_API_KEY")
                .filter(|k| !k.trim().is_empty())
                .unwrap_or(defaults.llm.api_key),
            base_url: lookup("OPENAI_BASE_URL").unwrap_or(defaults.llm.base_url),
            fast_model: lookup("OPENAI_MODEL_FAST").unwrap_or_else(|| model.clone()),
            deep_model: lookup("OPENAI_MODEL_DEEP").unwrap_or_else(|| model.clone()),
            model,
        };

        let generation_secs: u64 = parse_var(
            &lookup,
            "SMART_QUERY_GENERATION_TIMEOUT_SECS",
            defaults.generation_timeout.as_secs(),
        )?;
        let execution_secs: u64 = parse_var(
            &lookup,
            "SMART_QUERY_EXECUTION_TIMEOUT_SECS",
            defaults.execution_timeout.as_secs(),
        )?;
        let max_question_chars: usize = parse_var(
            &lookup,
            "SMART_QUERY_MAX_QUESTION_CHARS",
            defaults.max_question_chars,
        )?;
        let similarity_threshold: f64 = parse_var(
            &lookup,
            "SMART_QUERY_SIMILARITY_THRESHOLD",
            defaults.similarity_threshold,
        )?;

        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(SmartQueryError::Config(format!(
                "SMART_QUERY_SIMILARITY_THRESHOLD must be within 0.0-1.0, got {}",
                similarity_threshold
            )));
        }

        Ok(Self {
            llm,
            generation_timeout: Duration::from_secs(generation_secs),
            execution_timeout: Duration::from_secs(execution_secs),
            max_question_chars,
            similarity_threshold,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            SmartQueryError::Config(format!("Invalid value for {}: '{}' ({})", key, raw, e))
        }),
        None => Ok(default),
    }
}
