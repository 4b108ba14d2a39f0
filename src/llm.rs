use crate::config::LlmConfig;
use crate::error::{Result, SmartQueryError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix marking a generation failure reported as text
pub const ERROR_PREFIX: &str = "Error: ";

/// Which model tier a generation call should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelVariant {
    Default,
    Fast,
    DeepReasoning,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 3] = [
        ModelVariant::Default,
        ModelVariant::Fast,
        ModelVariant::DeepReasoning,
    ];
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelVariant::Default => "default",
            ModelVariant::Fast => "fast",
            ModelVariant::DeepReasoning => "deep-reasoning",
        };
        f.write_str(name)
    }
}

/// Text-generation service contract.
///
/// Implementations never fail: any transport or model error is returned as a
/// string starting with [`ERROR_PREFIX`].
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, variant: ModelVariant) -> String;
}

/// True when a generation response is an error report rather than content.
pub fn is_error_response(response: &str) -> bool {
    response.trim_start().starts_with(ERROR_PREFIX)
}

/// OpenAI-compatible chat-completions client bound to one model.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            http: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn call_llm(&self, prompt: &str) -> Result<String> {
        // Offline mode: no key configured, answer with the zero-row statement
        if self.api_key == crate::config::DUMMY_API_KEY {
            debug!("LLM in dummy mode, returning fallback statement");
            return Ok(crate::synthesizer::FALLBACK_QUERY.to_string());
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
        });

        // Reasoning models reject temperature and need room for reasoning tokens
        if self.model.starts_with("gpt-5") || self.model.starts_with("o1") || self.model.starts_with("o3") {
            body["max_completion_tokens"] = serde_json::json!(2000);
        } else {
            body["temperature"] = serde_json::json!(0.1);
            body["max_tokens"] = serde_json::json!(500);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SmartQueryError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SmartQueryError::Llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SmartQueryError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(SmartQueryError::Llm(format!("LLM API error: {}", error)));
        }

        let choice = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| SmartQueryError::Llm("No choices in LLM response".to_string()))?;

        match choice.get("finish_reason").and_then(|r| r.as_str()) {
            Some("length") => warn!("LLM response was truncated due to length limit"),
            Some("content_filter") => {
                return Err(SmartQueryError::Llm(
                    "LLM response was filtered by content policy".to_string(),
                ))
            }
            _ => {}
        }

        let content = choice["message"]["content"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| SmartQueryError::Llm("No content in LLM response".to_string()))?;

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str, _variant: ModelVariant) -> String {
        match self.call_llm(prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(model = %self.model, "generation failed: {}", e);
                format!("{}{}", ERROR_PREFIX, e)
            }
        }
    }
}

/// One client per model variant, built once and shared across requests.
#[derive(Clone)]
pub struct GeneratorPool {
    default: Arc<dyn TextGenerator>,
    fast: Arc<dyn TextGenerator>,
    deep: Arc<dyn TextGenerator>,
}

impl GeneratorPool {
    pub fn from_config(config: &LlmConfig) -> Self {
        let client = |variant: ModelVariant| -> Arc<dyn TextGenerator> {
            Arc::new(LlmClient::new(
                config.api_key.clone(),
                config.model_for(variant).to_string(),
                config.base_url.clone(),
            ))
        };
        Self {
            default: client(ModelVariant::Default),
            fast: client(ModelVariant::Fast),
            deep: client(ModelVariant::DeepReasoning),
        }
    }

    /// Route every variant to the same generator.
    pub fn uniform(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            default: generator.clone(),
            fast: generator.clone(),
            deep: generator,
        }
    }

    pub fn get(&self, variant: ModelVariant) -> &Arc<dyn TextGenerator> {
        match variant {
            ModelVariant::Default => &self.default,
            ModelVariant::Fast => &self.fast,
            ModelVariant::DeepReasoning => &self.deep,
        }
    }
}

#[async_trait]
impl TextGenerator for GeneratorPool {
    async fn generate(&self, prompt: &str, variant: ModelVariant) -> String {
        self.get(variant).generate(prompt, variant).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        calls: Mutex<Vec<ModelVariant>>,
    }

    #[async_trait]
    impl TextGenerator for Recording {
        async fn generate(&self, _prompt: &str, variant: ModelVariant) -> String {
            self.calls.lock().unwrap().push(variant);
            self.name.to_string()
        }
    }

    #[tokio::test]
    async fn test_dummy_client_returns_fallback() {
        let client = LlmClient::new(
            crate::config::DUMMY_API_KEY.to_string(),
            "gpt-4".to_string(),
            crate::config::DEFAULT_BASE_URL.to_string(),
        );
        let text = client.generate("anything", ModelVariant::Default).await;
        assert_eq!(text, crate::synthesizer::FALLBACK_QUERY);
    }

    #[tokio::test]
    async fn test_unreachable_service_reports_error_text() {
        // Port 9 (discard) on localhost is closed in test environments
        let client = LlmClient::new(
            "sk-test".to_string(),
            "gpt-4".to_string(),
            "http://127.0.0.1:9/v1".to_string(),
        );
        let text = client.generate("question", ModelVariant::Fast).await;
        assert!(is_error_response(&text), "unexpected response: {}", text);
    }

    #[tokio::test]
    async fn test_uniform_pool_routes_all_variants() {
        let recorder = Arc::new(Recording {
            name: "ok",
            calls: Mutex::new(Vec::new()),
        });
        let pool = GeneratorPool::uniform(recorder.clone());
        for variant in ModelVariant::ALL {
            assert_eq!(pool.generate("p", variant).await, "ok");
        }
        assert_eq!(*recorder.calls.lock().unwrap(), ModelVariant::ALL.to_vec());
    }

    #[test]
    fn test_error_marker_detection() {
        assert!(is_error_response("Error: timeout"));
        assert!(is_error_response("  Error: 500"));
        assert!(!is_error_response("SELECT * FROM dataset;"));
    }

    #[test]
    fn test_variant_display() {
        assert_eq!(ModelVariant::DeepReasoning.to_string(), "deep-reasoning");
        assert_eq!(
            serde_json::to_string(&ModelVariant::DeepReasoning).unwrap(),
            "\"deep-reasoning\""
        );
    }
}
