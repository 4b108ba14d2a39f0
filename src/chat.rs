//! Analyst Chat - conversational questions about the loaded dataset
//!
//! Each turn sends the schema descriptor as context and uses the fast model
//! variant. Turns are kept in order; the service's answer is stored verbatim,
//! including "Error: ..." text, so the transcript shows what happened.

use crate::error::{Result, SmartQueryError};
use crate::llm::{is_error_response, ModelVariant, TextGenerator};
use crate::schema::SchemaDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const PRESET_QUESTIONS: [&str; 5] = [
    "What are the key trends in this dataset?",
    "Do you notice any significant outliers?",
    "How do the variables correlate?",
    "What time-based patterns are present?",
    "Any suggestions for further analysis?",
];

/// Starter questions offered before the first turn
pub fn preset_questions() -> &'static [&'static str] {
    &PRESET_QUESTIONS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

pub struct AnalystChat {
    generator: Arc<dyn TextGenerator>,
    context: String,
    history: Vec<ChatTurn>,
}

impl AnalystChat {
    pub fn new(generator: Arc<dyn TextGenerator>, schema: &SchemaDescriptor) -> Self {
        let context = match schema.to_prompt_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("could not serialize schema for chat context: {}", e);
                "{}".to_string()
            }
        };
        Self {
            generator,
            context,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Ask one question and record both sides of the turn.
    ///
    /// A blank question is rejected without calling the service and leaves
    /// the history untouched.
    pub async fn ask(&mut self, question: &str) -> Result<&ChatTurn> {
        let question = question.trim();
        if question.is_empty() {
            warn!("rejecting blank chat question");
            return Err(SmartQueryError::InvalidInput(
                "chat question is blank".to_string(),
            ));
        }
        self.push(Speaker::User, question.to_string());

        let prompt = format!(
            "Your role is a data analyst and answers user questions so try to be \
conversational and here is Dataset context: {}\nQuestion: {}",
            self.context, question
        );
        let answer = self.generator.generate(&prompt, ModelVariant::Fast).await;
        if is_error_response(&answer) {
            warn!("chat answer is an error report: {}", answer.trim());
        } else {
            info!("chat answered ({} chars)", answer.len());
        }

        Ok(self.push(Speaker::Assistant, answer))
    }

    fn push(&mut self, speaker: Speaker, text: String) -> &ChatTurn {
        self.history.push(ChatTurn {
            speaker,
            text,
            at: Utc::now(),
        });
        &self.history[self.history.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Echo {
        seen: Mutex<Vec<(String, ModelVariant)>>,
    }

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, prompt: &str, variant: ModelVariant) -> String {
            self.seen.lock().unwrap().push((prompt.to_string(), variant));
            "Sales rise every quarter.".to_string()
        }
    }

    #[tokio::test]
    async fn test_turns_are_recorded_in_order() {
        let echo = Arc::new(Echo {
            seen: Mutex::new(Vec::new()),
        });
        let schema = SchemaDescriptor::new()
            .with_column("sales", ColumnKind::Numeric)
            .unwrap();
        let mut chat = AnalystChat::new(echo.clone(), &schema);

        let answer = chat.ask(preset_questions()[0]).await.unwrap();
        assert_eq!(answer.speaker, Speaker::Assistant);
        assert_eq!(answer.text, "Sales rise every quarter.");

        let history = chat.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].speaker, Speaker::User);
        assert_eq!(history[0].text, "What are the key trends in this dataset?");
        assert!(history[0].at <= history[1].at);

        let seen = echo.seen.lock().unwrap();
        assert_eq!(seen[0].1, ModelVariant::Fast);
        assert!(seen[0].0.contains("\"sales\""));

        drop(seen);
        chat.clear();
        assert!(chat.history().is_empty());
    }

    #[tokio::test]
    async fn test_blank_question_is_rejected() {
        let echo = Arc::new(Echo {
            seen: Mutex::new(Vec::new()),
        });
        let mut chat = AnalystChat::new(echo.clone(), &SchemaDescriptor::new());

        let err = chat.ask(" \t\n ").await.unwrap_err();

        assert!(matches!(err, SmartQueryError::InvalidInput(_)));
        assert!(chat.history().is_empty());
        assert!(echo.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_preset_questions() {
        assert_eq!(preset_questions().len(), 5);
        assert!(preset_questions().iter().all(|q| q.ends_with('?')));
    }
}
