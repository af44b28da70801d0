//! LLM client abstraction and answer generation backends.
//!
//! The engine never trusts generated text: every draft claim is re-checked
//! against the evidence before it reaches an answer. Generation only decides
//! which sentences to propose and which fragments they point at.

mod generator;
mod openai;

pub use generator::{
    AnswerGenerator, DraftAnswer, DraftClaim, ExtractiveGenerator, GROUNDED_ANSWER_PROMPT,
    LlmAnswerGenerator, generator_from_settings,
};
pub use openai::OpenAiClient;

use crate::config::LlmSettings;
use crate::{Error, Result};
use std::time::Duration;

/// Trait for LLM providers.
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    fn complete(&self, prompt: &str) -> Result<String>;

    /// Generates a completion with a system prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    ///
    /// Default implementation concatenates system and user prompts.
    /// Providers should override this to use native system prompt support.
    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        let combined = format!("{system}\n\n---\n\nUser message:\n{user}");
        self.complete(&combined)
    }
}

/// HTTP client configuration for LLM providers.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Loads HTTP configuration from LLM settings.
    #[must_use]
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            timeout_ms: settings.timeout_ms,
            ..Self::default()
        }
    }
}

/// Builds a blocking HTTP client for LLM requests with configured timeouts.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client(config: LlmHttpConfig) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }
    builder.build().map_err(|e| Error::OperationFailed {
        operation: "build_llm_client".to_string(),
        cause: e.to_string(),
    })
}

/// Extracts JSON from LLM response, handling markdown code blocks.
pub(crate) fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json marker)
    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        let after_marker = &trimmed[content_start..];
        let json_start = after_marker
            .find('{')
            .map_or(content_start, |pos| content_start + pos);
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Handle raw JSON (find first { to last })
    if let Some(start) = trimmed.find('{')
        && let Some(end) = trimmed.rfind('}')
        && end > start
    {
        return &trimmed[start..=end];
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_raw() {
        let response = r#"{"claims": []}"#;
        assert_eq!(extract_json_from_response(response), r#"{"claims": []}"#);
    }

    #[test]
    fn test_extract_json_markdown() {
        let response = "```json\n{\"claims\": []}\n```";
        assert!(extract_json_from_response(response).starts_with('{'));
    }

    #[test]
    fn test_extract_json_with_prefix() {
        let response = "Here is the answer: {\"claims\": []} hope this helps";
        assert_eq!(extract_json_from_response(response), r#"{"claims": []}"#);
    }

    #[test]
    fn test_http_config_from_settings() {
        let settings = LlmSettings {
            timeout_ms: 1234,
            ..LlmSettings::default()
        };
        let config = LlmHttpConfig::from_settings(&settings);
        assert_eq!(config.timeout_ms, 1234);
        assert_eq!(config.connect_timeout_ms, 3_000);
    }
}
