use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Result, TrackerError};
use crate::prompt::GENERATION_INSTRUCTION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AIProvider {
    OpenAI,
    Ollama,
}

impl std::fmt::Display for AIProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AIProvider::OpenAI => write!(f, "openai"),
            AIProvider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for AIProvider {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" | "gpt" => Ok(AIProvider::OpenAI),
            "ollama" => Ok(AIProvider::Ollama),
            _ => Err(TrackerError::Config(format!("Unknown AI provider: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AIConfig {
    pub provider: AIProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub host: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for AIConfig {
    fn default() -> Self {
        AIConfig {
            provider: AIProvider::Ollama,
            model: "llama3".to_string(),
            api_key: None,
            host: Some("http://localhost:11434".to_string()),
            max_tokens: Some(1024),
            temperature: Some(0.3),
        }
    }
}

/// Text generation backend used by the update scheduler.
///
/// One call per cycle, no streaming. Implementations report every
/// failure as an error; the scheduler folds them into a generation failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct AIProviderClient {
    config: AIConfig,
    http_client: reqwest::Client,
}

impl AIProviderClient {
    pub fn new(config: AIConfig) -> Self {
        let http_client = reqwest::Client::new();

        AIProviderClient {
            config,
            http_client,
        }
    }

    async fn generate_openai(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| TrackerError::Config("OpenAI API key required".to_string()))?;

        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": GENERATION_INSTRUCTION },
                { "role": "user", "content": prompt }
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature
        });

        let base_url = self.config.host.as_deref().unwrap_or("https://api.openai.com");
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(TrackerError::Generation(format!("OpenAI API error: {}", error_text)));
        }

        let response_json: serde_json::Value = response.json().await?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| TrackerError::Generation("Invalid OpenAI response format".to_string()))?
            .to_string();

        if let Some(tokens) = response_json["usage"]["total_tokens"].as_u64() {
            tracing::debug!("OpenAI generation used {} tokens", tokens);
        }

        Ok(content)
    }

    async fn generate_ollama(&self, prompt: &str) -> Result<String> {
        let base_url = self.config.host.as_deref().unwrap_or("http://localhost:11434");

        let mut request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": GENERATION_INSTRUCTION },
                { "role": "user", "content": prompt }
            ],
            "stream": false
        });
        if let Some(temperature) = self.config.temperature {
            request_body["options"] = serde_json::json!({ "temperature": temperature });
        }

        let url = format!("{}/api/chat", base_url.trim_end_matches('/'));
        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(TrackerError::Generation(format!("Ollama API error: {}", error_text)));
        }

        let response_json: serde_json::Value = response.json().await?;

        let content = response_json["message"]["content"]
            .as_str()
            .ok_or_else(|| TrackerError::Generation("Invalid Ollama response format".to_string()))?
            .to_string();

        Ok(content)
    }

    pub fn get_model(&self) -> &str {
        &self.config.model
    }

    pub fn get_provider(&self) -> AIProvider {
        self.config.provider
    }
}

#[async_trait]
impl GenerationProvider for AIProviderClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        tracing::debug!("Requesting stats update from {} ({})", self.config.provider, self.config.model);
        match self.config.provider {
            AIProvider::OpenAI => self.generate_openai(prompt).await,
            AIProvider::Ollama => self.generate_ollama(prompt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_names() {
        assert_eq!("OpenAI".parse::<AIProvider>().unwrap(), AIProvider::OpenAI);
        assert_eq!("gpt".parse::<AIProvider>().unwrap(), AIProvider::OpenAI);
        assert_eq!("ollama".parse::<AIProvider>().unwrap(), AIProvider::Ollama);
        assert!("claude".parse::<AIProvider>().is_err());
        assert_eq!(AIProvider::OpenAI.to_string(), "openai");
    }

    #[test]
    fn test_config_section_shape() {
        let config: AIConfig =
            serde_json::from_str(r#"{"provider": "openai", "model": "gpt-4o-mini", "apiKey": "sk-test"}"#).unwrap();
        assert_eq!(config.provider, AIProvider::OpenAI);
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        // unspecified fields keep their defaults
        assert_eq!(config.max_tokens, Some(1024));
    }

    #[tokio::test]
    async fn test_openai_requires_key() {
        let client = AIProviderClient::new(AIConfig {
            provider: AIProvider::OpenAI,
            api_key: Some(String::new()),
            ..Default::default()
        });
        let err = client.generate("prompt").await.unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));
    }
}
