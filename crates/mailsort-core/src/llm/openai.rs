//! OpenAI-compatible chat completions client

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    answer_prompt, classification_prompt, email_message, parse_answer, parse_classification,
    Answerer, Classifier,
};
use crate::config::{secret_from_env, LlmConfig};
use crate::error::{Error, Result};
use crate::models::Category;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat model used as both classifier and answerer
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    organization: String,
}

impl OpenAiChat {
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        organization: String,
        timeout_ms: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Llm(format!("Failed to create HTTP client: {}", e)))?;

        info!("Created chat client for {} ({})", base_url, model);
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
            organization,
        })
    }

    /// Build from config, reading the API key from the configured environment variable
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = secret_from_env("llm.api_key_env", &config.api_key_env)?;
        Self::new(
            config.base_url.clone(),
            api_key,
            config.model.clone(),
            config.organization.clone(),
            config.timeout_ms,
        )
    }

    /// Send one system + user exchange and return the reply text
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.0,
        };

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("chat service returned {}: {}", status, body)));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("Failed to parse chat response: {}", e)))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::ContractViolation("chat response has no content".to_string()))
    }
}

#[async_trait]
impl Classifier for OpenAiChat {
    async fn classify(&self, subject: &str, text: &str) -> Result<Category> {
        let reply = self
            .complete(
                &classification_prompt(&self.organization),
                &email_message(subject, text),
            )
            .await?;
        debug!("Classifier reply: {}", reply);
        parse_classification(&reply)
    }
}

#[async_trait]
impl Answerer for OpenAiChat {
    async fn answer(&self, subject: &str, text: &str) -> Result<String> {
        let reply = self
            .complete(&answer_prompt(&self.organization), &email_message(subject, text))
            .await?;
        parse_answer(&reply)
    }
}
