//! Ollama client for locally hosted models

use async_trait::async_trait;
use calcpilot_core::{CalcError, GenerationSettings, ModelSettings, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{http_client, send_with_retry, ModelBackend, RetryPolicy};
use crate::circuit_breaker::CircuitBreaker;

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Non-streaming client for `/api/chat`
pub struct OllamaClient {
    base_url: String,
    model: String,
    generation: GenerationSettings,
    retry: RetryPolicy,
    circuit_breaker: CircuitBreaker,
    http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        Ok(Self {
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            model: settings.name.trim().to_string(),
            generation: settings.generation.clone(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreaker::default(),
            http: http_client(settings.request_timeout_secs)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl ModelBackend for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            options: ChatOptions {
                temperature: self.generation.temperature,
                top_p: self.generation.top_p,
                top_k: self.generation.top_k,
                num_predict: self.generation.max_output_tokens,
            },
        };

        debug!("Ollama request: {} prompt chars to {}", prompt.len(), self.model);

        let response = send_with_retry("Ollama", &self.circuit_breaker, &self.retry, || {
            self.http.post(&url).json(&request)
        })
        .await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CalcError::Api(format!("Failed to parse Ollama response: {}", e)))?;

        if body.message.content.trim().is_empty() {
            return Err(CalcError::EmptyResponse(format!(
                "{} returned an empty message",
                self.model
            )));
        }

        info!("Ollama response received ({} chars)", body.message.content.len());
        Ok(body.message.content)
    }

    fn name(&self) -> String {
        format!("ollama/{}", self.model)
    }
}
