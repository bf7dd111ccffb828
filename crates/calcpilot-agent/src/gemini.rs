//! Google Gemini client
//!
//! Every call is a fresh single-turn `generateContent` request carrying the
//! configured sampling parameters and safety thresholds.

use async_trait::async_trait;
use calcpilot_core::{CalcError, GenerationSettings, ModelSettings, Result};
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::auth::resolve_api_key;
use crate::backend::{http_client, send_with_retry, ModelBackend, RetryPolicy};
use crate::circuit_breaker::CircuitBreaker;
use crate::types::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, SafetySetting,
    SAFETY_CATEGORIES,
};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini API client
pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key_env: String,
    api_key: OnceLock<String>,
    generation: GenerationSettings,
    safety_threshold: String,
    retry: RetryPolicy,
    circuit_breaker: CircuitBreaker,
    http: reqwest::Client,
}

impl GeminiClient {
    /// Create a client from model settings. The API key is read on first use.
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let model = settings.name.trim();
        Ok(Self {
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            model: model.strip_prefix("models/").unwrap_or(model).to_string(),
            api_key_env: settings.api_key_env.clone(),
            api_key: OnceLock::new(),
            generation: settings.generation.clone(),
            safety_threshold: settings.safety_threshold.clone(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreaker::default(),
            http: http_client(settings.request_timeout_secs)?,
        })
    }

    /// Use an explicit key instead of the environment
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = OnceLock::from(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn api_key(&self) -> Result<&str> {
        if let Some(key) = self.api_key.get() {
            return Ok(key);
        }
        let key = resolve_api_key(&self.api_key_env)?;
        Ok(self.api_key.get_or_init(|| key))
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content::user(prompt)],
            generation_config: GenerationConfig {
                temperature: self.generation.temperature,
                top_p: self.generation.top_p,
                top_k: self.generation.top_k,
                max_output_tokens: self.generation.max_output_tokens,
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: category.to_string(),
                    threshold: self.safety_threshold.clone(),
                })
                .collect(),
        }
    }
}

/// Pull the answer text out of a response, rejecting blocked output
fn response_text(response: GenerateContentResponse) -> Result<String> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(CalcError::Api(format!(
            "Prompt blocked by safety filters: {}",
            reason
        )));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| CalcError::EmptyResponse("no candidates returned".to_string()))?;

    let text = candidate.content.map(|c| c.text()).unwrap_or_default();
    if !text.trim().is_empty() {
        return Ok(text);
    }

    match candidate.finish_reason.as_deref() {
        Some("SAFETY") => Err(CalcError::Api(
            "Response blocked by safety filters".to_string(),
        )),
        reason => Err(CalcError::EmptyResponse(format!(
            "empty candidate (finish reason: {})",
            reason.unwrap_or("unknown")
        ))),
    }
}

#[async_trait]
impl ModelBackend for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let api_key = self.api_key()?;
        let request = self.build_request(prompt);
        let url = self.generate_url();

        debug!("Gemini request: {} prompt chars to {}", prompt.len(), self.model);

        let response = send_with_retry("Gemini", &self.circuit_breaker, &self.retry, || {
            self.http
                .post(&url)
                .query(&[("key", api_key)])
                .json(&request)
        })
        .await?;

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| CalcError::Api(format!("Failed to parse Gemini response: {}", e)))?;

        let text = response_text(body)?;
        info!("Gemini response received ({} chars)", text.len());
        Ok(text)
    }

    fn name(&self) -> String {
        format!("gemini/{}", self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    const PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::new(&ModelSettings::default())
            .unwrap()
            .with_api_key("test-key")
            .with_base_url(server.url(""))
            .with_retry_policy(RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
            })
    }

    #[tokio::test]
    async fn test_generate_sends_config_and_returns_text() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path(PATH)
                .query_param("key", "test-key")
                .json_body_partial(
                    r#"{
                        "contents": [{"role": "user", "parts": [{"text": "Put Hello in A1"}]}],
                        "generationConfig": {"topK": 1, "maxOutputTokens": 2048},
                        "safetySettings": [
                            {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                            {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                            {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                            {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"}
                        ]
                    }"#,
                );
            then.status(200).json_body(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "```json\n[]\n```"}]},
                    "finishReason": "STOP"
                }]
            }));
        });

        let text = client(&server).generate("Put Hello in A1").await.unwrap();
        assert_eq!(text, "```json\n[]\n```");
        mock.assert();
    }

    #[tokio::test]
    async fn test_later_api_key_replaces_earlier() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path(PATH).query_param("key", "second-key");
            then.status(200).json_body(json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "ok"}]}}]
            }));
        });

        let text = client(&server)
            .with_api_key("second-key")
            .generate("ping")
            .await
            .unwrap();
        assert_eq!(text, "ok");
        mock.assert();
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(PATH);
            then.status(200).json_body(json!({
                "candidates": [],
                "promptFeedback": {"blockReason": "SAFETY"}
            }));
        });

        let err = client(&server).generate("x").await.unwrap_err();
        assert!(matches!(err, CalcError::Api(_)));
        assert!(err.to_string().contains("blocked"));
    }

    #[tokio::test]
    async fn test_empty_candidate_is_empty_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(PATH);
            then.status(200).json_body(json!({
                "candidates": [{"content": {"parts": [{"text": "  "}]}, "finishReason": "MAX_TOKENS"}]
            }));
        });

        let err = client(&server).generate("x").await.unwrap_err();
        assert!(matches!(err, CalcError::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path(PATH);
            then.status(503)
                .json_body(json!({"error": {"code": 503, "message": "overloaded"}}));
        });

        let err = client(&server).generate("x").await.unwrap_err();
        assert!(err.to_string().contains("overloaded"));
        mock.assert_hits(3);
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up_after_retries() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path(PATH);
            then.status(429).header("retry-after", "0").body("quota");
        });

        let err = client(&server).generate("x").await.unwrap_err();
        assert!(matches!(err, CalcError::ApiLimit(_)));
        mock.assert_hits(3);
    }

    #[tokio::test]
    async fn test_rejected_key_is_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(PATH);
            then.status(403)
                .json_body(json!({"error": {"code": 403, "message": "API key not valid"}}));
        });

        let err = client(&server).generate("x").await.unwrap_err();
        assert!(matches!(err, CalcError::Auth(_)));
        assert!(err.to_string().contains("API key not valid"));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path(PATH);
            then.status(200);
        });

        let settings = ModelSettings {
            api_key_env: "CALCPILOT_TEST_UNSET_KEY".to_string(),
            ..ModelSettings::default()
        };
        let client = GeminiClient::new(&settings)
            .unwrap()
            .with_base_url(server.url(""));

        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, CalcError::Auth(_)));
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_repeated_failures() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path(PATH);
            then.status(400)
                .json_body(json!({"error": {"code": 400, "message": "bad request"}}));
        });

        let client = client(&server);
        for _ in 0..3 {
            assert!(matches!(
                client.generate("x").await,
                Err(CalcError::Api(_))
            ));
        }

        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, CalcError::ApiLimit(_)));
        assert_eq!(client.circuit_breaker().failure_count(), 3);
        mock.assert_hits(3);
    }
}
