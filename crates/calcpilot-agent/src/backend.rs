//! Model backend abstraction and shared request plumbing

use async_trait::async_trait;
use calcpilot_core::{CalcError, ModelSettings, Provider, Result};
use reqwest::header::RETRY_AFTER;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::gemini::GeminiClient;
use crate::ollama::OllamaClient;
use crate::types::ErrorResponse;

/// A text-in, text-out model (allows scripted models in tests)
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send one stateless prompt and return the response text
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// `provider/model` label for logs
    fn name(&self) -> String;
}

#[async_trait]
impl<T: ModelBackend + ?Sized> ModelBackend for Box<T> {
    async fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt).await
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

#[async_trait]
impl<T: ModelBackend + ?Sized> ModelBackend for Arc<T> {
    async fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt).await
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// Build the backend selected in the config
pub fn build_backend(settings: &ModelSettings) -> Result<Box<dyn ModelBackend>> {
    let backend: Box<dyn ModelBackend> = match settings.provider {
        Provider::Gemini => Box::new(GeminiClient::new(settings)?),
        Provider::Ollama => Box::new(OllamaClient::new(settings)?),
    };
    debug!("Using model backend {}", backend.name());
    Ok(backend)
}

/// Retry behaviour for rate limits (429) and server errors (5xx)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
        }
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CalcError::Api(format!("Failed to build HTTP client: {}", e)))
}

/// Send a request, retrying 429 and 5xx with exponential backoff
///
/// Hard failures are counted by the circuit breaker; a success resets it.
pub(crate) async fn send_with_retry<F>(
    provider: &str,
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    mut build: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    breaker.check()?;

    let mut retries = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        debug!("Sending request to {} (attempt {})", provider, retries + 1);

        let response = match build().send().await {
            Ok(response) => response,
            Err(e) => {
                breaker.record_failure();
                return Err(CalcError::Api(format!(
                    "Failed to send request to {}: {}",
                    provider,
                    e.without_url()
                )));
            }
        };

        let status = response.status();

        if status.as_u16() == 429 {
            retries += 1;

            if retries > policy.max_retries {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());
                breaker.record_failure();
                return Err(CalcError::ApiLimit(format!(
                    "Rate limit exceeded after {} retries. Last error: {}",
                    policy.max_retries, error_text
                )));
            }

            let wait = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(backoff);

            warn!(
                "Rate limited by {} (429). Waiting {:?} before retry {}/{}",
                provider, wait, retries, policy.max_retries
            );
            tokio::time::sleep(wait).await;
            backoff = (backoff * 2).min(policy.max_backoff);
            continue;
        }

        if status.is_server_error() && retries < policy.max_retries {
            retries += 1;
            warn!(
                "{} server error ({}). Waiting {:?} before retry {}/{}",
                provider, status, backoff, retries, policy.max_retries
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(policy.max_backoff);
            continue;
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            let message = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);

            breaker.record_failure();
            error!(
                "{} request failed with {} (circuit breaker failures: {})",
                provider,
                status,
                breaker.failure_count()
            );

            return Err(match status.as_u16() {
                401 | 403 => CalcError::Auth(format!(
                    "{} rejected the credential ({}): {}",
                    provider, status, message
                )),
                _ => CalcError::Api(format!("{} error {}: {}", provider, status, message)),
            });
        }

        breaker.record_success();
        return Ok(response);
    }
}
