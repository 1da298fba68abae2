use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tracing::{debug, info, instrument, warn};

use clarity_core::config::{ClarityConfig, Credentials};
use clarity_core::error::{ClarityError, FailureKind, Result};
use clarity_core::generator::{Generated, GenerationParams, GenerationResult, Generator};
use clarity_core::payload::Payload;

use crate::retry::{AttemptState, RetryPolicy};
use crate::wire::{parse_success_body, GenerateContentRequest};

const GENERATIVE_LANGUAGE_HOST: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Which Google endpoint to call and how to authenticate
#[derive(Clone)]
pub enum Endpoint {
    /// Generative Language API, `x-goog-api-key` header
    ApiKey { api_key: String },
    /// Vertex AI regional endpoint, bearer token
    Project {
        project_id: String,
        location: String,
        access_token: String,
    },
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::ApiKey { .. } => f.write_str("ApiKey"),
            Endpoint::Project {
                project_id,
                location,
                ..
            } => write!(f, "Project({project_id}, {location})"),
        }
    }
}

impl Endpoint {
    fn default_host(&self) -> String {
        match self {
            Endpoint::ApiKey { .. } => GENERATIVE_LANGUAGE_HOST.to_string(),
            Endpoint::Project { location, .. } => {
                format!("https://{location}-aiplatform.googleapis.com")
            }
        }
    }

    fn path_for(&self, model: &str) -> String {
        match self {
            Endpoint::ApiKey { .. } => format!("/v1beta/models/{model}:generateContent"),
            Endpoint::Project {
                project_id,
                location,
                ..
            } => format!(
                "/v1/projects/{project_id}/locations/{location}/publishers/google/models/{model}:generateContent"
            ),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Endpoint::ApiKey { api_key } => request.header("x-goog-api-key", api_key),
            Endpoint::Project { access_token, .. } => request.bearer_auth(access_token),
        }
    }
}

/// Reported before each backoff sleep
#[derive(Debug, Clone)]
pub struct RetryNotice {
    /// The attempt that just failed
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub kind: FailureKind,
}

pub type RetryObserver = Arc<dyn Fn(&RetryNotice) + Send + Sync>;

/// Gemini `generateContent` client
pub struct GeminiClient {
    http: Client,
    endpoint: Endpoint,
    base_url: Option<String>,
    policy: RetryPolicy,
    on_retry: Option<RetryObserver>,
}

impl GeminiClient {
    /// Create a client with a per-attempt `timeout`
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClarityError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            base_url: None,
            policy: RetryPolicy::default(),
            on_retry: None,
        })
    }

    /// Build from configuration. Project mode needs an access token by now;
    /// the CLI fills one in from `gcloud` when the config has none.
    pub fn from_config(config: &ClarityConfig) -> Result<Self> {
        let endpoint = match config.resolve_credentials()? {
            Credentials::ApiKey(api_key) => Endpoint::ApiKey { api_key },
            Credentials::Project {
                project_id,
                location,
                access_token,
            } => Endpoint::Project {
                project_id,
                location,
                access_token: access_token.ok_or_else(|| {
                    ClarityError::configuration_missing(
                        "project mode needs an access token (CLARITY_ACCESS_TOKEN or gcloud)",
                    )
                })?,
            },
        };

        let inference = &config.inference;
        let mut client = Self::new(endpoint, Duration::from_secs(inference.timeout_secs.max(1)))?
            .with_retry_policy(RetryPolicy::new(inference.max_attempts, inference.backoff_base_ms));
        if let Some(base_url) = &inference.base_url {
            client = client.with_base_url(base_url.clone());
        }
        Ok(client)
    }

    /// Replace the scheme and host (tests point this at a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_observer(mut self, observer: RetryObserver) -> Self {
        self.on_retry = Some(observer);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn url_for(&self, model: &str) -> String {
        let model = model.trim().trim_start_matches("models/");
        let host = self
            .base_url
            .clone()
            .unwrap_or_else(|| self.endpoint.default_host());
        format!("{host}{}", self.endpoint.path_for(model))
    }

    /// One HTTP round trip, classified.
    async fn send_once(&self, url: &str, body: &GenerateContentRequest, attempt: u32) -> Result<String> {
        let request = self.endpoint.authorize(self.http.post(url)).json(body);

        let response = request.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("request timed out: {e}")
            } else {
                e.to_string()
            };
            ClarityError::network(attempt, message)
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClarityError::network(attempt, format!("failed to read response body: {e}")))?;

        if status.is_server_error() {
            return Err(ClarityError::server_unavailable(attempt, status.as_u16(), &text));
        }
        if !status.is_success() {
            return Err(ClarityError::client_rejected(status.as_u16(), &text));
        }
        parse_success_body(&text)
    }

    fn advance(&self, state: &mut AttemptState, next: AttemptState) {
        debug_assert!(state.can_transition_to(next), "{state} -> {next}");
        debug!(from = %state, to = %next, "attempt state");
        *state = next;
    }
}

#[async_trait]
impl Generator for GeminiClient {
    #[instrument(skip(self, payload, params), fields(segments = payload.len(), endpoint = ?self.endpoint))]
    async fn generate(&self, payload: Payload, model: &str, params: &GenerationParams) -> GenerationResult {
        let url = self.url_for(model);
        let body = GenerateContentRequest::from_payload(&payload, params);
        drop(payload);

        let mut state = AttemptState::Idle;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.advance(&mut state, AttemptState::Sending { attempt });

            match self.send_once(&url, &body, attempt).await {
                Ok(markdown) => {
                    self.advance(&mut state, AttemptState::Success { attempts: attempt });
                    info!(attempts = attempt, chars = markdown.len(), "generation succeeded");
                    return Ok(Generated {
                        markdown,
                        attempts: attempt,
                        model: model.to_string(),
                    });
                }
                Err(err) if err.is_retryable() && self.policy.allows_retry_after(attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        kind = %err.kind(),
                        error = %err,
                        "transient failure, retrying"
                    );
                    self.advance(&mut state, AttemptState::RetryWait { attempt, delay });
                    if let Some(observer) = &self.on_retry {
                        observer(&RetryNotice {
                            attempt,
                            max_attempts: self.policy.max_attempts,
                            delay,
                            kind: err.kind(),
                        });
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.advance(
                        &mut state,
                        AttemptState::TerminalFailure {
                            attempts: attempt,
                            kind: err.kind(),
                        },
                    );
                    warn!(attempts = attempt, kind = %err.kind(), detail = %err.detail(), "generation failed");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarity_core::config::CredentialMode;

    fn api_key_client() -> GeminiClient {
        GeminiClient::new(
            Endpoint::ApiKey {
                api_key: "k".to_string(),
            },
            DEFAULT_TIMEOUT,
        )
        .unwrap()
    }

    #[test]
    fn api_key_url() {
        assert_eq!(
            api_key_client().url_for("gemini-2.0-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(
            api_key_client().url_for("models/gemini-1.5-pro"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent"
        );
    }

    #[test]
    fn project_url_uses_region() {
        let client = GeminiClient::new(
            Endpoint::Project {
                project_id: "acme".to_string(),
                location: "europe-west4".to_string(),
                access_token: "t".to_string(),
            },
            DEFAULT_TIMEOUT,
        )
        .unwrap();
        assert_eq!(
            client.url_for("gemini-1.5-flash-001"),
            "https://europe-west4-aiplatform.googleapis.com/v1/projects/acme/locations/europe-west4/publishers/google/models/gemini-1.5-flash-001:generateContent"
        );
    }

    #[test]
    fn base_url_override_keeps_path() {
        let client = api_key_client().with_base_url("http://127.0.0.1:4010/");
        assert_eq!(
            client.url_for("m"),
            "http://127.0.0.1:4010/v1beta/models/m:generateContent"
        );
    }

    #[test]
    fn from_config_requires_credentials() {
        let config = ClarityConfig::template();
        let err = GeminiClient::from_config(&config).err().unwrap();
        assert_eq!(err.kind(), FailureKind::ConfigurationMissing);

        let mut config = ClarityConfig::default();
        config.credentials.mode = CredentialMode::Project;
        config.credentials.project_id = Some("acme".to_string());
        let err = GeminiClient::from_config(&config).err().unwrap();
        assert_eq!(err.kind(), FailureKind::ConfigurationMissing);
    }

    #[test]
    fn from_config_applies_inference_settings() {
        let mut config = ClarityConfig::default();
        config.credentials.api_key = Some("real-key".to_string());
        config.inference.max_attempts = 5;
        config.inference.backoff_base_ms = 10;
        config.inference.base_url = Some("http://localhost:9".to_string());

        let client = GeminiClient::from_config(&config).unwrap();
        assert_eq!(client.policy(), &RetryPolicy::new(5, 10));
        assert!(client.url_for("m").starts_with("http://localhost:9/"));
        assert_eq!(format!("{:?}", client.endpoint()), "ApiKey");
    }
}
