use crate::config::Config;
use crate::markup::strip_code_fences;
use crate::metrics::PipelineMetrics;
use crate::retry::{with_retry_if, RetryConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Failure classes reported by the generation service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation service rate limited the request: {0}")]
    RateLimited(String),

    #[error("generation service failed: {0}")]
    ServerOrUnknown(String),

    #[error("generation service rejected the credentials: {0}")]
    Unauthorized(String),

    #[error("generation service rejected the request: {0}")]
    NonRetryable(String),
}

impl GenerationError {
    /// Rate limits, 5xx and network failures are worth another attempt on the same path.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited(_) | GenerationError::ServerOrUnknown(_)
        )
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, GenerationError::Unauthorized(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("{} {}", status, body.trim());
        match status {
            429 => GenerationError::RateLimited(detail),
            401 | 403 => GenerationError::Unauthorized(detail),
            500..=599 => GenerationError::ServerOrUnknown(detail),
            400..=499 => GenerationError::NonRetryable(detail),
            _ => GenerationError::ServerOrUnknown(detail),
        }
    }

    /// Classify an `error` value embedded in an otherwise successful response.
    fn from_embedded(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("unauthorized")
            || lower.contains("unauthenticated")
            || lower.contains("not authenticated")
            || lower.contains("401")
            || lower.contains("jwt")
        {
            GenerationError::Unauthorized(message)
        } else if lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("quota")
            || lower.contains("429")
        {
            GenerationError::RateLimited(message)
        } else {
            GenerationError::ServerOrUnknown(message)
        }
    }
}

/// Which endpoint a request went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Authenticated, model-routed endpoint
    Primary,
    /// Unauthenticated endpoint used when the primary path is not authorized
    Fallback,
}

impl Route {
    fn label(self) -> &'static str {
        match self {
            Route::Primary => "primary",
            Route::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrimaryRequest<'a> {
    prompt: &'a str,
    allow_web_context: bool,
    model_id: &'a str,
    stream: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FallbackRequest<'a> {
    prompt: &'a str,
    allow_web_context: bool,
}

/// JSON envelope the service may wrap its output in.
#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    result: Option<String>,
}

/// Extract generated text from a success-status body.
///
/// The body is either the raw payload, a JSON string, or a JSON envelope.
/// An envelope's `error` field wins over any text it carries.
fn parse_response_body(body: &str) -> Result<String, GenerationError> {
    let trimmed = body.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('"')) {
        return Ok(body.to_string());
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => return Ok(body.to_string()),
    };

    match value {
        serde_json::Value::String(text) => Ok(text),
        serde_json::Value::Object(_) => {
            let envelope: ResponseEnvelope = serde_json::from_value(value).map_err(|e| {
                GenerationError::ServerOrUnknown(format!("malformed response envelope: {}", e))
            })?;

            if let Some(error) = envelope.error.filter(|e| !e.is_null()) {
                return Err(GenerationError::from_embedded(error_message(&error)));
            }

            envelope
                .text
                .or(envelope.content)
                .or(envelope.output)
                .or(envelope.result)
                .ok_or_else(|| {
                    GenerationError::ServerOrUnknown("response envelope contained no text".into())
                })
        }
        _ => Ok(body.to_string()),
    }
}

fn error_message(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

/// Whether the caller's session can use the primary path.
///
/// Probed at most once; every later caller reads the cached answer.
#[derive(Debug, Default)]
pub struct AuthCapability {
    authenticated: OnceCell<bool>,
}

static GLOBAL_AUTH: OnceLock<Arc<AuthCapability>> = OnceLock::new();

impl AuthCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capability whose answer is already known; the probe never runs.
    pub fn known(authenticated: bool) -> Self {
        let capability = Self::new();
        let _ = capability.authenticated.set(authenticated);
        capability
    }

    /// The process-lifetime capability shared by all clients built with
    /// [`GenerationClient::new`].
    pub fn global() -> Arc<AuthCapability> {
        GLOBAL_AUTH
            .get_or_init(|| Arc::new(AuthCapability::new()))
            .clone()
    }

    /// Return the cached answer, running `probe` if this is the first call.
    pub async fn is_authenticated<F, Fut>(&self, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        *self.authenticated.get_or_init(probe).await
    }

    pub fn cached(&self) -> Option<bool> {
        self.authenticated.get().copied()
    }
}

/// Client for the external text-generation service.
///
/// Cloning is cheap; clones share the HTTP connection pool and the
/// authorization capability.
#[derive(Clone)]
pub struct GenerationClient {
    http: reqwest::Client,
    config: Arc<Config>,
    auth: Arc<AuthCapability>,
    retry: RetryConfig,
}

impl GenerationClient {
    /// Build a client using the process-wide authorization capability.
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            config: Arc::new(config),
            auth: AuthCapability::global(),
            retry: RetryConfig::transport(),
        })
    }

    /// Use a specific authorization capability instead of the global one.
    pub fn with_auth(mut self, auth: Arc<AuthCapability>) -> Self {
        self.auth = auth;
        self
    }

    /// Override the transport retry policy.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether requests go to the primary path, probing the session on first use.
    pub async fn session_authenticated(&self) -> bool {
        self.auth.is_authenticated(|| self.probe_session()).await
    }

    async fn probe_session(&self) -> bool {
        let Some(token) = self.config.session_token.as_deref() else {
            info!("No session token configured, using the fallback generation path");
            return false;
        };

        let Some(probe_url) = self.config.auth_probe_url.as_deref() else {
            return true;
        };

        match self.http.get(probe_url).bearer_auth(token).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Session probe succeeded");
                true
            }
            Ok(response) => {
                info!(
                    "Session probe returned {}, using the fallback generation path",
                    response.status()
                );
                false
            }
            Err(e) => {
                warn!("Session probe failed ({}), using the fallback generation path", e);
                false
            }
        }
    }

    /// Send one prompt and return the generated text.
    ///
    /// Transient failures are retried with backoff on the path in use. An
    /// authorization failure on the primary path switches to the fallback
    /// path immediately, with the same prompt and no further primary attempts.
    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let text = if self.session_authenticated().await {
            match self.generate_on(Route::Primary, prompt).await {
                Err(GenerationError::Unauthorized(detail)) => {
                    warn!(
                        "Primary generation path unauthorized ({}), switching to fallback",
                        detail
                    );
                    self.generate_on(Route::Fallback, prompt).await?
                }
                other => other?,
            }
        } else {
            self.generate_on(Route::Fallback, prompt).await?
        };

        Ok(strip_code_fences(&text))
    }

    async fn generate_on(&self, route: Route, prompt: &str) -> Result<String, GenerationError> {
        with_retry_if(
            &self.retry,
            &format!("Generation ({})", route.label()),
            || self.send(route, prompt),
            GenerationError::is_retryable,
        )
        .await
    }

    async fn send(&self, route: Route, prompt: &str) -> Result<String, GenerationError> {
        let metrics = PipelineMetrics::global();
        metrics.record_api_call();

        let result = self.send_once(route, prompt).await;
        if result.is_err() {
            metrics.record_api_failure();
        }
        result
    }

    async fn send_once(&self, route: Route, prompt: &str) -> Result<String, GenerationError> {
        let request = match route {
            Route::Primary => {
                let builder = self.http.post(&self.config.primary_url).json(&PrimaryRequest {
                    prompt,
                    allow_web_context: self.config.allow_web_context,
                    model_id: &self.config.model_id,
                    stream: self.config.stream,
                });
                match self.config.session_token.as_deref() {
                    Some(token) => builder.bearer_auth(token),
                    None => builder,
                }
            }
            Route::Fallback => {
                PipelineMetrics::global().record_fallback_call();
                self.http.post(&self.config.fallback_url).json(&FallbackRequest {
                    prompt,
                    allow_web_context: self.config.allow_web_context,
                })
            }
        };

        let response = request.send().await.map_err(|e| {
            GenerationError::ServerOrUnknown(format!("failed to send request: {}", e))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            GenerationError::ServerOrUnknown(format!("failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            return Err(GenerationError::from_status(status.as_u16(), &body));
        }

        parse_response_body(&body)
    }
}
