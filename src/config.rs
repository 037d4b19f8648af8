use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Generation service
    pub primary_url: String,
    pub fallback_url: String,
    pub session_token: Option<String>,
    pub auth_probe_url: Option<String>,
    pub model_id: String,
    pub allow_web_context: bool,
    pub stream: bool,
    pub request_timeout: Duration,

    // Chunking
    pub chunk_max_chars: usize,

    // Truncation detection
    pub truncation_ratio: f64,
    pub truncation_min_visible: usize,

    // Verification pass
    pub verify: bool,
    pub verification_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            // Generation service
            primary_url: std::env::var("GENERATION_PRIMARY_URL")
                .context("GENERATION_PRIMARY_URL not set")?,
            fallback_url: std::env::var("GENERATION_FALLBACK_URL")
                .context("GENERATION_FALLBACK_URL not set")?,
            session_token: std::env::var("GENERATION_SESSION_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            auth_probe_url: std::env::var("GENERATION_AUTH_PROBE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            model_id: std::env::var("GENERATION_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            allow_web_context: env_flag("GENERATION_ALLOW_WEB_CONTEXT", false),
            stream: env_flag("GENERATION_STREAM", false),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 120)),

            // Chunking
            chunk_max_chars: env_parse("CHUNK_MAX_CHARS", 5000),

            // Truncation detection
            truncation_ratio: env_parse("TRUNCATION_RATIO", 0.9),
            truncation_min_visible: env_parse("TRUNCATION_MIN_VISIBLE", 50),

            // Verification pass
            verify: env_flag("VERIFY", true),
            verification_timeout: Duration::from_secs(env_parse("VERIFICATION_TIMEOUT_SECS", 30)),
        })
    }

    /// Configuration with the default pipeline policy and the given endpoints.
    pub fn with_endpoints(primary_url: impl Into<String>, fallback_url: impl Into<String>) -> Self {
        Self {
            primary_url: primary_url.into(),
            fallback_url: fallback_url.into(),
            session_token: None,
            auth_probe_url: None,
            model_id: "gemini-2.5-flash".to_string(),
            allow_web_context: false,
            stream: false,
            request_timeout: Duration::from_secs(120),
            chunk_max_chars: 5000,
            truncation_ratio: 0.9,
            truncation_min_visible: 50,
            verify: true,
            verification_timeout: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
