use crate::config::Config;
use crate::generation::{GenerationClient, GenerationError};
use crate::i18n::Language;
use crate::markup::{visible_length, MarkupValidator};
use crate::metrics::PipelineMetrics;
use crate::retry::{with_retry_if, RetryConfig};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a single translation attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AttemptOutcome {
    Success,
    Truncated,
    Error(String),
}

/// One request for one chunk, as recorded for the run report.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationAttempt {
    pub input: String,
    /// Cleaned service output; empty when the attempt errored
    pub output: String,
    /// 1-based attempt number within the chunk
    pub attempt: u32,
    pub outcome: AttemptOutcome,
}

/// Final result for one chunk.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub output: String,
    pub attempts: Vec<TranslationAttempt>,
    /// True when the original chunk text was kept in place of a translation
    pub substituted: bool,
}

impl ChunkResult {
    /// Whether the service produced any answer for this chunk, usable or not.
    pub fn service_answered(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| !matches!(a.outcome, AttemptOutcome::Error(_)))
    }

    /// The transport error behind a substitution, if the last attempt got no answer.
    pub fn transport_failure(&self) -> Option<&str> {
        if !self.substituted {
            return None;
        }
        match self.attempts.last().map(|a| &a.outcome) {
            Some(AttemptOutcome::Error(detail)) => Some(detail),
            _ => None,
        }
    }
}

/// Thresholds for deciding that an output is incomplete.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruncationPolicy {
    /// Minimum acceptable fraction of the input's visible length
    pub ratio: f64,
    /// Visible-length floor applied to inputs at least this long
    pub min_visible: usize,
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self {
            ratio: 0.9,
            min_visible: 50,
        }
    }
}

impl TruncationPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ratio: config.truncation_ratio,
            min_visible: config.truncation_min_visible,
        }
    }

    /// Visible length the output must reach to be accepted.
    ///
    /// Inputs at least `min_visible` long need `max(min_visible, floor(ratio * in))`.
    /// Shorter inputs need only `floor(ratio * in)`: the floor would otherwise
    /// exceed the input itself and flag every faithful translation of a short
    /// fragment.
    pub fn threshold(&self, input_visible: usize) -> usize {
        let scaled = (self.ratio * input_visible as f64).floor() as usize;
        if input_visible >= self.min_visible {
            scaled.max(self.min_visible)
        } else {
            scaled
        }
    }

    pub fn is_truncated(&self, input: &str, output: &str) -> bool {
        is_truncated(input, output, self)
    }
}

/// Whether `output` is materially shorter than `input`.
///
/// Empty output is always truncated. Otherwise lengths are compared on
/// visible text only, so markup differences do not count.
pub fn is_truncated(input: &str, output: &str, policy: &TruncationPolicy) -> bool {
    if output.trim().is_empty() {
        return true;
    }
    visible_length(output) < policy.threshold(visible_length(input))
}

/// Build the prompt asking the service to translate one HTML fragment.
pub fn build_translation_prompt(chunk: &str, language: Language) -> String {
    format!(
        r#"You are a professional translator. Translate the visible text of the following HTML fragment into {language}.

## Rules

### Preserve exactly:
- Every tag, attribute and attribute value
- URLs in href and src attributes
- The order and nesting of elements
- Whitespace between tags
- Script and style contents, code samples, brand and product names

### Translate:
- Text content between tags
- Nothing else

### Output:
- Return only the translated HTML fragment
- Do not add commentary, explanations or code fences
- Do not omit, summarize or merge any part of the fragment

## HTML fragment

{chunk}"#,
        language = language.name(),
        chunk = chunk
    )
}

/// Error of a single attempt, including outputs judged incomplete.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("output truncated ({output_visible} of {input_visible} visible characters)")]
    Truncated {
        input_visible: usize,
        output_visible: usize,
    },

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl AttemptError {
    /// Truncations and transient transport failures earn the extra attempt.
    fn is_recoverable(&self) -> bool {
        match self {
            AttemptError::Truncated { .. } => true,
            AttemptError::Generation(e) => e.is_retryable(),
        }
    }
}

/// Translate one chunk through the generation client.
///
/// Transport retries and the authorization fallback happen inside the
/// client. Markup differences between input and output are logged, never
/// fatal.
pub async fn translate_chunk(
    client: &GenerationClient,
    chunk: &str,
    language: Language,
) -> Result<String, GenerationError> {
    let translated = client
        .generate(&build_translation_prompt(chunk, language))
        .await?;
    let translated = restore_edge_whitespace(chunk, &translated);

    let validation = MarkupValidator::validate(chunk, &translated);
    if !validation.warnings.is_empty() {
        debug!(
            "Markup warnings for {} ({}): {:?}",
            language.name(),
            language.code(),
            validation.warnings
        );
    }
    if !validation.errors.is_empty() {
        warn!(
            "Markup errors for {} ({}): {:?}",
            language.name(),
            language.code(),
            validation.errors
        );
    }

    Ok(translated)
}

/// Re-attach the whitespace surrounding `original` to the trimmed service
/// output, so newlines between blocks survive reassembly.
fn restore_edge_whitespace(original: &str, translated: &str) -> String {
    let translated = translated.trim();
    if translated.is_empty() {
        return String::new();
    }

    let body_start = original.len() - original.trim_start().len();
    let body_end = original.trim_end().len();
    if body_end <= body_start {
        return translated.to_string();
    }

    format!(
        "{}{}{}",
        &original[..body_start],
        translated,
        &original[body_end..]
    )
}

/// Per-chunk translation with truncation recovery.
pub struct ChunkTranslator<'a> {
    client: &'a GenerationClient,
    /// Same client without transport retries, for attempts that follow an exhausted one
    single_shot: GenerationClient,
    language: Language,
    policy: TruncationPolicy,
    retry: RetryConfig,
}

impl<'a> ChunkTranslator<'a> {
    pub fn new(client: &'a GenerationClient, language: Language, policy: TruncationPolicy) -> Self {
        Self {
            client,
            single_shot: client
                .clone()
                .with_retry_config(RetryConfig::new(1, Duration::ZERO)),
            language,
            policy,
            retry: RetryConfig::truncation(),
        }
    }

    /// Override the policy for retrying truncated or failed attempts.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Translate `chunk`, never losing its content.
    ///
    /// A truncated attempt, or one whose transport retries ran out, is retried
    /// under the truncation policy (one extra attempt by default) with the
    /// identical prompt. A retry after exhausted transport retries sends a
    /// single request. If every attempt fails, the original chunk is returned
    /// as the output.
    ///
    /// Errors that no retry can fix are returned instead: an authorization
    /// failure that survived the fallback path, or a request the service
    /// rejected outright. Every later chunk would fail the same way.
    pub async fn translate(&self, chunk: &str) -> Result<ChunkResult, GenerationError> {
        let log = Mutex::new(Vec::new());
        let counter = AtomicU32::new(0);
        let transport_exhausted = AtomicBool::new(false);

        let result = {
            let log = &log;
            let counter = &counter;
            let transport_exhausted = &transport_exhausted;
            with_retry_if(
                &self.retry,
                &format!("Chunk translation ({})", self.language.name()),
                || async move {
                    let number = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if number > 1 {
                        PipelineMetrics::global().record_truncation_retry();
                    }

                    let client = if transport_exhausted.load(Ordering::SeqCst) {
                        &self.single_shot
                    } else {
                        self.client
                    };
                    let (record, result) = self.attempt(client, chunk, number).await;
                    if let Err(e) = &result {
                        info!("Chunk attempt {} unusable: {}", number, e);
                    }
                    transport_exhausted.store(
                        matches!(result, Err(AttemptError::Generation(_))),
                        Ordering::SeqCst,
                    );
                    log.lock().unwrap_or_else(PoisonError::into_inner).push(record);
                    result
                },
                |e: &AttemptError| e.is_recoverable(),
            )
            .await
        };
        let attempts = log.into_inner().unwrap_or_else(PoisonError::into_inner);

        match result {
            Ok(output) => Ok(ChunkResult {
                output,
                attempts,
                substituted: false,
            }),
            Err(AttemptError::Generation(e)) if !e.is_retryable() => Err(e),
            Err(e) => {
                warn!(
                    "Chunk still unusable after {} attempts ({}), keeping original text",
                    attempts.len(),
                    e
                );
                PipelineMetrics::global().record_substitution();
                Ok(ChunkResult {
                    output: chunk.to_string(),
                    attempts,
                    substituted: true,
                })
            }
        }
    }

    async fn attempt(
        &self,
        client: &GenerationClient,
        chunk: &str,
        number: u32,
    ) -> (TranslationAttempt, Result<String, AttemptError>) {
        let result = match translate_chunk(client, chunk, self.language).await {
            Ok(output) if self.policy.is_truncated(chunk, &output) => {
                let error = AttemptError::Truncated {
                    input_visible: visible_length(chunk),
                    output_visible: visible_length(&output),
                };
                (output, Err(error))
            }
            Ok(output) => (output.clone(), Ok(output)),
            Err(e) => (String::new(), Err(AttemptError::Generation(e))),
        };

        let (output, result) = result;
        let outcome = match &result {
            Ok(_) => AttemptOutcome::Success,
            Err(AttemptError::Truncated { .. }) => AttemptOutcome::Truncated,
            Err(AttemptError::Generation(e)) => AttemptOutcome::Error(e.to_string()),
        };

        (
            TranslationAttempt {
                input: chunk.to_string(),
                output,
                attempt: number,
                outcome,
            },
            result,
        )
    }
}
