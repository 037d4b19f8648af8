//! Localization run orchestration.
//!
//! A [`Pipeline`] drives one document at a time through chunking, sequential
//! chunk translation and the verification pass, publishing its [`Phase`] to a
//! [`ProgressListener`] as it goes.

use crate::config::Config;
use crate::document::Document;
use crate::generation::{GenerationClient, GenerationError};
use crate::retry::RetryConfig;
use crate::splitter::chunk_html;
use crate::translation::{ChunkTranslator, TranslationAttempt, TruncationPolicy};
use crate::verification::{verify_document, VerificationOutcome};
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors that end a localization run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("A localization run is already in progress")]
    Busy,

    #[error("Localization run cancelled")]
    Cancelled,

    #[error("Generation service rejected the credentials on every path: {0}")]
    Unauthorized(String),

    #[error("Generation service failed: {0}")]
    Transport(String),
}

impl From<GenerationError> for PipelineError {
    fn from(error: GenerationError) -> Self {
        match error {
            GenerationError::Unauthorized(detail) => PipelineError::Unauthorized(detail),
            other => PipelineError::Transport(other.to_string()),
        }
    }
}

/// Pipeline state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Ready to start a run
    Idle,
    /// `chunk_index` chunks of `chunk_total` are done
    Translating {
        chunk_index: usize,
        chunk_total: usize,
    },
    /// All chunks assembled, verification pass running
    Verifying,
    /// Final document produced
    Done,
    /// The last run ended with an error
    Failed,
}

impl Phase {
    /// Check if this state allows starting a new run
    pub fn can_start(&self) -> bool {
        matches!(self, Phase::Idle | Phase::Done | Phase::Failed)
    }

    /// Progress percentage; translation covers 0-90, verification the rest.
    pub fn percentage(&self) -> u8 {
        match *self {
            Phase::Translating {
                chunk_index,
                chunk_total,
            } if chunk_total > 0 => (chunk_index.min(chunk_total) * 90 / chunk_total) as u8,
            Phase::Verifying => 90,
            Phase::Done => 100,
            _ => 0,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Translating {
                chunk_index,
                chunk_total,
            } => write!(f, "translating {}/{}", chunk_index, chunk_total),
            Phase::Verifying => write!(f, "verifying"),
            Phase::Done => write!(f, "done"),
            Phase::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot handed to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub phase: Phase,
    pub chunk_index: usize,
    pub chunk_total: usize,
    pub percentage: u8,
}

impl Progress {
    fn new(phase: Phase, chunk_total: usize) -> Self {
        let chunk_index = match phase {
            Phase::Translating { chunk_index, .. } => chunk_index,
            Phase::Verifying | Phase::Done => chunk_total,
            Phase::Idle | Phase::Failed => 0,
        };

        Self {
            phase,
            chunk_index,
            chunk_total,
            percentage: phase.percentage(),
        }
    }
}

/// Receives a notification after every phase transition and completed chunk.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, progress: &Progress);
}

/// Writes progress to the log.
pub struct LoggingListener;

impl ProgressListener for LoggingListener {
    fn on_progress(&self, progress: &Progress) {
        info!("[{:>3}%] {}", progress.percentage, progress.phase);
    }
}

/// Ignores progress.
pub struct NoopListener;

impl ProgressListener for NoopListener {
    fn on_progress(&self, _progress: &Progress) {}
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Final localized document
    pub html: String,
    pub chunk_total: usize,
    /// Chunks whose original text was kept
    pub substituted_chunks: usize,
    pub verification: VerificationOutcome,
    /// Every translation attempt, in chunk order
    pub attempts: Vec<TranslationAttempt>,
}

/// Orchestrates localization runs for one caller.
///
/// At most one run is active per pipeline. Each run takes a generation token;
/// [`Pipeline::abandon`] invalidates it so a run still in flight can no longer
/// publish progress or results.
pub struct Pipeline {
    client: GenerationClient,
    listener: Arc<dyn ProgressListener>,
    chunk_max_chars: usize,
    policy: TruncationPolicy,
    chunk_retry: RetryConfig,
    verify: bool,
    verification_timeout: Duration,
    phase: Mutex<Phase>,
    generation: AtomicU64,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self::with_client(GenerationClient::new(config)?))
    }

    /// Build a pipeline around an existing client, using its configuration.
    pub fn with_client(client: GenerationClient) -> Self {
        let config = client.config();
        let chunk_max_chars = config.chunk_max_chars;
        let policy = TruncationPolicy::from_config(config);
        let verify = config.verify;
        let verification_timeout = config.verification_timeout;

        Self {
            client,
            listener: Arc::new(NoopListener),
            chunk_max_chars,
            policy,
            chunk_retry: RetryConfig::truncation(),
            verify,
            verification_timeout,
            phase: Mutex::new(Phase::Idle),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Override the retry policy for truncated or failed chunks.
    pub fn with_chunk_retry_config(mut self, retry: RetryConfig) -> Self {
        self.chunk_retry = retry;
        self
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detach the active run, if any, and return to `Idle`.
    ///
    /// The abandoned run keeps going until its next suspension point but
    /// publishes nothing more and ends with [`PipelineError::Cancelled`].
    pub fn abandon(&self) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *phase = Phase::Idle;
        drop(phase);

        info!("Active localization run abandoned");
        self.listener.on_progress(&Progress::new(Phase::Idle, 0));
    }

    /// Localize `document`.
    ///
    /// Returns the complete document, possibly with some chunks left in the
    /// source language, or an error. No partial document is ever returned.
    pub async fn run(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let run_id = self.begin()?;
        info!(
            "Starting localization run {} into {} ({} bytes)",
            run_id,
            document.language.name(),
            document.html.len()
        );

        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Localization run {} cancelled", run_id);
                Err(PipelineError::Cancelled)
            }

            result = self.execute(document, run_id) => result,
        };

        match result {
            Ok(report) => {
                if !self.publish(run_id, Phase::Done, report.chunk_total) {
                    return Err(PipelineError::Cancelled);
                }
                info!(
                    "Localization run {} done: {} chunks, {} substituted, verification {}",
                    run_id,
                    report.chunk_total,
                    report.substituted_chunks,
                    report.verification.label()
                );
                Ok(report)
            }
            Err(PipelineError::Cancelled) => {
                self.publish(run_id, Phase::Idle, 0);
                Err(PipelineError::Cancelled)
            }
            Err(e) => {
                error!("Localization run {} failed: {}", run_id, e);
                if self.publish(run_id, Phase::Failed, 0) {
                    self.publish(run_id, Phase::Idle, 0);
                }
                Err(e)
            }
        }
    }

    /// Claim the pipeline for a new run and return its generation token.
    fn begin(&self) -> Result<u64, PipelineError> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if !phase.can_start() {
            warn!("Rejected localization run: pipeline is {}", *phase);
            return Err(PipelineError::Busy);
        }

        let run_id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *phase = Phase::Translating {
            chunk_index: 0,
            chunk_total: 0,
        };
        Ok(run_id)
    }

    fn is_current(&self, run_id: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == run_id
    }

    fn ensure_current(&self, run_id: u64) -> Result<(), PipelineError> {
        if self.is_current(run_id) {
            Ok(())
        } else {
            debug!("Run {} is stale, stopping", run_id);
            Err(PipelineError::Cancelled)
        }
    }

    /// Move to `next` and notify the listener, unless the run is stale.
    fn publish(&self, run_id: u64, next: Phase, chunk_total: usize) -> bool {
        {
            let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.is_current(run_id) {
                return false;
            }
            *phase = next;
        }

        self.listener.on_progress(&Progress::new(next, chunk_total));
        true
    }

    fn advance(&self, run_id: u64, next: Phase, chunk_total: usize) -> Result<(), PipelineError> {
        if self.publish(run_id, next, chunk_total) {
            Ok(())
        } else {
            Err(PipelineError::Cancelled)
        }
    }

    async fn execute(&self, document: &Document, run_id: u64) -> Result<RunReport, PipelineError> {
        let language = document.language;

        if document.html.is_empty() || language.is_canonical() {
            debug!("Nothing to translate, returning the document unchanged");
            return Ok(RunReport {
                html: document.html.clone(),
                chunk_total: 0,
                substituted_chunks: 0,
                verification: VerificationOutcome::Skipped,
                attempts: Vec::new(),
            });
        }

        let chunks = chunk_html(&document.html, self.chunk_max_chars);
        let chunk_total = chunks.len();
        info!("Document split into {} chunks", chunk_total);

        self.advance(
            run_id,
            Phase::Translating {
                chunk_index: 0,
                chunk_total,
            },
            chunk_total,
        )?;

        let translator = ChunkTranslator::new(&self.client, language, self.policy)
            .with_retry_config(self.chunk_retry.clone());

        let mut outputs = Vec::with_capacity(chunk_total);
        let mut attempts = Vec::new();
        let mut substituted_chunks = 0;
        let mut service_answered = false;

        for (index, chunk) in chunks.iter().enumerate() {
            debug!(
                "Translating chunk {}/{} ({} chars)",
                index + 1,
                chunk_total,
                chunk.chars().count()
            );
            let result = translator.translate(chunk).await?;
            self.ensure_current(run_id)?;

            // Substitution covers a flaky service, not one that never answered.
            service_answered |= result.service_answered();
            if let Some(detail) = result.transport_failure() {
                if !service_answered {
                    return Err(PipelineError::Transport(detail.to_string()));
                }
            }

            if result.substituted {
                substituted_chunks += 1;
            }
            outputs.push(result.output);
            attempts.extend(result.attempts);

            self.advance(
                run_id,
                Phase::Translating {
                    chunk_index: index + 1,
                    chunk_total,
                },
                chunk_total,
            )?;
        }

        let assembled = outputs.concat();
        self.advance(run_id, Phase::Verifying, chunk_total)?;

        let verification = if self.verify {
            verify_document(
                &self.client,
                &assembled,
                language,
                self.verification_timeout,
            )
            .await
        } else {
            VerificationOutcome::Skipped
        };
        self.ensure_current(run_id)?;

        Ok(RunReport {
            html: verification.clone().resolve(assembled),
            chunk_total,
            substituted_chunks,
            verification,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::AuthCapability;
    use crate::i18n::Language;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const VERIFY_MARKER: &str = "Translate any remaining visible text";
    const TWO_PARAGRAPHS: &str = "<p>Hello world.</p><p>Second paragraph.</p>";

    /// Collects every notification for later assertions.
    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<Progress>>,
    }

    impl RecordingListener {
        fn phases(&self) -> Vec<Phase> {
            self.events.lock().unwrap().iter().map(|p| p.phase).collect()
        }

        fn percentages(&self) -> Vec<u8> {
            self.events.lock().unwrap().iter().map(|p| p.percentage).collect()
        }
    }

    impl ProgressListener for RecordingListener {
        fn on_progress(&self, progress: &Progress) {
            self.events.lock().unwrap().push(*progress);
        }
    }

    fn create_test_config(server: &MockServer) -> Config {
        let mut config = Config::with_endpoints(
            format!("{}/primary", server.uri()),
            format!("{}/fallback", server.uri()),
        );
        config.session_token = Some("test-token".to_string());
        config.chunk_max_chars = 30;
        config.verification_timeout = Duration::from_secs(5);
        config
    }

    fn create_pipeline(config: Config, listener: Arc<RecordingListener>) -> Pipeline {
        let client = GenerationClient::new(config)
            .expect("client should build")
            .with_auth(Arc::new(AuthCapability::known(true)))
            .with_retry_config(RetryConfig::new(2, Duration::from_millis(5)));

        Pipeline::with_client(client)
            .with_listener(listener)
            .with_chunk_retry_config(RetryConfig::new(2, Duration::from_millis(5)))
    }

    async fn mount_chunk_translations(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/primary"))
            .and(body_string_contains("Hello world."))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>Hola mundo.</p>"))
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .and(body_string_contains("Second paragraph."))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>Segundo párrafo.</p>"))
            .mount(server)
            .await;
    }

    // ==================== Phase Tests ====================

    #[test]
    fn test_phase_percentages() {
        assert_eq!(Phase::Idle.percentage(), 0);
        assert_eq!(
            Phase::Translating {
                chunk_index: 0,
                chunk_total: 4
            }
            .percentage(),
            0
        );
        assert_eq!(
            Phase::Translating {
                chunk_index: 2,
                chunk_total: 4
            }
            .percentage(),
            45
        );
        assert_eq!(
            Phase::Translating {
                chunk_index: 4,
                chunk_total: 4
            }
            .percentage(),
            90
        );
        assert_eq!(Phase::Verifying.percentage(), 90);
        assert_eq!(Phase::Done.percentage(), 100);
        assert_eq!(Phase::Failed.percentage(), 0);
    }

    #[test]
    fn test_phase_zero_total_does_not_divide() {
        let phase = Phase::Translating {
            chunk_index: 0,
            chunk_total: 0,
        };
        assert_eq!(phase.percentage(), 0);
    }

    #[test]
    fn test_phase_can_start() {
        assert!(Phase::Idle.can_start());
        assert!(Phase::Done.can_start());
        assert!(Phase::Failed.can_start());
        assert!(!Phase::Verifying.can_start());
        assert!(!Phase::Translating {
            chunk_index: 1,
            chunk_total: 2
        }
        .can_start());
    }

    #[test]
    fn test_phase_display() {
        let phase = Phase::Translating {
            chunk_index: 1,
            chunk_total: 3,
        };
        assert_eq!(phase.to_string(), "translating 1/3");
        assert_eq!(Phase::Verifying.to_string(), "verifying");
    }

    #[test]
    fn test_pipeline_error_from_generation_error() {
        assert_eq!(
            PipelineError::from(GenerationError::Unauthorized("x".into())),
            PipelineError::Unauthorized("x".into())
        );
        assert!(matches!(
            PipelineError::from(GenerationError::NonRetryable("x".into())),
            PipelineError::Transport(_)
        ));
    }

    // ==================== Run Tests ====================

    #[tokio::test]
    async fn test_run_translates_chunks_in_order() {
        let server = MockServer::start().await;
        mount_chunk_translations(&server).await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .and(body_string_contains(VERIFY_MARKER))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<p>Hola mundo.</p><p>Segundo párrafo.</p>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let listener = Arc::new(RecordingListener::default());
        let pipeline = create_pipeline(create_test_config(&server), listener.clone());
        let document = Document::new(TWO_PARAGRAPHS, Language::SPANISH);

        let report = pipeline
            .run(&document, &CancellationToken::new())
            .await
            .expect("Run should succeed");

        assert_eq!(report.html, "<p>Hola mundo.</p><p>Segundo párrafo.</p>");
        assert_eq!(report.chunk_total, 2);
        assert_eq!(report.substituted_chunks, 0);
        assert!(matches!(report.verification, VerificationOutcome::Verified(_)));
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[0].input, "<p>Hello world.</p>");
        assert_eq!(report.attempts[1].input, "<p>Second paragraph.</p>");

        assert_eq!(
            listener.phases(),
            vec![
                Phase::Translating {
                    chunk_index: 0,
                    chunk_total: 2
                },
                Phase::Translating {
                    chunk_index: 1,
                    chunk_total: 2
                },
                Phase::Translating {
                    chunk_index: 2,
                    chunk_total: 2
                },
                Phase::Verifying,
                Phase::Done,
            ]
        );
        assert_eq!(listener.percentages(), vec![0, 45, 90, 90, 100]);
        assert_eq!(pipeline.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn test_verification_timeout_returns_assembled_document() {
        let server = MockServer::start().await;
        mount_chunk_translations(&server).await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .and(body_string_contains(VERIFY_MARKER))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<p>too late</p>")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let mut config = create_test_config(&server);
        config.verification_timeout = Duration::from_millis(50);
        let listener = Arc::new(RecordingListener::default());
        let pipeline = create_pipeline(config, listener.clone());
        let document = Document::new(TWO_PARAGRAPHS, Language::SPANISH);

        let report = pipeline
            .run(&document, &CancellationToken::new())
            .await
            .expect("Run should succeed");

        assert_eq!(report.verification, VerificationOutcome::TimedOut);
        assert_eq!(report.html, "<p>Hola mundo.</p><p>Segundo párrafo.</p>");

        let phases = listener.phases();
        assert_eq!(&phases[phases.len() - 2..], &[Phase::Verifying, Phase::Done]);

        // The late verification result must not touch the finished run.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(pipeline.phase(), Phase::Done);
        assert_eq!(listener.phases().len(), phases.len());
    }

    #[tokio::test]
    async fn test_verification_disabled() {
        let server = MockServer::start().await;
        mount_chunk_translations(&server).await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .and(body_string_contains(VERIFY_MARKER))
            .respond_with(ResponseTemplate::new(200).set_body_string("unused"))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = create_test_config(&server);
        config.verify = false;
        let pipeline = create_pipeline(config, Arc::new(RecordingListener::default()));

        let report = pipeline
            .run(
                &Document::new(TWO_PARAGRAPHS, Language::SPANISH),
                &CancellationToken::new(),
            )
            .await
            .expect("Run should succeed");

        assert_eq!(report.verification, VerificationOutcome::Skipped);
        assert_eq!(report.html, "<p>Hola mundo.</p><p>Segundo párrafo.</p>");
    }

    #[tokio::test]
    async fn test_failed_chunk_is_substituted() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .and(body_string_contains("Hello world."))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>Hola mundo.</p>"))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .and(body_string_contains("Second paragraph."))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .expect(2)
            .mount(&server)
            .await;

        let mut config = create_test_config(&server);
        config.verify = false;
        let pipeline = create_pipeline(config, Arc::new(RecordingListener::default()));

        let report = pipeline
            .run(
                &Document::new(TWO_PARAGRAPHS, Language::SPANISH),
                &CancellationToken::new(),
            )
            .await
            .expect("Run should succeed");

        assert_eq!(report.html, "<p>Hola mundo.</p><p>Second paragraph.</p>");
        assert_eq!(report.substituted_chunks, 1);
    }

    #[tokio::test]
    async fn test_unauthorized_everywhere_fails_the_run() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/fallback"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"error": "Unauthorized"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let listener = Arc::new(RecordingListener::default());
        let pipeline = create_pipeline(create_test_config(&server), listener.clone());

        let err = pipeline
            .run(
                &Document::new(TWO_PARAGRAPHS, Language::SPANISH),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Unauthorized(_)));
        assert_eq!(pipeline.phase(), Phase::Idle);

        let phases = listener.phases();
        assert_eq!(&phases[phases.len() - 2..], &[Phase::Failed, Phase::Idle]);
        assert!(!phases.contains(&Phase::Done));
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_the_run() {
        let server = MockServer::start().await;

        // First chunk only: two transport attempts, then one single-shot retry
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .expect(3)
            .mount(&server)
            .await;

        let listener = Arc::new(RecordingListener::default());
        let pipeline = create_pipeline(create_test_config(&server), listener.clone());

        let err = pipeline
            .run(
                &Document::new(TWO_PARAGRAPHS, Language::SPANISH),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Transport(ref msg) if msg.contains("500")));
        assert_eq!(pipeline.phase(), Phase::Idle);

        let phases = listener.phases();
        assert_eq!(&phases[phases.len() - 2..], &[Phase::Failed, Phase::Idle]);
        assert!(!phases.contains(&Phase::Done));
    }

    #[tokio::test]
    async fn test_rejected_request_fails_the_run() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .respond_with(ResponseTemplate::new(422).set_body_string("prompt too long"))
            .expect(1)
            .mount(&server)
            .await;

        let pipeline = create_pipeline(
            create_test_config(&server),
            Arc::new(RecordingListener::default()),
        );

        let err = pipeline
            .run(
                &Document::new(TWO_PARAGRAPHS, Language::SPANISH),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Transport(ref msg) if msg.contains("prompt too long")));
    }

    #[tokio::test]
    async fn test_transport_failure_after_an_answer_is_substituted() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .and(body_string_contains("Hello world."))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>Hola mundo.</p>"))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .and(body_string_contains("Second paragraph."))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let mut config = create_test_config(&server);
        config.verify = false;
        let pipeline = create_pipeline(config, Arc::new(RecordingListener::default()));

        let report = pipeline
            .run(
                &Document::new(TWO_PARAGRAPHS, Language::SPANISH),
                &CancellationToken::new(),
            )
            .await
            .expect("Run should succeed");

        assert_eq!(report.html, "<p>Hola mundo.</p><p>Second paragraph.</p>");
        assert_eq!(report.substituted_chunks, 1);
        assert_eq!(pipeline.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn test_canonical_language_short_circuits() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("unused"))
            .expect(0)
            .mount(&server)
            .await;

        let pipeline = create_pipeline(create_test_config(&server), Arc::new(RecordingListener::default()));
        let report = pipeline
            .run(
                &Document::new(TWO_PARAGRAPHS, Language::ENGLISH),
                &CancellationToken::new(),
            )
            .await
            .expect("Run should succeed");

        assert_eq!(report.html, TWO_PARAGRAPHS);
        assert_eq!(report.chunk_total, 0);
        assert_eq!(pipeline.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn test_empty_document() {
        let server = MockServer::start().await;
        let pipeline = create_pipeline(create_test_config(&server), Arc::new(RecordingListener::default()));

        let report = pipeline
            .run(&Document::new("", Language::FRENCH), &CancellationToken::new())
            .await
            .expect("Run should succeed");

        assert!(report.html.is_empty());
        assert_eq!(report.chunk_total, 0);
        assert!(report.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_run_can_restart_after_done() {
        let server = MockServer::start().await;
        mount_chunk_translations(&server).await;

        let mut config = create_test_config(&server);
        config.verify = false;
        let pipeline = create_pipeline(config, Arc::new(RecordingListener::default()));
        let document = Document::new(TWO_PARAGRAPHS, Language::SPANISH);

        let first = pipeline.run(&document, &CancellationToken::new()).await.unwrap();
        let second = pipeline.run(&document, &CancellationToken::new()).await.unwrap();

        assert_eq!(first.html, second.html);
        assert_eq!(pipeline.phase(), Phase::Done);
    }

    // ==================== Concurrency Tests ====================

    #[tokio::test]
    async fn test_second_run_while_active_is_busy() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<p>Hola mundo.</p>")
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let mut config = create_test_config(&server);
        config.verify = false;
        let pipeline = create_pipeline(config, Arc::new(RecordingListener::default()));
        let document = Document::new("<p>Hello world.</p>", Language::SPANISH);
        let cancel = CancellationToken::new();

        let (first, second) = tokio::join!(pipeline.run(&document, &cancel), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pipeline.run(&document, &cancel).await
        });

        assert!(first.is_ok());
        assert_eq!(second.unwrap_err(), PipelineError::Busy);
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_run() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<p>Hola mundo.</p>")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let listener = Arc::new(RecordingListener::default());
        let pipeline = create_pipeline(create_test_config(&server), listener.clone());
        let document = Document::new(TWO_PARAGRAPHS, Language::SPANISH);
        let cancel = CancellationToken::new();

        let (result, _) = tokio::join!(pipeline.run(&document, &cancel), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        assert_eq!(result.unwrap_err(), PipelineError::Cancelled);
        assert_eq!(pipeline.phase(), Phase::Idle);
        assert!(!listener.phases().contains(&Phase::Done));
    }

    #[tokio::test]
    async fn test_abandoned_run_publishes_nothing() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/primary"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<p>Hola mundo.</p>")
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let listener = Arc::new(RecordingListener::default());
        let pipeline = create_pipeline(create_test_config(&server), listener.clone());
        let document = Document::new("<p>Hello world.</p>", Language::SPANISH);

        let token = CancellationToken::new();
        let (result, _) = tokio::join!(pipeline.run(&document, &token), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pipeline.abandon();
        });

        assert_eq!(result.unwrap_err(), PipelineError::Cancelled);
        assert_eq!(pipeline.phase(), Phase::Idle);
        assert_eq!(
            listener.phases(),
            vec![
                Phase::Translating {
                    chunk_index: 0,
                    chunk_total: 1
                },
                Phase::Idle,
            ]
        );
    }
}
