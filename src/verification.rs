use crate::generation::GenerationClient;
use crate::i18n::Language;
use crate::markup::visible_length;
use crate::metrics::PipelineMetrics;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Result of the whole-document verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The service returned a corrected document, which becomes final
    Verified(String),
    /// The timer won the race
    TimedOut,
    /// The call failed after its retries
    Failed(String),
    /// The service answered with an empty document or one with less visible text
    Rejected,
    /// Verification disabled, or nothing to verify
    Skipped,
}

impl VerificationOutcome {
    /// The final document: the verified one, or `assembled` unchanged.
    pub fn resolve(self, assembled: String) -> String {
        match self {
            VerificationOutcome::Verified(html) => html,
            _ => assembled,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VerificationOutcome::Verified(_) => "verified",
            VerificationOutcome::TimedOut => "timed out",
            VerificationOutcome::Failed(_) => "failed",
            VerificationOutcome::Rejected => "rejected",
            VerificationOutcome::Skipped => "skipped",
        }
    }
}

/// Build the prompt asking the service to finish localizing a whole document.
pub fn build_verification_prompt(html: &str, language: Language) -> String {
    format!(
        r#"The following HTML document has been translated into {language}. Some visible text may still be in another language.

## Task
- Translate any remaining visible text that is not in {language}
- Leave text that is already in {language} unchanged
- Preserve every tag, attribute, URL and the document structure exactly

## Output
- Return the complete HTML document
- Do not add commentary or code fences
- Do not omit or shorten any part of the document

## HTML document

{html}"#,
        language = language.name(),
        html = html
    )
}

/// Whether a verified document may replace the assembled one.
///
/// Verification only ever adds translations, so any loss of visible text
/// means the service dropped content.
pub fn keeps_visible_text(assembled: &str, verified: &str) -> bool {
    !verified.trim().is_empty() && visible_length(verified) >= visible_length(assembled)
}

/// Run the verification pass, giving up after `timeout`.
///
/// The service call runs as a detached task that reports through a oneshot
/// channel. If the timer fires first the receiver is dropped, so a result
/// arriving later goes nowhere. Failures never propagate: every outcome other
/// than [`VerificationOutcome::Verified`] keeps the assembled document.
pub async fn verify_document(
    client: &GenerationClient,
    html: &str,
    language: Language,
    timeout: Duration,
) -> VerificationOutcome {
    let (tx, rx) = oneshot::channel();
    let task_client = client.clone();
    let prompt = build_verification_prompt(html, language);

    tokio::spawn(async move {
        let result = task_client.generate(&prompt).await;
        if tx.send(result).is_err() {
            debug!("Verification result arrived after the pass was decided, discarding");
        }
    });

    tokio::select! {
        received = rx => match received {
            Ok(Ok(verified)) if !keeps_visible_text(html, &verified) => {
                warn!(
                    "Verification returned less visible text ({} of {}), keeping the assembled document",
                    visible_length(&verified),
                    visible_length(html)
                );
                VerificationOutcome::Rejected
            }
            Ok(Ok(verified)) => {
                info!("Verification pass completed");
                VerificationOutcome::Verified(verified)
            }
            Ok(Err(e)) => {
                warn!("Verification pass failed: {}", e);
                VerificationOutcome::Failed(e.to_string())
            }
            Err(_) => VerificationOutcome::Failed("verification task ended without a result".to_string()),
        },
        _ = sleep(timeout) => {
            warn!("Verification pass timed out after {:?}, keeping the assembled document", timeout);
            PipelineMetrics::global().record_verification_timeout();
            VerificationOutcome::TimedOut
        }
    }
}
