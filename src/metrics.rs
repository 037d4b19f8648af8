//! Process-wide counters for the localization pipeline.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Global pipeline metrics singleton.
pub struct PipelineMetrics {
    /// Requests sent to the generation service (either path)
    api_calls: AtomicUsize,

    /// Requests that ended in an error
    api_failures: AtomicUsize,

    /// Requests sent on the secondary (unauthenticated) path
    fallback_calls: AtomicUsize,

    /// Extra rounds issued because a chunk came back truncated or failed
    truncation_retries: AtomicUsize,

    /// Chunks whose original text was kept in place of a translation
    substituted_chunks: AtomicUsize,

    /// Verification passes abandoned at the timeout
    verification_timeouts: AtomicUsize,
}

static METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

impl PipelineMetrics {
    /// Get the global metrics instance.
    pub fn global() -> &'static PipelineMetrics {
        METRICS.get_or_init(PipelineMetrics::new)
    }

    fn new() -> Self {
        Self {
            api_calls: AtomicUsize::new(0),
            api_failures: AtomicUsize::new(0),
            fallback_calls: AtomicUsize::new(0),
            truncation_retries: AtomicUsize::new(0),
            substituted_chunks: AtomicUsize::new(0),
            verification_timeouts: AtomicUsize::new(0),
        }
    }

    pub fn record_api_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_failure(&self) {
        self.api_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_call(&self) {
        self.fallback_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_truncation_retry(&self) {
        self.truncation_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_substitution(&self) {
        self.substituted_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_verification_timeout(&self) {
        self.verification_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::Relaxed)
    }

    pub fn api_failures(&self) -> usize {
        self.api_failures.load(Ordering::Relaxed)
    }

    pub fn fallback_calls(&self) -> usize {
        self.fallback_calls.load(Ordering::Relaxed)
    }

    pub fn truncation_retries(&self) -> usize {
        self.truncation_retries.load(Ordering::Relaxed)
    }

    pub fn substituted_chunks(&self) -> usize {
        self.substituted_chunks.load(Ordering::Relaxed)
    }

    pub fn verification_timeouts(&self) -> usize {
        self.verification_timeouts.load(Ordering::Relaxed)
    }

    /// Generate a metrics report.
    pub fn report(&self) -> MetricsReport {
        let calls = self.api_calls();
        let failures = self.api_failures();
        let api_success_rate = if calls > 0 {
            (calls.saturating_sub(failures) as f64 / calls as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            api_calls: calls,
            api_failures: failures,
            api_success_rate,
            fallback_calls: self.fallback_calls(),
            truncation_retries: self.truncation_retries(),
            substituted_chunks: self.substituted_chunks(),
            verification_timeouts: self.verification_timeouts(),
        }
    }
}

/// Snapshot of the pipeline counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub api_calls: usize,
    pub api_failures: usize,
    /// API success rate as a percentage (0-100)
    pub api_success_rate: f64,
    pub fallback_calls: usize,
    pub truncation_retries: usize,
    pub substituted_chunks: usize,
    pub verification_timeouts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global instance is shared with every other test in the binary,
    // so counter assertions run against a private instance.

    // ==================== Counter Tests ====================

    #[test]
    fn test_record_counters() {
        let metrics = PipelineMetrics::new();

        metrics.record_api_call();
        metrics.record_api_call();
        metrics.record_api_failure();
        metrics.record_fallback_call();
        metrics.record_truncation_retry();
        metrics.record_substitution();
        metrics.record_verification_timeout();

        assert_eq!(metrics.api_calls(), 2);
        assert_eq!(metrics.api_failures(), 1);
        assert_eq!(metrics.fallback_calls(), 1);
        assert_eq!(metrics.truncation_retries(), 1);
        assert_eq!(metrics.substituted_chunks(), 1);
        assert_eq!(metrics.verification_timeouts(), 1);
    }

    // ==================== Report Tests ====================

    #[test]
    fn test_report_empty() {
        let metrics = PipelineMetrics::new();

        let report = metrics.report();
        assert_eq!(report.api_calls, 0);
        assert_eq!(report.api_success_rate, 0.0);
    }

    #[test]
    fn test_report_success_rate() {
        let metrics = PipelineMetrics::new();

        for _ in 0..4 {
            metrics.record_api_call();
        }
        metrics.record_api_failure();

        let report = metrics.report();
        assert!((report.api_success_rate - 75.0).abs() < 0.01);
    }

    #[test]
    fn test_report_serializes() {
        let metrics = PipelineMetrics::new();

        let json = serde_json::to_string(&metrics.report()).expect("Should serialize");
        assert!(json.contains("fallback_calls"));
        assert!(json.contains("verification_timeouts"));
    }
}
