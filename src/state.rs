//! # Application State Management
//!
//! This module manages state shared by every HTTP request handler.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: Multiple HTTP requests run simultaneously and all need access to the same state
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time (but not both)
//! - **Used for**: The metrics, which every request updates
//!
//! ## What is *not* locked:
//! The configuration is fixed once the server starts, so it is shared as a
//! plain `Arc<AppConfig>`. The upload pipeline holds no shared mutable state
//! at all: concurrent uploads never contend because each one gets its own
//! unique file name.

use crate::config::AppConfig;
use crate::library::MusicLibrary;
use crate::pipeline::{Transcoder, UploadPipeline};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: Cloning only bumps reference counts, every clone
///   sees the same library, pipeline and metrics
#[derive(Clone)]
pub struct AppState {
    /// Startup configuration (read-only)
    pub config: Arc<AppConfig>,

    /// The music directory
    pub library: MusicLibrary,

    /// Validate → store → normalize
    pub pipeline: UploadPipeline,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: load and reliability
/// - **endpoint_metrics**: per-route statistics (keyed by route pattern, so
///   `/music/{filename}` is one entry no matter how many files exist)
/// - **pipeline**: what happened to uploads
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    pub pipeline: PipelineMetrics,
}

/// Counters for the upload pipeline.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineMetrics {
    /// Uploads that passed validation and were stored
    pub uploads_accepted: u64,
    /// Uploads refused before anything was stored
    pub uploads_rejected: u64,
    pub transcodes_succeeded: u64,
    pub transcodes_failed: u64,
}

/// One pipeline event, recorded by the upload handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    UploadAccepted,
    UploadRejected,
    TranscodeSucceeded,
    TranscodeFailed,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Wire the shared state together.
    ///
    /// `library` must already be initialized (`MusicLibrary::init`), which is
    /// what guarantees the directory exists before the first request.
    pub fn new(config: AppConfig, library: MusicLibrary, transcoder: Arc<dyn Transcoder>) -> Self {
        let pipeline = UploadPipeline::new(&config, library.clone(), transcoder);

        Self {
            config: Arc::new(config),
            library,
            pipeline,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    /// Increment the total error counter (4xx and 5xx responses).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## Parameters:
    /// - **endpoint**: Method plus route pattern (e.g., "GET /music/{filename}")
    /// - **duration_ms**: How long the request took to process (in milliseconds)
    /// - **is_error**: Whether this request resulted in an error
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record_pipeline_event(&self, event: PipelineEvent) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let pipeline = &mut metrics.pipeline;
        match event {
            PipelineEvent::UploadAccepted => pipeline.uploads_accepted += 1,
            PipelineEvent::UploadRejected => pipeline.uploads_rejected += 1,
            PipelineEvent::TranscodeSucceeded => pipeline.transcodes_succeeded += 1,
            PipelineEvent::TranscodeFailed => pipeline.transcodes_failed += 1,
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Clones so the lock isn't held while the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error Rate = Number of Errors ÷ Total Requests (0.0 to 1.0)
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::transcoder::fakes::CopyTranscoder;

    async fn state() -> (tempfile::TempDir, AppState) {
        let tmp = tempfile::tempdir().unwrap();
        let library = MusicLibrary::init(tmp.path(), "mp3").await.unwrap();
        let state = AppState::new(AppConfig::default(), library, Arc::new(CopyTranscoder::default()));
        (tmp, state)
    }

    #[tokio::test]
    async fn test_endpoint_metrics() {
        let (_tmp, state) = state().await;
        state.record_endpoint_request("POST /upload", 100, false);
        state.record_endpoint_request("POST /upload", 300, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /upload"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 200.0);
        assert_eq!(metric.error_rate(), 0.5);
        assert_eq!(EndpointMetric::default().error_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_pipeline_counters() {
        let (_tmp, state) = state().await;
        state.record_pipeline_event(PipelineEvent::UploadAccepted);
        state.record_pipeline_event(PipelineEvent::UploadAccepted);
        state.record_pipeline_event(PipelineEvent::UploadRejected);
        state.record_pipeline_event(PipelineEvent::TranscodeFailed);

        assert_eq!(
            state.get_metrics_snapshot().pipeline,
            PipelineMetrics {
                uploads_accepted: 2,
                uploads_rejected: 1,
                transcodes_succeeded: 0,
                transcodes_failed: 1,
            }
        );
    }
}
