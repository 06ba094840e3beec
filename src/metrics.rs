//! Metrics for conversation storage and completion runs
//!
//! Everything is recorded through the `metrics` facade. Nothing is exported
//! unless a recorder is installed, see [`init_metrics_exporter`].
//!
//! # Metrics
//!
//! - `chats_created_total`: Counter of chats created
//! - `chat_messages_appended_total`: Counter of stored messages by role
//! - `chat_list_skipped_total`: Counter of index entries skipped while listing
//! - `completion_requests_total`: Counter of completion runs by model and status
//! - `completion_duration_seconds`: Histogram of backend round-trip time
//! - `completion_tokens_total`: Counter of tokens by model and kind
//! - `completion_active_count`: Gauge of completion runs in flight
//!
//! # Examples
//!
//! ```
//! use parley::completion::TokenUsage;
//! use parley::metrics::CompletionMetrics;
//!
//! let metrics = CompletionMetrics::new("gpt-4o-mini");
//! metrics.record_completion(&TokenUsage::new(12, 3));
//! ```

use crate::chat::Role;
use crate::completion::TokenUsage;
use metrics::{counter, decrement_gauge, histogram, increment_counter, increment_gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Record a newly created chat
pub fn record_chat_created() {
    increment_counter!("chats_created_total");
}

/// Record a message stored in a chat log
pub fn record_message_appended(role: Role) {
    increment_counter!("chat_messages_appended_total", "role" => role.as_str());
}

/// Record an index entry that could not be resolved while listing chats
pub fn record_list_entry_skipped() {
    increment_counter!("chat_list_skipped_total");
}

/// Metrics for a single completion run
///
/// Records exactly once: either through [`record_completion`],
/// [`record_error`], or on drop as an abandoned run. The flag is atomic so
/// the guard can be held across `.await` points in `Send` futures.
///
/// [`record_completion`]: CompletionMetrics::record_completion
/// [`record_error`]: CompletionMetrics::record_error
#[derive(Debug)]
pub struct CompletionMetrics {
    model: String,
    start: Instant,
    recorded: AtomicBool,
}

impl CompletionMetrics {
    /// Start tracking a completion run against `model`
    ///
    /// Increments the in-flight gauge.
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        increment_gauge!("completion_active_count", 1.0, "model" => model.clone());

        Self {
            model,
            start: Instant::now(),
            recorded: AtomicBool::new(false),
        }
    }

    /// Record a successful run and its token usage
    pub fn record_completion(&self, usage: &TokenUsage) {
        if !self.mark_recorded() {
            return;
        }

        histogram!(
            "completion_duration_seconds",
            self.elapsed().as_secs_f64(),
            "model" => self.model.clone()
        );
        counter!(
            "completion_tokens_total",
            u64::from(usage.prompt_tokens),
            "model" => self.model.clone(),
            "kind" => "prompt"
        );
        counter!(
            "completion_tokens_total",
            u64::from(usage.completion_tokens),
            "model" => self.model.clone(),
            "kind" => "completion"
        );
        self.finish("success");
    }

    /// Record a failed run
    ///
    /// # Arguments
    ///
    /// * `kind` - Error label, usually [`crate::error::error_kind`]
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::metrics::CompletionMetrics;
    ///
    /// let metrics = CompletionMetrics::new("gpt-4o-mini");
    /// metrics.record_error("cancelled");
    /// ```
    pub fn record_error(&self, kind: &str) {
        if !self.mark_recorded() {
            return;
        }
        self.finish(kind);
    }

    /// Model the run targets
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Time since the run started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether the run has already been recorded
    pub fn is_recorded(&self) -> bool {
        self.recorded.load(Ordering::Acquire)
    }

    fn mark_recorded(&self) -> bool {
        !self.recorded.swap(true, Ordering::AcqRel)
    }

    fn finish(&self, status: &str) {
        increment_counter!(
            "completion_requests_total",
            "model" => self.model.clone(),
            "status" => status.to_string()
        );
        decrement_gauge!("completion_active_count", 1.0, "model" => self.model.clone());
    }
}

impl Drop for CompletionMetrics {
    fn drop(&mut self) {
        if self.mark_recorded() {
            self.finish("abandoned");
        }
    }
}

/// Install the Prometheus exporter
///
/// Only has an effect when built with the `prometheus` feature. Safe to call
/// otherwise.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        if let Err(e) = PrometheusBuilder::new().install() {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        }
    }
}
