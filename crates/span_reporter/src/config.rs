//! Reporter configuration.

use crate::error::ConfigError;
use crate::tags::ApplicationTags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50_000;

/// Which RED-metrics backend the handler derives through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DerivationBackend {
    /// `tracing.derived.*` delta counters and histograms, with heartbeats.
    #[default]
    Reporter,
    /// Plain counters and a duration summary in a generic registry, no heartbeats.
    Registry,
}

/// Configuration for [`SpanIngestHandler`](crate::SpanIngestHandler).
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use span_reporter::ReporterConfig;
///
/// let config = ReporterConfig::from_json_str(
///     r#"{ "source": "web-1", "application": { "application": "shop", "service": "cart" } }"#,
/// ).unwrap();
/// assert_eq!(config.max_queue_size, 50_000);
/// assert_eq!(config.application.service, "cart");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ReporterConfig {
    /// Capacity of the span export queue.
    ///
    /// Default: 50 000
    pub max_queue_size: usize,

    /// Source reported with every span and derived metric.
    ///
    /// Default: the `HOSTNAME` environment variable, or `localhost`
    pub source: String,

    /// Identity tags attached to every exported span.
    pub application: ApplicationTags,

    /// Span tag keys copied onto RED metrics and heartbeats.
    pub red_metrics_custom_tag_keys: BTreeSet<String>,

    /// Read by the external runtime-metrics reporter; not used here.
    ///
    /// Default: true
    pub extract_jvm_metrics: bool,

    /// `component` tag of heartbeat points.
    ///
    /// Default: `span_reporter`
    pub heartbeat_component: String,

    /// Seconds between heartbeat drains.
    ///
    /// Default: 60
    pub heartbeat_interval_secs: u64,

    /// How long shutdown waits for the export worker.
    ///
    /// Default: 5000
    pub shutdown_timeout_ms: u64,

    pub derivation: DerivationBackend,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            source: default_source(),
            application: ApplicationTags::default(),
            red_metrics_custom_tag_keys: BTreeSet::new(),
            extract_jvm_metrics: true,
            heartbeat_component: "span_reporter".to_string(),
            heartbeat_interval_secs: 60,
            shutdown_timeout_ms: 5_000,
            derivation: DerivationBackend::default(),
        }
    }
}

fn default_source() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl ReporterConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Rejects a zero queue size or heartbeat interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "max-queue-size must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat-interval-secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Heartbeat drain period as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Shutdown wait as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Sets the export queue capacity.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Sets the reported source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the application identity tags.
    pub fn with_application(mut self, application: ApplicationTags) -> Self {
        self.application = application;
        self
    }

    /// Adds a span tag key to the RED-metrics allowlist.
    pub fn with_custom_tag_key(mut self, key: impl Into<String>) -> Self {
        self.red_metrics_custom_tag_keys.insert(key.into());
        self
    }

    /// Sets the heartbeat `component` tag.
    pub fn with_heartbeat_component(mut self, component: impl Into<String>) -> Self {
        self.heartbeat_component = component.into();
        self
    }

    /// Sets the heartbeat period, rounded down to whole seconds (at least one).
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_secs = interval.as_secs().max(1);
        self
    }

    /// Sets how long shutdown waits for the export worker.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Selects the RED-metrics backend.
    pub fn with_derivation(mut self, derivation: DerivationBackend) -> Self {
        self.derivation = derivation;
        self
    }
}
