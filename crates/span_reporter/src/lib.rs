//! Span Reporter
//!
//! Receives finished spans from a tracing library, derives RED metrics
//! (invocations, errors, duration, total time) and heartbeats from them, and
//! exports sampled spans to a telemetry backend from a single background
//! thread fed by a bounded lock-free queue.
//!
//! # Pipeline
//!
//! ```text
//! producers ──handle()──► RedMetricsDeriver ──► MetricsRegistry
//!     │                        └──► HeartbeatRegistry ──(HeartbeatScheduler)──► TelemetrySender
//!     └──sampled──► BoundedQueue ──► ExportWorker ──► SpanConverter ──► TelemetrySender
//! ```
//!
//! Producers never block: a full queue drops the span and counts it.
//!
//! # Example
//!
//! ```
//! use span_reporter::{
//!     ApplicationTags, InMemoryRegistry, NullSender, ReporterConfig, Span, SpanIngestHandler,
//!     TraceContext,
//! };
//! use std::sync::Arc;
//!
//! let config = ReporterConfig::default()
//!     .with_source("web-1")
//!     .with_application(ApplicationTags::new("shop", "cart"));
//! let registry = Arc::new(InMemoryRegistry::new());
//! let handler = SpanIngestHandler::new(config, Arc::new(NullSender::new()), registry.clone()).unwrap();
//!
//! let span = Span::new("checkout").with_timestamps(1_700_000_000_000_000, 1_700_000_000_004_000);
//! assert!(handler.handle(TraceContext::new(7, 1, 0), span));
//!
//! assert!(handler.shutdown());
//! assert_eq!(handler.metrics().spans_received(), 1);
//! ```

pub mod config;
pub mod convert;
pub mod derived;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod metrics;
pub mod queue;
pub mod sanitize;
pub mod scheduler;
pub mod sender;
pub mod span;
pub mod tags;
pub mod worker;

// Re-export main types
pub use config::{DerivationBackend, ReporterConfig};
pub use convert::{duration_millis, SpanConverter, SpanLog, WireSpan};
pub use derived::{DerivedMetricsEngine, RedMetricsDeriver, RegistryDerivedMetrics};
pub use error::{ConfigError, OfferError, ReporterError, SendError, TakeError};
pub use handler::SpanIngestHandler;
pub use heartbeat::{DrainReport, HeartbeatKey, HeartbeatRegistry};
pub use metrics::{Counter, GaugeFn, Histogram, InMemoryRegistry, MetricsRegistry};
pub use queue::{BoundedQueue, QueueReceiver};
pub use sanitize::sanitize;
pub use scheduler::{HeartbeatScheduler, HeartbeatStats};
pub use sender::{JsonLinesSender, NullSender, TelemetrySender};
pub use span::{Annotation, Span, SpanKind, TraceContext};
pub use tags::{ApplicationTags, PointTags};
pub use worker::{BoundedSpanQueue, ExportWorker, QueuedSpan, ReporterMetrics};
