//! Entry point for finished spans.

use crate::config::{DerivationBackend, ReporterConfig};
use crate::convert::SpanConverter;
use crate::derived::{DerivedMetricsEngine, RedMetricsDeriver, RegistryDerivedMetrics};
use crate::error::{OfferError, ReporterError};
use crate::heartbeat::{DrainReport, HeartbeatRegistry};
use crate::metrics::MetricsRegistry;
use crate::queue::BoundedQueue;
use crate::sender::TelemetrySender;
use crate::span::{Span, TraceContext};
use crate::tags::PointTags;
use crate::worker::{
    BoundedSpanQueue, ExportWorker, QueuedSpan, ReporterMetrics, QUEUE_REMAINING_CAPACITY_GAUGE,
    QUEUE_SIZE_GAUGE,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives finished spans from the tracing library.
///
/// Every complete span feeds RED metrics and heartbeat discovery. Sampled spans
/// are additionally queued for export by a background worker. `handle` never
/// blocks and never fails: when the queue is full the span is dropped and
/// counted.
///
/// The worker starts on construction and stops on [`shutdown`](Self::shutdown)
/// or drop.
pub struct SpanIngestHandler {
    config: ReporterConfig,
    queue: BoundedSpanQueue,
    worker: ExportWorker,
    deriver: Box<dyn RedMetricsDeriver>,
    heartbeats: Arc<HeartbeatRegistry>,
    metrics: Arc<ReporterMetrics>,
    sender: Arc<dyn TelemetrySender>,
}

impl SpanIngestHandler {
    /// Validates `config`, registers the queue gauges and starts the export worker.
    pub fn new(
        config: ReporterConfig,
        sender: Arc<dyn TelemetrySender>,
        registry: Arc<dyn MetricsRegistry>,
    ) -> Result<Self, ReporterError> {
        config.validate()?;

        let heartbeats = Arc::new(HeartbeatRegistry::new());
        let deriver: Box<dyn RedMetricsDeriver> = match config.derivation {
            DerivationBackend::Reporter => Box::new(DerivedMetricsEngine::new(
                Arc::clone(&registry),
                Arc::clone(&heartbeats),
                config.application.clone(),
                config.source.clone(),
                config.red_metrics_custom_tag_keys.clone(),
            )),
            DerivationBackend::Registry => Box::new(RegistryDerivedMetrics::new(
                Arc::clone(&registry),
                &config.application,
                config.red_metrics_custom_tag_keys.clone(),
            )),
        };

        let (queue, receiver) = BoundedQueue::with_capacity(config.max_queue_size);
        register_queue_gauges(registry.as_ref(), &queue);
        let metrics = Arc::new(ReporterMetrics::registered(registry.as_ref()));

        let converter =
            SpanConverter::new(config.source.clone(), config.application.to_default_tags());
        let worker = ExportWorker::start(
            queue.clone(),
            receiver,
            converter,
            Arc::clone(&sender),
            Arc::clone(&metrics),
        )?;
        info!(
            deriver = deriver.name(),
            sender = sender.name(),
            capacity = config.max_queue_size,
            "span ingest handler started"
        );

        Ok(Self {
            config,
            queue,
            worker,
            deriver,
            heartbeats,
            metrics,
            sender,
        })
    }

    /// Accepts one finished span. Always returns `true`.
    pub fn handle(&self, context: TraceContext, span: Span) -> bool {
        if span.is_complete() {
            self.deriver.derive(&span);
        }
        if !context.sampled {
            return true;
        }

        self.metrics.record_received();
        match self.queue.offer(QueuedSpan { context, span }) {
            Ok(()) => {}
            Err(OfferError::Full(rejected)) => {
                let dropped = self.metrics.record_dropped();
                warn!(
                    dropped,
                    capacity = self.queue.capacity(),
                    span_id = rejected.context.span_id,
                    "span queue full, dropping span"
                );
            }
            Err(OfferError::Closed(rejected)) => {
                self.metrics.record_dropped();
                debug!(
                    span_id = rejected.context.span_id,
                    "reporter shut down, dropping span"
                );
            }
        }
        true
    }

    /// Sends one heartbeat per discovered key to the sender.
    pub fn report_heartbeats(&self) -> DrainReport {
        self.heartbeats
            .drain_and_report(&self.config.heartbeat_component, self.sender.as_ref())
    }

    /// Closes the queue and stops the worker, waiting up to the configured
    /// shutdown timeout.
    ///
    /// Returns `false` if the worker was still running when the timeout
    /// elapsed. A later call waits again, and returns `true` immediately once
    /// the worker has exited.
    pub fn shutdown(&self) -> bool {
        self.queue.close();
        self.worker.stop(self.config.shutdown_timeout())
    }

    /// Configuration the handler was built with.
    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    /// Received, dropped, sent and error counts.
    pub fn metrics(&self) -> &ReporterMetrics {
        &self.metrics
    }

    /// Heartbeat keys discovered so far.
    pub fn heartbeats(&self) -> &Arc<HeartbeatRegistry> {
        &self.heartbeats
    }

    /// Sender spans and heartbeats go to.
    pub fn sender(&self) -> &Arc<dyn TelemetrySender> {
        &self.sender
    }

    /// Spans waiting for export.
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Free slots in the export queue.
    pub fn remaining_capacity(&self) -> usize {
        self.queue.remaining_capacity()
    }
}

impl Drop for SpanIngestHandler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn register_queue_gauges(registry: &dyn MetricsRegistry, queue: &BoundedSpanQueue) {
    let tags = PointTags::new();
    let size = queue.clone();
    registry.gauge(QUEUE_SIZE_GAUGE, &tags, Arc::new(move || size.len() as f64));
    let remaining = queue.clone();
    registry.gauge(
        QUEUE_REMAINING_CAPACITY_GAUGE,
        &tags,
        Arc::new(move || remaining.remaining_capacity() as f64),
    );
}
