//! Background thread that drains the span queue into the telemetry sender.

use crate::convert::SpanConverter;
use crate::error::{ReporterError, TakeError};
use crate::metrics::{Counter, MetricsRegistry};
use crate::queue::{BoundedQueue, QueueReceiver};
use crate::sender::TelemetrySender;
use crate::span::{Span, TraceContext};
use crate::tags::PointTags;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A sampled span waiting for export.
#[derive(Debug, Clone)]
pub struct QueuedSpan {
    pub context: TraceContext,
    pub span: Span,
}

pub type BoundedSpanQueue = BoundedQueue<QueuedSpan>;

const WORKER_THREAD_NAME: &str = "span-export-worker";

/// Poll interval while waiting for the worker to exit.
const JOIN_POLL: Duration = Duration::from_millis(5);

pub const QUEUE_SIZE_GAUGE: &str = "reporter.queue.size";
pub const QUEUE_REMAINING_CAPACITY_GAUGE: &str = "reporter.queue.remaining_capacity";
pub const SPANS_RECEIVED_COUNTER: &str = "reporter.spans.received";
pub const SPANS_DROPPED_COUNTER: &str = "reporter.spans.dropped";
pub const ERRORS_COUNTER: &str = "reporter.errors";

/// Reporter self-metrics, shared between producers and the worker.
///
/// The atomics are the source of truth. When built with
/// [`registered`](Self::registered) every update is mirrored into registry
/// counters.
#[derive(Default)]
pub struct ReporterMetrics {
    /// Sampled spans handed to the reporter
    pub spans_received: AtomicU64,
    /// Sampled spans discarded because the queue was full or closed
    pub spans_dropped: AtomicU64,
    /// Spans accepted by the sender
    pub spans_sent: AtomicU64,
    /// Failed or panicked span exports
    pub report_errors: AtomicU64,
    mirror: Option<RegistryCounters>,
}

struct RegistryCounters {
    received: Arc<dyn Counter>,
    dropped: Arc<dyn Counter>,
    errors: Arc<dyn Counter>,
}

// Statistical counters only; nothing synchronizes on them.
impl ReporterMetrics {
    /// Metrics mirrored into `registry` under the `reporter.*` names.
    pub fn registered(registry: &dyn MetricsRegistry) -> Self {
        let tags = PointTags::new();
        Self {
            mirror: Some(RegistryCounters {
                received: registry.counter(SPANS_RECEIVED_COUNTER, &tags),
                dropped: registry.counter(SPANS_DROPPED_COUNTER, &tags),
                errors: registry.counter(ERRORS_COUNTER, &tags),
            }),
            ..Self::default()
        }
    }

    /// Sampled spans handed to the queue.
    pub fn spans_received(&self) -> u64 {
        self.spans_received.load(Ordering::Relaxed)
    }

    /// Spans rejected by a full or closed queue.
    pub fn spans_dropped(&self) -> u64 {
        self.spans_dropped.load(Ordering::Relaxed)
    }

    /// Spans the sender accepted.
    pub fn spans_sent(&self) -> u64 {
        self.spans_sent.load(Ordering::Relaxed)
    }

    /// Span sends that failed or panicked.
    pub fn report_errors(&self) -> u64 {
        self.report_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn record_received(&self) {
        self.spans_received.fetch_add(1, Ordering::Relaxed);
        if let Some(mirror) = &self.mirror {
            mirror.received.increment(1.0);
        }
    }

    /// Returns the dropped total including this drop.
    pub(crate) fn record_dropped(&self) -> u64 {
        if let Some(mirror) = &self.mirror {
            mirror.dropped.increment(1.0);
        }
        self.spans_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_sent(&self) {
        self.spans_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.report_errors.fetch_add(1, Ordering::Relaxed);
        if let Some(mirror) = &self.mirror {
            mirror.errors.increment(1.0);
        }
    }
}

impl fmt::Debug for ReporterMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterMetrics")
            .field("spans_received", &self.spans_received())
            .field("spans_dropped", &self.spans_dropped())
            .field("spans_sent", &self.spans_sent())
            .field("report_errors", &self.report_errors())
            .finish_non_exhaustive()
    }
}

/// Owns the export thread and its stop signal.
pub struct ExportWorker {
    stop: Arc<AtomicBool>,
    queue: BoundedSpanQueue,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExportWorker {
    /// Spawns the export thread.
    pub fn start(
        queue: BoundedSpanQueue,
        receiver: QueueReceiver<QueuedSpan>,
        converter: SpanConverter,
        sender: Arc<dyn TelemetrySender>,
        metrics: Arc<ReporterMetrics>,
    ) -> Result<Self, ReporterError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(&receiver, &stop_flag, &converter, sender.as_ref(), &metrics))
            .map_err(ReporterError::Spawn)?;

        Ok(Self {
            stop,
            queue,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Signals the worker to stop and waits up to `timeout` for it to exit.
    ///
    /// Returns `true` once the thread has exited. On timeout the thread keeps
    /// running and `false` is returned; a later call waits again.
    pub fn stop(&self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Release);
        self.queue.interrupt();

        let mut guard = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(handle) = guard.as_ref() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    pending = self.queue.len(),
                    "span export worker did not stop in time"
                );
                return false;
            }
            thread::sleep(JOIN_POLL);
        }
        if let Some(handle) = guard.take() {
            if handle.join().is_err() {
                warn!("span export worker exited with a panic");
            }
        }
        true
    }
}

fn run(
    receiver: &QueueReceiver<QueuedSpan>,
    stop: &AtomicBool,
    converter: &SpanConverter,
    sender: &dyn TelemetrySender,
    metrics: &ReporterMetrics,
) {
    info!(sender = sender.name(), "span export worker started");

    while !stop.load(Ordering::Acquire) {
        match receiver.take() {
            Ok(item) => export(&item, converter, sender, metrics),
            Err(TakeError::Interrupted) => {
                info!("span export worker interrupted while waiting");
            }
        }
    }

    let mut drained = 0u64;
    while let Some(item) = receiver.try_take() {
        export(&item, converter, sender, metrics);
        drained += 1;
    }
    info!(drained, "span export worker stopped");
}

fn export(
    item: &QueuedSpan,
    converter: &SpanConverter,
    sender: &dyn TelemetrySender,
    metrics: &ReporterMetrics,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let wire = converter.convert(&item.context, &item.span);
        sender.send_span(&wire)
    }));

    match outcome {
        Ok(Ok(())) => metrics.record_sent(),
        Ok(Err(e)) => {
            debug!(error = %e, span_id = item.context.span_id, "span send failed");
            metrics.record_error();
        }
        Err(payload) => {
            warn!(
                panic = panic_message(payload.as_ref()),
                span_id = item.context.span_id,
                "span export panicked"
            );
            metrics.record_error();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
