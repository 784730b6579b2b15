use span_reporter::{
    ApplicationTags, InMemoryRegistry, JsonLinesSender, PointTags, ReporterConfig, SendError,
    Span, SpanIngestHandler, TelemetrySender, TraceContext, WireSpan,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

struct RecordingSender {
    spans: Mutex<Vec<WireSpan>>,
    metrics: Mutex<Vec<(String, PointTags)>>,
}

impl RecordingSender {
    fn new() -> Self {
        Self {
            spans: Mutex::new(Vec::new()),
            metrics: Mutex::new(Vec::new()),
        }
    }

    fn spans(&self) -> Vec<WireSpan> {
        self.spans.lock().unwrap().clone()
    }

    fn metric_names(&self) -> Vec<String> {
        self.metrics
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl TelemetrySender for RecordingSender {
    fn send_metric(
        &self,
        name: &str,
        _value: f64,
        _timestamp_millis: u64,
        _source: &str,
        tags: &PointTags,
    ) -> Result<(), SendError> {
        self.metrics
            .lock()
            .unwrap()
            .push((name.to_string(), tags.clone()));
        Ok(())
    }

    fn send_span(&self, span: &WireSpan) -> Result<(), SendError> {
        self.spans.lock().unwrap().push(span.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// Holds every span send until released
struct StalledSender {
    released: Mutex<bool>,
    cv: Condvar,
    entered: AtomicUsize,
    inner: RecordingSender,
}

impl StalledSender {
    fn new() -> Self {
        Self {
            released: Mutex::new(false),
            cv: Condvar::new(),
            entered: AtomicUsize::new(0),
            inner: RecordingSender::new(),
        }
    }

    fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.cv.notify_all();
    }
}

impl TelemetrySender for StalledSender {
    fn send_metric(
        &self,
        name: &str,
        value: f64,
        timestamp_millis: u64,
        source: &str,
        tags: &PointTags,
    ) -> Result<(), SendError> {
        self.inner
            .send_metric(name, value, timestamp_millis, source, tags)
    }

    fn send_span(&self, span: &WireSpan) -> Result<(), SendError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut released = self.released.lock().unwrap();
        while !*released {
            released = self.cv.wait(released).unwrap();
        }
        drop(released);
        self.inner.send_span(span)
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn config() -> ReporterConfig {
    ReporterConfig::default()
        .with_source("test-host")
        .with_application(ApplicationTags::new("app", "svc"))
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

fn finished_span(name: &str) -> Span {
    Span::new(name).with_timestamps(1_700_000_000_000_000, 1_700_000_000_250_000)
}

#[test]
fn test_full_queue_drops_and_first_span_survives() {
    let sender = Arc::new(StalledSender::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let handler = SpanIngestHandler::new(
        config().with_max_queue_size(1),
        sender.clone(),
        registry,
    )
    .unwrap();

    assert!(handler.handle(TraceContext::new(1, 1, 0), finished_span("first")));
    // worker is now stuck sending "first"; the queue is empty again
    assert!(wait_until(|| sender.entered.load(Ordering::SeqCst) == 1));

    assert!(handler.handle(TraceContext::new(1, 2, 1), finished_span("second")));
    assert!(handler.handle(TraceContext::new(1, 3, 1), finished_span("third")));

    assert_eq!(handler.metrics().spans_received(), 3);
    assert_eq!(handler.metrics().spans_dropped(), 1);
    assert_eq!(handler.queue_size(), 1);

    sender.release();
    assert!(handler.shutdown());

    let spans = sender.inner.spans();
    assert_eq!(spans.len(), 2);
    let first = &spans[0];
    assert_eq!(first.name, "first");
    assert_eq!(first.duration_millis, 250);
    assert_eq!(first.source, "test-host");
    assert_eq!(first.tag("application"), Some("app"));
    assert_eq!(first.tag("service"), Some("svc"));
    assert_eq!(first.tag("cluster"), Some("none"));
    assert_eq!(first.tag("shard"), Some("none"));
    assert_eq!(spans[1].name, "second");
}

#[test]
fn test_concurrent_producers() {
    const PRODUCERS: u64 = 8;
    const SPANS_PER_PRODUCER: u64 = 500;

    let sender = Arc::new(RecordingSender::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let handler = Arc::new(
        SpanIngestHandler::new(config(), sender.clone(), registry.clone()).unwrap(),
    );

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                for i in 0..SPANS_PER_PRODUCER {
                    let ctx = TraceContext::new(u128::from(p + 1), (p << 32) | i, 0);
                    assert!(handler.handle(ctx, finished_span("GET /items")));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    assert!(handler.shutdown());

    let total = PRODUCERS * SPANS_PER_PRODUCER;
    let metrics = handler.metrics();
    assert_eq!(metrics.spans_received(), total);
    assert_eq!(metrics.spans_dropped(), 0);
    assert_eq!(metrics.spans_sent(), total);
    assert_eq!(sender.spans().len() as u64, total);

    let invocations = registry.delta_counters_named("tracing.derived.app.svc.GET-/items.invocation");
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].1, total as f64);
}

#[test]
fn test_fifo_order_single_producer() {
    let sender = Arc::new(RecordingSender::new());
    let handler = SpanIngestHandler::new(
        config(),
        sender.clone(),
        Arc::new(InMemoryRegistry::new()),
    )
    .unwrap();

    for i in 0..200u64 {
        handler.handle(TraceContext::new(9, i + 1, 0), finished_span(&format!("op-{i}")));
    }
    assert!(handler.shutdown());

    let names: Vec<String> = sender.spans().into_iter().map(|s| s.name).collect();
    let expected: Vec<String> = (0..200).map(|i| format!("op-{i}")).collect();
    assert_eq!(names, expected);
}

#[test]
fn test_unsampled_spans_feed_metrics_only() {
    let sender = Arc::new(RecordingSender::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let handler = SpanIngestHandler::new(config(), sender.clone(), registry.clone()).unwrap();

    for i in 0..10 {
        let ctx = TraceContext::new(1, i + 1, 0).with_sampled(false);
        handler.handle(ctx, finished_span("quiet"));
    }
    assert!(handler.shutdown());

    assert!(sender.spans().is_empty());
    assert_eq!(handler.metrics().spans_received(), 0);
    let invocations = registry.delta_counters_named("tracing.derived.app.svc.quiet.invocation");
    assert_eq!(invocations[0].1, 10.0);
    assert_eq!(handler.heartbeats().len(), 1);
}

#[test]
fn test_error_span_end_to_end() {
    let sender = Arc::new(RecordingSender::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let handler = SpanIngestHandler::new(
        config().with_custom_tag_key("tenant"),
        sender.clone(),
        registry.clone(),
    )
    .unwrap();

    let span = finished_span("charge")
        .with_tag("error", "card declined")
        .with_tag("tenant", "acme")
        .with_tag("debug", "true");
    handler.handle(TraceContext::new(3, 4, 0), span);
    assert!(handler.shutdown());

    let wire = &sender.spans()[0];
    assert_eq!(wire.tag("error"), Some("true"));
    assert_eq!(wire.tag("tenant"), Some("acme"));
    assert_eq!(wire.tags.iter().filter(|(k, _)| k == "debug").count(), 1);

    let errors = registry.delta_counters_named("tracing.derived.app.svc.charge.error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0.get("tenant").map(String::as_str), Some("acme"));

    let durations = registry.histograms_named("tracing.derived.app.svc.charge.duration.micros");
    assert_eq!(durations.len(), 1);
    assert_eq!(durations[0].0.get("error").map(String::as_str), Some("true"));
    assert_eq!(durations[0].1, vec![250_000.0]);
}

#[test]
fn test_heartbeats_reported_through_handler() {
    let sender = Arc::new(RecordingSender::new());
    let handler = SpanIngestHandler::new(
        config().with_custom_tag_key("tenant"),
        sender.clone(),
        Arc::new(InMemoryRegistry::new()),
    )
    .unwrap();

    handler.handle(TraceContext::new(1, 1, 0), finished_span("a").with_tag("tenant", "t1"));
    handler.handle(TraceContext::new(1, 2, 0), finished_span("b").with_tag("tenant", "t1"));
    handler.handle(TraceContext::new(1, 3, 0), finished_span("c").with_tag("tenant", "t2"));
    assert_eq!(handler.heartbeats().len(), 2);

    let report = handler.report_heartbeats();
    assert_eq!(report.reported, 2);
    assert!(handler.heartbeats().is_empty());
    assert_eq!(
        sender.metric_names(),
        vec!["~component.heartbeat".to_string(); 2]
    );

    // nothing new discovered, nothing reported
    assert_eq!(handler.report_heartbeats().reported, 0);
}

#[test]
fn test_json_lines_sender_pipeline() {
    let buffer = SharedBuffer::default();
    let sender = Arc::new(JsonLinesSender::new(buffer.clone()));
    let handler = SpanIngestHandler::new(config(), sender, Arc::new(InMemoryRegistry::new())).unwrap();

    handler.handle(TraceContext::new(0xabc, 0x1, 0), finished_span("render"));
    assert!(handler.shutdown());

    let out = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    let line: serde_json::Value = serde_json::from_str(out.lines().next().unwrap()).unwrap();
    assert_eq!(line["type"], "span");
    assert_eq!(line["name"], "render");
    assert_eq!(line["source"], "test-host");
    assert_eq!(line["duration_millis"], 250);
}

#[test]
fn test_shutdown_is_bounded_with_stalled_sender() {
    let sender = Arc::new(StalledSender::new());
    let handler = SpanIngestHandler::new(
        config().with_shutdown_timeout(Duration::from_millis(100)),
        sender.clone(),
        Arc::new(InMemoryRegistry::new()),
    )
    .unwrap();

    handler.handle(TraceContext::new(1, 1, 0), finished_span("stuck"));
    assert!(wait_until(|| sender.entered.load(Ordering::SeqCst) == 1));

    let started = Instant::now();
    assert!(!handler.shutdown());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!handler.shutdown(), "worker is still inside send_span");

    sender.release();
    assert!(handler.shutdown());
    assert_eq!(sender.inner.spans().len(), 1);
}

#[test]
fn test_every_received_span_is_accounted_for_after_shutdown() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 500;

    for round in 0..50 {
        let registry = Arc::new(InMemoryRegistry::new());
        let handler = Arc::new(
            SpanIngestHandler::new(
                config().with_max_queue_size(64),
                Arc::new(RecordingSender::new()),
                registry,
            )
            .unwrap(),
        );

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let handler = Arc::clone(&handler);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let context = TraceContext::new(1, p * PER_PRODUCER + i + 1, 0);
                        handler.handle(context, finished_span("race"));
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_micros(200));
        assert!(handler.shutdown());
        for p in producers {
            p.join().unwrap();
        }

        let metrics = handler.metrics();
        assert_eq!(metrics.spans_received(), PRODUCERS * PER_PRODUCER);
        assert_eq!(
            metrics.spans_received(),
            metrics.spans_sent() + metrics.spans_dropped() + metrics.report_errors(),
            "round {round}: span neither sent, dropped nor errored"
        );
        assert_eq!(handler.queue_size(), 0, "round {round}: span stranded in queue");
    }
}

#[test]
fn test_handle_never_blocks_on_full_queue() {
    let sender = Arc::new(StalledSender::new());
    let handler = SpanIngestHandler::new(
        config().with_max_queue_size(4),
        sender.clone(),
        Arc::new(InMemoryRegistry::new()),
    )
    .unwrap();

    let started = Instant::now();
    for i in 0..1_000 {
        handler.handle(TraceContext::new(1, i + 1, 0), finished_span("flood"));
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    let metrics = handler.metrics();
    assert_eq!(metrics.spans_received(), 1_000);
    assert!(metrics.spans_dropped() >= 1_000 - 5);

    sender.release();
    assert!(handler.shutdown());
}
