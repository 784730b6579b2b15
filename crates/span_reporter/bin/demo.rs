//! # Span Reporter Demo
//!
//! End-to-end run of the reporting pipeline:
//!
//! - Several producer tasks hand finished spans (random operations, kinds,
//!   latencies, ~10% errors, ~80% sampled) to one `SpanIngestHandler`.
//! - Sampled spans flow through the bounded queue to a simulated backend that
//!   has latency and a configurable failure rate.
//! - RED metrics land in an `InMemoryRegistry`; heartbeats are drained by a
//!   `HeartbeatScheduler` on the tokio runtime.
//!
//! ## Running
//!
//! ```bash
//! cargo run -p span_reporter --features demo --bin demo --release -- --quick
//! RUST_LOG=span_reporter=debug cargo run -p span_reporter --features demo --bin demo
//! cargo run -p span_reporter --features demo --bin demo -- --config reporter.json
//! cargo run -p span_reporter --features demo --bin demo -- --json   # print every record as JSON
//! ```

use anyhow::Context;
use rand::Rng;
use span_reporter::{
    ApplicationTags, HeartbeatScheduler, InMemoryRegistry, JsonLinesSender, PointTags,
    ReporterConfig, SendError, Span, SpanIngestHandler, SpanKind, TelemetrySender,
    TraceContext, WireSpan,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

const OPERATIONS: &[(&str, SpanKind)] = &[
    ("GET /orders", SpanKind::Server),
    ("POST /orders", SpanKind::Server),
    ("SELECT orders", SpanKind::Client),
    ("cache get", SpanKind::Client),
    ("publish order.created", SpanKind::Producer),
];

/// Backend stand-in with latency and random failures.
struct SimulatedBackend {
    failure_rate: f64,
    latency: Duration,
    spans: AtomicU64,
    metrics: AtomicU64,
    failures: AtomicU64,
}

impl SimulatedBackend {
    fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate,
            latency,
            spans: AtomicU64::new(0),
            metrics: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn maybe_fail(&self) -> Result<(), SendError> {
        if rand::thread_rng().gen_bool(self.failure_rate) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(SendError::Transport("simulated backend failure".to_string()));
        }
        Ok(())
    }
}

impl TelemetrySender for SimulatedBackend {
    fn send_metric(
        &self,
        _name: &str,
        _value: f64,
        _timestamp_millis: u64,
        _source: &str,
        _tags: &PointTags,
    ) -> Result<(), SendError> {
        self.maybe_fail()?;
        self.metrics.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn send_span(&self, _span: &WireSpan) -> Result<(), SendError> {
        std::thread::sleep(self.latency);
        self.maybe_fail()?;
        self.spans.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

fn random_span(rng: &mut impl Rng, producer: u64) -> (TraceContext, Span) {
    let (operation, kind) = OPERATIONS[rng.gen_range(0..OPERATIONS.len())];
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(1);
    let latency = rng.gen_range(200..250_000);

    let mut span = Span::new(operation)
        .with_kind(kind)
        .with_timestamps(now, now + latency)
        .with_tag("component", "demo")
        .with_tag("tenant", if rng.gen_bool(0.5) { "acme" } else { "globex" })
        .with_local_ip("10.0.0.7");
    if rng.gen_bool(0.1) {
        span = span
            .with_error("simulated failure")
            .with_tag("http.status_code", "500");
    }
    if rng.gen_bool(0.2) {
        span = span.with_annotation(now + latency / 2, "cache miss");
    }

    let parent = if rng.gen_bool(0.8) { rng.gen::<u64>() } else { 0 };
    let context = TraceContext::new(rng.gen::<u128>(), (producer << 48) | rng.gen_range(1..1 << 40), parent)
        .with_sampled(rng.gen_bool(0.8));
    (context, span)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let quick = args.iter().any(|a| a == "--quick");
    let json = args.iter().any(|a| a == "--json");
    let config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            ReporterConfig::from_json_file(path)
                .with_context(|| format!("loading configuration from {path}"))?
        }
        None => ReporterConfig::default()
            .with_application(ApplicationTags::new("shop", "orders").with_cluster("us-west"))
            .with_custom_tag_key("tenant")
            .with_max_queue_size(if quick { 256 } else { 4_096 })
            .with_heartbeat_interval(Duration::from_secs(1)),
    };

    let producers: u64 = if quick { 4 } else { 8 };
    let spans_per_producer: u64 = if quick { 250 } else { 2_000 };

    println!("Demo configuration:");
    println!("   Source:             {}", config.source);
    println!("   Application:        {}/{}", config.application.application, config.application.service);
    println!("   Queue capacity:     {}", config.max_queue_size);
    println!("   Derivation backend: {:?}", config.derivation);
    println!("   Producers:          {producers}");
    println!("   Spans per producer: {spans_per_producer}");
    println!();

    let backend = Arc::new(SimulatedBackend::new(0.02, Duration::from_micros(50)));
    let sender: Arc<dyn TelemetrySender> = if json {
        Arc::new(JsonLinesSender::stdout())
    } else {
        backend.clone()
    };
    let registry = Arc::new(InMemoryRegistry::new());
    let handler = Arc::new(SpanIngestHandler::new(config, sender, registry.clone())?);
    let heartbeats = HeartbeatScheduler::for_handler(&handler);

    let started = Instant::now();
    let mut tasks = JoinSet::new();
    for producer in 0..producers {
        let handler = Arc::clone(&handler);
        tasks.spawn(async move {
            let mut handled = 0u64;
            for i in 0..spans_per_producer {
                let (context, span) = {
                    let mut rng = rand::thread_rng();
                    random_span(&mut rng, producer)
                };
                handler.handle(context, span);
                handled += 1;
                if i % 100 == 99 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
            handled
        });
    }

    let mut handled = 0u64;
    while let Some(result) = tasks.join_next().await {
        handled += result.context("producer task failed")?;
    }
    let generation = started.elapsed();
    info!(handled, ?generation, "producers finished");

    heartbeats.shutdown().await?;
    let stopped = handler.shutdown();

    let metrics = handler.metrics();
    println!();
    println!("Results:");
    println!("   Spans handled:          {handled}");
    println!("   Sampled (received):     {}", metrics.spans_received());
    println!("   Dropped (queue full):   {}", metrics.spans_dropped());
    println!("   Exported:               {}", metrics.spans_sent());
    println!("   Export errors:          {}", metrics.report_errors());
    println!("   Worker stopped cleanly: {stopped}");
    if !json {
        println!("   Backend spans:          {}", backend.spans.load(Ordering::Relaxed));
        println!("   Backend heartbeats:     {}", backend.metrics.load(Ordering::Relaxed));
        println!("   Backend failures:       {}", backend.failures.load(Ordering::Relaxed));
    }
    println!("   Generation time:        {generation:.2?}");
    println!();
    println!("Derived metric series:");
    for name in registry.metric_names() {
        println!("   {name}");
    }

    Ok(())
}
