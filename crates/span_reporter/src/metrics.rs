//! Metrics registry capability and an in-memory implementation.
//!
//! The pipeline publishes through [`MetricsRegistry`] only. [`InMemoryRegistry`]
//! keeps every series in process so tests and the demo can inspect what was
//! emitted.

use crate::tags::PointTags;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Monotonic counter handle.
pub trait Counter: Send + Sync {
    /// Adds `delta` to the counter.
    fn increment(&self, delta: f64);

    /// Current accumulated value.
    fn count(&self) -> f64;
}

/// Distribution handle (histogram or summary).
pub trait Histogram: Send + Sync {
    /// Records one observation.
    fn record(&self, value: f64);
}

/// Value supplier polled when a gauge is read.
pub type GaugeFn = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Registry of named, tagged metric series.
///
/// Asking twice for the same name and tags returns a handle to the same series.
pub trait MetricsRegistry: Send + Sync {
    /// Cumulative counter.
    fn counter(&self, name: &str, tags: &PointTags) -> Arc<dyn Counter>;

    /// Counter whose reported values are increments since the last report.
    fn delta_counter(&self, name: &str, tags: &PointTags) -> Arc<dyn Counter>;

    /// Histogram of observed values.
    fn histogram(&self, name: &str, tags: &PointTags) -> Arc<dyn Histogram>;

    /// Registers a gauge backed by `supplier`.
    fn gauge(&self, name: &str, tags: &PointTags, supplier: GaugeFn);
}

/// Identity of a metric series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId {
    pub name: String,
    pub tags: PointTags,
}

impl MetricId {
    /// Builds the id from a name and a copy of the tags.
    pub fn new(name: &str, tags: &PointTags) -> Self {
        Self {
            name: name.to_string(),
            tags: tags.clone(),
        }
    }
}

/// Lock-free `f64` counter stored as raw bits.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    bits: AtomicU64,
}

impl AtomicCounter {
    /// Creates a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the counter to zero, returning the value accumulated so far.
    pub fn take(&self) -> f64 {
        f64::from_bits(self.bits.swap(0f64.to_bits(), Ordering::Relaxed))
    }
}

impl Counter for AtomicCounter {
    fn increment(&self, delta: f64) {
        // fetch_update retries on contention; the closure never returns None.
        let _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    fn count(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Histogram that keeps every observation.
#[derive(Debug, Default)]
pub struct RecordingHistogram {
    values: Mutex<Vec<f64>>,
}

impl RecordingHistogram {
    /// Creates an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded observations in arrival order.
    pub fn values(&self) -> Vec<f64> {
        self.values.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Histogram for RecordingHistogram {
    fn record(&self, value: f64) {
        if let Ok(mut values) = self.values.lock() {
            values.push(value);
        }
    }
}

/// In-process registry backed by concurrent maps.
#[derive(Default)]
pub struct InMemoryRegistry {
    counters: DashMap<MetricId, Arc<AtomicCounter>>,
    delta_counters: DashMap<MetricId, Arc<AtomicCounter>>,
    histograms: DashMap<MetricId, Arc<RecordingHistogram>>,
    gauges: DashMap<MetricId, GaugeFn>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a cumulative counter, if the series exists.
    pub fn counter_value(&self, name: &str, tags: &PointTags) -> Option<f64> {
        self.counters
            .get(&MetricId::new(name, tags))
            .map(|c| c.count())
    }

    /// Value of a delta counter since its last [`take_delta`](Self::take_delta).
    pub fn delta_value(&self, name: &str, tags: &PointTags) -> Option<f64> {
        self.delta_counters
            .get(&MetricId::new(name, tags))
            .map(|c| c.count())
    }

    /// Reads and resets a delta counter, as a reporter does on each flush.
    pub fn take_delta(&self, name: &str, tags: &PointTags) -> Option<f64> {
        self.delta_counters
            .get(&MetricId::new(name, tags))
            .map(|c| c.take())
    }

    /// Observations recorded on a histogram series.
    pub fn histogram_values(&self, name: &str, tags: &PointTags) -> Option<Vec<f64>> {
        self.histograms
            .get(&MetricId::new(name, tags))
            .map(|h| h.values())
    }

    /// Current value of a gauge, if registered.
    pub fn gauge_value(&self, name: &str, tags: &PointTags) -> Option<f64> {
        // Clone the supplier out so the map shard is not locked while it runs.
        let supplier = self
            .gauges
            .get(&MetricId::new(name, tags))
            .map(|g| Arc::clone(g.value()))?;
        Some(supplier())
    }

    /// All cumulative counter series named `name`.
    pub fn counters_named(&self, name: &str) -> Vec<(PointTags, f64)> {
        collect_named(&self.counters, name, |c| c.count())
    }

    /// All delta counter series named `name`.
    pub fn delta_counters_named(&self, name: &str) -> Vec<(PointTags, f64)> {
        collect_named(&self.delta_counters, name, |c| c.count())
    }

    /// All histogram series named `name`.
    pub fn histograms_named(&self, name: &str) -> Vec<(PointTags, Vec<f64>)> {
        collect_named(&self.histograms, name, |h| h.values())
    }

    /// Sorted names of every registered series.
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .counters
            .iter()
            .map(|e| e.key().name.clone())
            .chain(self.delta_counters.iter().map(|e| e.key().name.clone()))
            .chain(self.histograms.iter().map(|e| e.key().name.clone()))
            .chain(self.gauges.iter().map(|e| e.key().name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

fn collect_named<V, R>(
    map: &DashMap<MetricId, Arc<V>>,
    name: &str,
    read: impl Fn(&V) -> R,
) -> Vec<(PointTags, R)> {
    let mut series: Vec<(PointTags, R)> = map
        .iter()
        .filter(|e| e.key().name == name)
        .map(|e| (e.key().tags.clone(), read(e.value().as_ref())))
        .collect();
    series.sort_by(|a, b| a.0.cmp(&b.0));
    series
}

impl MetricsRegistry for InMemoryRegistry {
    fn counter(&self, name: &str, tags: &PointTags) -> Arc<dyn Counter> {
        self.counters
            .entry(MetricId::new(name, tags))
            .or_default()
            .clone()
    }

    fn delta_counter(&self, name: &str, tags: &PointTags) -> Arc<dyn Counter> {
        self.delta_counters
            .entry(MetricId::new(name, tags))
            .or_default()
            .clone()
    }

    fn histogram(&self, name: &str, tags: &PointTags) -> Arc<dyn Histogram> {
        self.histograms
            .entry(MetricId::new(name, tags))
            .or_default()
            .clone()
    }

    fn gauge(&self, name: &str, tags: &PointTags, supplier: GaugeFn) {
        self.gauges.insert(MetricId::new(name, tags), supplier);
    }
}
