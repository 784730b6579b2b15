use crate::convert::WireSpan;
use crate::error::SendError;
use crate::tags::PointTags;
use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

/// Client of the remote telemetry backend.
///
/// Both calls may fail. Callers inside this crate log the failure and move on;
/// nothing is retried.
pub trait TelemetrySender: Send + Sync {
    /// Sends one metric point.
    fn send_metric(
        &self,
        name: &str,
        value: f64,
        timestamp_millis: u64,
        source: &str,
        tags: &PointTags,
    ) -> Result<(), SendError>;

    /// Sends one span.
    fn send_span(&self, span: &WireSpan) -> Result<(), SendError>;

    /// Returns the sender name for debugging.
    fn name(&self) -> &str;
}

/// One line of [`JsonLinesSender`] output.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record<'a> {
    Metric {
        name: &'a str,
        value: f64,
        timestamp: u64,
        source: &'a str,
        tags: &'a PointTags,
    },
    Span(&'a WireSpan),
}

/// Writes every point and span as a JSON object on its own line.
///
/// Useful for local development (stdout) and for piping into a collector
/// that speaks newline-delimited JSON.
pub struct JsonLinesSender<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSender<W> {
    /// Wraps a writer.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Consumes the sender, returning the underlying writer.
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_record(&self, record: &Record<'_>) -> Result<(), SendError> {
        let line = serde_json::to_vec(record)?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| SendError::Transport("writer lock poisoned".to_string()))?;
        out.write_all(&line)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

impl JsonLinesSender<std::io::Stdout> {
    /// Sender writing to standard output.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TelemetrySender for JsonLinesSender<W> {
    fn send_metric(
        &self,
        name: &str,
        value: f64,
        timestamp_millis: u64,
        source: &str,
        tags: &PointTags,
    ) -> Result<(), SendError> {
        self.write_record(&Record::Metric {
            name,
            value,
            timestamp: timestamp_millis,
            source,
            tags,
        })
    }

    fn send_span(&self, span: &WireSpan) -> Result<(), SendError> {
        self.write_record(&Record::Span(span))
    }

    fn name(&self) -> &str {
        "json_lines"
    }
}

/// Null sender that discards everything (for benchmarking)
pub struct NullSender;

impl NullSender {
    /// Creates a sender that discards everything.
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullSender {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySender for NullSender {
    fn send_metric(
        &self,
        _name: &str,
        _value: f64,
        _timestamp_millis: u64,
        _source: &str,
        _tags: &PointTags,
    ) -> Result<(), SendError> {
        Ok(())
    }

    fn send_span(&self, _span: &WireSpan) -> Result<(), SendError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Metric point captured by [`TestSender`].
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct SentMetric {
    pub name: String,
    pub value: f64,
    pub timestamp_millis: u64,
    pub source: String,
    pub tags: PointTags,
}

/// Test sender that records everything it is given.
///
/// Sends to a metric whose `application` tag is listed in `fail_applications`
/// fail with a transport error.
#[cfg(test)]
#[derive(Default)]
pub struct TestSender {
    pub metrics: Mutex<Vec<SentMetric>>,
    pub spans: Mutex<Vec<WireSpan>>,
    pub fail_applications: Mutex<Vec<String>>,
    pub fail_spans: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl TestSender {
    /// Creates a sender that records everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metric points captured so far.
    pub fn metrics(&self) -> Vec<SentMetric> {
        self.metrics.lock().unwrap().clone()
    }

    /// Spans captured so far.
    pub fn spans(&self) -> Vec<WireSpan> {
        self.spans.lock().unwrap().clone()
    }

    /// Fails heartbeats whose `application` tag matches.
    pub fn fail_for_application(&self, application: &str) {
        self.fail_applications
            .lock()
            .unwrap()
            .push(application.to_string());
    }

    /// Clears all injected heartbeat failures.
    pub fn heal(&self) {
        self.fail_applications.lock().unwrap().clear();
        self.fail_spans
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl TelemetrySender for TestSender {
    fn send_metric(
        &self,
        name: &str,
        value: f64,
        timestamp_millis: u64,
        source: &str,
        tags: &PointTags,
    ) -> Result<(), SendError> {
        let failing = self.fail_applications.lock().unwrap();
        if let Some(app) = tags.get(crate::tags::APPLICATION_TAG_KEY) {
            if failing.contains(app) {
                return Err(SendError::Transport(format!("backend rejected {app}")));
            }
        }
        self.metrics.lock().unwrap().push(SentMetric {
            name: name.to_string(),
            value,
            timestamp_millis,
            source: source.to_string(),
            tags: tags.clone(),
        });
        Ok(())
    }

    fn send_span(&self, span: &WireSpan) -> Result<(), SendError> {
        if self.fail_spans.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SendError::Transport("connection reset".to_string()));
        }
        self.spans.lock().unwrap().push(span.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}
