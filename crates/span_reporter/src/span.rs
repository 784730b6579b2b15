use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Identifiers and sampling flags of the trace a span belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TraceContext {
    /// Upper 64 bits of the 128-bit trace identifier (0 for 64-bit traces)
    pub trace_id_high: u64,
    /// Lower 64 bits of the trace identifier
    pub trace_id: u64,
    /// Span identifier
    pub span_id: u64,
    /// Parent span identifier (0 if root span)
    pub parent_id: u64,
    /// Whether full span detail should be exported
    pub sampled: bool,
    /// Debug flag propagated with the trace
    pub debug: bool,
}

impl TraceContext {
    /// Creates a sampled context for the given trace and span.
    pub fn new(trace_id: u128, span_id: u64, parent_id: u64) -> Self {
        Self {
            trace_id_high: (trace_id >> 64) as u64,
            trace_id: trace_id as u64,
            span_id,
            parent_id,
            sampled: true,
            debug: false,
        }
    }

    /// Sets the sampled flag.
    pub fn with_sampled(mut self, sampled: bool) -> Self {
        self.sampled = sampled;
        self
    }

    /// Sets the debug flag.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Span kind as reported by the instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanKind {
    /// Client side of an RPC
    Client,
    /// Server side of an RPC
    Server,
    /// Message producer
    Producer,
    /// Message consumer
    Consumer,
}

impl SpanKind {
    /// Upper-case kind name, e.g. `SERVER`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Client => "CLIENT",
            SpanKind::Server => "SERVER",
            SpanKind::Producer => "PRODUCER",
            SpanKind::Consumer => "CONSUMER",
        }
    }

    /// Lower-case kind name as used in the `span.kind` wire tag.
    pub fn as_lower_str(&self) -> &'static str {
        match self {
            SpanKind::Client => "client",
            SpanKind::Server => "server",
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
        }
    }
}

/// Timestamped event recorded on a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Event time (Unix microseconds)
    pub timestamp_micros: u64,
    /// Event description
    pub value: String,
}

/// A finished span as handed over by the instrumentation.
///
/// Tags are kept in insertion order. Lookups match keys case-insensitively,
/// while output preserves the original key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Span {
    /// Operation name
    pub name: Option<String>,
    /// Span start time (Unix microseconds, 0 if unset)
    pub start_micros: u64,
    /// Span finish time (Unix microseconds, 0 if unset)
    pub finish_micros: u64,
    /// Span kind
    pub kind: Option<SpanKind>,
    /// Local endpoint address
    pub local_ip: Option<String>,
    /// Error recorded on the span, if any
    pub error: Option<String>,
    /// Span tags in insertion order
    pub tags: Vec<(String, String)>,
    /// Span annotations in insertion order
    pub annotations: Vec<Annotation>,
}

impl Span {
    /// Creates a named span with no timestamps.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Sets start and finish time in microseconds.
    pub fn with_timestamps(mut self, start_micros: u64, finish_micros: u64) -> Self {
        self.start_micros = start_micros;
        self.finish_micros = finish_micros;
        self
    }

    /// Sets the span kind.
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Adds a tag, see [`Span::set_tag`].
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_tag(key, value);
        self
    }

    /// Records an error on the span.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Sets the local IP address.
    pub fn with_local_ip(mut self, ip: impl Into<String>) -> Self {
        self.local_ip = Some(ip.into());
        self
    }

    /// Adds an annotation.
    pub fn with_annotation(mut self, timestamp_micros: u64, value: impl Into<String>) -> Self {
        self.annotate(timestamp_micros, value);
        self
    }

    /// Marks the span as started now.
    pub fn start(&mut self) {
        self.start_micros = now_micros();
    }

    /// Marks the span as finished now.
    pub fn finish(&mut self) {
        self.finish_micros = now_micros();
    }

    /// Sets a tag. An existing tag whose key matches case-insensitively is
    /// replaced in place, keeping its original spelling.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.tags.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some(slot) => slot.1 = value,
            None => self.tags.push((key, value)),
        }
    }

    /// Adds an annotation.
    pub fn annotate(&mut self, timestamp_micros: u64, value: impl Into<String>) {
        self.annotations.push(Annotation {
            timestamp_micros,
            value: value.into(),
        });
    }

    /// Looks up a tag value, matching the key case-insensitively.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if an error was recorded or an `error` tag is present.
    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.tag("error").is_some()
    }

    /// Returns `true` if both start and finish are set.
    pub fn is_complete(&self) -> bool {
        self.start_micros != 0 && self.finish_micros != 0
    }

    /// Duration of the span in microseconds.
    pub fn duration_micros(&self) -> u64 {
        self.finish_micros.saturating_sub(self.start_micros)
    }
}

/// Current wall clock time in Unix microseconds.
pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Current wall clock time in Unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    now_micros() / 1000
}
