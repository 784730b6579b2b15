//! Conversion of finished spans into the backend's wire record.

use crate::span::{Span, TraceContext};
use crate::tags::{
    DEBUG_TAG_KEY, DEFAULT_SPAN_NAME, ERROR_TAG_KEY, IPV4_TAG_KEY, SOURCE_KEY,
    SPAN_KIND_TAG, SPAN_LOG_KEY, SPAN_SECONDARY_ID_KEY,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Field key used for annotation span logs.
const ANNOTATION_FIELD: &str = "annotation";

/// Timestamped log entry attached to a wire span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanLog {
    /// Entry time (Unix microseconds)
    pub timestamp_micros: u64,
    /// Log fields
    pub fields: BTreeMap<String, String>,
}

/// Span record as handed to [`TelemetrySender::send_span`](crate::TelemetrySender::send_span).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireSpan {
    pub name: String,
    pub start_millis: u64,
    pub duration_millis: u64,
    pub source: String,
    pub trace_id: Uuid,
    pub span_id: Uuid,
    /// Parent span, empty for root spans
    pub parents: Vec<Uuid>,
    /// Always empty; kept for wire compatibility
    pub follows_from: Vec<Uuid>,
    /// Tags in emission order
    pub tags: Vec<(String, String)>,
    pub span_logs: Vec<SpanLog>,
}

impl WireSpan {
    /// First value of the tag named `key`.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Converts `(millis start, millis finish)` into a reported duration.
///
/// Unset endpoints yield 0; any positive span lasts at least 1 ms.
pub fn duration_millis(start_micros: u64, finish_micros: u64) -> u64 {
    let start = start_micros / 1000;
    let finish = finish_micros / 1000;
    if start == 0 || finish == 0 {
        return 0;
    }
    finish.saturating_sub(start).max(1)
}

/// Builds [`WireSpan`]s with the reporter's source and default tags.
#[derive(Debug, Clone)]
pub struct SpanConverter {
    source: String,
    default_tags: Vec<(String, String)>,
    default_tag_keys: HashSet<String>,
}

impl SpanConverter {
    /// Creates a converter for `source` with the ordered identity tags.
    pub fn new(source: impl Into<String>, default_tags: Vec<(String, String)>) -> Self {
        let mut default_tag_keys: HashSet<String> = default_tags
            .iter()
            .map(|(k, _)| k.to_ascii_lowercase())
            .collect();
        default_tag_keys.insert(SOURCE_KEY.to_string());
        Self {
            source: source.into(),
            default_tags,
            default_tag_keys,
        }
    }

    /// Source stamped on every converted span.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Identity tags prepended to every converted span.
    pub fn default_tags(&self) -> &[(String, String)] {
        &self.default_tags
    }

    /// Builds the wire record for one span.
    pub fn convert(&self, context: &TraceContext, span: &Span) -> WireSpan {
        let parents = if context.parent_id == 0 {
            Vec::new()
        } else {
            vec![Uuid::from_u64_pair(0, context.parent_id)]
        };

        let span_logs: Vec<SpanLog> = span
            .annotations
            .iter()
            .map(|a| SpanLog {
                timestamp_micros: a.timestamp_micros,
                fields: BTreeMap::from([(ANNOTATION_FIELD.to_string(), a.value.clone())]),
            })
            .collect();
        let has_logs = !span_logs.is_empty();

        let mut tags = self.default_tags.clone();
        let mut debug = false;
        let mut has_error_tag = false;
        for (key, value) in &span.tags {
            if value.is_empty() {
                continue;
            }
            let lc_key = key.to_ascii_lowercase();
            if self.default_tag_keys.contains(&lc_key) {
                continue;
            }
            if lc_key == DEBUG_TAG_KEY {
                // carried out-of-band as the debug flag
                debug = true;
                continue;
            }
            if lc_key == ERROR_TAG_KEY {
                has_error_tag = true;
                tags.push((key.clone(), "true".to_string()));
                continue;
            }
            tags.push((key.clone(), value.clone()));
        }
        if span.error.is_some() && !has_error_tag {
            tags.push((ERROR_TAG_KEY.to_string(), "true".to_string()));
        }

        if debug || context.debug {
            tags.push((DEBUG_TAG_KEY.to_string(), "true".to_string()));
        }

        if let Some(kind) = span.kind {
            let kind = kind.as_lower_str();
            tags.push((SPAN_KIND_TAG.to_string(), kind.to_string()));
            if has_logs {
                tags.push((SPAN_SECONDARY_ID_KEY.to_string(), kind.to_string()));
            }
        }

        if has_logs {
            tags.push((SPAN_LOG_KEY.to_string(), "true".to_string()));
        }

        if let Some(ip) = &span.local_ip {
            // may hold an IPv6 literal
            tags.push((IPV4_TAG_KEY.to_string(), ip.clone()));
        }

        WireSpan {
            name: span
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_SPAN_NAME.to_string()),
            start_millis: span.start_micros / 1000,
            duration_millis: duration_millis(span.start_micros, span.finish_micros),
            source: self.source.clone(),
            trace_id: Uuid::from_u64_pair(context.trace_id_high, context.trace_id),
            span_id: Uuid::from_u64_pair(0, context.span_id),
            parents,
            follows_from: Vec::new(),
            tags,
            span_logs,
        }
    }
}
