//! RED metrics (rate, errors, duration) derived from finished spans.
//!
//! Two backends share the [`RedMetricsDeriver`] contract:
//!
//! - [`DerivedMetricsEngine`] publishes `tracing.derived.*` delta counters and
//!   histograms and discovers heartbeat keys.
//! - [`RegistryDerivedMetrics`] publishes plain counters and a duration summary
//!   into a generic registry whose common tags already carry the application
//!   identity. It produces no heartbeats.
//!
//! Their tag sets differ on purpose (`span.kind`, `http.status_code`); neither is
//! a subset of the other.

use crate::heartbeat::{HeartbeatKey, HeartbeatRegistry};
use crate::metrics::MetricsRegistry;
use crate::sanitize::sanitize;
use crate::span::Span;
use crate::tags::{
    ApplicationTags, PointTags, APPLICATION_TAG_KEY, CLUSTER_TAG_KEY, COMPONENT_TAG_KEY,
    DEFAULT_SPAN_NAME, ERROR_TAG_KEY, HTTP_STATUS_CODE_TAG, NULL_TAG_VAL, OPERATION_NAME_TAG,
    SERVICE_TAG_KEY, SHARD_TAG_KEY, SOURCE_KEY, SPAN_KIND_TAG,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const TRACING_DERIVED_PREFIX: &str = "tracing.derived";
pub const INVOCATION_SUFFIX: &str = ".invocation";
pub const ERROR_SUFFIX: &str = ".error";
pub const DURATION_SUFFIX: &str = ".duration.micros";
pub const TOTAL_TIME_SUFFIX: &str = ".total_time.millis";

/// Derives RED metrics from a finished span.
pub trait RedMetricsDeriver: Send + Sync {
    /// Publishes the metrics for `span`. Returns the heartbeat key discovered,
    /// if this backend tracks heartbeats.
    fn derive(&self, span: &Span) -> Option<HeartbeatKey>;

    /// Returns the backend name for debugging.
    fn name(&self) -> &str;
}

/// Reporter-backed derivation: `tracing.derived.<app>.<service>.<operation>.*`.
pub struct DerivedMetricsEngine {
    registry: Arc<dyn MetricsRegistry>,
    heartbeats: Arc<HeartbeatRegistry>,
    application: ApplicationTags,
    source: String,
    custom_tag_keys: BTreeSet<String>,
    /// `tracing.derived.<app>.<service>`, sanitized once
    name_prefix: String,
}

impl DerivedMetricsEngine {
    /// Creates the reporter-backed engine.
    pub fn new(
        registry: Arc<dyn MetricsRegistry>,
        heartbeats: Arc<HeartbeatRegistry>,
        application: ApplicationTags,
        source: impl Into<String>,
        custom_tag_keys: BTreeSet<String>,
    ) -> Self {
        let name_prefix = format!(
            "{TRACING_DERIVED_PREFIX}.{}.{}",
            sanitize(&application.application),
            sanitize(&application.service)
        );
        Self {
            registry,
            heartbeats,
            application,
            source: source.into(),
            custom_tag_keys,
            name_prefix,
        }
    }

    /// Metric name prefix for an operation.
    pub fn metric_prefix(&self, operation: &str) -> String {
        format!("{}.{}", self.name_prefix, sanitize(operation))
    }

    /// Publishes invocation, error, duration and total-time metrics for `span`
    /// and registers its heartbeat key.
    pub fn derive_metrics(&self, span: &Span) -> HeartbeatKey {
        let operation = span.name.as_deref().unwrap_or(DEFAULT_SPAN_NAME);
        let component = span.tag(COMPONENT_TAG_KEY).unwrap_or(NULL_TAG_VAL);
        let app = &self.application;

        let mut point_tags = PointTags::from([
            (APPLICATION_TAG_KEY.to_string(), app.application.clone()),
            (SERVICE_TAG_KEY.to_string(), app.service.clone()),
            (CLUSTER_TAG_KEY.to_string(), app.cluster_or_none().to_string()),
            (SHARD_TAG_KEY.to_string(), app.shard_or_none().to_string()),
            (OPERATION_NAME_TAG.to_string(), operation.to_string()),
            (COMPONENT_TAG_KEY.to_string(), component.to_string()),
            (SOURCE_KEY.to_string(), self.source.clone()),
        ]);

        // Kept apart from the point tags: heartbeats carry only these.
        let mut custom_tags = BTreeMap::new();
        if !self.custom_tag_keys.is_empty() {
            for (key, value) in &span.tags {
                if self.custom_tag_keys.contains(key) {
                    point_tags.insert(key.clone(), value.clone());
                    custom_tags.insert(key.clone(), value.clone());
                }
            }
        }

        let prefix = self.metric_prefix(operation);
        let is_error = span.is_error();
        let duration_micros = span.duration_micros();

        self.registry
            .delta_counter(&format!("{prefix}{INVOCATION_SUFFIX}"), &point_tags)
            .increment(1.0);

        if is_error {
            self.registry
                .delta_counter(&format!("{prefix}{ERROR_SUFFIX}"), &point_tags)
                .increment(1.0);
        }

        let duration_name = format!("{prefix}{DURATION_SUFFIX}");
        if is_error {
            let mut error_tags = point_tags.clone();
            error_tags.insert(ERROR_TAG_KEY.to_string(), "true".to_string());
            self.registry
                .histogram(&duration_name, &error_tags)
                .record(duration_micros as f64);
        } else {
            self.registry
                .histogram(&duration_name, &point_tags)
                .record(duration_micros as f64);
        }

        self.registry
            .delta_counter(&format!("{prefix}{TOTAL_TIME_SUFFIX}"), &point_tags)
            .increment((duration_micros / 1000) as f64);

        let key = HeartbeatKey {
            application: app.application.clone(),
            service: app.service.clone(),
            cluster: app.cluster_or_none().to_string(),
            shard: app.shard_or_none().to_string(),
            source: self.source.clone(),
            custom_tags,
        };
        self.heartbeats.discover(key.clone());
        key
    }
}

impl RedMetricsDeriver for DerivedMetricsEngine {
    fn derive(&self, span: &Span) -> Option<HeartbeatKey> {
        Some(self.derive_metrics(span))
    }

    fn name(&self) -> &str {
        "reporter"
    }
}

/// Generic-registry derivation: `<app>.<service>.<operation>.*` counters and a
/// duration summary.
pub struct RegistryDerivedMetrics {
    registry: Arc<dyn MetricsRegistry>,
    custom_tag_keys: BTreeSet<String>,
    /// `<app>.<service>.`, sanitized once
    name_prefix: String,
}

impl RegistryDerivedMetrics {
    /// Creates the registry-backed deriver.
    pub fn new(
        registry: Arc<dyn MetricsRegistry>,
        application: &ApplicationTags,
        custom_tag_keys: BTreeSet<String>,
    ) -> Self {
        let name_prefix = sanitize(&format!(
            "{}.{}.",
            application.application, application.service
        ));
        Self {
            registry,
            custom_tag_keys,
            name_prefix,
        }
    }

    /// Metric name prefix for an operation.
    pub fn metric_prefix(&self, operation: &str) -> String {
        format!("{}{}", self.name_prefix, sanitize(operation))
    }

    /// Records invocation, error and duration metrics for one span.
    pub fn record(&self, span: &Span) {
        let operation = span.name.as_deref().unwrap_or(DEFAULT_SPAN_NAME);

        let mut tags = PointTags::new();
        for (key, value) in &span.tags {
            if self.custom_tag_keys.contains(key) {
                tags.insert(key.clone(), value.clone());
            }
        }
        let kind = span.kind.map_or(NULL_TAG_VAL, |k| k.as_str());
        tags.insert(SPAN_KIND_TAG.to_string(), kind.to_string());
        tags.insert(OPERATION_NAME_TAG.to_string(), operation.to_string());

        let is_error = span.is_error();
        let prefix = self.metric_prefix(operation);

        if is_error {
            // http status only goes on the error series
            let mut error_tags = tags.clone();
            if let Some(status) = span.tag(HTTP_STATUS_CODE_TAG) {
                error_tags.insert(HTTP_STATUS_CODE_TAG.to_string(), status.to_string());
            }
            self.registry
                .counter(&format!("{prefix}{ERROR_SUFFIX}"), &error_tags)
                .increment(1.0);
        }

        self.registry
            .counter(&format!("{prefix}{INVOCATION_SUFFIX}"), &tags)
            .increment(1.0);

        let duration_micros = span.duration_micros();
        self.registry
            .counter(&format!("{prefix}{TOTAL_TIME_SUFFIX}"), &tags)
            .increment(duration_micros as f64 / 1000.0);

        if is_error {
            tags.insert(ERROR_TAG_KEY.to_string(), "true".to_string());
        }
        self.registry
            .histogram(&format!("{prefix}{DURATION_SUFFIX}"), &tags)
            .record(duration_micros as f64);
    }
}

impl RedMetricsDeriver for RegistryDerivedMetrics {
    fn derive(&self, span: &Span) -> Option<HeartbeatKey> {
        self.record(span);
        None
    }

    fn name(&self) -> &str {
        "registry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryRegistry;
    use crate::span::SpanKind;

    const PREFIX: &str = "tracing.derived.app.svc.GET-/users";

    fn engine(custom: &[&str]) -> (Arc<InMemoryRegistry>, Arc<HeartbeatRegistry>, DerivedMetricsEngine) {
        let registry = Arc::new(InMemoryRegistry::new());
        let heartbeats = Arc::new(HeartbeatRegistry::new());
        let engine = DerivedMetricsEngine::new(
            registry.clone(),
            heartbeats.clone(),
            ApplicationTags::new("app", "svc"),
            "host-1",
            custom.iter().map(|s| s.to_string()).collect(),
        );
        (registry, heartbeats, engine)
    }

    fn identity_tags(operation: &str) -> PointTags {
        PointTags::from([
            ("application".to_string(), "app".to_string()),
            ("service".to_string(), "svc".to_string()),
            ("cluster".to_string(), "none".to_string()),
            ("shard".to_string(), "none".to_string()),
            ("operationName".to_string(), operation.to_string()),
            ("component".to_string(), "none".to_string()),
            ("source".to_string(), "host-1".to_string()),
        ])
    }

    fn span() -> Span {
        Span::new("GET /users").with_timestamps(1_000_000, 1_002_500)
    }

    #[test]
    fn successful_span_emits_invocation_duration_total_time() {
        let (registry, _, engine) = engine(&[]);
        engine.derive_metrics(&span());
        let tags = identity_tags("GET /users");

        assert_eq!(registry.delta_value(&format!("{PREFIX}.invocation"), &tags), Some(1.0));
        assert_eq!(registry.delta_value(&format!("{PREFIX}.error"), &tags), None);
        assert_eq!(
            registry.histogram_values(&format!("{PREFIX}.duration.micros"), &tags),
            Some(vec![2500.0])
        );
        assert_eq!(
            registry.delta_value(&format!("{PREFIX}.total_time.millis"), &tags),
            Some(2.0)
        );
    }

    #[test]
    fn error_span_emits_error_and_error_tagged_duration() {
        let (registry, _, engine) = engine(&[]);
        engine.derive_metrics(&span().with_tag("error", "boom"));
        let tags = identity_tags("GET /users");
        let mut error_tags = tags.clone();
        error_tags.insert("error".to_string(), "true".to_string());

        assert_eq!(registry.delta_value(&format!("{PREFIX}.invocation"), &tags), Some(1.0));
        assert_eq!(registry.delta_value(&format!("{PREFIX}.error"), &tags), Some(1.0));
        assert_eq!(
            registry.histogram_values(&format!("{PREFIX}.duration.micros"), &error_tags),
            Some(vec![2500.0])
        );
        assert_eq!(
            registry.histogram_values(&format!("{PREFIX}.duration.micros"), &tags),
            None
        );
    }

    #[test]
    fn custom_tags_flow_into_points_and_heartbeat() {
        let (registry, heartbeats, engine) = engine(&["tenant"]);
        let key = engine.derive_metrics(
            &span()
                .with_tag("tenant", "acme")
                .with_tag("http.method", "GET")
                .with_tag("component", "web"),
        );

        let mut tags = identity_tags("GET /users");
        tags.insert("tenant".to_string(), "acme".to_string());
        tags.insert("component".to_string(), "web".to_string());
        assert_eq!(registry.delta_value(&format!("{PREFIX}.invocation"), &tags), Some(1.0));

        assert_eq!(key.custom_tags, BTreeMap::from([("tenant".to_string(), "acme".to_string())]));
        assert_eq!(key.source, "host-1");
        assert_eq!(key.cluster, "none");
        assert!(heartbeats.contains(&key));
    }

    #[test]
    fn names_are_sanitized_per_segment() {
        let registry = Arc::new(InMemoryRegistry::new());
        let engine = DerivedMetricsEngine::new(
            registry,
            Arc::new(HeartbeatRegistry::new()),
            ApplicationTags::new("my app", "order service"),
            "h",
            BTreeSet::new(),
        );
        assert_eq!(
            engine.metric_prefix("place  order"),
            "tracing.derived.my-app.order-service.place-order"
        );
    }

    #[test]
    fn unnamed_span_uses_default_operation() {
        let (registry, _, engine) = engine(&[]);
        engine.derive_metrics(&Span::default().with_timestamps(1, 2));
        assert_eq!(
            registry
                .delta_counters_named("tracing.derived.app.svc.defaultOperation.invocation")
                .len(),
            1
        );
    }

    #[test]
    fn registry_variant_strips_http_status_after_error() {
        let registry = Arc::new(InMemoryRegistry::new());
        let derived = RegistryDerivedMetrics::new(
            registry.clone(),
            &ApplicationTags::new("app", "svc"),
            BTreeSet::new(),
        );
        let span = Span::new("checkout")
            .with_kind(SpanKind::Server)
            .with_timestamps(1_000_000, 1_002_500)
            .with_tag("http.status_code", "500")
            .with_error("boom");
        assert!(derived.derive(&span).is_none());

        let base = PointTags::from([
            ("span.kind".to_string(), "SERVER".to_string()),
            ("operationName".to_string(), "checkout".to_string()),
        ]);
        let mut error_tags = base.clone();
        error_tags.insert("http.status_code".to_string(), "500".to_string());
        let mut duration_tags = base.clone();
        duration_tags.insert("error".to_string(), "true".to_string());

        assert_eq!(registry.counter_value("app.svc.checkout.error", &error_tags), Some(1.0));
        assert_eq!(registry.counter_value("app.svc.checkout.invocation", &base), Some(1.0));
        assert_eq!(
            registry.counter_value("app.svc.checkout.total_time.millis", &base),
            Some(2.5)
        );
        assert_eq!(
            registry.histogram_values("app.svc.checkout.duration.micros", &duration_tags),
            Some(vec![2500.0])
        );
    }

    #[test]
    fn registry_variant_ignores_http_status_on_success() {
        let registry = Arc::new(InMemoryRegistry::new());
        let derived = RegistryDerivedMetrics::new(
            registry.clone(),
            &ApplicationTags::new("app", "svc"),
            BTreeSet::new(),
        );
        derived.record(&Span::new("checkout").with_timestamps(1, 2).with_tag("http.status_code", "200"));

        let base = PointTags::from([
            ("span.kind".to_string(), "none".to_string()),
            ("operationName".to_string(), "checkout".to_string()),
        ]);
        assert_eq!(registry.counter_value("app.svc.checkout.invocation", &base), Some(1.0));
        assert!(registry.counters_named("app.svc.checkout.error").is_empty());
    }
}
