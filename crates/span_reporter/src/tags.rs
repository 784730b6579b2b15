//! Well-known tag keys and the application identity tags.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag map attached to a metric point. Keys are unique, last write wins.
pub type PointTags = BTreeMap<String, String>;

pub const APPLICATION_TAG_KEY: &str = "application";
pub const SERVICE_TAG_KEY: &str = "service";
pub const CLUSTER_TAG_KEY: &str = "cluster";
pub const SHARD_TAG_KEY: &str = "shard";
pub const COMPONENT_TAG_KEY: &str = "component";
pub const SOURCE_KEY: &str = "source";
pub const OPERATION_NAME_TAG: &str = "operationName";
pub const SPAN_KIND_TAG: &str = "span.kind";
pub const HTTP_STATUS_CODE_TAG: &str = "http.status_code";
pub const DEBUG_TAG_KEY: &str = "debug";
pub const ERROR_TAG_KEY: &str = "error";
pub const SPAN_LOG_KEY: &str = "_spanLogs";
pub const SPAN_SECONDARY_ID_KEY: &str = "_spanSecondaryId";
pub const IPV4_TAG_KEY: &str = "ipv4";

/// Placeholder value for identity tags that are not set.
pub const NULL_TAG_VAL: &str = "none";

/// Metric name used for heartbeat points.
pub const HEART_BEAT_METRIC: &str = "~component.heartbeat";

/// Operation name used when a span has none.
pub const DEFAULT_SPAN_NAME: &str = "defaultOperation";

/// Identity of the instrumented application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ApplicationTags {
    /// Application name
    pub application: String,
    /// Service name
    pub service: String,
    /// Cluster the service runs in
    pub cluster: Option<String>,
    /// Shard of the service
    pub shard: Option<String>,
    /// Extra tags attached to every span
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for ApplicationTags {
    fn default() -> Self {
        Self {
            application: "unnamed_application".to_string(),
            service: "unnamed_service".to_string(),
            cluster: None,
            shard: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

impl ApplicationTags {
    /// Creates tags for an application and service with no cluster or shard.
    pub fn new(application: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            service: service.into(),
            ..Self::default()
        }
    }

    /// Sets the cluster.
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Sets the shard.
    pub fn with_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    /// Adds a custom tag.
    pub fn with_custom_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_tags.insert(key.into(), value.into());
        self
    }

    /// Cluster name, or [`NULL_TAG_VAL`].
    pub fn cluster_or_none(&self) -> &str {
        self.cluster.as_deref().unwrap_or(NULL_TAG_VAL)
    }

    /// Shard name, or [`NULL_TAG_VAL`].
    pub fn shard_or_none(&self) -> &str {
        self.shard.as_deref().unwrap_or(NULL_TAG_VAL)
    }

    /// Ordered default tags attached to every exported span: application,
    /// service, cluster, shard, then custom tags in key order.
    pub fn to_default_tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(4 + self.custom_tags.len());
        tags.push((APPLICATION_TAG_KEY.to_string(), self.application.clone()));
        tags.push((SERVICE_TAG_KEY.to_string(), self.service.clone()));
        tags.push((CLUSTER_TAG_KEY.to_string(), self.cluster_or_none().to_string()));
        tags.push((SHARD_TAG_KEY.to_string(), self.shard_or_none().to_string()));
        tags.extend(
            self.custom_tags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        tags
    }
}
