//! Heartbeat tracking for discovered (application, service, cluster, shard, source)
//! tuples.

use crate::sender::TelemetrySender;
use crate::span::now_millis;
use crate::tags::{
    PointTags, APPLICATION_TAG_KEY, CLUSTER_TAG_KEY, COMPONENT_TAG_KEY, HEART_BEAT_METRIC,
    NULL_TAG_VAL, SERVICE_TAG_KEY, SHARD_TAG_KEY, SPAN_KIND_TAG,
};
use dashmap::DashSet;
use std::collections::BTreeMap;
use tracing::debug;

/// Identity of one heartbeat series.
///
/// Two keys are equal when every field matches; custom tags compare as an
/// unordered map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeartbeatKey {
    pub application: String,
    pub service: String,
    pub cluster: String,
    pub shard: String,
    pub source: String,
    pub custom_tags: BTreeMap<String, String>,
}

impl HeartbeatKey {
    /// Point tags of the heartbeat metric for this key.
    pub fn point_tags(&self, component: &str) -> PointTags {
        let mut tags = PointTags::from([
            (APPLICATION_TAG_KEY.to_string(), self.application.clone()),
            (SERVICE_TAG_KEY.to_string(), self.service.clone()),
            (CLUSTER_TAG_KEY.to_string(), self.cluster.clone()),
            (SHARD_TAG_KEY.to_string(), self.shard.clone()),
            (COMPONENT_TAG_KEY.to_string(), component.to_string()),
        ]);
        tags.extend(self.custom_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        tags.entry(SPAN_KIND_TAG.to_string())
            .or_insert_with(|| NULL_TAG_VAL.to_string());
        tags
    }
}

/// Outcome of one [`HeartbeatRegistry::drain_and_report`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Keys whose heartbeat was sent and which were removed
    pub reported: usize,
    /// Keys whose send failed; they stay pending
    pub failed: usize,
}

/// Concurrent set of heartbeat keys awaiting their next report.
#[derive(Debug, Default)]
pub struct HeartbeatRegistry {
    pending: DashSet<HeartbeatKey>,
}

impl HeartbeatRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` as seen. Repeated discovery before a drain is a no-op.
    pub fn discover(&self, key: HeartbeatKey) {
        self.pending.insert(key);
    }

    /// Returns `true` if `key` is waiting for the next drain.
    pub fn contains(&self, key: &HeartbeatKey) -> bool {
        self.pending.contains(key)
    }

    /// Number of keys waiting for the next drain.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if no keys are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Sends one heartbeat per pending key and clears the keys that were sent.
    ///
    /// Works from a snapshot. Each key is removed before its send, so a key
    /// rediscovered while the drain runs stays pending for the next one. A key
    /// whose send fails is put back; the remaining keys are still attempted.
    pub fn drain_and_report(&self, component: &str, sender: &dyn TelemetrySender) -> DrainReport {
        let snapshot: Vec<HeartbeatKey> = self.pending.iter().map(|k| k.key().clone()).collect();
        let mut report = DrainReport::default();

        for key in snapshot {
            if self.pending.remove(&key).is_none() {
                continue;
            }
            let tags = key.point_tags(component);
            match sender.send_metric(HEART_BEAT_METRIC, 1.0, now_millis(), &key.source, &tags) {
                Ok(()) => report.reported += 1,
                Err(e) => {
                    debug!(
                        application = %key.application,
                        service = %key.service,
                        error = %e,
                        "heartbeat send failed"
                    );
                    self.pending.insert(key);
                    report.failed += 1;
                }
            }
        }
        report
    }
}
