//! Periodic heartbeat reporting on a tokio runtime.

use crate::error::ReporterError;
use crate::handler::SpanIngestHandler;
use crate::heartbeat::{DrainReport, HeartbeatRegistry};
use crate::sender::TelemetrySender;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Running totals across all drains.
#[derive(Debug, Default)]
pub struct HeartbeatStats {
    pub drains: AtomicU64,
    pub reported: AtomicU64,
    pub failed: AtomicU64,
}

impl HeartbeatStats {
    /// Completed drain passes.
    pub fn drains(&self) -> u64 {
        self.drains.load(Ordering::Relaxed)
    }

    /// Heartbeats sent successfully.
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }

    /// Heartbeat sends that failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn record(&self, report: DrainReport) {
        self.drains.fetch_add(1, Ordering::Relaxed);
        self.reported.fetch_add(report.reported as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
    }
}

/// Drains a [`HeartbeatRegistry`] into a sender every `interval`.
///
/// Must be started from within a tokio runtime. Sending is blocking I/O, so
/// each drain runs on the blocking pool.
pub struct HeartbeatScheduler {
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    stats: Arc<HeartbeatStats>,
}

impl HeartbeatScheduler {
    /// Spawns the heartbeat task on the current tokio runtime.
    pub fn start(
        heartbeats: Arc<HeartbeatRegistry>,
        sender: Arc<dyn TelemetrySender>,
        component: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let component: Arc<str> = Arc::from(component.into());
        let stats = Arc::new(HeartbeatStats::default());
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task_stats = Arc::clone(&stats);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        drain(&heartbeats, &sender, &component, &task_stats).await;
                    }
                    _ = &mut shutdown_rx => {
                        drain(&heartbeats, &sender, &component, &task_stats).await;
                        break;
                    }
                }
            }
        });

        Self {
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            stats,
        }
    }

    /// Scheduler for `handler`'s heartbeats, using its configured component
    /// and interval.
    pub fn for_handler(handler: &SpanIngestHandler) -> Self {
        let config = handler.config();
        Self::start(
            Arc::clone(handler.heartbeats()),
            Arc::clone(handler.sender()),
            config.heartbeat_component.clone(),
            config.heartbeat_interval(),
        )
    }

    /// Running totals across drains.
    pub fn stats(&self) -> &Arc<HeartbeatStats> {
        &self.stats
    }

    /// Stops the timer after one final drain.
    pub async fn shutdown(mut self) -> Result<(), ReporterError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn drain(
    heartbeats: &Arc<HeartbeatRegistry>,
    sender: &Arc<dyn TelemetrySender>,
    component: &Arc<str>,
    stats: &HeartbeatStats,
) {
    let heartbeats = Arc::clone(heartbeats);
    let sender = Arc::clone(sender);
    let component = Arc::clone(component);
    let result = tokio::task::spawn_blocking(move || {
        heartbeats.drain_and_report(&component, sender.as_ref())
    })
    .await;

    match result {
        Ok(report) => {
            if report.failed > 0 {
                debug!(
                    reported = report.reported,
                    failed = report.failed,
                    "heartbeat drain incomplete"
                );
            }
            stats.record(report);
        }
        Err(e) => warn!(error = %e, "heartbeat drain task failed"),
    }
}
