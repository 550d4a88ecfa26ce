//! Background delivery of queued mirror ops.
//!
//! One tokio task per lane. A task applies the head op as soon as one is
//! queued; after a failure it sleeps with exponential backoff (doubling,
//! capped) and retries the same op. Failures are logged, never surfaced to the
//! request path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{Lane, ReplicationQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationWorkerConfig {
    /// Wake-up interval when no enqueue notification arrives.
    pub poll_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReplicationWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Backoff after another failure: double the current delay, capped at `max`.
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Handle to stop the worker tasks.
#[derive(Debug)]
pub struct ReplicationWorkerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ReplicationWorkerHandle {
    /// Signal every lane task to stop and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "replication task ended abnormally");
            }
        }
    }
}

#[derive(Debug)]
pub struct ReplicationWorker;

impl ReplicationWorker {
    /// Spawn one delivery task per mirror lane on the current runtime.
    pub fn spawn(queue: &ReplicationQueue, config: ReplicationWorkerConfig) -> ReplicationWorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = queue
            .lanes()
            .iter()
            .map(|lane| tokio::spawn(run_lane(lane.clone(), config, shutdown_rx.clone())))
            .collect();

        tracing::info!(mirrors = queue.mirror_count(), "replication worker started");
        ReplicationWorkerHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

async fn run_lane(lane: Arc<Lane>, config: ReplicationWorkerConfig, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = config.initial_backoff;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let wait = match lane.apply_head().await {
            Some(Ok(())) => {
                backoff = config.initial_backoff;
                continue;
            }
            Some(Err(_)) => {
                let delay = backoff;
                backoff = next_backoff(backoff, config.max_backoff);
                tracing::debug!(mirror = lane.name(), delay_ms = delay.as_millis() as u64, "backing off");
                delay
            }
            None => {
                tokio::select! {
                    _ = lane.notify().notified() => continue,
                    _ = tokio::time::sleep(config.poll_interval) => continue,
                    _ = shutdown.changed() => break,
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!(mirror = lane.name(), "replication lane stopped");
}
