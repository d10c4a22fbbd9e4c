//! Polls a [`ProgressTracker`] and turns changes into events.

use std::sync::Arc;
use std::time::Duration;

use heavy_core::{ProgressSnapshot, ProgressTracker, StageStatus};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

pub const POLL_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    #[serde(rename = "megamind_stage")]
    Stage { stage: String, status: StageStatus },
    #[serde(rename = "megamind_agent")]
    Agent { agent_id: String, status: StageStatus },
}

/// Events for every entry whose status differs between two snapshots.
/// Stages come before agents; each group is in key order.
pub fn diff_snapshots(prev: &ProgressSnapshot, next: &ProgressSnapshot) -> Vec<ProgressEvent> {
    let stages = next
        .stages
        .iter()
        .filter(|(stage, status)| prev.stages.get(*stage) != Some(*status))
        .map(|(stage, status)| ProgressEvent::Stage {
            stage: stage.clone(),
            status: *status,
        });

    let agents = next
        .agents
        .iter()
        .filter(|(id, progress)| {
            prev.agents.get(*id).map(|p| p.status) != Some(progress.status)
        })
        .map(|(id, progress)| ProgressEvent::Agent {
            agent_id: id.clone(),
            status: progress.status,
        });

    stages.chain(agents).collect()
}

/// Background task that polls a tracker until stopped.
pub struct ProgressReporter {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(
        tracker: Arc<ProgressTracker>,
        interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last = ProgressSnapshot::default();

            loop {
                let stopping = tokio::select! {
                    _ = ticker.tick() => false,
                    _ = &mut stop_rx => true,
                };

                let current = tracker.snapshot();
                for event in diff_snapshots(&last, &current) {
                    if events_tx.send(event).is_err() {
                        debug!("Progress receiver dropped, reporter exiting");
                        return;
                    }
                }
                last = current;

                if stopping {
                    break;
                }
            }
        });

        (Self { stop: stop_tx, handle }, events_rx)
    }

    /// Stop polling after one last poll, so terminal states are reported.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}
