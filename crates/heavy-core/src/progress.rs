//! Shared stage and agent status for an orchestration run.
//!
//! Status only ever moves forward: `NotStarted < Queued < InProgress <
//! Completed | Failed`. Once an entry is terminal it is frozen, so a
//! straggling task that finishes after its slot was marked failed cannot
//! flip the status back.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    #[default]
    NotStarted,
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl StageStatus {
    fn rank(self) -> u8 {
        match self {
            StageStatus::NotStarted => 0,
            StageStatus::Queued => 1,
            StageStatus::InProgress => 2,
            StageStatus::Completed | StageStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(self, next: StageStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::NotStarted => "NOT_STARTED",
            StageStatus::Queued => "QUEUED",
            StageStatus::InProgress => "IN_PROGRESS",
            StageStatus::Completed => "COMPLETED",
            StageStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentProgress {
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Point-in-time copy of the tracker state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub stages: BTreeMap<String, StageStatus>,
    pub agents: BTreeMap<String, AgentProgress>,
}

impl ProgressSnapshot {
    /// Status of a stage; unknown stages read as not started.
    pub fn stage(&self, stage: &str) -> StageStatus {
        self.stages.get(stage).copied().unwrap_or_default()
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentProgress> {
        self.agents.get(agent_id)
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty() && self.agents.is_empty()
    }
}

/// Thread-safe status board written by pipeline tasks and read by observers.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage status. Returns false if the write was rejected as a
    /// backwards or post-terminal transition.
    pub fn update_stage(&self, stage: &str, status: StageStatus) -> bool {
        let mut state = self.lock();
        let current = state.stage(stage);
        if !current.can_transition_to(status) {
            trace!(stage, %current, requested = %status, "Ignoring stage transition");
            return false;
        }
        state.stages.insert(stage.to_string(), status);
        true
    }

    /// Record an agent status and, optionally, its result text. A result
    /// only sticks when the status write itself is accepted.
    pub fn update_agent(&self, agent_id: &str, status: StageStatus, result: Option<String>) -> bool {
        let mut state = self.lock();
        let entry = state.agents.entry(agent_id.to_string()).or_default();
        if !entry.status.can_transition_to(status) {
            trace!(agent = agent_id, current = %entry.status, requested = %status, "Ignoring agent transition");
            return false;
        }
        entry.status = status;
        if result.is_some() {
            entry.result = result;
        }
        true
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, ProgressSnapshot> {
        // A panicking writer cannot leave the map half-updated, so the
        // poisoned state is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
