//! Per-process node state shared by the election and replication engines

use crate::cluster::NodeId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local election flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionState {
    Ready,
    Running,
    Waiting,
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionState::Ready => write!(f, "ready"),
            ElectionState::Running => write!(f, "running"),
            ElectionState::Waiting => write!(f, "waiting"),
        }
    }
}

/// Point-in-time copy of a node's election view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub node_id: NodeId,
    pub coordinator_node_id: Option<NodeId>,
    pub self_coordinator_state: bool,
    pub election_state: ElectionState,
}

#[derive(Debug)]
struct WorkerState {
    coordinator: Option<NodeId>,
    is_coordinator: bool,
    election: ElectionState,
    /// Bumped whenever a coordinator is adopted or claimed
    generation: u64,
}

/// The single mutable record of "who leads" on this node.
///
/// The lock is never held across an await point; every transition is one
/// short critical section.
#[derive(Debug)]
pub struct WorkerNode {
    node_id: NodeId,
    state: Mutex<WorkerState>,
}

impl WorkerNode {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: Mutex::new(WorkerState {
                coordinator: None,
                is_coordinator: false,
                election: ElectionState::Ready,
                generation: 0,
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let state = self.state.lock();
        WorkerSnapshot {
            node_id: self.node_id.clone(),
            coordinator_node_id: state.coordinator.clone(),
            self_coordinator_state: state.is_coordinator,
            election_state: state.election,
        }
    }

    pub fn coordinator(&self) -> Option<NodeId> {
        self.state.lock().coordinator.clone()
    }

    pub fn is_coordinator(&self) -> bool {
        self.state.lock().is_coordinator
    }

    pub fn election_state(&self) -> ElectionState {
        self.state.lock().election
    }

    /// Changes every time a coordinator is adopted or claimed
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Adopt `coordinator` as the leader (startup or victory)
    pub fn adopt(&self, coordinator: NodeId) {
        let mut state = self.state.lock();
        state.is_coordinator = coordinator == self.node_id;
        state.coordinator = Some(coordinator);
        state.election = ElectionState::Ready;
        state.generation += 1;
    }

    /// Become the coordinator after a successful claim
    pub fn become_coordinator(&self) {
        let mut state = self.state.lock();
        state.coordinator = Some(self.node_id.clone());
        state.is_coordinator = true;
        state.election = ElectionState::Ready;
        state.generation += 1;
    }

    /// Forget the coordinator if it is `node`; returns whether it was
    pub fn clear_coordinator_if(&self, node: &NodeId) -> bool {
        let mut state = self.state.lock();
        if state.coordinator.as_ref() == Some(node) {
            state.coordinator = None;
            state.is_coordinator = false;
            true
        } else {
            false
        }
    }

    /// Enter `Running`; returns false if a run is already in progress
    pub fn begin_running(&self) -> bool {
        let mut state = self.state.lock();
        if state.election == ElectionState::Running {
            return false;
        }
        state.coordinator = None;
        state.is_coordinator = false;
        state.election = ElectionState::Running;
        true
    }

    /// Wait for another node's election, unless a coordinator has been
    /// adopted since `generation` was read or this node is mid-run
    pub fn defer_since(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || state.election == ElectionState::Running {
            return false;
        }
        state.is_coordinator = false;
        state.election = ElectionState::Waiting;
        true
    }

    /// Defer after a higher node answered, unless a victory already arrived
    pub fn defer_if_running(&self) -> bool {
        let mut state = self.state.lock();
        if state.election != ElectionState::Running {
            return false;
        }
        state.is_coordinator = false;
        state.election = ElectionState::Waiting;
        true
    }

    /// Abandon a claim that could not be persisted
    pub fn abandon_claim(&self) {
        let mut state = self.state.lock();
        if state.coordinator.as_ref() == Some(&self.node_id) {
            state.coordinator = None;
        }
        state.is_coordinator = false;
        state.election = ElectionState::Ready;
    }
}
