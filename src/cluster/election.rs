//! Bully election
//!
//! The highest live node id always ends up as coordinator:
//! - a node that outranks every live peer appoints itself straight away
//! - otherwise it asks every higher peer; any `Alive` answer means a higher
//!   node has taken over the run, silence means self wins
//! - the winner writes the coordination store first and only then tells
//!   everyone else with a `victory` event
//!
//! Election never returns an error. Failures are logged and end the attempt.

use crate::cluster::{CoordinationStore, ElectionState, MembershipDirectory, NodeId, WorkerNode};
use crate::common::Result;
use crate::rpc::{ElectionAck, Event, Reply, Request, Transport};
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct ElectionEngine {
    worker: Arc<WorkerNode>,
    membership: Arc<MembershipDirectory>,
    store: CoordinationStore,
    transport: Arc<dyn Transport>,
}

impl ElectionEngine {
    pub fn new(
        worker: Arc<WorkerNode>,
        membership: Arc<MembershipDirectory>,
        store: CoordinationStore,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            worker,
            membership,
            store,
            transport,
        }
    }

    pub fn worker(&self) -> &Arc<WorkerNode> {
        &self.worker
    }

    fn self_id(&self) -> &NodeId {
        self.worker.node_id()
    }

    /// Adopt the stored coordinator, claiming the slot if nobody holds it
    pub async fn initialize(&self) -> Result<()> {
        let current = match self.store.current_master().await? {
            Some(current) => current,
            None => {
                self.store.set_master(self.self_id()).await?;
                // racing claimers all converge on whichever write landed last
                self.store
                    .current_master()
                    .await?
                    .unwrap_or_else(|| self.self_id().clone())
            }
        };

        info!("Node {} starts with coordinator {}", self.self_id(), current);
        self.worker.adopt(current);
        Ok(())
    }

    pub async fn start_election(&self) {
        let peers = match self.membership.list_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Election on {} aborted, membership unavailable: {}", self.self_id(), e);
                return;
            }
        };

        if peers.iter().all(|p| self.self_id().outranks(p)) {
            self.appoint_self(&peers).await;
            return;
        }

        if self.worker.is_coordinator() {
            debug!("Node {} already holds the coordinator role", self.self_id());
            return;
        }

        if let Some(current) = self.worker.coordinator().filter(|c| peers.contains(c)) {
            debug!("Node {} keeps live coordinator {}", self.self_id(), current);
            return;
        }

        let generation = self.worker.generation();
        if self.peer_running(&peers).await {
            if self.worker.defer_since(generation) {
                debug!("Node {} waits on a running election", self.self_id());
            }
            return;
        }

        if !self.worker.begin_running() {
            debug!("Node {} already running an election", self.self_id());
            return;
        }

        let higher: Vec<&NodeId> = peers.iter().filter(|p| p.outranks(self.self_id())).collect();
        info!(
            "Node {} starts election, contacting {} higher peer(s)",
            self.self_id(),
            higher.len()
        );

        let calls = higher.iter().map(|peer| {
            self.transport.call(
                peer,
                Request::Election {
                    sender: self.self_id().clone(),
                },
            )
        });
        let replies = join_all(calls).await;

        let mut alive = false;
        for (peer, reply) in higher.iter().zip(replies) {
            match reply {
                Ok(Reply::Election(Some(ElectionAck::Alive))) => alive = true,
                Ok(_) => {}
                Err(e) => debug!("Election request to {} failed: {}", peer, e),
            }
        }

        if alive {
            if self.worker.defer_if_running() {
                info!("Node {} waits for a higher node to win", self.self_id());
            }
        } else {
            self.appoint_self(&peers).await;
        }
    }

    /// Some peer is mid-election
    async fn peer_running(&self, peers: &[NodeId]) -> bool {
        let statuses = join_all(
            peers
                .iter()
                .map(|peer| self.transport.call(peer, Request::NodeStatus)),
        )
        .await;

        statuses.into_iter().any(|status| {
            matches!(
                status,
                Ok(Reply::NodeStatus(snapshot)) if snapshot.election_state == ElectionState::Running
            )
        })
    }

    async fn appoint_self(&self, peers: &[NodeId]) {
        if let Err(e) = self.store.set_master(self.self_id()).await {
            error!("Node {} could not record its coordinator claim: {}", self.self_id(), e);
            self.worker.abandon_claim();
            return;
        }

        self.worker.become_coordinator();
        info!("Node {} is now coordinator", self.self_id());

        let sends = peers.iter().map(|peer| async move {
            let event = Event::Victory {
                sender: self.self_id().clone(),
            };
            (peer, self.transport.emit(peer, event).await)
        });
        for (peer, result) in join_all(sends).await {
            if let Err(e) = result {
                warn!("Victory notice to {} failed: {}", peer, e);
            }
        }
    }

    /// Answer an election request from `sender`
    pub async fn handle_election(&self, sender: &NodeId) -> Option<ElectionAck> {
        if !self.self_id().outranks(sender) {
            return None;
        }
        self.start_election().await;
        Some(ElectionAck::Alive)
    }

    pub fn handle_victory(&self, sender: &NodeId) {
        if sender == self.self_id() {
            return;
        }
        info!("Node {} adopts coordinator {}", self.self_id(), sender);
        self.worker.adopt(sender.clone());
    }

    /// Re-elect when the departed node was the coordinator
    pub async fn handle_node_left(&self, node: &NodeId) {
        if self.worker.clear_coordinator_if(node) {
            warn!("Coordinator {} left, node {} starts election", node, self.self_id());
            self.start_election().await;
        }
    }
}
