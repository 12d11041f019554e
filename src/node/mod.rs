//! A complete node: election, membership, replication and metadata wired
//! together behind one `RpcHandler`

pub mod http;
pub mod monitor;
pub mod server;

use crate::cluster::{
    CoordinationStore, Discovery, DistributedCache, ElectionEngine, MemoryCache,
    MembershipDirectory, NodeId, WorkerNode, WorkerSnapshot,
};
use crate::common::{Error, Result};
use crate::replication::ReplicationEngine;
use crate::rpc::{Event, NodeInfo, Reply, Request, RpcHandler, Transport};
use crate::store::{ChunkStore, MetadataStore, RoutedMetadataStore};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use monitor::{MembershipEvent, MembershipMonitor};
pub use server::NodeServer;

/// Capabilities and locations a node is built from
pub struct NodeParts {
    pub node_id: NodeId,
    pub service_name: String,
    pub data_dir: PathBuf,
    pub discovery: Arc<dyn Discovery>,
    pub transport: Arc<dyn Transport>,
    /// Cluster-shared cache holding the coordinator pointer
    pub cache: Arc<dyn DistributedCache>,
    /// Cache this node serves to others on `/internal/cache`
    pub hosted_cache: Arc<MemoryCache>,
    /// This node's copy of the metadata; authoritative while it is coordinator
    pub local_metadata: Arc<dyn MetadataStore>,
}

pub struct Node {
    service_name: String,
    worker: Arc<WorkerNode>,
    membership: Arc<MembershipDirectory>,
    coordination: CoordinationStore,
    election: ElectionEngine,
    replication: ReplicationEngine,
    metadata: Arc<RoutedMetadataStore>,
    hosted_cache: Arc<MemoryCache>,
}

impl Node {
    pub async fn build(parts: NodeParts) -> Result<Arc<Self>> {
        let worker = Arc::new(WorkerNode::new(parts.node_id.clone()));
        let membership = Arc::new(MembershipDirectory::new(
            parts.node_id.clone(),
            parts.service_name.clone(),
            parts.discovery,
        ));
        let coordination = CoordinationStore::new(parts.service_name.clone(), parts.cache);

        let election = ElectionEngine::new(
            worker.clone(),
            membership.clone(),
            coordination.clone(),
            parts.transport.clone(),
        );

        let metadata = Arc::new(RoutedMetadataStore::new(
            worker.clone(),
            parts.local_metadata,
            coordination.clone(),
            membership.clone(),
            parts.transport.clone(),
        ));
        let chunks = Arc::new(ChunkStore::open(&parts.data_dir).await?);
        let replication = ReplicationEngine::new(
            parts.node_id,
            membership.clone(),
            parts.transport,
            metadata.clone(),
            chunks,
        );

        Ok(Arc::new(Self {
            service_name: parts.service_name,
            worker,
            membership,
            coordination,
            election,
            replication,
            metadata,
            hosted_cache: parts.hosted_cache,
        }))
    }

    pub fn node_id(&self) -> &NodeId {
        self.worker.node_id()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        self.worker.snapshot()
    }

    pub fn is_coordinator(&self) -> bool {
        self.worker.is_coordinator()
    }

    pub fn coordinator(&self) -> Option<NodeId> {
        self.worker.coordinator()
    }

    pub fn election(&self) -> &ElectionEngine {
        &self.election
    }

    pub fn replication(&self) -> &ReplicationEngine {
        &self.replication
    }

    pub fn membership(&self) -> &Arc<MembershipDirectory> {
        &self.membership
    }

    pub fn coordination(&self) -> &CoordinationStore {
        &self.coordination
    }

    pub fn hosted_cache(&self) -> &Arc<MemoryCache> {
        &self.hosted_cache
    }

    pub fn info(&self) -> NodeInfo {
        let snapshot = self.worker.snapshot();
        NodeInfo {
            node_id: snapshot.node_id,
            service_name: self.service_name.clone(),
            is_coordinator: snapshot.self_coordinator_state,
            coordinator: snapshot.coordinator_node_id,
            version: crate::VERSION.to_string(),
        }
    }

    /// Startup: adopt or claim the coordinator pointer, then copy the
    /// coordinator's metadata
    pub async fn initialize(&self) -> Result<()> {
        self.election.initialize().await?;
        if let Err(e) = self.metadata.catch_up().await {
            warn!("Node {} could not copy metadata: {}", self.node_id(), e);
        }
        Ok(())
    }

    pub async fn on_membership_event(&self, event: &MembershipEvent) {
        match event {
            MembershipEvent::Joined(node) => debug!("Node {} sees {} join", self.node_id(), node),
            MembershipEvent::Left(node) => self.election.handle_node_left(node).await,
        }
    }

    /// React to membership changes until the channel closes
    pub fn watch_membership(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<MembershipEvent>,
    ) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => node.on_membership_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Membership watcher skipped {} event(s)", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[async_trait]
impl RpcHandler for Node {
    async fn handle(&self, request: Request) -> Result<Reply> {
        match request {
            Request::Election { sender } => {
                Ok(Reply::Election(self.election.handle_election(&sender).await))
            }
            Request::NodeStatus => Ok(Reply::NodeStatus(self.worker.snapshot())),
            Request::NodeInfo => Ok(Reply::NodeInfo(self.info())),
            Request::Metadata(request) => {
                if request.is_write() && !self.worker.is_coordinator() {
                    let current = self
                        .worker
                        .coordinator()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    return Err(Error::NotCoordinator(current));
                }
                Ok(Reply::Metadata(self.metadata.apply_local(request).await?))
            }
            other => self.replication.serve(other).await,
        }
    }

    async fn on_event(&self, event: Event) {
        match event {
            Event::Victory { sender } => self.election.handle_victory(&sender),
            Event::Committed { record } => {
                let id = record.id().to_string();
                if let Err(e) = self.metadata.insert(record).await {
                    warn!("Node {} dropped metadata copy {}: {}", self.node_id(), id, e);
                }
            }
        }
    }
}
