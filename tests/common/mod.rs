//! In-process cluster used by the integration tests

#![allow(dead_code)]

use chunkmesh::cluster::{DistributedCache, MemoryCache, NodeId};
use chunkmesh::node::{Node, NodeParts};
use chunkmesh::rpc::{MemoryNetwork, RpcHandler};
use chunkmesh::store::MemoryMetadataStore;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestCluster {
    pub network: Arc<MemoryNetwork>,
    pub cache: Arc<dyn DistributedCache>,
    /// Each node's own metadata store, in `nodes` order
    pub stores: Vec<Arc<MemoryMetadataStore>>,
    pub nodes: Vec<Arc<Node>>,
    _dirs: Vec<TempDir>,
}

pub fn id(raw: &str) -> NodeId {
    NodeId::parse(raw).unwrap()
}

impl TestCluster {
    /// Nodes registered in `ids` order; nobody has initialized yet
    pub async fn build(ids: &[&str]) -> Self {
        Self::build_with_cache(ids, Arc::new(MemoryCache::new())).await
    }

    pub async fn build_with_cache(ids: &[&str], cache: Arc<dyn DistributedCache>) -> Self {
        let network = Arc::new(MemoryNetwork::new("file"));
        let mut stores = Vec::new();
        let mut nodes = Vec::new();
        let mut dirs = Vec::new();

        for raw in ids {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(MemoryMetadataStore::new());
            let node = Node::build(NodeParts {
                node_id: id(raw),
                service_name: "file".into(),
                data_dir: dir.path().to_path_buf(),
                discovery: network.clone(),
                transport: network.clone(),
                cache: cache.clone(),
                hosted_cache: Arc::new(MemoryCache::new()),
                local_metadata: store.clone(),
            })
            .await
            .unwrap();

            let handler: Arc<dyn RpcHandler> = node.clone();
            network.connect(id(raw), &handler);
            nodes.push(node);
            stores.push(store);
            dirs.push(dir);
        }

        Self {
            network,
            cache,
            stores,
            nodes,
            _dirs: dirs,
        }
    }

    /// Build and run startup on every node in order
    pub async fn start(ids: &[&str]) -> Self {
        let cluster = Self::build(ids).await;
        for node in &cluster.nodes {
            node.initialize().await.unwrap();
        }
        cluster
    }

    pub fn node(&self, raw: &str) -> &Arc<Node> {
        self.nodes
            .iter()
            .find(|n| n.node_id().as_str() == raw)
            .unwrap_or_else(|| panic!("no node {}", raw))
    }

    pub fn store(&self, raw: &str) -> &Arc<MemoryMetadataStore> {
        let at = self
            .nodes
            .iter()
            .position(|n| n.node_id().as_str() == raw)
            .unwrap_or_else(|| panic!("no node {}", raw));
        &self.stores[at]
    }

    /// Nodes still connected to the network
    pub fn connected(&self) -> Vec<&Arc<Node>> {
        self.nodes
            .iter()
            .filter(|n| self.network.is_connected(n.node_id()))
            .collect()
    }

    pub fn coordinators(&self) -> Vec<NodeId> {
        self.connected()
            .into_iter()
            .filter(|n| n.is_coordinator())
            .map(|n| n.node_id().clone())
            .collect()
    }

    /// Every connected node agrees on `expected` and only it claims the role
    pub fn assert_coordinator(&self, expected: &str) {
        for node in self.connected() {
            assert_eq!(
                node.coordinator().map(|c| c.to_string()).as_deref(),
                Some(expected),
                "node {} disagrees",
                node.node_id()
            );
        }
        assert_eq!(self.coordinators(), vec![id(expected)]);
    }
}
