//! Membership directory
//!
//! Answers "who else is alive and serving this logical service right now".
//! Every call goes back to discovery; nothing is cached between calls.

use crate::cluster::NodeId;
use crate::common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// A node as reported by cluster discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub node_id: NodeId,
    pub services: Vec<String>,
    pub available: bool,
}

impl PeerRecord {
    pub fn offers(&self, service: &str) -> bool {
        self.services.iter().any(|s| s == service)
    }
}

/// Cluster discovery capability
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Every node currently known to discovery, in discovery order
    async fn nodes(&self) -> Result<Vec<PeerRecord>>;
}

pub struct MembershipDirectory {
    self_id: NodeId,
    service_name: String,
    discovery: Arc<dyn Discovery>,
}

impl MembershipDirectory {
    pub fn new(
        self_id: NodeId,
        service_name: impl Into<String>,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        Self {
            self_id,
            service_name: service_name.into(),
            discovery,
        }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Live peers offering the service, self excluded
    pub async fn list_peers(&self) -> Result<Vec<NodeId>> {
        let records = self.discovery.nodes().await?;
        let mut seen = HashSet::new();
        let peers = records
            .into_iter()
            .filter(|r| r.available && r.offers(&self.service_name))
            .map(|r| r.node_id)
            .filter(|id| *id != self.self_id)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Ok(peers)
    }

    /// Self followed by every live peer
    pub async fn list_all(&self) -> Result<Vec<NodeId>> {
        let mut all = vec![self.self_id.clone()];
        all.extend(self.list_peers().await?);
        Ok(all)
    }

    /// Whether `node` is part of the live membership (self always is)
    pub async fn is_live(&self, node: &NodeId) -> Result<bool> {
        if *node == self.self_id {
            return Ok(true);
        }
        Ok(self.list_peers().await?.contains(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;

    struct FixedDiscovery(Vec<PeerRecord>);

    #[async_trait]
    impl Discovery for FixedDiscovery {
        async fn nodes(&self) -> Result<Vec<PeerRecord>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenDiscovery;

    #[async_trait]
    impl Discovery for BrokenDiscovery {
        async fn nodes(&self) -> Result<Vec<PeerRecord>> {
            Err(Error::ConnectionFailed("registry down".into()))
        }
    }

    fn record(id: &str, services: &[&str], available: bool) -> PeerRecord {
        PeerRecord {
            node_id: NodeId::parse(id).unwrap(),
            services: services.iter().map(|s| s.to_string()).collect(),
            available,
        }
    }

    #[tokio::test]
    async fn test_filters_service_liveness_and_self() {
        let discovery = FixedDiscovery(vec![
            record("me-1", &["file"], true),
            record("a-2", &["file"], true),
            record("b-3", &["api"], true),
            record("c-4", &["file"], false),
            record("d-5", &["api", "file"], true),
            record("a-2", &["file"], true),
        ]);
        let me = NodeId::parse("me-1").unwrap();
        let dir = MembershipDirectory::new(me, "file", Arc::new(discovery));

        let peers: Vec<String> = dir
            .list_peers()
            .await
            .unwrap()
            .iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(peers, vec!["a-2", "d-5"]);

        let all = dir.list_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].as_str(), "me-1");
        assert!(!dir.is_live(&NodeId::parse("c-4").unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_discovery_failure_propagates() {
        let me = NodeId::parse("me-1").unwrap();
        let dir = MembershipDirectory::new(me, "file", Arc::new(BrokenDiscovery));
        assert!(matches!(
            dir.list_peers().await,
            Err(Error::ConnectionFailed(_))
        ));
    }
}
