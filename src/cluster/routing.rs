//! Routing for calls that need the one authoritative node

use crate::cluster::{NodeId, PeerRecord};

/// Anything that can be addressed by node id
pub trait Endpoint {
    fn node_id(&self) -> &NodeId;
}

impl Endpoint for NodeId {
    fn node_id(&self) -> &NodeId {
        self
    }
}

impl Endpoint for PeerRecord {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }
}

/// Picks the endpoint that currently holds the coordinator pointer
#[derive(Debug, Clone, Copy, Default)]
pub struct MasterStrategy;

impl MasterStrategy {
    /// `None` when the pointer is unset or names no live endpoint
    pub fn select<'a, E: Endpoint>(
        &self,
        endpoints: &'a [E],
        master: Option<&NodeId>,
    ) -> Option<&'a E> {
        let master = master?;
        endpoints.iter().find(|e| e.node_id() == master)
    }
}
