//! In-process network
//!
//! Routes requests straight into registered handlers. Nodes can be
//! disconnected and reconnected, and every attempted delivery is logged so
//! callers can check who was contacted.

use crate::cluster::{Discovery, NodeId, PeerRecord};
use crate::common::{Error, Result};
use crate::rpc::{Action, Event, Reply, Request, RpcHandler, Transport};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub target: NodeId,
    pub action: Action,
}

pub struct MemoryNetwork {
    service_name: String,
    // registration order doubles as discovery order
    handlers: RwLock<Vec<(NodeId, Weak<dyn RpcHandler>)>>,
    disconnected: RwLock<HashSet<NodeId>>,
    calls: Mutex<Vec<CallRecord>>,
}

impl MemoryNetwork {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            handlers: RwLock::new(Vec::new()),
            disconnected: RwLock::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler; the network only keeps a weak reference
    pub fn connect(&self, node_id: NodeId, handler: &Arc<dyn RpcHandler>) {
        let mut handlers = self.handlers.write();
        handlers.retain(|(id, _)| *id != node_id);
        handlers.push((node_id.clone(), Arc::downgrade(handler)));
        self.disconnected.write().remove(&node_id);
    }

    /// Make a node unreachable and invisible to discovery
    pub fn disconnect(&self, node_id: &NodeId) {
        self.disconnected.write().insert(node_id.clone());
    }

    pub fn reconnect(&self, node_id: &NodeId) {
        self.disconnected.write().remove(node_id);
    }

    pub fn is_connected(&self, node_id: &NodeId) -> bool {
        !self.disconnected.read().contains(node_id)
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, target: &NodeId, action: Action) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| &c.target == target && c.action == action)
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn route(&self, target: &NodeId, action: Action) -> Result<Arc<dyn RpcHandler>> {
        self.calls.lock().push(CallRecord {
            target: target.clone(),
            action,
        });

        if !self.is_connected(target) {
            return Err(Error::PeerUnavailable(target.to_string()));
        }

        self.handlers
            .read()
            .iter()
            .find(|(id, _)| id == target)
            .and_then(|(_, handler)| handler.upgrade())
            .ok_or_else(|| Error::PeerUnavailable(target.to_string()))
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn call(&self, target: &NodeId, request: Request) -> Result<Reply> {
        let handler = self.route(target, request.action())?;
        handler.handle(request).await
    }

    async fn emit(&self, target: &NodeId, event: Event) -> Result<()> {
        let handler = self.route(target, event.action())?;
        handler.on_event(event).await;
        Ok(())
    }
}

#[async_trait]
impl Discovery for MemoryNetwork {
    async fn nodes(&self) -> Result<Vec<PeerRecord>> {
        let disconnected = self.disconnected.read().clone();
        Ok(self
            .handlers
            .read()
            .iter()
            .map(|(id, handler)| PeerRecord {
                node_id: id.clone(),
                services: vec![self.service_name.clone()],
                available: handler.strong_count() > 0 && !disconnected.contains(id),
            })
            .collect())
    }
}
