//! Membership monitor
//!
//! Polls the membership directory and publishes the difference between two
//! consecutive views as join/leave events.

use crate::cluster::{MembershipDirectory, NodeId};
use crate::common::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(NodeId),
    Left(NodeId),
}

pub struct MembershipMonitor {
    membership: Arc<MembershipDirectory>,
    view: Mutex<Vec<NodeId>>,
    events: broadcast::Sender<MembershipEvent>,
}

impl MembershipMonitor {
    pub fn new(membership: Arc<MembershipDirectory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            membership,
            view: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    /// Last observed set of live peers
    pub fn view(&self) -> Vec<NodeId> {
        self.view.lock().clone()
    }

    /// Take one look at membership and publish what changed
    pub async fn poll_once(&self) -> Result<Vec<MembershipEvent>> {
        let current = self.membership.list_peers().await?;

        let changes = {
            let mut view = self.view.lock();
            let mut changes: Vec<MembershipEvent> = view
                .iter()
                .filter(|id| !current.contains(id))
                .cloned()
                .map(MembershipEvent::Left)
                .collect();
            changes.extend(
                current
                    .iter()
                    .filter(|id| !view.contains(id))
                    .cloned()
                    .map(MembershipEvent::Joined),
            );
            *view = current;
            changes
        };

        for change in &changes {
            info!("Membership change: {:?}", change);
            // no subscribers is fine
            let _ = self.events.send(change.clone());
        }
        Ok(changes)
    }

    /// Poll every `interval` until the task is aborted
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.poll_once().await {
                    warn!("Membership poll failed, keeping previous view: {}", e);
                }
            }
        })
    }
}
