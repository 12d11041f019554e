//! Cluster membership, coordinator election and routing

pub mod coordination;
pub mod election;
pub mod membership;
pub mod node_id;
pub mod routing;
pub mod worker;

pub use coordination::{
    CoordinationKey, CoordinationStore, DistributedCache, HttpCache, MemoryCache,
};
pub use election::ElectionEngine;
pub use membership::{Discovery, MembershipDirectory, PeerRecord};
pub use node_id::NodeId;
pub use routing::{Endpoint, MasterStrategy};
pub use worker::{ElectionState, WorkerNode, WorkerSnapshot};
