//! Node-to-node messages and the transport seam
//!
//! Every inter-node interaction is one variant of `Request` answered by the
//! matching `Reply`, or a fire-and-forget `Event`. Transports only move these
//! values around; `RpcHandler` implementations give them meaning.

pub mod http;
pub mod memory;

use crate::cluster::{NodeId, WorkerSnapshot};
use crate::common::{Error, Result};
use crate::store::{
    ChunkDocument, DuplicateDocument, FileDocument, MetadataRecord, NewChunk, NewDuplicate,
    NewFile,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use http::{Announcement, HttpDiscovery, HttpTransport};
pub use memory::{CallRecord, MemoryNetwork};

/// Positive answer to an election request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionAck {
    Alive,
}

/// Static facts about a node, for clients and operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub service_name: String,
    pub is_coordinator: bool,
    pub coordinator: Option<NodeId>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetadataRequest {
    CreateFile(NewFile),
    CreateChunk(NewChunk),
    CreateDuplicate(NewDuplicate),
    GetFile { id: String },
    ListFiles,
    FindChunks { file_id: String },
    FindDuplicates { chunk_id: String },
    /// Every document, for a node catching up
    Snapshot,
}

impl MetadataRequest {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            MetadataRequest::CreateFile(_)
                | MetadataRequest::CreateChunk(_)
                | MetadataRequest::CreateDuplicate(_)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetadataReply {
    File(FileDocument),
    MaybeFile(Option<FileDocument>),
    Files(Vec<FileDocument>),
    Chunk(ChunkDocument),
    Chunks(Vec<ChunkDocument>),
    Duplicate(DuplicateDocument),
    Duplicates(Vec<DuplicateDocument>),
    Records(Vec<MetadataRecord>),
}

impl MetadataReply {
    /// The document a write produced, if this answers a write
    pub fn created(&self) -> Option<MetadataRecord> {
        match self {
            MetadataReply::File(doc) => Some(MetadataRecord::File(doc.clone())),
            MetadataReply::Chunk(doc) => Some(MetadataRecord::Chunk(doc.clone())),
            MetadataReply::Duplicate(doc) => Some(MetadataRecord::Duplicate(doc.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Election {
        sender: NodeId,
    },
    NodeStatus,
    NodeInfo,
    StoreChunk {
        file_id: String,
        name: String,
        index: u32,
        data: Bytes,
    },
    StoreDuplicate {
        chunk_id: String,
        name: String,
        data: Bytes,
    },
    RetrieveChunk {
        name: String,
    },
    RetrieveDuplicate {
        name: String,
    },
    Metadata(MetadataRequest),
}

impl Request {
    pub fn action(&self) -> Action {
        match self {
            Request::Election { .. } => Action::Election,
            Request::NodeStatus => Action::NodeStatus,
            Request::NodeInfo => Action::NodeInfo,
            Request::StoreChunk { .. } => Action::StoreChunk,
            Request::StoreDuplicate { .. } => Action::StoreDuplicate,
            Request::RetrieveChunk { .. } => Action::RetrieveChunk,
            Request::RetrieveDuplicate { .. } => Action::RetrieveDuplicate,
            Request::Metadata(_) => Action::Metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Election(Option<ElectionAck>),
    NodeStatus(WorkerSnapshot),
    NodeInfo(NodeInfo),
    Chunk(ChunkDocument),
    Duplicate(DuplicateDocument),
    Data(Bytes),
    Metadata(MetadataReply),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Victory { sender: NodeId },
    /// A document the coordinator just stored
    Committed { record: MetadataRecord },
}

impl Event {
    pub fn action(&self) -> Action {
        match self {
            Event::Victory { .. } => Action::Victory,
            Event::Committed { .. } => Action::Committed,
        }
    }
}

/// Action names, as they appear in logs and call records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Election,
    NodeStatus,
    NodeInfo,
    StoreChunk,
    StoreDuplicate,
    RetrieveChunk,
    RetrieveDuplicate,
    Metadata,
    Victory,
    Committed,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Election => "election",
            Action::NodeStatus => "node-status",
            Action::NodeInfo => "node-info",
            Action::StoreChunk => "store-chunk",
            Action::StoreDuplicate => "store-duplicate",
            Action::RetrieveChunk => "retrieve-chunk",
            Action::RetrieveDuplicate => "retrieve-duplicate",
            Action::Metadata => "metadata",
            Action::Victory => "victory",
            Action::Committed => "committed",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-to-point delivery of requests and events
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, target: &NodeId, request: Request) -> Result<Reply>;
    async fn emit(&self, target: &NodeId, event: Event) -> Result<()>;
}

/// Receiving side of the transport
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Result<Reply>;
    async fn on_event(&self, event: Event);
}

/// Build the error for a reply of the wrong shape
pub fn unexpected_reply(action: Action, reply: &Reply) -> Error {
    Error::Codec(format!("unexpected reply to {}: {:?}", action, reply))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        let req = Request::RetrieveDuplicate { name: "a.part1".into() };
        assert_eq!(req.action().as_str(), "retrieve-duplicate");
        assert_eq!(Request::NodeStatus.action().to_string(), "node-status");
        let event = Event::Victory {
            sender: NodeId::parse("n-1").unwrap(),
        };
        assert_eq!(event.action().as_str(), "victory");
    }

    #[test]
    fn test_only_writes_produce_records() {
        assert!(MetadataReply::Files(Vec::new()).created().is_none());
        assert!(MetadataReply::MaybeFile(None).created().is_none());
        assert!(!MetadataRequest::Snapshot.is_write());
    }

    #[test]
    fn test_metadata_writes() {
        assert!(!MetadataRequest::ListFiles.is_write());
        assert!(MetadataRequest::CreateFile(NewFile {
            name: "n".into(),
            original_name: "n".into(),
            content_type: "text/plain".into(),
            checksum: "c".into(),
            size: 1,
        })
        .is_write());
    }

    #[test]
    fn test_request_bincode() {
        let req = Request::StoreChunk {
            file_id: "f1".into(),
            name: "x.part2".into(),
            index: 1,
            data: Bytes::from_static(b"payload"),
        };
        let bytes = bincode::serialize(&req).unwrap();
        match bincode::deserialize::<Request>(&bytes).unwrap() {
            Request::StoreChunk { index, data, .. } => {
                assert_eq!(index, 1);
                assert_eq!(&data[..], b"payload");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
