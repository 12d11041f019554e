//! Metadata access routed to the coordinator
//!
//! Only the coordinator writes metadata. Every other node forwards each
//! call as a `metadata` RPC to whichever live node the coordination store
//! currently names. Each document the coordinator creates is copied to
//! every peer's local store with a `committed` event, and a starting node
//! pulls a snapshot from the coordinator, so a successor already holds the
//! whole catalogue when it takes over.

use crate::cluster::{CoordinationStore, MasterStrategy, MembershipDirectory, NodeId, WorkerNode};
use crate::common::{Error, Result};
use crate::rpc::{
    unexpected_reply, Action, Event, MetadataReply, MetadataRequest, Reply, Request, Transport,
};
use crate::store::{
    ChunkDocument, DuplicateDocument, FileDocument, MetadataRecord, MetadataStore, NewChunk,
    NewDuplicate, NewFile,
};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run one metadata request against a local store
pub async fn apply(store: &dyn MetadataStore, request: MetadataRequest) -> Result<MetadataReply> {
    Ok(match request {
        MetadataRequest::CreateFile(file) => MetadataReply::File(store.create_file(file).await?),
        MetadataRequest::CreateChunk(chunk) => {
            MetadataReply::Chunk(store.create_chunk(chunk).await?)
        }
        MetadataRequest::CreateDuplicate(dup) => {
            MetadataReply::Duplicate(store.create_duplicate(dup).await?)
        }
        MetadataRequest::GetFile { id } => MetadataReply::MaybeFile(store.get_file(&id).await?),
        MetadataRequest::ListFiles => MetadataReply::Files(store.list_files().await?),
        MetadataRequest::FindChunks { file_id } => {
            MetadataReply::Chunks(store.find_chunks(&file_id).await?)
        }
        MetadataRequest::FindDuplicates { chunk_id } => {
            MetadataReply::Duplicates(store.find_duplicates(&chunk_id).await?)
        }
        MetadataRequest::Snapshot => MetadataReply::Records(store.records().await?),
    })
}

pub struct RoutedMetadataStore {
    worker: Arc<WorkerNode>,
    local: Arc<dyn MetadataStore>,
    coordination: CoordinationStore,
    membership: Arc<MembershipDirectory>,
    transport: Arc<dyn Transport>,
    strategy: MasterStrategy,
}

impl RoutedMetadataStore {
    pub fn new(
        worker: Arc<WorkerNode>,
        local: Arc<dyn MetadataStore>,
        coordination: CoordinationStore,
        membership: Arc<MembershipDirectory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            worker,
            local,
            coordination,
            membership,
            transport,
            strategy: MasterStrategy,
        }
    }

    /// The coordinator's id, or `NoCoordinator` if it is unset or gone
    async fn target(&self) -> Result<NodeId> {
        let master = self.coordination.current_master().await?;
        let live = self.membership.list_all().await?;
        self.strategy
            .select(&live, master.as_ref())
            .cloned()
            .ok_or_else(|| Error::NoCoordinator(self.coordination.service_name().to_string()))
    }

    /// Answer a request from the local store, copying any new document to
    /// every peer
    pub async fn apply_local(&self, request: MetadataRequest) -> Result<MetadataReply> {
        let reply = apply(self.local.as_ref(), request).await?;
        if let Some(record) = reply.created() {
            self.copy_to_peers(record).await;
        }
        Ok(reply)
    }

    async fn copy_to_peers(&self, record: MetadataRecord) {
        let peers = match self.membership.list_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Metadata {} not copied, membership unavailable: {}", record.id(), e);
                return;
            }
        };

        let sends = peers.iter().map(|peer| {
            let event = Event::Committed {
                record: record.clone(),
            };
            async move { (peer, self.transport.emit(peer, event).await) }
        });
        for (peer, result) in join_all(sends).await {
            if let Err(e) = result {
                warn!("Metadata {} not copied to {}: {}", record.id(), peer, e);
            }
        }
    }

    /// Pull every document the coordinator holds into the local store.
    /// Returns how many were copied; zero when this node is coordinator.
    pub async fn catch_up(&self) -> Result<usize> {
        if self.worker.is_coordinator() {
            return Ok(0);
        }
        let target = self.target().await?;
        if &target == self.worker.node_id() {
            return Ok(0);
        }

        let request = Request::Metadata(MetadataRequest::Snapshot);
        let records = match self.transport.call(&target, request).await? {
            Reply::Metadata(MetadataReply::Records(records)) => records,
            other => return Err(unexpected_reply(Action::Metadata, &other)),
        };
        let count = records.len();
        for record in records {
            self.local.insert(record).await?;
        }
        info!("Copied {} metadata document(s) from {}", count, target);
        Ok(count)
    }

    async fn route(&self, request: MetadataRequest) -> Result<MetadataReply> {
        if self.worker.is_coordinator() {
            return self.apply_local(request).await;
        }

        let target = self.target().await?;
        if &target == self.worker.node_id() {
            return self.apply_local(request).await;
        }

        debug!("Forwarding metadata request to coordinator {}", target);
        match self.transport.call(&target, Request::Metadata(request)).await? {
            Reply::Metadata(reply) => Ok(reply),
            other => Err(unexpected_reply(Action::Metadata, &other)),
        }
    }
}

fn mismatch(reply: MetadataReply) -> Error {
    Error::Codec(format!("unexpected metadata reply: {:?}", reply))
}

#[async_trait]
impl MetadataStore for RoutedMetadataStore {
    async fn create_file(&self, file: NewFile) -> Result<FileDocument> {
        match self.route(MetadataRequest::CreateFile(file)).await? {
            MetadataReply::File(doc) => Ok(doc),
            other => Err(mismatch(other)),
        }
    }

    async fn create_chunk(&self, chunk: NewChunk) -> Result<ChunkDocument> {
        match self.route(MetadataRequest::CreateChunk(chunk)).await? {
            MetadataReply::Chunk(doc) => Ok(doc),
            other => Err(mismatch(other)),
        }
    }

    async fn create_duplicate(&self, duplicate: NewDuplicate) -> Result<DuplicateDocument> {
        match self.route(MetadataRequest::CreateDuplicate(duplicate)).await? {
            MetadataReply::Duplicate(doc) => Ok(doc),
            other => Err(mismatch(other)),
        }
    }

    async fn get_file(&self, id: &str) -> Result<Option<FileDocument>> {
        match self.route(MetadataRequest::GetFile { id: id.to_string() }).await? {
            MetadataReply::MaybeFile(doc) => Ok(doc),
            other => Err(mismatch(other)),
        }
    }

    async fn list_files(&self) -> Result<Vec<FileDocument>> {
        match self.route(MetadataRequest::ListFiles).await? {
            MetadataReply::Files(docs) => Ok(docs),
            other => Err(mismatch(other)),
        }
    }

    async fn find_chunks(&self, file_id: &str) -> Result<Vec<ChunkDocument>> {
        let request = MetadataRequest::FindChunks {
            file_id: file_id.to_string(),
        };
        match self.route(request).await? {
            MetadataReply::Chunks(docs) => Ok(docs),
            other => Err(mismatch(other)),
        }
    }

    async fn find_duplicates(&self, chunk_id: &str) -> Result<Vec<DuplicateDocument>> {
        let request = MetadataRequest::FindDuplicates {
            chunk_id: chunk_id.to_string(),
        };
        match self.route(request).await? {
            MetadataReply::Duplicates(docs) => Ok(docs),
            other => Err(mismatch(other)),
        }
    }

    /// Copies always land in the local store
    async fn insert(&self, record: MetadataRecord) -> Result<()> {
        self.local.insert(record).await
    }

    async fn records(&self) -> Result<Vec<MetadataRecord>> {
        self.local.records().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Discovery, MemoryCache, PeerRecord};
    use crate::store::MemoryMetadataStore;

    struct Solo(NodeId);

    #[async_trait]
    impl Discovery for Solo {
        async fn nodes(&self) -> Result<Vec<PeerRecord>> {
            Ok(vec![PeerRecord {
                node_id: self.0.clone(),
                services: vec!["file".into()],
                available: true,
            }])
        }
    }

    struct NoNetwork;

    #[async_trait]
    impl Transport for NoNetwork {
        async fn call(&self, target: &NodeId, _request: Request) -> Result<Reply> {
            Err(Error::PeerUnavailable(target.to_string()))
        }

        async fn emit(&self, target: &NodeId, _event: Event) -> Result<()> {
            Err(Error::PeerUnavailable(target.to_string()))
        }
    }

    fn routed(me: &str) -> (RoutedMetadataStore, CoordinationStore, Arc<WorkerNode>) {
        let id = NodeId::parse(me).unwrap();
        let worker = Arc::new(WorkerNode::new(id.clone()));
        let coordination = CoordinationStore::new("file", Arc::new(MemoryCache::new()));
        let membership = Arc::new(MembershipDirectory::new(
            id.clone(),
            "file",
            Arc::new(Solo(id)),
        ));
        let store = RoutedMetadataStore::new(
            worker.clone(),
            Arc::new(MemoryMetadataStore::new()),
            coordination.clone(),
            membership,
            Arc::new(NoNetwork),
        );
        (store, coordination, worker)
    }

    #[tokio::test]
    async fn test_no_pointer_is_no_coordinator() {
        let (store, _, _) = routed("n-1");
        let err = store.list_files().await.unwrap_err();
        assert!(matches!(err, Error::NoCoordinator(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stale_pointer_is_no_coordinator() {
        let (store, coordination, _) = routed("n-1");
        coordination.set_master(&NodeId::parse("n-9").unwrap()).await.unwrap();
        assert!(matches!(store.list_files().await, Err(Error::NoCoordinator(_))));
    }

    #[tokio::test]
    async fn test_coordinator_short_circuits() {
        let (store, _, worker) = routed("n-1");
        worker.become_coordinator();
        let file = store
            .create_file(NewFile {
                name: "x".into(),
                original_name: "x".into(),
                content_type: "text/plain".into(),
                checksum: "c".into(),
                size: 1,
            })
            .await
            .unwrap();
        assert_eq!(store.get_file(&file.id).await.unwrap(), Some(file));
    }

    #[tokio::test]
    async fn test_coordinator_has_nothing_to_catch_up() {
        let (store, _, worker) = routed("n-1");
        worker.become_coordinator();
        assert_eq!(store.catch_up().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_catch_up_without_coordinator_fails() {
        let (store, _, _) = routed("n-1");
        assert!(matches!(store.catch_up().await, Err(Error::NoCoordinator(_))));
    }
}
