//! Chunked replication
//!
//! Upload splits a file into one chunk per live participant, sends every
//! participant its primary and then a duplicate of every other chunk.
//! Download fetches each chunk from its primary, falls back to duplicates
//! on any failure, verifies every copy and reassembles the file.

pub mod placement;
pub mod split;

use crate::cluster::{MembershipDirectory, NodeId};
use crate::common::{
    encode_name, unique_name, validate_name, verify_checksum, Blake3Hasher, Error, Result,
};
use crate::rpc::{unexpected_reply, Reply, Request, Transport};
use crate::store::{
    Area, ChunkDocument, ChunkStore, DuplicateDocument, FileDocument, MetadataStore, NewChunk,
    NewDuplicate, NewFile,
};
use bytes::Bytes;
use futures_util::future::try_join_all;
use futures_util::Stream;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub use placement::{ChunkAssignment, DuplicateAssignment, PlacementManager};
pub use split::{partition_ranges, split_file, ChunkPart};

/// Everything written for one upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub file: FileDocument,
    pub chunks: Vec<ChunkDocument>,
    pub duplicates: Vec<DuplicateDocument>,
}

/// Where one chunk of a download came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSource {
    pub chunk_id: String,
    pub index: u32,
    pub location: NodeId,
    pub from_duplicate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReport {
    pub file: FileDocument,
    pub output_dir: PathBuf,
    pub assembled_path: PathBuf,
    pub sources: Vec<ChunkSource>,
}

pub struct ReplicationEngine {
    node_id: NodeId,
    membership: Arc<MembershipDirectory>,
    transport: Arc<dyn Transport>,
    metadata: Arc<dyn MetadataStore>,
    chunks: Arc<ChunkStore>,
}

impl ReplicationEngine {
    pub fn new(
        node_id: NodeId,
        membership: Arc<MembershipDirectory>,
        transport: Arc<dyn Transport>,
        metadata: Arc<dyn MetadataStore>,
        chunks: Arc<ChunkStore>,
    ) -> Self {
        Self {
            node_id,
            membership,
            transport,
            metadata,
            chunks,
        }
    }

    pub fn chunk_store(&self) -> &Arc<ChunkStore> {
        &self.chunks
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Deliver a request, handling it in-process when the target is self
    async fn deliver(&self, target: &NodeId, request: Request) -> Result<Reply> {
        if *target == self.node_id {
            self.serve(request).await
        } else {
            self.transport.call(target, request).await
        }
    }

    // === Upload ===

    pub async fn upload<S, E>(
        &self,
        original_name: &str,
        content_type: &str,
        body: S,
    ) -> Result<UploadReceipt>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
        E: fmt::Display,
    {
        let unique = unique_name(original_name);
        let result = self.replicate(&unique, original_name, content_type, body).await;
        // temp/ is emptied whether or not every transfer succeeded
        self.clear_temp(&unique).await;
        result
    }

    async fn replicate<S, E>(
        &self,
        unique: &str,
        original_name: &str,
        content_type: &str,
        body: S,
    ) -> Result<UploadReceipt>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
        E: fmt::Display,
    {
        let (size, checksum) = self.chunks.write_stream(Area::Temp, unique, body).await?;
        info!("Received upload {} ({} bytes)", unique, size);

        let file = self
            .metadata
            .create_file(NewFile {
                name: unique.to_string(),
                original_name: original_name.to_string(),
                content_type: content_type.to_string(),
                checksum,
                size,
            })
            .await?;

        let mut participants = vec![self.node_id.clone()];
        participants.extend(self.membership.list_peers().await?);

        let source = self.chunks.path(Area::Temp, unique)?;
        let temp_dir = self.chunks.area_dir(Area::Temp);
        let parts = split_file(&source, &temp_dir, unique, participants.len()).await?;
        let assignments = PlacementManager::assign_chunks(&participants)?;

        let chunk_docs = try_join_all(assignments.iter().map(|a| {
            let part = &parts[a.index as usize];
            self.send_chunk(&a.location, &file.id, part)
        }))
        .await?;

        let plan = PlacementManager::plan_duplicates(&assignments);
        let duplicate_docs = try_join_all(plan.iter().map(|d| {
            let i = d.chunk_index as usize;
            self.send_duplicate(&d.target, &chunk_docs[i], &parts[i])
        }))
        .await?;

        info!(
            "Stored {} as {} chunk(s) and {} duplicate(s)",
            file.id,
            chunk_docs.len(),
            duplicate_docs.len()
        );
        Ok(UploadReceipt {
            file,
            chunks: chunk_docs,
            duplicates: duplicate_docs,
        })
    }

    /// Remove an upload and every partition of it from temp/
    async fn clear_temp(&self, unique: &str) {
        let names = match self.chunks.list(Area::Temp).await {
            Ok(names) => names,
            Err(e) => {
                warn!("Could not list temp files of {}: {}", unique, e);
                return;
            }
        };
        let parts_prefix = format!("{}.part", unique);
        for name in names
            .iter()
            .filter(|n| *n == unique || n.starts_with(&parts_prefix))
        {
            if let Err(e) = self.chunks.remove(Area::Temp, name).await {
                warn!("Could not remove temp file {}: {}", name, e);
            }
        }
    }

    /// Upload from an in-memory buffer
    pub async fn upload_bytes(
        &self,
        original_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<UploadReceipt> {
        let body = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(data)]);
        self.upload(original_name, content_type, body).await
    }

    async fn send_chunk(
        &self,
        target: &NodeId,
        file_id: &str,
        part: &ChunkPart,
    ) -> Result<ChunkDocument> {
        debug!("Sending {} to {}", part.name, target);
        let request = Request::StoreChunk {
            file_id: file_id.to_string(),
            name: part.name.clone(),
            index: part.index,
            data: part.data.clone(),
        };
        let action = request.action();
        match self.deliver(target, request).await? {
            Reply::Chunk(doc) => Ok(doc),
            other => Err(unexpected_reply(action, &other)),
        }
    }

    async fn send_duplicate(
        &self,
        target: &NodeId,
        chunk: &ChunkDocument,
        part: &ChunkPart,
    ) -> Result<DuplicateDocument> {
        debug!("Sending duplicate of {} to {}", chunk.name, target);
        let request = Request::StoreDuplicate {
            chunk_id: chunk.id.clone(),
            name: chunk.name.clone(),
            data: part.data.clone(),
        };
        let action = request.action();
        match self.deliver(target, request).await? {
            Reply::Duplicate(doc) => Ok(doc),
            other => Err(unexpected_reply(action, &other)),
        }
    }

    // === Download ===

    pub async fn download(&self, file_id: &str) -> Result<DownloadReport> {
        let file = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;
        let chunks = self.metadata.find_chunks(file_id).await?;
        let live: HashSet<NodeId> = self.membership.list_all().await?.into_iter().collect();

        let fetched = try_join_all(chunks.iter().map(|c| self.fetch_verified(c, &live))).await?;

        let output_dir = self.chunks.download_dir().await?;
        let assembled_path = output_dir.join(encode_name(&file.original_name));
        if let Err(e) = assemble(&output_dir, &assembled_path, &file, &chunks, &fetched).await {
            if let Err(cleanup) = self.chunks.remove_download(&output_dir).await {
                warn!("Could not remove {}: {}", output_dir.display(), cleanup);
            }
            return Err(e);
        }

        info!("Downloaded {} into {}", file.id, output_dir.display());
        Ok(DownloadReport {
            file,
            output_dir,
            assembled_path,
            sources: fetched.into_iter().map(|(_, source)| source).collect(),
        })
    }

    /// Delete the files a download left on disk
    pub async fn discard(&self, report: &DownloadReport) -> Result<()> {
        self.chunks.remove_download(&report.output_dir).await
    }

    /// Primary first, then live duplicates in random order
    async fn fetch_verified(
        &self,
        chunk: &ChunkDocument,
        live: &HashSet<NodeId>,
    ) -> Result<(Bytes, ChunkSource)> {
        let source = |location: &NodeId, from_duplicate| ChunkSource {
            chunk_id: chunk.id.clone(),
            index: chunk.index,
            location: location.clone(),
            from_duplicate,
        };

        if live.contains(&chunk.location) {
            let request = Request::RetrieveChunk {
                name: chunk.name.clone(),
            };
            match self.fetch(&chunk.location, request, &chunk.checksum).await {
                Ok(data) => return Ok((data, source(&chunk.location, false))),
                Err(e) => warn!("Primary of {} at {} unusable: {}", chunk.name, chunk.location, e),
            }
        } else {
            debug!("Primary of {} at {} is not live", chunk.name, chunk.location);
        }

        let mut duplicates: Vec<DuplicateDocument> = self
            .metadata
            .find_duplicates(&chunk.id)
            .await?
            .into_iter()
            .filter(|d| live.contains(&d.location))
            .collect();
        duplicates.shuffle(&mut rand::thread_rng());

        for dup in &duplicates {
            let request = Request::RetrieveDuplicate {
                name: dup.name.clone(),
            };
            match self.fetch(&dup.location, request, &chunk.checksum).await {
                Ok(data) => return Ok((data, source(&dup.location, true))),
                Err(e) => warn!("Duplicate of {} at {} unusable: {}", chunk.name, dup.location, e),
            }
        }

        Err(Error::NoVerifiedCopy {
            chunk: chunk.name.clone(),
        })
    }

    async fn fetch(&self, target: &NodeId, request: Request, checksum: &str) -> Result<Bytes> {
        let action = request.action();
        let data = match self.deliver(target, request).await? {
            Reply::Data(data) => data,
            other => return Err(unexpected_reply(action, &other)),
        };
        verify_checksum(&data, checksum)?;
        Ok(data)
    }

    // === Serving side ===

    /// Handle the chunk-level requests addressed to this node
    pub async fn serve(&self, request: Request) -> Result<Reply> {
        match request {
            Request::StoreChunk {
                file_id,
                name,
                index,
                data,
            } => Ok(Reply::Chunk(self.accept_chunk(&file_id, &name, index, data).await?)),
            Request::StoreDuplicate {
                chunk_id,
                name,
                data,
            } => Ok(Reply::Duplicate(self.accept_duplicate(&chunk_id, &name, data).await?)),
            Request::RetrieveChunk { name } => Ok(Reply::Data(self.read_chunk(&name).await?)),
            Request::RetrieveDuplicate { name } => {
                Ok(Reply::Data(self.read_duplicate(&name).await?))
            }
            other => Err(Error::InvalidRequest(format!(
                "{} is not a replication request",
                other.action()
            ))),
        }
    }

    pub async fn accept_chunk(
        &self,
        file_id: &str,
        name: &str,
        index: u32,
        data: Bytes,
    ) -> Result<ChunkDocument> {
        validate_name(name)?;
        self.chunks.write(Area::Primary, name, &data).await?;
        self.metadata
            .create_chunk(NewChunk {
                name: name.to_string(),
                index,
                location: self.node_id.clone(),
                checksum: crate::common::blake3_hash(&data),
                size: data.len() as u64,
                file_id: file_id.to_string(),
            })
            .await
    }

    pub async fn accept_duplicate(
        &self,
        chunk_id: &str,
        name: &str,
        data: Bytes,
    ) -> Result<DuplicateDocument> {
        validate_name(name)?;
        self.chunks.write(Area::Duplicate, name, &data).await?;
        self.metadata
            .create_duplicate(NewDuplicate {
                name: name.to_string(),
                location: self.node_id.clone(),
                checksum: crate::common::blake3_hash(&data),
                size: data.len() as u64,
                chunk_id: chunk_id.to_string(),
            })
            .await
    }

    pub async fn read_chunk(&self, name: &str) -> Result<Bytes> {
        self.chunks.read(Area::Primary, name).await
    }

    pub async fn read_duplicate(&self, name: &str) -> Result<Bytes> {
        self.chunks.read(Area::Duplicate, name).await
    }
}

/// Write every chunk and the reassembled file, checking the whole-file hash
async fn assemble(
    output_dir: &Path,
    assembled_path: &Path,
    file: &FileDocument,
    chunks: &[ChunkDocument],
    fetched: &[(Bytes, ChunkSource)],
) -> Result<()> {
    let mut assembled = tokio::fs::File::create(assembled_path).await?;
    let mut hasher = Blake3Hasher::new();

    for (chunk, (data, _)) in chunks.iter().zip(fetched) {
        tokio::fs::write(output_dir.join(&chunk.name), data).await?;
        assembled.write_all(data).await?;
        hasher.update(data);
    }
    assembled.flush().await?;

    let actual = hasher.finalize();
    if actual != file.checksum {
        return Err(Error::ChecksumMismatch {
            expected: file.checksum.clone(),
            actual,
        });
    }
    Ok(())
}
