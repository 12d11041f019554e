//! Metadata store for file, chunk and duplicate documents
//!
//! Documents are immutable once created. The coordinator copies each new
//! document to every peer as a `MetadataRecord`, so any node can take over
//! with the full catalogue. Two backends live here:
//! - `MemoryMetadataStore`: shared in-process store
//! - `RocksMetadataStore`: RocksDB column families, bincode values
//!
//! Chunk keys are `<file_id>/<chunk_id>` and duplicate keys
//! `<chunk_id>/<duplicate_id>` so find-by-parent is a prefix scan.

use crate::cluster::NodeId;
use crate::common::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rocksdb::{Direction, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;

const CF_FILES: &str = "files";
const CF_CHUNKS: &str = "chunks";
const CF_DUPLICATES: &str = "duplicates";

/// An uploaded file as a whole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDocument {
    pub id: String,
    pub name: String,
    pub original_name: String,
    pub content_type: String,
    pub checksum: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The primary copy of one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDocument {
    pub id: String,
    pub name: String,
    pub index: u32,
    pub location: NodeId,
    pub checksum: String,
    pub size: u64,
    pub file_id: String,
    pub created_at: DateTime<Utc>,
}

/// A redundant copy of a chunk held by another node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateDocument {
    pub id: String,
    pub name: String,
    pub location: NodeId,
    pub checksum: String,
    pub size: u64,
    pub chunk_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFile {
    pub name: String,
    pub original_name: String,
    pub content_type: String,
    pub checksum: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChunk {
    pub name: String,
    pub index: u32,
    pub location: NodeId,
    pub checksum: String,
    pub size: u64,
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDuplicate {
    pub name: String,
    pub location: NodeId,
    pub checksum: String,
    pub size: u64,
    pub chunk_id: String,
}

impl NewFile {
    fn into_document(self) -> FileDocument {
        let now = Utc::now();
        FileDocument {
            id: new_id(),
            name: self.name,
            original_name: self.original_name,
            content_type: self.content_type,
            checksum: self.checksum,
            size: self.size,
            created_at: now,
            updated_at: now,
        }
    }
}

impl NewChunk {
    fn into_document(self) -> ChunkDocument {
        ChunkDocument {
            id: new_id(),
            name: self.name,
            index: self.index,
            location: self.location,
            checksum: self.checksum,
            size: self.size,
            file_id: self.file_id,
            created_at: Utc::now(),
        }
    }
}

impl NewDuplicate {
    fn into_document(self) -> DuplicateDocument {
        DuplicateDocument {
            id: new_id(),
            name: self.name,
            location: self.location,
            checksum: self.checksum,
            size: self.size,
            chunk_id: self.chunk_id,
            created_at: Utc::now(),
        }
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A stored document of any kind, as copied between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataRecord {
    File(FileDocument),
    Chunk(ChunkDocument),
    Duplicate(DuplicateDocument),
}

impl MetadataRecord {
    pub fn id(&self) -> &str {
        match self {
            MetadataRecord::File(doc) => &doc.id,
            MetadataRecord::Chunk(doc) => &doc.id,
            MetadataRecord::Duplicate(doc) => &doc.id,
        }
    }
}

/// Create/find access to file, chunk and duplicate records
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_file(&self, file: NewFile) -> Result<FileDocument>;
    async fn create_chunk(&self, chunk: NewChunk) -> Result<ChunkDocument>;
    async fn create_duplicate(&self, duplicate: NewDuplicate) -> Result<DuplicateDocument>;
    async fn get_file(&self, id: &str) -> Result<Option<FileDocument>>;
    async fn list_files(&self) -> Result<Vec<FileDocument>>;
    /// Chunks of a file ordered by index
    async fn find_chunks(&self, file_id: &str) -> Result<Vec<ChunkDocument>>;
    async fn find_duplicates(&self, chunk_id: &str) -> Result<Vec<DuplicateDocument>>;
    /// Store a document created elsewhere, keeping its id; replaces any
    /// earlier copy with the same id
    async fn insert(&self, record: MetadataRecord) -> Result<()>;
    /// Every document: files, then chunks, then duplicates
    async fn records(&self) -> Result<Vec<MetadataRecord>>;
}

// === In-memory backend ===

#[derive(Default)]
struct MemoryTables {
    files: Vec<FileDocument>,
    chunks: Vec<ChunkDocument>,
    duplicates: Vec<DuplicateDocument>,
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_count(&self) -> usize {
        self.tables.read().chunks.len()
    }

    pub fn duplicate_count(&self) -> usize {
        self.tables.read().duplicates.len()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create_file(&self, file: NewFile) -> Result<FileDocument> {
        let doc = file.into_document();
        self.tables.write().files.push(doc.clone());
        Ok(doc)
    }

    async fn create_chunk(&self, chunk: NewChunk) -> Result<ChunkDocument> {
        let doc = chunk.into_document();
        self.tables.write().chunks.push(doc.clone());
        Ok(doc)
    }

    async fn create_duplicate(&self, duplicate: NewDuplicate) -> Result<DuplicateDocument> {
        let doc = duplicate.into_document();
        self.tables.write().duplicates.push(doc.clone());
        Ok(doc)
    }

    async fn get_file(&self, id: &str) -> Result<Option<FileDocument>> {
        Ok(self.tables.read().files.iter().find(|f| f.id == id).cloned())
    }

    async fn list_files(&self) -> Result<Vec<FileDocument>> {
        Ok(self.tables.read().files.clone())
    }

    async fn find_chunks(&self, file_id: &str) -> Result<Vec<ChunkDocument>> {
        let mut chunks: Vec<ChunkDocument> = self
            .tables
            .read()
            .chunks
            .iter()
            .filter(|c| c.file_id == file_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.index);
        Ok(chunks)
    }

    async fn find_duplicates(&self, chunk_id: &str) -> Result<Vec<DuplicateDocument>> {
        Ok(self
            .tables
            .read()
            .duplicates
            .iter()
            .filter(|d| d.chunk_id == chunk_id)
            .cloned()
            .collect())
    }

    async fn insert(&self, record: MetadataRecord) -> Result<()> {
        let mut tables = self.tables.write();
        match record {
            MetadataRecord::File(doc) => {
                tables.files.retain(|f| f.id != doc.id);
                tables.files.push(doc);
            }
            MetadataRecord::Chunk(doc) => {
                tables.chunks.retain(|c| c.id != doc.id);
                tables.chunks.push(doc);
            }
            MetadataRecord::Duplicate(doc) => {
                tables.duplicates.retain(|d| d.id != doc.id);
                tables.duplicates.push(doc);
            }
        }
        Ok(())
    }

    async fn records(&self) -> Result<Vec<MetadataRecord>> {
        let tables = self.tables.read();
        let files = tables.files.iter().cloned().map(MetadataRecord::File);
        let chunks = tables.chunks.iter().cloned().map(MetadataRecord::Chunk);
        let duplicates = tables.duplicates.iter().cloned().map(MetadataRecord::Duplicate);
        Ok(files.chain(chunks).chain(duplicates).collect())
    }
}

// === RocksDB backend ===

pub struct RocksMetadataStore {
    db: DB,
}

impl RocksMetadataStore {
    /// Open or create metadata store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_FILES, CF_CHUNKS, CF_DUPLICATES])?;

        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::MetadataCorrupted(format!("missing column family {}", name)))
    }

    fn put<T: Serialize>(&self, cf: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(cf)?;
        let bytes = bincode::serialize(value)
            .map_err(|e| Error::Internal(format!("Serialize error: {}", e)))?;
        self.db.put_cf(cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| Error::MetadataCorrupted(e.to_string()))
    }

    fn scan_all<T: for<'de> Deserialize<'de>>(&self, cf: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            out.push(Self::decode(&value)?);
        }
        Ok(out)
    }

    fn scan_prefix<T: for<'de> Deserialize<'de>>(
        &self,
        cf: &str,
        prefix: &str,
    ) -> Result<Vec<T>> {
        let cf = self.cf(cf)?;
        let prefix = format!("{}/", prefix);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            out.push(Self::decode(&value)?);
        }
        Ok(out)
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for RocksMetadataStore {
    async fn create_file(&self, file: NewFile) -> Result<FileDocument> {
        let doc = file.into_document();
        self.insert(MetadataRecord::File(doc.clone())).await?;
        Ok(doc)
    }

    async fn create_chunk(&self, chunk: NewChunk) -> Result<ChunkDocument> {
        let doc = chunk.into_document();
        self.insert(MetadataRecord::Chunk(doc.clone())).await?;
        Ok(doc)
    }

    async fn create_duplicate(&self, duplicate: NewDuplicate) -> Result<DuplicateDocument> {
        let doc = duplicate.into_document();
        self.insert(MetadataRecord::Duplicate(doc.clone())).await?;
        Ok(doc)
    }

    async fn get_file(&self, id: &str) -> Result<Option<FileDocument>> {
        let cf = self.cf(CF_FILES)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_files(&self) -> Result<Vec<FileDocument>> {
        self.scan_all(CF_FILES)
    }

    async fn find_chunks(&self, file_id: &str) -> Result<Vec<ChunkDocument>> {
        let mut chunks: Vec<ChunkDocument> = self.scan_prefix(CF_CHUNKS, file_id)?;
        chunks.sort_by_key(|c| c.index);
        Ok(chunks)
    }

    async fn find_duplicates(&self, chunk_id: &str) -> Result<Vec<DuplicateDocument>> {
        self.scan_prefix(CF_DUPLICATES, chunk_id)
    }

    async fn insert(&self, record: MetadataRecord) -> Result<()> {
        match &record {
            MetadataRecord::File(doc) => self.put(CF_FILES, &doc.id, doc),
            MetadataRecord::Chunk(doc) => {
                self.put(CF_CHUNKS, &format!("{}/{}", doc.file_id, doc.id), doc)
            }
            MetadataRecord::Duplicate(doc) => {
                self.put(CF_DUPLICATES, &format!("{}/{}", doc.chunk_id, doc.id), doc)
            }
        }
    }

    async fn records(&self) -> Result<Vec<MetadataRecord>> {
        let mut out: Vec<MetadataRecord> = self
            .scan_all(CF_FILES)?
            .into_iter()
            .map(MetadataRecord::File)
            .collect();
        out.extend(self.scan_all(CF_CHUNKS)?.into_iter().map(MetadataRecord::Chunk));
        out.extend(
            self.scan_all(CF_DUPLICATES)?
                .into_iter()
                .map(MetadataRecord::Duplicate),
        );
        Ok(out)
    }
}
