//! Chunk bytes on disk and the metadata describing them

pub mod chunks;
pub mod metadata;
pub mod remote;

pub use chunks::{Area, ChunkStore};
pub use metadata::{
    ChunkDocument, DuplicateDocument, FileDocument, MemoryMetadataStore, MetadataRecord,
    MetadataStore, NewChunk, NewDuplicate, NewFile, RocksMetadataStore,
};
pub use remote::RoutedMetadataStore;
