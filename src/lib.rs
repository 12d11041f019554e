//! # chunkmesh
//!
//! A peer-replicated, chunked file store for a cluster of equal nodes:
//! - Any node accepts an upload and splits it across every live peer
//! - Each node holds one primary chunk plus a duplicate of every other chunk
//! - Downloads verify BLAKE3 checksums and fail over to duplicates
//! - A Bully election keeps one coordinator, which owns file metadata
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            upload / download (HTTP)
//!                     │
//!              ┌──────▼──────┐   election / victory   ┌─────────────┐
//!              │   Node 5    │◄──────────────────────►│  Node 12    │
//!              │ chunk 0     │                        │ coordinator │
//!              │ dup 1, 2    │   store / retrieve     │ chunk 1     │
//!              └──────┬──────┘◄──────────────────────►│ dup 0, 2    │
//!                     │                               └──────┬──────┘
//!                     │          ┌─────────────┐             │
//!                     └─────────►│   Node 7    │◄────────────┘
//!                                │ chunk 2     │
//!                                │ dup 0, 1    │
//!                                └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start nodes
//! ```bash
//! chunkmesh-node serve --id alpha-5 --bind 0.0.0.0:3000 --advertise http://10.0.0.1:3000
//! chunkmesh-node serve --id beta-12 --bind 0.0.0.0:3000 --advertise http://10.0.0.2:3000 \
//!   --peers http://10.0.0.1:3000 --cache-url http://10.0.0.1:3000
//! ```
//!
//! ### Use the CLI
//! ```bash
//! chunkmesh upload ./report.pdf --node http://10.0.0.1:3000
//! chunkmesh download <file-id> --output ./report.pdf
//! chunkmesh files
//! chunkmesh info
//! ```

pub mod cluster;
pub mod common;
pub mod node;
pub mod replication;
pub mod rpc;
pub mod store;

// Re-export commonly used types
pub use cluster::{ElectionEngine, NodeId, WorkerNode};
pub use common::{Config, Error, Result};
pub use node::{Node, NodeServer};
pub use replication::{DownloadReport, ReplicationEngine, UploadReceipt};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
