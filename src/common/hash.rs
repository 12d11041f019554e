//! Hashing utilities for chunkmesh
//!
//! BLAKE3 is used for every checksum recorded in file, chunk and duplicate
//! documents. Checksums are lowercase hex strings over the whole content.

use crate::common::{Error, Result};
use blake3::Hasher;
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_BUFFER: usize = 64 * 1024;

/// Compute BLAKE3 hash of data, return hex string
pub fn blake3_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("{}", hash)
}

/// Compute BLAKE3 hash incrementally (for streaming)
pub struct Blake3Hasher {
    hasher: Hasher,
}

impl Blake3Hasher {
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(&self) -> String {
        let hash = self.hasher.finalize();
        format!("{}", hash)
    }
}

impl Default for Blake3Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash a file on disk without loading it whole
pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Blake3Hasher::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Verify data against a recorded checksum
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<()> {
    let actual = blake3_hash(data);
    if actual == expected {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_hash() {
        let data = b"hello world";
        let hash = blake3_hash(data);
        assert_eq!(hash.len(), 64); // BLAKE3 produces 32 bytes = 64 hex chars
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        let mut hasher = Blake3Hasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), blake3_hash(b"hello world"));
    }

    #[test]
    fn test_verify_checksum() {
        let sum = blake3_hash(b"chunk");
        assert!(verify_checksum(b"chunk", &sum).is_ok());
        assert!(matches!(
            verify_checksum(b"chunk!", &sum),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data = vec![7u8; 200_000];
        std::fs::write(&path, &data).unwrap();
        assert_eq!(hash_file(&path).await.unwrap(), blake3_hash(&data));
    }
}
