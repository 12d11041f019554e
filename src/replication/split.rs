//! Splitting a stored upload into equal partitions

use crate::common::{blake3_hash, Result};
use bytes::Bytes;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// One partition written next to the source file
#[derive(Debug, Clone)]
pub struct ChunkPart {
    pub index: u32,
    pub name: String,
    pub path: PathBuf,
    pub checksum: String,
    pub data: Bytes,
}

/// `n` byte ranges of `size / n` bytes; the last one takes the remainder
pub fn partition_ranges(size: u64, n: usize) -> Vec<Range<u64>> {
    if n == 0 {
        return Vec::new();
    }
    let base = size / n as u64;
    (0..n as u64)
        .map(|i| {
            let start = i * base;
            let end = if i == n as u64 - 1 { size } else { start + base };
            start..end
        })
        .collect()
}

/// Partition name for the 1-based `k`
pub fn part_name(base_name: &str, index: u32) -> String {
    format!("{}.part{}", base_name, index + 1)
}

/// Split `source` into `n` partition files inside `dir`
pub async fn split_file(
    source: &Path,
    dir: &Path,
    base_name: &str,
    n: usize,
) -> Result<Vec<ChunkPart>> {
    let size = fs::metadata(source).await?.len();
    let mut file = fs::File::open(source).await?;
    let mut parts = Vec::with_capacity(n);

    for (i, range) in partition_ranges(size, n).into_iter().enumerate() {
        let index = i as u32;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.seek(SeekFrom::Start(range.start)).await?;
        file.read_exact(&mut buf).await?;

        let name = part_name(base_name, index);
        let path = dir.join(&name);
        fs::write(&path, &buf).await?;

        parts.push(ChunkPart {
            index,
            checksum: blake3_hash(&buf),
            name,
            path,
            data: Bytes::from(buf),
        });
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ranges_cover_everything() {
        let ranges = partition_ranges(10, 3);
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);
        assert_eq!(partition_ranges(9, 3), vec![0..3, 3..6, 6..9]);
        assert_eq!(partition_ranges(2, 3), vec![0..0, 0..0, 0..2]);
        assert!(partition_ranges(5, 0).is_empty());
    }

    #[test]
    fn test_part_names_are_one_based() {
        assert_eq!(part_name("123__a.txt", 0), "123__a.txt.part1");
    }

    #[tokio::test]
    async fn test_split_file_reassembles() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("upload");
        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &content).unwrap();

        let parts = split_file(&source, dir.path(), "upload", 3).await.unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].data.len(), 334);

        let joined: Vec<u8> = parts.iter().flat_map(|p| p.data.to_vec()).collect();
        assert_eq!(joined, content);
        assert_eq!(std::fs::read(&parts[1].path).unwrap(), parts[1].data.to_vec());
        assert_eq!(parts[0].checksum, blake3_hash(&parts[0].data));
    }
}
