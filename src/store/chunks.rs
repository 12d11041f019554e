//! On-disk chunk storage
//!
//! Layout under the node's data directory:
//! ```text
//! temp/        incoming uploads and their partitions
//! chunks/      primary chunks held by this node
//! duplicates/  redundant copies of other nodes' chunks
//! downloads/   one fresh directory per download
//! ```

use crate::common::{validate_name, Blake3Hasher, Error, Result};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Temp,
    Primary,
    Duplicate,
}

impl Area {
    fn dir_name(&self) -> &'static str {
        match self {
            Area::Temp => "temp",
            Area::Primary => "chunks",
            Area::Duplicate => "duplicates",
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Open the store, creating its directories
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for area in [Area::Temp, Area::Primary, Area::Duplicate] {
            fs::create_dir_all(root.join(area.dir_name())).await?;
        }
        fs::create_dir_all(root.join("downloads")).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn area_dir(&self, area: Area) -> PathBuf {
        self.root.join(area.dir_name())
    }

    /// Path of `name` in `area`; rejects names that would leave the area
    pub fn path(&self, area: Area, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.area_dir(area).join(name))
    }

    /// Stream a body to disk, returning its size and BLAKE3 checksum
    pub async fn write_stream<S, E>(
        &self,
        area: Area,
        name: &str,
        mut body: S,
    ) -> Result<(u64, String)>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
        E: fmt::Display,
    {
        let path = self.path(area, name)?;
        let mut file = fs::File::create(&path).await?;
        let mut hasher = Blake3Hasher::new();
        let mut size = 0u64;

        while let Some(piece) = body.next().await {
            let piece = piece.map_err(|e| Error::Http(format!("upload body: {}", e)))?;
            hasher.update(&piece);
            size += piece.len() as u64;
            file.write_all(&piece).await?;
        }
        file.flush().await?;

        Ok((size, hasher.finalize()))
    }

    pub async fn write(&self, area: Area, name: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.path(area, name)?;
        fs::write(&path, data).await?;
        Ok(path)
    }

    pub async fn read(&self, area: Area, name: &str) -> Result<Bytes> {
        let path = self.path(area, name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("{}/{}", area, name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a file; a missing file is not an error
    pub async fn remove(&self, area: Area, name: &str) -> Result<()> {
        let path = self.path(area, name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Names stored in `area`
    pub async fn list(&self, area: Area) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(self.area_dir(area)).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    pub fn downloads_root(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// A fresh, empty directory for one download
    pub async fn download_dir(&self) -> Result<PathBuf> {
        let dir = self
            .downloads_root()
            .join(uuid::Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Delete one download directory and everything in it
    pub async fn remove_download(&self, dir: &Path) -> Result<()> {
        if dir.parent() != Some(self.downloads_root().as_path()) {
            return Err(Error::InvalidRequest(format!(
                "{} is not a download directory",
                dir.display()
            )));
        }
        match fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
