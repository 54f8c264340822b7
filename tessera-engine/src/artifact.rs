//! Content-addressed cache for rendered artifacts.
//!
//! Entries are keyed by resource cache id and carry a recorded blake3 sum,
//! letting a later run skip unchanged artifacts or restore files that went
//! missing from the output tree without re-rendering them.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ArtifactCache { dir: dir.into() }
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    fn sum_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.sum"))
    }

    /// Read an entry, returning it only when its recorded sum verifies.
    /// A corrupt or partial entry reads as absent and will be re-rendered.
    pub async fn read_verified(&self, id: &str) -> Option<Vec<u8>> {
        let content = tokio::fs::read(self.entry_path(id)).await.ok()?;
        let recorded = tokio::fs::read_to_string(self.sum_path(id)).await.ok()?;
        if blake3::hash(&content).to_hex().as_str() == recorded.trim() {
            Some(content)
        } else {
            tracing::warn!(entry = id, "artifact cache sum mismatch, ignoring entry");
            None
        }
    }

    /// Record rendered bytes and their sum under `id`.
    pub async fn record(&self, id: &str, content: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.entry_path(id), content).await?;
        tokio::fs::write(
            self.sum_path(id),
            blake3::hash(content).to_hex().as_str(),
        )
        .await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
