use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Bucket the files handler writes uploads into.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under a new `key`. Writing to a key that already holds
    /// an object is an error; objects are never replaced.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Bucket laid out as a directory tree: object `a/b/c` lives at `{root}/a/b/c`.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!("Local object storage directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk path for a key. Keys that could escape the root are refused.
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains('\\') {
            bail!("Invalid object key: {:?}", key);
        }

        let relative = Path::new(key);
        let only_plain_segments = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !only_plain_segments || key.split('/').any(str::is_empty) {
            bail!("Invalid object key: {:?}", key);
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .with_context(|| format!("Cannot create object {}", key))?;
        file.write_all(&body).await?;
        file.flush().await?;

        debug!("Stored {} bytes at {}", body.len(), path.display());
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
