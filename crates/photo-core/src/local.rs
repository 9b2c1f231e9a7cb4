use std::{
    path::{Path, PathBuf},
    process,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{error, info};
use url::Url;

use crate::blob::{object_url, BlobStore, StorageError};

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Stores each object as a flat file under `root`. Returned URLs are
/// `<public_base>/<name>`; the daemon serves `root` at that base.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    public_base: Url,
}

impl LocalBlobStore {
    /// Creates the root directory if needed.
    pub async fn open(root: impl Into<PathBuf>, public_base: Url) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|err| {
            StorageError::new(format!("failed to create {}: {err}", root.display()))
        })?;
        info!(root = %root.display(), public_base = %public_base, "local blob storage ready");
        Ok(Self { root, public_base })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let traversal = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
            || name.contains('\0');
        if traversal {
            return Err(StorageError::new(format!(
                "'{name}' is not a valid object name"
            )));
        }
        Ok(self.root.join(name))
    }

    fn staging_path(&self, name: &str) -> PathBuf {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{name}.{}-{seq}.partial", process::id()))
    }
}

/// Writes and fsyncs `content` at `staging`, then renames it onto `target`.
/// Readers see either the previous object or the complete new one.
async fn write_atomically(staging: &Path, target: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(staging).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(staging, target).await?;
    #[cfg(unix)]
    if let Some(dir) = target.parent() {
        fs::File::open(dir).await?.sync_all().await?;
    }
    Ok(())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put_object(&self, name: &str, content: Bytes) -> Result<String, StorageError> {
        let path = self.object_path(name)?;
        info!(object = name, bytes = content.len(), "uploading file to local blob storage");

        let staging = self.staging_path(name);
        if let Err(err) = write_atomically(&staging, &path, &content).await {
            fs::remove_file(&staging).await.ok();
            error!(object = name, error = %err, "local blob storage error");
            return Err(StorageError::new(format!("{}: {err}", path.display())));
        }

        let url = object_url(&self.public_base, &[name])?;
        info!(object = name, url = %url, "file uploaded to local blob storage");
        Ok(url)
    }
}
