//! Upload orchestration for the photo service.
//!
//! An upload touches two independent systems: the bytes go to a blob store
//! and a metadata row goes to the relational repository. [`UploadService`]
//! sequences the two calls strictly, one after the other, with no lock held
//! across them and no compensation between them. If the metadata insert
//! fails after the blob write succeeded, the blob stays behind as an orphan
//! with no row pointing at it. That gap is kept on purpose and reported in
//! the logs so an operator can reconcile it.

mod blob;
mod local;
mod s3;

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub use blob::{BlobStore, MemoryBlobStore, StorageError};
pub use local::LocalBlobStore;
pub use photo_db::{PhotoRecord, PhotoRepository, RepositoryError};
pub use s3::{resolve_public_base, S3BlobStore, S3Config};

/// Failure of one upload. Both kinds end the request; neither is retried.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Name and URL of a photo whose blob and metadata row were both written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPhoto {
    pub photo_name: String,
    pub photo_url: String,
}

/// Sequences blob upload then metadata insert for one file.
#[derive(Clone)]
pub struct UploadService {
    blobs: Arc<dyn BlobStore>,
    photos: Arc<dyn PhotoRepository>,
}

impl UploadService {
    pub fn new(blobs: Arc<dyn BlobStore>, photos: Arc<dyn PhotoRepository>) -> Self {
        Self { blobs, photos }
    }

    /// Uploads `content` under `filename`, then records it.
    ///
    /// A storage failure aborts before the repository is touched. A
    /// repository failure after a successful upload leaves the blob orphaned.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn handle_upload(
        &self,
        filename: &str,
        content: Bytes,
    ) -> Result<StoredPhoto, UploadError> {
        let url = self.blobs.put_object(filename, content).await?;

        if let Err(err) = self.photos.insert(filename, &url).await {
            warn!(
                photo_name = filename,
                photo_url = %url,
                error = %err,
                "metadata insert failed after blob upload; blob is orphaned"
            );
            return Err(err.into());
        }

        info!(photo_name = filename, photo_url = %url, "photo stored");
        Ok(StoredPhoto {
            photo_name: filename.to_owned(),
            photo_url: url,
        })
    }

    /// Every photo record, newest first. Bypasses the blob store.
    pub async fn list_photos(&self) -> Result<Vec<PhotoRecord>, RepositoryError> {
        self.photos.list_all().await
    }
}
