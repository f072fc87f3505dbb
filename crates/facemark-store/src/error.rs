use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("an image labeled '{0}' already exists")]
    DuplicateLabel(String),
    #[error("filename {0:?} has no usable base name")]
    InvalidFilename(String),
    #[error("uploaded image is empty")]
    EmptyImage,
    #[error("catalog {} is corrupt: {reason}", .path.display())]
    CatalogCorrupt { path: PathBuf, reason: String },
    #[error("failed to read catalog {}: {source}", .path.display())]
    CatalogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write catalog {}: {source}", .path.display())]
    CatalogWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to lock catalog via {}: {source}", .path.display())]
    CatalogLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to store image {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Errors the uploader can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateLabel(_) | Self::InvalidFilename(_) | Self::EmptyImage
        )
    }
}
