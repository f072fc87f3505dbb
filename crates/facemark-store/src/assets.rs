//! Image asset store: a flat directory of uploaded images.

use crate::error::StoreError;
use facemark_core::{asset_path, AssetSource};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of `filename`, which must be a plain name inside the store.
    pub fn path_of(&self, filename: &str) -> std::io::Result<PathBuf> {
        asset_path(&self.root, filename)
    }

    pub async fn ensure_exists(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StoreError::Storage {
                path: self.root.clone(),
                source,
            })
    }

    /// Write a new image. Never replaces an existing file; a partially
    /// written file is removed on failure.
    pub async fn write_new(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.path_of(filename).map_err(|source| StoreError::Storage {
            path: self.root.clone(),
            source,
        })?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| StoreError::Storage {
                path: path.clone(),
                source,
            })?;

        let written: std::io::Result<()> = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;

        if let Err(source) = written {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Err(StoreError::Storage { path, source });
        }

        Ok(path)
    }

    pub async fn read(&self, filename: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.path_of(filename)?).await
    }
}

impl AssetSource for AssetStore {
    fn fetch(&self, filename: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_of(filename)?)
    }
}
