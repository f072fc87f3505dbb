//! Catalog Service: the single writer for the catalog and the asset store.

use crate::assets::AssetStore;
use crate::catalog::{CatalogFile, CatalogFormat};
use crate::error::StoreError;
use crate::naming;
use facemark_core::{Catalog, CatalogEntry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// What an accepted upload produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub saved_filename: String,
    pub label: String,
}

struct Inner {
    catalog: CatalogFile,
    assets: AssetStore,
    /// Serializes read → check → write → append → persist within this
    /// process; the catalog's file lock extends that to other processes.
    write_lock: Mutex<()>,
}

/// Clone-safe handle to the catalog and its images.
///
/// Every mutation goes through [`upload`](Self::upload) or
/// [`migrate`](Self::migrate), both of which hold the in-process lock and
/// the catalog's sidecar file lock for their whole read-modify-write
/// sequence, so concurrent uploads cannot both claim a label even when
/// another process (the CLI, a second daemon) opens the same catalog.
#[derive(Clone)]
pub struct CatalogService {
    inner: Arc<Inner>,
}

impl CatalogService {
    /// Open the service, creating the image directory and an empty catalog
    /// if they do not exist yet.
    pub async fn open(
        catalog_path: impl Into<PathBuf>,
        images_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let catalog = CatalogFile::new(catalog_path);
        let assets = AssetStore::new(images_dir);
        assets.ensure_exists().await?;
        catalog.ensure_exists().await?;

        tracing::info!(
            catalog = %catalog.path().display(),
            images = %assets.root().display(),
            "catalog service ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                catalog,
                assets,
                write_lock: Mutex::new(()),
            }),
        })
    }

    pub fn assets(&self) -> &AssetStore {
        &self.inner.assets
    }

    pub fn catalog_file(&self) -> &CatalogFile {
        &self.inner.catalog
    }

    /// A consistent copy of the catalog, never observed mid-upload.
    pub async fn snapshot(&self) -> Result<Catalog, StoreError> {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.catalog.load().await
    }

    /// Store an uploaded image and add it to the catalog under a label
    /// derived from `original_filename`.
    pub async fn upload(&self, bytes: &[u8], original_filename: &str) -> Result<UploadReceipt, StoreError> {
        let label = naming::derive_label(original_filename)
            .ok_or_else(|| StoreError::InvalidFilename(original_filename.to_string()))?;
        if bytes.is_empty() {
            return Err(StoreError::EmptyImage);
        }

        let _guard = self.inner.write_lock.lock().await;
        let _file_lock = self.inner.catalog.lock().await?;

        let mut catalog = self.inner.catalog.load().await?;
        if catalog.contains_label(&label) {
            tracing::info!(%label, original = original_filename, "rejecting upload with duplicate label");
            return Err(StoreError::DuplicateLabel(label));
        }

        let saved_filename = naming::stored_filename(&naming::storage_extension(original_filename, bytes));
        let path = self.inner.assets.write_new(&saved_filename, bytes).await?;

        catalog
            .push(CatalogEntry::new(saved_filename.clone(), label.clone()))
            .map_err(|dup| StoreError::DuplicateLabel(dup.label))?;

        if let Err(e) = self.inner.catalog.save(&catalog).await {
            tracing::warn!(
                image = %path.display(),
                error = %e,
                "catalog write failed after image was stored; image is orphaned"
            );
            return Err(e);
        }

        tracing::info!(
            %label,
            filename = %saved_filename,
            original = original_filename,
            bytes = bytes.len(),
            entries = catalog.len(),
            "image uploaded"
        );

        Ok(UploadReceipt {
            saved_filename,
            label,
        })
    }

    /// Rewrite a legacy filename-only catalog in the labeled form.
    ///
    /// Returns `true` if anything was rewritten.
    pub async fn migrate(&self) -> Result<bool, StoreError> {
        let _guard = self.inner.write_lock.lock().await;
        let _file_lock = self.inner.catalog.lock().await?;
        let (catalog, format) = self.inner.catalog.load_with_format().await?;
        if format == CatalogFormat::Labeled {
            return Ok(false);
        }
        self.inner.catalog.save(&catalog).await?;
        tracing::info!(entries = catalog.len(), "legacy catalog migrated");
        Ok(true)
    }
}
