//! On-disk JSON catalog.
//!
//! The document is a JSON array of `{filename, label}` objects. Older
//! deployments stored a flat array of filenames; that form is still read,
//! with each label taken from the filename stem, and is replaced by the
//! labeled form on the next save.

use crate::error::StoreError;
use crate::naming;
use facemark_core::{Catalog, CatalogEntry};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Which schema the catalog document was stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Labeled,
    /// Flat array of filename strings.
    Legacy,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Labeled(Vec<CatalogEntry>),
    Legacy(Vec<String>),
}

/// Parse a catalog document, migrating the legacy form in memory.
pub fn parse(bytes: &[u8]) -> Result<(Catalog, CatalogFormat), String> {
    let document: CatalogDocument = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;

    let mut catalog = Catalog::new();
    match document {
        CatalogDocument::Labeled(entries) => {
            for entry in entries {
                if let Err(dup) = catalog.push(entry) {
                    return Err(format!("label '{}' appears more than once", dup.label));
                }
            }
            Ok((catalog, CatalogFormat::Labeled))
        }
        CatalogDocument::Legacy(filenames) => {
            for filename in filenames {
                let Some(label) = naming::derive_label(&filename) else {
                    tracing::warn!(%filename, "legacy catalog entry has no usable label; dropping");
                    continue;
                };
                if let Err(dup) = catalog.push(CatalogEntry::new(filename, label)) {
                    tracing::warn!(
                        filename = %dup.filename,
                        label = %dup.label,
                        "legacy catalog entry repeats a label; dropping"
                    );
                }
            }
            Ok((catalog, CatalogFormat::Legacy))
        }
    }
}

/// Exclusive hold on the catalog across processes. Released on drop.
pub struct CatalogLock {
    _file: fslock::LockFile,
}

/// Handle to the catalog document on disk.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    path: PathBuf,
}

impl CatalogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty catalog if none exists yet.
    pub async fn ensure_exists(&self) -> Result<(), StoreError> {
        let exists = fs::try_exists(&self.path)
            .await
            .map_err(|source| StoreError::CatalogRead {
                path: self.path.clone(),
                source,
            })?;
        if exists {
            return Ok(());
        }
        tracing::info!(path = %self.path.display(), "creating empty catalog");
        self.save(&Catalog::new()).await
    }

    /// Sidecar file every writer locks, in this process or any other.
    pub fn lock_path(&self) -> PathBuf {
        self.path.with_file_name(format!(".{}.lock", self.file_name()))
    }

    /// Block until this caller is the only writer of the catalog.
    pub async fn lock(&self) -> Result<CatalogLock, StoreError> {
        let path = self.lock_path();
        let locked = tokio::task::spawn_blocking({
            let path = path.clone();
            move || -> std::io::Result<fslock::LockFile> {
                let mut file = fslock::LockFile::open(path.as_os_str()).map_err(std::io::Error::from)?;
                file.lock().map_err(std::io::Error::from)?;
                Ok(file)
            }
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
        .and_then(|locked| locked);

        match locked {
            Ok(file) => Ok(CatalogLock { _file: file }),
            Err(source) => Err(StoreError::CatalogLock { path, source }),
        }
    }

    /// Load the catalog. A missing file is an empty catalog.
    pub async fn load(&self) -> Result<Catalog, StoreError> {
        self.load_with_format().await.map(|(catalog, _)| catalog)
    }

    pub async fn load_with_format(&self) -> Result<(Catalog, CatalogFormat), StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "catalog missing; treating as empty");
                return Ok((Catalog::new(), CatalogFormat::Labeled));
            }
            Err(source) => {
                return Err(StoreError::CatalogRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let (catalog, format) = parse(&bytes).map_err(|reason| StoreError::CatalogCorrupt {
            path: self.path.clone(),
            reason,
        })?;

        if format == CatalogFormat::Legacy {
            tracing::warn!(
                path = %self.path.display(),
                entries = catalog.len(),
                "catalog uses the legacy filename-only format; it will be rewritten on next save"
            );
        }

        Ok((catalog, format))
    }

    /// Persist the catalog atomically: write a temp file beside it, sync,
    /// then rename over the original.
    pub async fn save(&self, catalog: &Catalog) -> Result<(), StoreError> {
        let write_err = |source| StoreError::CatalogWrite {
            path: self.path.clone(),
            source,
        };

        let mut json = serde_json::to_vec_pretty(catalog)
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        json.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let temp_path = self.temp_path();
        let written: std::io::Result<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(write_err(e));
        }

        tracing::debug!(path = %self.path.display(), entries = catalog.len(), "catalog saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_file_name(format!(
            ".{}.{}.tmp",
            self.file_name(),
            uuid::Uuid::new_v4().simple()
        ))
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "catalog".to_string())
    }
}
