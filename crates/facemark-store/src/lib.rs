//! facemark-store — The image catalog and its single writer.
//!
//! Uploaded images land in a flat asset directory; a JSON catalog maps each
//! stored file to a unique label. All mutation goes through
//! [`CatalogService`].

pub mod assets;
pub mod catalog;
pub mod error;
pub mod naming;
pub mod service;

pub use assets::AssetStore;
pub use catalog::{CatalogFile, CatalogFormat};
pub use error::StoreError;
pub use service::{CatalogService, UploadReceipt};
