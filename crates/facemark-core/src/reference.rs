//! Reference set construction from a catalog snapshot.

use crate::frame::Frame;
use crate::provider::FaceProvider;
use crate::types::{Catalog, LabeledDescriptorSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Read access to the stored catalog images.
pub trait AssetSource {
    fn fetch(&self, filename: &str) -> std::io::Result<Vec<u8>>;
}

/// Resolve a catalog filename inside `root`.
///
/// Only plain names are accepted: no separators, no `.`/`..`, no NUL.
pub fn asset_path(root: &Path, filename: &str) -> std::io::Result<PathBuf> {
    let plain = !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\', '\0']);
    if !plain {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("asset name {filename:?} is not a plain file name"),
        ));
    }
    Ok(root.join(filename))
}

/// Asset source reading files from a directory.
#[derive(Debug, Clone)]
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetSource for DirAssets {
    fn fetch(&self, filename: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(asset_path(&self.root, filename)?)
    }
}

/// Why a catalog entry contributed no descriptor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("asset unreadable: {0}")]
    AssetUnreadable(String),
    #[error("image undecodable: {0}")]
    Undecodable(String),
    #[error("provider failed: {0}")]
    ProviderFailed(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("provider returned an empty descriptor")]
    EmptyDescriptor,
}

/// A catalog entry left out of the reference set.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    pub label: String,
    pub filename: String,
    pub reason: SkipReason,
}

/// Outcome of one reference set build.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub set: LabeledDescriptorSet,
    pub skipped: Vec<SkippedEntry>,
}

/// Build the labeled reference set for `catalog`.
///
/// Entries are processed in catalog order. An entry whose image cannot be
/// read, decoded or yields no face is skipped with a warning; the build
/// itself never fails. When an image holds several faces, the most
/// confident one is used.
pub fn build<A, P>(catalog: &Catalog, assets: &A, provider: &mut P) -> BuildReport
where
    A: AssetSource + ?Sized,
    P: FaceProvider + ?Sized,
{
    let mut report = BuildReport::default();

    for (index, entry) in catalog.iter().enumerate() {
        let mut skip = |reason: SkipReason| {
            tracing::warn!(
                label = %entry.label,
                filename = %entry.filename,
                %reason,
                "skipping catalog entry"
            );
            report.skipped.push(SkippedEntry {
                label: entry.label.clone(),
                filename: entry.filename.clone(),
                reason,
            });
        };

        let bytes = match assets.fetch(&entry.filename) {
            Ok(bytes) => bytes,
            Err(e) => {
                skip(SkipReason::AssetUnreadable(e.to_string()));
                continue;
            }
        };

        let frame = match Frame::decode(&bytes, index as u64) {
            Ok(frame) => frame,
            Err(e) => {
                skip(SkipReason::Undecodable(e.to_string()));
                continue;
            }
        };

        let faces = match provider.detect_faces(&frame) {
            Ok(faces) => faces,
            Err(e) => {
                skip(SkipReason::ProviderFailed(e.to_string()));
                continue;
            }
        };

        let best = faces.into_iter().max_by(|a, b| {
            a.bounding_box
                .confidence
                .partial_cmp(&b.bounding_box.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        match best {
            None => skip(SkipReason::NoFaceDetected),
            Some(face) if face.descriptor.is_empty() => skip(SkipReason::EmptyDescriptor),
            Some(face) => {
                tracing::debug!(
                    label = %entry.label,
                    confidence = face.bounding_box.confidence,
                    "reference descriptor extracted"
                );
                report.set.insert(entry.label.clone(), face.descriptor);
            }
        }
    }

    tracing::info!(
        entries = catalog.len(),
        labels = report.set.len(),
        skipped = report.skipped.len(),
        "reference set built"
    );

    report
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::types::{BoundingBox, CatalogEntry, Descriptor, DetectionResult};
    use image::{ImageFormat, RgbImage};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::path::Path;

    /// Encodes a solid-colour PNG; the red channel identifies the "person".
    pub(crate) fn png(red: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(2, 2, image::Rgb([red, 0, 0]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// Test provider: descriptor = [red / 255]; red == 0 means "no face".
    pub(crate) struct ColourProvider;

    impl FaceProvider for ColourProvider {
        fn load_models(&mut self, _: &Path) -> Result<(), ProviderError> {
            Ok(())
        }

        fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<DetectionResult>, ProviderError> {
            let red = frame.data.first().copied().unwrap_or(0);
            if red == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![face(red as f32 / 255.0, 0.9)])
        }
    }

    pub(crate) fn face(value: f32, confidence: f32) -> DetectionResult {
        DetectionResult {
            bounding_box: BoundingBox { x: 0.0, y: 0.0, width: 2.0, height: 2.0, confidence },
            landmarks: Vec::new(),
            descriptor: Descriptor::new(vec![value]),
            age: None,
            gender: None,
            gender_probability: None,
        }
    }

    pub(crate) struct MemAssets(pub HashMap<String, Vec<u8>>);

    impl AssetSource for MemAssets {
        fn fetch(&self, filename: &str) -> std::io::Result<Vec<u8>> {
            self.0
                .get(filename)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, filename.to_string()))
        }
    }

    fn catalog(entries: &[(&str, &str)]) -> Catalog {
        let mut catalog = Catalog::new();
        for (filename, label) in entries {
            catalog.push(CatalogEntry::new(*filename, *label)).unwrap();
        }
        catalog
    }

    #[test]
    fn test_builds_one_descriptor_per_entry() {
        let assets = MemAssets(HashMap::from([
            ("a1.png".to_string(), png(51)),
            ("b1.png".to_string(), png(204)),
        ]));
        let report = build(&catalog(&[("a1.png", "alice"), ("b1.png", "bob")]), &assets, &mut ColourProvider);

        assert!(report.skipped.is_empty());
        assert_eq!(report.set.labels().collect::<Vec<_>>(), vec!["alice", "bob"]);
        assert_eq!(report.set.descriptors("alice").unwrap()[0].values, vec![0.2]);
    }

    #[test]
    fn test_faceless_image_is_skipped_not_fatal() {
        let assets = MemAssets(HashMap::from([
            ("a1.png".to_string(), png(51)),
            ("wall.png".to_string(), png(0)),
        ]));
        let report = build(&catalog(&[("a1.png", "alice"), ("wall.png", "wall")]), &assets, &mut ColourProvider);

        assert!(report.set.contains_label("alice"));
        assert!(!report.set.contains_label("wall"));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::NoFaceDetected);
    }

    #[test]
    fn test_missing_and_corrupt_assets_are_skipped() {
        let assets = MemAssets(HashMap::from([
            ("broken.jpg".to_string(), b"not an image".to_vec()),
            ("b1.png".to_string(), png(204)),
        ]));
        let report = build(
            &catalog(&[("gone.jpg", "ghost"), ("broken.jpg", "broken"), ("b1.png", "bob")]),
            &assets,
            &mut ColourProvider,
        );

        assert_eq!(report.set.labels().collect::<Vec<_>>(), vec!["bob"]);
        assert!(matches!(report.skipped[0].reason, SkipReason::AssetUnreadable(_)));
        assert!(matches!(report.skipped[1].reason, SkipReason::Undecodable(_)));
    }

    #[test]
    fn test_provider_error_is_skipped() {
        struct Failing;
        impl FaceProvider for Failing {
            fn load_models(&mut self, _: &Path) -> Result<(), ProviderError> {
                Ok(())
            }
            fn detect_faces(&mut self, _: &Frame) -> Result<Vec<DetectionResult>, ProviderError> {
                Err(ProviderError::DetectionFailed("model crashed".into()))
            }
        }

        let assets = MemAssets(HashMap::from([("a1.png".to_string(), png(51))]));
        let report = build(&catalog(&[("a1.png", "alice")]), &assets, &mut Failing);
        assert!(report.set.is_empty());
        assert!(matches!(report.skipped[0].reason, SkipReason::ProviderFailed(_)));
    }

    #[test]
    fn test_most_confident_face_wins() {
        struct Crowd;
        impl FaceProvider for Crowd {
            fn load_models(&mut self, _: &Path) -> Result<(), ProviderError> {
                Ok(())
            }
            fn detect_faces(&mut self, _: &Frame) -> Result<Vec<DetectionResult>, ProviderError> {
                Ok(vec![face(0.1, 0.4), face(0.7, 0.95), face(0.3, 0.6)])
            }
        }

        let assets = MemAssets(HashMap::from([("g.png".to_string(), png(9))]));
        let report = build(&catalog(&[("g.png", "group")]), &assets, &mut Crowd);
        assert_eq!(report.set.descriptors("group").unwrap()[0].values, vec![0.7]);
    }

    #[test]
    fn test_rebuild_is_equivalent() {
        let assets = MemAssets(HashMap::from([("a1.png".to_string(), png(51))]));
        let catalog = catalog(&[("a1.png", "alice")]);
        let first = build(&catalog, &assets, &mut ColourProvider);
        let second = build(&catalog, &assets, &mut ColourProvider);
        assert_eq!(first.set, second.set);
    }

    #[test]
    fn test_dir_assets_reads_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a1.png"), png(51)).unwrap();
        let assets = DirAssets::new(dir.path());
        assert_eq!(assets.fetch("a1.png").unwrap(), png(51));
        assert!(assets.fetch("missing.png").is_err());
    }

    #[test]
    fn test_asset_names_stay_inside_root() {
        let root = Path::new("/srv/images");
        assert_eq!(asset_path(root, "a1.png").unwrap(), root.join("a1.png"));
        assert_eq!(asset_path(root, "..hidden.png").unwrap(), root.join("..hidden.png"));
        for name in ["", ".", "..", "../secret.png", "sub/a.png", "..\\a.png", "/etc/passwd", "a\0.png"] {
            let err = asset_path(root, name).unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput, "{name:?}");
        }
    }

    #[test]
    fn test_escaping_filename_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        std::fs::write(dir.path().join("outside.png"), png(51)).unwrap();
        std::fs::write(images.join("b1.png"), png(204)).unwrap();

        let report = build(
            &catalog(&[("../outside.png", "mallory"), ("b1.png", "bob")]),
            &DirAssets::new(&images),
            &mut ColourProvider,
        );
        assert_eq!(report.set.labels().collect::<Vec<_>>(), vec!["bob"]);
        assert!(matches!(report.skipped[0].reason, SkipReason::AssetUnreadable(_)));
    }

    #[test]
    fn test_skip_reason_messages() {
        assert_eq!(SkipReason::NoFaceDetected.to_string(), "no face detected");
        assert_eq!(
            SkipReason::AssetUnreadable("gone".into()).to_string(),
            "asset unreadable: gone"
        );
    }
}
