//! Frame sources for the live loop.

use crate::frame::{Frame, FrameError};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("no image files in {0}")]
    NoFrames(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}

/// Anything that can hand the loop "the current frame".
///
/// `Ok(None)` means no frame is available yet; the tick is skipped.
pub trait FrameSource: Send {
    fn current_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Replays a directory of still images as a video stream, in file-name
/// order, wrapping around at the end.
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    cursor: usize,
    sequence: u64,
}

impl ImageDirSource {
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        if !dir.is_dir() {
            return Err(SourceError::NotFound(dir.display().to_string()));
        }

        let read_dir = std::fs::read_dir(dir)
            .map_err(|e| SourceError::CaptureFailed(format!("{}: {e}", dir.display())))?;

        let mut files: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && ImageFormat::from_path(path).is_ok())
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(SourceError::NoFrames(dir.display().to_string()));
        }

        tracing::info!(dir = %dir.display(), frames = files.len(), "opened image directory source");

        Ok(Self {
            files,
            cursor: 0,
            sequence: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn current_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let path = &self.files[self.cursor];
        self.cursor = (self.cursor + 1) % self.files.len();
        self.sequence += 1;

        let bytes = std::fs::read(path)
            .map_err(|e| SourceError::CaptureFailed(format!("{}: {e}", path.display())))?;
        let frame = Frame::decode(&bytes, self.sequence)?;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn write_png(dir: &Path, name: &str, width: u32) {
        RgbImage::new(width, 2).save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_replays_in_name_order_and_wraps() {
        let dir = tempfile::TempDir::new().unwrap();
        write_png(dir.path(), "b.png", 2);
        write_png(dir.path(), "a.png", 1);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageDirSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let widths: Vec<u32> = (0..3)
            .map(|_| source.current_frame().unwrap().unwrap().width)
            .collect();
        assert_eq!(widths, vec![1, 2, 1]);
    }

    #[test]
    fn test_sequence_increments() {
        let dir = tempfile::TempDir::new().unwrap();
        write_png(dir.path(), "a.png", 1);
        let mut source = ImageDirSource::open(dir.path()).unwrap();
        let first = source.current_frame().unwrap().unwrap().sequence;
        let second = source.current_frame().unwrap().unwrap().sequence;
        assert_eq!(second, first + 1);
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(ImageDirSource::open(dir.path()), Err(SourceError::NoFrames(_))));
    }

    #[test]
    fn test_missing_directory() {
        let missing = Path::new("/nonexistent/facemark/frames");
        assert!(matches!(ImageDirSource::open(missing), Err(SourceError::NotFound(_))));
    }
}
