//! Face detection/recognition provider contract.
//!
//! The neural networks live outside this crate. A provider takes a frame and
//! returns every face it finds, each with a box, landmarks and a descriptor.

use crate::frame::{Frame, FrameError};
use crate::types::DetectionResult;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Environment variable a [`CommandProvider`] child process reads to find its models.
pub const MODEL_DIR_ENV: &str = "FACEMARK_MODEL_DIR";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("model directory not found: {0}")]
    ModelsNotFound(String),
    #[error("detection failed: {0}")]
    DetectionFailed(String),
    #[error("provider output is not a detection list: {0}")]
    BadOutput(#[from] serde_json::Error),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A face detection + descriptor backend.
pub trait FaceProvider: Send {
    /// Point the provider at its pretrained model files.
    fn load_models(&mut self, model_dir: &Path) -> Result<(), ProviderError>;

    /// Detect all faces in `frame`, with landmarks and descriptors.
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<DetectionResult>, ProviderError>;
}

impl<T: FaceProvider + ?Sized> FaceProvider for Box<T> {
    fn load_models(&mut self, model_dir: &Path) -> Result<(), ProviderError> {
        (**self).load_models(model_dir)
    }

    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<DetectionResult>, ProviderError> {
        (**self).detect_faces(frame)
    }
}

/// Provider backed by an external detector process.
///
/// One process per frame: the frame is written to its stdin as PNG and a
/// JSON array of [`DetectionResult`] is read from its stdout. The model
/// directory is passed in [`MODEL_DIR_ENV`].
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: PathBuf,
    args: Vec<String>,
    model_dir: Option<PathBuf>,
}

impl CommandProvider {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            model_dir: None,
        }
    }

    /// Build from a whitespace-separated command line, e.g. `"python3 detect.py --tiny"`.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts.map(str::to_string).collect()))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl FaceProvider for CommandProvider {
    fn load_models(&mut self, model_dir: &Path) -> Result<(), ProviderError> {
        if !model_dir.is_dir() {
            return Err(ProviderError::ModelsNotFound(model_dir.display().to_string()));
        }
        tracing::info!(
            program = %self.program.display(),
            models = %model_dir.display(),
            "provider models configured"
        );
        self.model_dir = Some(model_dir.to_path_buf());
        Ok(())
    }

    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<DetectionResult>, ProviderError> {
        let png = frame.encode_png()?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.model_dir {
            command.env(MODEL_DIR_ENV, dir);
        }

        let mut child = command.spawn().map_err(|e| {
            ProviderError::DetectionFailed(format!("failed to start {}: {e}", self.program.display()))
        })?;

        // Feed stdin from a separate thread so a chatty child cannot
        // deadlock against a full stdout pipe.
        let stdin = child.stdin.take();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&png)?;
            }
            Ok(())
        });

        let output = child.wait_with_output()?;
        // A child may stop reading stdin early; its exit status decides.
        if let Ok(Err(e)) = writer.join() {
            tracing::debug!(error = %e, "provider closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::DetectionFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        let faces: Vec<DetectionResult> = serde_json::from_slice(&output.stdout)?;
        tracing::trace!(frame = frame.sequence, faces = faces.len(), "provider returned");
        Ok(faces)
    }
}
