//! facemark-core — Face identity matching and the live recognition loop.
//!
//! Detection and descriptor extraction are delegated to a [`FaceProvider`];
//! this crate owns what happens around it: building a labeled reference
//! set from the image catalog, nearest-neighbour matching, and the
//! fixed-interval frame loop.

pub mod capture;
pub mod frame;
pub mod matcher;
pub mod provider;
pub mod reference;
pub mod session;
pub mod types;

pub use capture::{FrameSource, ImageDirSource};
pub use frame::Frame;
pub use matcher::{EuclideanMatcher, MatchResult, Matcher, UNKNOWN_LABEL};
pub use provider::{CommandProvider, FaceProvider, ProviderError};
pub use reference::{asset_path, AssetSource, BuildReport, DirAssets, SkipReason, SkippedEntry};
pub use session::{FrameLoop, LoopStats, Overlay, OverlaySink, RecognitionSession};
pub use types::{
    BoundingBox, Catalog, CatalogEntry, Descriptor, DetectionResult, LabeledDescriptor,
    LabeledDescriptorSet,
};
