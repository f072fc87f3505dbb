//! Nearest-neighbour identity matching over a [`LabeledDescriptorSet`].

use crate::types::{Descriptor, LabeledDescriptorSet};
use serde::Serialize;

/// Label reported when no reference descriptor is close enough.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Result of matching a live descriptor against a reference set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Matched label, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// Distance to the nearest reference descriptor, if any was comparable.
    pub distance: Option<f32>,
}

impl MatchResult {
    fn unknown(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            label: UNKNOWN_LABEL.to_string(),
            distance,
        }
    }
}

/// Strategy for comparing a live descriptor against a reference set.
pub trait Matcher {
    fn compare(&self, live: &Descriptor, references: &LabeledDescriptorSet, threshold: f32) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// Visits every stored descriptor and keeps the global minimum. A minimum
/// at or below `threshold` yields its label. When two labels sit at exactly
/// the same distance, the first one in set order wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, live: &Descriptor, references: &LabeledDescriptorSet, threshold: f32) -> MatchResult {
        let mut best: Option<(&str, f32)> = None;

        for (label, reference) in references.iter() {
            let Some(distance) = live.euclidean_distance(reference) else {
                tracing::debug!(
                    label,
                    live_dim = live.len(),
                    reference_dim = reference.len(),
                    "skipping reference with mismatched dimension"
                );
                continue;
            };
            if distance.is_nan() {
                continue;
            }
            let closer = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if closer {
                best = Some((label, distance));
            }
        }

        match best {
            Some((label, distance)) if distance <= threshold => MatchResult {
                matched: true,
                label: label.to_string(),
                distance: Some(distance),
            },
            Some((_, distance)) => MatchResult::unknown(Some(distance)),
            None => MatchResult::unknown(None),
        }
    }
}
