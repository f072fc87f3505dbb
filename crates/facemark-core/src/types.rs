use serde::{Deserialize, Serialize};

/// Bounding box for a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

impl BoundingBox {
    /// Top-right corner, where captions are anchored.
    pub fn top_right(&self) -> (f32, f32) {
        (self.x + self.width, self.y)
    }
}

/// Face descriptor vector (128-dimensional for the usual recognition nets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two descriptors.
    ///
    /// Returns `None` when the dimensionalities differ.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        )
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// One face found in one frame, as reported by a [`FaceProvider`](crate::provider::FaceProvider).
///
/// The serde form is the provider wire contract:
/// `{"box": {..}, "landmarks": [[x, y], ..], "descriptor": [..], "age": 31.0, "gender": "male", "gender_probability": 0.93}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub landmarks: Vec<(f32, f32)>,
    pub descriptor: Descriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender_probability: Option<f32>,
}

/// A catalog record: one uploaded image and the identity it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// On-disk asset name inside the image store.
    pub filename: String,
    /// Human-readable identity key, unique across the catalog.
    pub label: String,
}

impl CatalogEntry {
    pub fn new(filename: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            label: label.into(),
        }
    }
}

/// Ordered catalog of labeled images. Labels are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.entries.iter().any(|e| e.label == label)
    }

    /// Append an entry. Hands the entry back if its label is already taken.
    pub fn push(&mut self, entry: CatalogEntry) -> Result<(), CatalogEntry> {
        if self.contains_label(&entry.label) {
            return Err(entry);
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CatalogEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a CatalogEntry;
    type IntoIter = std::slice::Iter<'a, CatalogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A descriptor tagged with the identity it was computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDescriptor {
    pub label: String,
    pub descriptor: Descriptor,
}

/// Reference set the matcher compares live faces against.
///
/// Each label maps to one or more descriptors. Iteration follows insertion
/// order, which is catalog order when built by [`reference::build`](crate::reference::build).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledDescriptorSet {
    groups: Vec<(String, Vec<Descriptor>)>,
}

impl LabeledDescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor under `label`, creating the label if needed.
    pub fn insert(&mut self, label: impl Into<String>, descriptor: Descriptor) {
        let label = label.into();
        match self.groups.iter_mut().find(|(l, _)| *l == label) {
            Some((_, descriptors)) => descriptors.push(descriptor),
            None => self.groups.push((label, vec![descriptor])),
        }
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.groups.iter().any(|(l, _)| l == label)
    }

    pub fn descriptors(&self, label: &str) -> Option<&[Descriptor]> {
        self.groups
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, d)| d.as_slice())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(l, _)| l.as_str())
    }

    /// Number of distinct labels.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every stored `(label, descriptor)` pair in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Descriptor)> {
        self.groups
            .iter()
            .flat_map(|(l, ds)| ds.iter().map(move |d| (l.as_str(), d)))
    }
}

impl FromIterator<LabeledDescriptor> for LabeledDescriptorSet {
    fn from_iter<I: IntoIterator<Item = LabeledDescriptor>>(iter: I) -> Self {
        let mut set = Self::new();
        for ld in iter {
            set.insert(ld.label, ld.descriptor);
        }
        set
    }
}
