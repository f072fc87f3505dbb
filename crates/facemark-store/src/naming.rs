//! Labels and stored filenames derived from an upload's original filename.

use chrono::Utc;
use uuid::Uuid;

const FALLBACK_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 10;

/// Final path component, whichever separator the client used.
fn base_name(original: &str) -> &str {
    original.rsplit(['/', '\\']).next().unwrap_or(original).trim()
}

/// Split a base name at its last dot. Leading dots do not start an extension.
fn split_extension(base: &str) -> (&str, Option<&str>) {
    match base.rfind('.') {
        Some(i) if i > 0 => (&base[..i], Some(&base[i + 1..])),
        _ => (base, None),
    }
}

/// Label for an upload: its base name with the final extension stripped.
///
/// Returns `None` when nothing usable is left.
pub fn derive_label(original: &str) -> Option<String> {
    let (stem, _) = split_extension(base_name(original));
    let stem = stem.trim();
    if stem.is_empty() || stem.chars().all(|c| c == '.') || stem.chars().any(char::is_control) {
        return None;
    }
    Some(stem.to_string())
}

/// Extension for the stored file: the original's, lowercased, else one
/// sniffed from the image bytes, else `bin`.
pub fn storage_extension(original: &str, bytes: &[u8]) -> String {
    let (_, ext) = split_extension(base_name(original));
    if let Some(ext) = ext.filter(|e| {
        !e.is_empty() && e.len() <= MAX_EXTENSION_LEN && e.chars().all(|c| c.is_ascii_alphanumeric())
    }) {
        return ext.to_ascii_lowercase();
    }

    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or(FALLBACK_EXTENSION)
        .to_string()
}

/// A fresh stored filename: `<UTC timestamp>-<random id>.<ext>`.
pub fn stored_filename(extension: &str) -> String {
    format!(
        "{}-{}.{}",
        Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
        Uuid::new_v4().simple(),
        extension
    )
}
