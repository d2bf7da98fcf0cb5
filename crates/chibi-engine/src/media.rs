use std::fs;
use std::path::{Path, PathBuf};

use chibi_contracts::roster::PhotoAsset;
use tracing::debug;

/// Resolves a photo reference against the media root.
///
/// Existing absolute paths are used as is. Otherwise the reference is
/// taken relative to the root, falling back to its bare file name so
/// public paths such as `/uploads/a.jpg` still find `root/a.jpg`.
pub fn resolve_photo_path(media_root: &Path, reference: &str) -> PathBuf {
    let direct = Path::new(reference);
    if direct.is_absolute() && direct.is_file() {
        return direct.to_path_buf();
    }
    let relative = media_root.join(reference.trim_start_matches('/'));
    if relative.is_file() {
        return relative;
    }
    match direct.file_name() {
        Some(name) => media_root.join(name),
        None => relative,
    }
}

/// Reads a photo, or `None` when it is missing or unreadable.
pub fn load_photo(media_root: &Path, index: usize, reference: &str) -> Option<PhotoAsset> {
    let path = resolve_photo_path(media_root, reference);
    match fs::read(&path) {
        Ok(bytes) => Some(PhotoAsset {
            index,
            path: reference.to_string(),
            bytes,
            mime_type: mime_for_path(&path).to_string(),
        }),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "photo unavailable");
            None
        }
    }
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}
