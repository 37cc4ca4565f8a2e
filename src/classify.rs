// src/classify.rs
//! Decides what a file dropped into a watched directory is.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Image extensions accepted for upload, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// The kind of a filesystem entry as far as the uploader is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    /// A `.json` file whose content is well-formed JSON.
    JsonSidecar,
    Unknown,
}

fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Whether the file name carries one of [`IMAGE_EXTENSIONS`].
pub fn has_image_extension(path: &Path) -> bool {
    extension_lower(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Whether the file name ends in `.json`, in any case.
pub fn has_json_extension(path: &Path) -> bool {
    extension_lower(path).as_deref() == Some("json")
}

/// Classifies `path` by extension and, for JSON, by content.
///
/// Never fails: an unreadable or malformed JSON file is [`FileKind::Unknown`].
pub async fn classify(path: &Path) -> FileKind {
    if has_image_extension(path) {
        return FileKind::Image;
    }
    if !has_json_extension(path) {
        return FileKind::Unknown;
    }

    match tokio::fs::read(path).await {
        Ok(content) => match serde_json::from_slice::<serde_json::Value>(&content) {
            Ok(_) => FileKind::JsonSidecar,
            Err(e) => {
                debug!("{} is not well-formed JSON: {}", path.display(), e);
                FileKind::Unknown
            }
        },
        Err(e) => {
            debug!("Could not read {}: {}", path.display(), e);
            FileKind::Unknown
        }
    }
}

/// Classifies `path`, moving a `.json` file that fails to parse into `discard_dir`.
///
/// Files that vanish before they can be read are left alone.
pub async fn classify_or_discard(path: &Path, discard_dir: &Path) -> FileKind {
    let kind = classify(path).await;
    if kind == FileKind::Unknown && has_json_extension(path) && path.exists() {
        warn!(
            "Discarding malformed JSON sidecar {}",
            path.display()
        );
        if let Err(e) = relocate(path, discard_dir).await {
            warn!("Failed to discard {}: {}", path.display(), e);
        }
    }
    kind
}

/// Moves `path` into `dir`, keeping its file name. Returns the new location.
///
/// Falls back to copy-and-delete when a plain rename crosses filesystems.
pub async fn relocate(path: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    tokio::fs::create_dir_all(dir).await?;
    let dest = dir.join(file_name);

    if tokio::fs::rename(path, &dest).await.is_err() {
        tokio::fs::copy(path, &dest).await?;
        tokio::fs::remove_file(path).await?;
    }
    Ok(dest)
}
