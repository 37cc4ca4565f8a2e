// src/descriptor.rs
//! Pending uploads and the JSON sidecar files that describe them.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Attribution used when neither the sidecar nor the uploader names an author.
pub const DEFAULT_AUTHOR: &str = "Anonymous";

/// On-disk form of a sidecar. Every field is optional.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// A pending upload: one image plus optional caption and author.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub image_path: PathBuf,
    pub caption: Option<String>,
    pub author: Option<String>,
    /// The sidecar this descriptor came from, relocated along with the image.
    pub sidecar_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("failed to read sidecar: {0}")]
    Io(#[from] std::io::Error),
    #[error("sidecar is not a valid descriptor: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("sidecar has no image_path and its name does not imply one")]
    NoImage,
}

impl ImageDescriptor {
    /// A descriptor for an image found without a sidecar.
    pub fn bare(image_path: impl Into<PathBuf>) -> Self {
        ImageDescriptor {
            image_path: image_path.into(),
            caption: None,
            author: None,
            sidecar_path: None,
        }
    }

    /// Reads a sidecar file into a descriptor.
    ///
    /// A missing `image_path` falls back to the sidecar's own name without
    /// the `.json` suffix (`123_cat.png.json` describes `123_cat.png`).
    /// Relative image paths are resolved against the sidecar's directory.
    pub async fn from_sidecar(sidecar_path: &Path) -> Result<Self, SidecarError> {
        let content = tokio::fs::read(sidecar_path).await?;
        let sidecar: Sidecar = serde_json::from_slice(&content)?;

        let image_path = match sidecar.image_path {
            Some(p) if p.is_absolute() => p,
            Some(p) => sidecar_path
                .parent()
                .map(|dir| dir.join(&p))
                .unwrap_or(p),
            None => implied_image_path(sidecar_path).ok_or(SidecarError::NoImage)?,
        };

        Ok(ImageDescriptor {
            image_path,
            caption: sidecar.caption.filter(|c| !c.is_empty()),
            author: sidecar.author.filter(|a| !a.is_empty()),
            sidecar_path: Some(sidecar_path.to_path_buf()),
        })
    }

    pub fn author_or_default(&self) -> &str {
        self.author.as_deref().unwrap_or(DEFAULT_AUTHOR)
    }

    /// The image's file name, used as the uploaded file name.
    pub fn file_name(&self) -> String {
        self.image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn to_sidecar(&self) -> Sidecar {
        Sidecar {
            image_path: Some(self.image_path.clone()),
            caption: self.caption.clone(),
            author: self.author.clone(),
        }
    }
}

/// The conventional sidecar location for an image: `<image file name>.json`.
pub fn sidecar_path_for(image_path: &Path) -> PathBuf {
    let mut name = image_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(OsString::new);
    name.push(".json");
    image_path.with_file_name(name)
}

fn implied_image_path(sidecar_path: &Path) -> Option<PathBuf> {
    let stem = sidecar_path.file_stem()?;
    let candidate = sidecar_path.with_file_name(stem);
    crate::classify::has_image_extension(&candidate).then_some(candidate)
}

/// Writes `bytes` to `path` through a temporary sibling and a rename,
/// so readers never observe a partially written file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(OsString::new);
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Serializes and atomically writes a sidecar for `descriptor`.
pub async fn write_sidecar(descriptor: &ImageDescriptor, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(&descriptor.to_sidecar())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    write_atomic(path, &json).await
}
