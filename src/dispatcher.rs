// src/dispatcher.rs
//! Uploads classified files and moves them out of the drop directory.

use crate::chat::{ChatPlatform, ImageUpload};
use crate::classify::{classify, classify_or_discard, relocate, FileKind};
use crate::descriptor::{sidecar_path_for, ImageDescriptor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What happened to one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Uploaded,
    UploadFailed(String),
    Skipped,
}

/// Uploads images and relocates their files, one relocation at a time.
pub struct Dispatcher {
    chat: Arc<dyn ChatPlatform>,
    processed_dir: PathBuf,
    discard_dir: PathBuf,
    /// Held across upload and relocation so two tasks never move the same files.
    relocation: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        chat: Arc<dyn ChatPlatform>,
        processed_dir: impl Into<PathBuf>,
        discard_dir: impl Into<PathBuf>,
    ) -> Self {
        Dispatcher {
            chat,
            processed_dir: processed_dir.into(),
            discard_dir: discard_dir.into(),
            relocation: Mutex::new(()),
        }
    }

    /// Classifies a newly seen file and dispatches it if it describes an upload.
    ///
    /// Malformed sidecars, and sidecars that point at nothing uploadable, end
    /// up in the discard directory.
    pub async fn handle_path(&self, path: &Path) -> DispatchOutcome {
        match classify_or_discard(path, &self.discard_dir).await {
            FileKind::Image => {
                if tokio::fs::try_exists(sidecar_path_for(path))
                    .await
                    .unwrap_or(false)
                {
                    debug!(
                        "{} has a sidecar; leaving it to the sidecar",
                        path.display()
                    );
                    return DispatchOutcome::Skipped;
                }
                self.dispatch(ImageDescriptor::bare(path)).await
            }
            FileKind::JsonSidecar => match ImageDescriptor::from_sidecar(path).await {
                Ok(descriptor) => {
                    if classify(&descriptor.image_path).await != FileKind::Image
                        || !descriptor.image_path.exists()
                    {
                        warn!(
                            "Sidecar {} points at {}, which is not an image on disk; discarding",
                            path.display(),
                            descriptor.image_path.display()
                        );
                        self.discard(path).await;
                        return DispatchOutcome::Skipped;
                    }
                    self.dispatch(descriptor).await
                }
                Err(e) => {
                    warn!("Discarding sidecar {}: {}", path.display(), e);
                    self.discard(path).await;
                    DispatchOutcome::Skipped
                }
            },
            FileKind::Unknown => {
                debug!("Ignoring {}", path.display());
                DispatchOutcome::Skipped
            }
        }
    }

    /// Uploads `descriptor` and, on success, moves its files into the processed directory.
    ///
    /// A failed upload leaves the files where they are. A failed move after a
    /// successful upload is logged only; the upload stands.
    pub async fn dispatch(&self, descriptor: ImageDescriptor) -> DispatchOutcome {
        if classify(&descriptor.image_path).await != FileKind::Image {
            debug!(
                "{} is no longer an image; skipping",
                descriptor.image_path.display()
            );
            return DispatchOutcome::Skipped;
        }

        let _guard = self.relocation.lock().await;

        // Another task may have moved it while we waited for the lock.
        let bytes = match tokio::fs::read(&descriptor.image_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "{} already gone; skipping",
                    descriptor.image_path.display()
                );
                return DispatchOutcome::Skipped;
            }
            Err(e) => {
                error!(
                    "File {} not uploaded: {}",
                    descriptor.image_path.display(),
                    e
                );
                return DispatchOutcome::UploadFailed(e.to_string());
            }
        };

        let upload = build_upload(&descriptor, bytes);
        if let Err(e) = self.chat.upload_image(upload).await {
            error!("File {} not uploaded: {}", descriptor.file_name(), e);
            return DispatchOutcome::UploadFailed(e.to_string());
        }

        match relocate(&descriptor.image_path, &self.processed_dir).await {
            Ok(dest) => info!(
                "{} sent to chat and moved to {}",
                descriptor.file_name(),
                dest.display()
            ),
            Err(e) => error!(
                "Uploaded {} but could not move it to {}: {}",
                descriptor.image_path.display(),
                self.processed_dir.display(),
                e
            ),
        }
        if let Some(sidecar) = &descriptor.sidecar_path {
            if let Err(e) = relocate(sidecar, &self.processed_dir).await {
                error!(
                    "Uploaded {} but could not move sidecar {}: {}",
                    descriptor.file_name(),
                    sidecar.display(),
                    e
                );
            }
        }

        DispatchOutcome::Uploaded
    }

    async fn discard(&self, path: &Path) {
        let _guard = self.relocation.lock().await;
        if let Err(e) = relocate(path, &self.discard_dir).await {
            error!("Failed to discard {}: {}", path.display(), e);
        }
    }
}

fn build_upload(descriptor: &ImageDescriptor, bytes: Vec<u8>) -> ImageUpload {
    let file_name = descriptor.file_name();
    let author = descriptor.author_or_default();
    let (title, comment) = match &descriptor.caption {
        Some(caption) => (caption.clone(), format!("{} (posted by {})", caption, author)),
        None => (file_name.clone(), format!("New image posted by {}", author)),
    };
    ImageUpload {
        file_name,
        bytes,
        title,
        comment,
    }
}
