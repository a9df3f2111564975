//! Upload intake
//!
//! Uploaded files are staged on disk under a random name and owned by a
//! [`StagedUpload`] guard. The file is removed exactly once, either explicitly
//! through [`StagedUpload::read_and_discard`] or when the guard is dropped.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::validation::Rule;

/// Content type required for predictor tables
pub const PREDICTOR_CONTENT_TYPE: &str = "text/tab-separated-values";

/// Content type required for accession lists
pub const ACCESSION_CONTENT_TYPE: &str = "text/plain";

/// Errors raised while accepting an upload
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Declared content type or file name not allowed
    #[error("Invalid upload: {0}")]
    Rejected(String),

    /// Upload exceeds the configured size cap
    #[error("Upload too large: {size} bytes (limit {limit})")]
    TooLarge {
        /// Received size
        size: usize,
        /// Configured cap
        limit: usize,
    },

    /// Uploaded bytes are not UTF-8 text
    #[error("Upload {} is not UTF-8 text", .path.display())]
    Decode {
        /// Staged file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::string::FromUtf8Error,
    },

    /// Staging or reading the file failed
    #[error("Upload I/O error: {context}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// Acceptance rules for one kind of upload
#[derive(Debug, Clone)]
pub struct UploadPolicy<'a> {
    /// Required declared content type
    pub content_type: &'a str,
    /// Allow-listed file name rule
    pub file_name: &'a Rule,
    /// Maximum size in bytes
    pub max_bytes: usize,
}

impl UploadPolicy<'_> {
    /// Check declared metadata and size before anything touches the disk
    pub fn check(
        &self,
        content_type: Option<&str>,
        file_name: Option<&str>,
        size: usize,
    ) -> Result<(), IntakeError> {
        if size > self.max_bytes {
            return Err(IntakeError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        if content_type != Some(self.content_type) {
            return Err(IntakeError::Rejected(format!(
                "content type {:?} is not {}",
                content_type.unwrap_or("<none>"),
                self.content_type
            )));
        }
        match file_name {
            Some(name) if self.file_name.matches(name) => Ok(()),
            other => Err(IntakeError::Rejected(format!(
                "file name {:?} does not match the {} rule",
                other.unwrap_or("<none>"),
                self.file_name.name()
            ))),
        }
    }
}

/// An uploaded file staged on disk
///
/// Deletion failures are logged as warnings and never fail the request.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
    removed: bool,
}

impl StagedUpload {
    /// Write `bytes` to a fresh file in `dir`
    pub async fn stage(dir: &Path, bytes: &[u8]) -> Result<Self, IntakeError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| IntakeError::Io {
                context: format!("creating upload directory {}", dir.display()),
                source,
            })?;

        let path = dir.join(Uuid::new_v4().simple().to_string());
        let staged = Self {
            path,
            removed: false,
        };
        tokio::fs::write(&staged.path, bytes)
            .await
            .map_err(|source| IntakeError::Io {
                context: format!("writing upload {}", staged.path.display()),
                source,
            })?;
        Ok(staged)
    }

    /// Adopt a file already written by someone else
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            removed: false,
        }
    }

    /// Path of the staged file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file as UTF-8 text and delete it
    ///
    /// The file is deleted whether or not the read succeeds.
    pub async fn read_and_discard(mut self) -> Result<String, IntakeError> {
        let read = tokio::fs::read(&self.path).await;
        self.remove_async().await;

        let bytes = read.map_err(|source| IntakeError::Io {
            context: format!("reading upload {}", self.path.display()),
            source,
        })?;
        String::from_utf8(bytes).map_err(|source| IntakeError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    /// Delete the file without reading it
    pub async fn discard(mut self) {
        self.remove_async().await;
    }

    async fn remove_async(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => info!("Deleted staged upload {}", self.path.display()),
            Err(e) => warn!("Failed to delete staged upload {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to delete staged upload {}: {}", self.path.display(), e);
            }
        }
    }
}
