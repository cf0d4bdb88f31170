//! On-disk storage for files sealed inside capsules.
//!
//! Each attachment is written as a single file named by its UUID under the
//! configured base directory. Metadata (file name, size, hash) lives with the
//! capsule row in the database.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use capsule_shared::Attachment;

use crate::error::ServerError;

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let relative = target.strip_prefix(base).unwrap_or(target);

    let mut resolved = canonical_base.clone();
    for component in relative.components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct AttachmentStore {
    base_path: PathBuf,
    max_size: usize,
}

impl AttachmentStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::AttachmentStorage(format!(
                "Failed to create attachment directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), max_size, "Attachment store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Write `data` and return the metadata to seal into the capsule.
    pub async fn store(&self, file_name: &str, data: &[u8]) -> Result<Attachment, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Attachment is empty".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::AttachmentTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();
        let path = self.safe_path(&id)?;

        fs::write(&path, data).await.map_err(|e| {
            ServerError::AttachmentStorage(format!("Failed to write attachment {id}: {e}"))
        })?;

        debug!(id = %id, size = data.len(), "Stored attachment");

        Ok(Attachment {
            id,
            file_name: sanitize_file_name(file_name),
            size: data.len() as u64,
            blake3_hash: blake3::hash(data).to_hex().to_string(),
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Vec<u8>, ServerError> {
        let path = self.safe_path(&id)?;

        if !path.exists() {
            return Err(ServerError::AttachmentNotFound(id));
        }

        let data = fs::read(&path).await.map_err(|e| {
            ServerError::AttachmentStorage(format!("Failed to read attachment {id}: {e}"))
        })?;

        debug!(id = %id, size = data.len(), "Retrieved attachment");
        Ok(data)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ServerError> {
        let path = self.safe_path(&id)?;

        if !path.exists() {
            return Err(ServerError::AttachmentNotFound(id));
        }

        fs::remove_file(&path).await.map_err(|e| {
            ServerError::AttachmentStorage(format!("Failed to delete attachment {id}: {e}"))
        })?;

        debug!(id = %id, "Deleted attachment");
        Ok(())
    }

    fn safe_path(&self, id: &Uuid) -> Result<PathBuf, ServerError> {
        let raw = self.base_path.join(id.to_string());
        ensure_within(&self.base_path, &raw)
    }
}

/// Keep only the final path component of a client-supplied file name.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base == "." || base == ".." {
        "attachment".to_string()
    } else {
        base.to_string()
    }
}
