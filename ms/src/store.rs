//! Core ModelStore implementation

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix carried by every object reference
pub const REF_PREFIX: &str = "sha256:";

/// Reference to a stored object: `sha256:<64 lowercase hex>`
pub type ObjectRef = String;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object reference: {0}")]
    InvalidRef(String),

    #[error("Corrupt object {reference}: content hashes to {actual}")]
    Corrupt { reference: String, actual: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Statistics for a store
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Number of stored objects
    pub object_count: usize,
    /// Total payload bytes
    pub total_bytes: u64,
}

/// Compute the reference for a byte slice
pub fn digest(bytes: &[u8]) -> ObjectRef {
    format!("{}{}", REF_PREFIX, hex::encode(Sha256::digest(bytes)))
}

/// Validate a reference and return its hex part
fn parse_ref(reference: &str) -> Result<&str, StoreError> {
    let hex_part = reference
        .strip_prefix(REF_PREFIX)
        .ok_or_else(|| StoreError::InvalidRef(reference.to_string()))?;

    let valid = hex_part.len() == 64 && hex_part.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if !valid {
        return Err(StoreError::InvalidRef(reference.to_string()));
    }
    Ok(hex_part)
}

/// The content-addressed store
#[derive(Debug, Clone)]
pub struct ModelStore {
    base_path: PathBuf,
}

impl ModelStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(base_path.join("objects"))?;
        debug!(?base_path, "Opened model store");
        Ok(Self { base_path })
    }

    /// Base directory of this store
    pub fn path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, hex_part: &str) -> PathBuf {
        self.base_path.join("objects").join(&hex_part[..2]).join(&hex_part[2..])
    }

    /// Store bytes and return their reference
    ///
    /// Storing the same bytes twice is a no-op that returns the same reference.
    pub fn put(&self, bytes: &[u8]) -> Result<ObjectRef, StoreError> {
        let reference = digest(bytes);
        let hex_part = parse_ref(&reference)?;
        let path = self.object_path(hex_part);

        if path.exists() {
            debug!(%reference, "ModelStore::put: object already present");
            return Ok(reference);
        }

        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidRef(reference.clone()))?;
        fs::create_dir_all(parent)?;

        // Write to a temp file in the same directory, then rename into place
        let tmp_path = parent.join(format!(".{}.tmp", Uuid::now_v7()));
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        info!(%reference, size = bytes.len(), "Stored object");
        Ok(reference)
    }

    /// Read the bytes for a reference, verifying their digest
    pub fn get(&self, reference: &str) -> Result<Vec<u8>, StoreError> {
        let hex_part = parse_ref(reference)?;
        let path = self.object_path(hex_part);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(reference.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let actual = digest(&bytes);
        if actual != reference {
            warn!(%reference, %actual, "ModelStore::get: digest mismatch");
            return Err(StoreError::Corrupt {
                reference: reference.to_string(),
                actual,
            });
        }

        Ok(bytes)
    }

    /// Check whether an object exists (without verifying it)
    pub fn contains(&self, reference: &str) -> bool {
        parse_ref(reference)
            .map(|hex_part| self.object_path(hex_part).is_file())
            .unwrap_or(false)
    }

    /// Re-hash a stored object
    pub fn verify(&self, reference: &str) -> Result<(), StoreError> {
        self.get(reference).map(|_| ())
    }

    /// List all object references, sorted
    pub fn list(&self) -> Result<Vec<ObjectRef>, StoreError> {
        let mut refs = Vec::new();
        let objects = self.base_path.join("objects");

        for shard in fs::read_dir(&objects)? {
            let shard = shard?;
            if !shard.path().is_dir() {
                continue;
            }
            let Some(prefix) = shard.file_name().to_str().map(str::to_string) else {
                continue;
            };

            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                if let Some(rest) = entry.file_name().to_str()
                    && !rest.starts_with('.')
                {
                    refs.push(format!("{}{}{}", REF_PREFIX, prefix, rest));
                }
            }
        }

        refs.sort();
        Ok(refs)
    }

    /// Get statistics for the store
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();
        for reference in self.list()? {
            let hex_part = parse_ref(&reference)?;
            stats.object_count += 1;
            stats.total_bytes += fs::metadata(self.object_path(hex_part))?.len();
        }
        Ok(stats)
    }
}
