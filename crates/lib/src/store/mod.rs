//! Content-addressed store for rebake.
//!
//! The store holds everything rebake produces or provisions:
//! ```text
//! <store_root>/
//! ├── obj/<name>-<hash>/   # Immutable build artifacts, toolchains, images
//! └── downloads/           # Verified tarball cache
//! ```
//!
//! Each object directory carries a `.rebake-complete` marker recording the
//! full content hash of its outputs. A directory without a marker is an
//! interrupted build; a directory whose content no longer matches the marker
//! is corrupted. Both are removed and rebuilt.

pub mod hash;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::store::hash::{ContentHash, DirHashError, ObjectHash, hash_directory};

/// Marker file name indicating an object was produced successfully.
pub const COMPLETE_MARKER: &str = ".rebake-complete";

/// Files/directories excluded when hashing object contents.
/// - COMPLETE_MARKER: The marker itself (written after hash)
/// - "tmp": Staging directory (may have leftovers)
const OBJECT_HASH_EXCLUSIONS: &[&str] = &[".rebake-complete", "tmp"];

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to write completion marker: {message}")]
  WriteMarker { message: String },

  #[error("failed to read completion marker: {message}")]
  ReadMarker { message: String },

  #[error("failed to parse completion marker: {message}")]
  ParseMarker { message: String },

  #[error(transparent)]
  Hash(#[from] DirHashError),
}

/// Resolve the store root directory.
///
/// `REBAKE_STORE` overrides the default (used heavily by tests); otherwise the
/// store lives under the user data directory.
pub fn store_root() -> PathBuf {
  if let Ok(path) = std::env::var("REBAKE_STORE") {
    return PathBuf::from(path);
  }

  default_store_root()
}

/// Default store root under the user data directory.
pub fn default_store_root() -> PathBuf {
  dirs::data_dir()
    .unwrap_or_else(|| PathBuf::from("/var/lib"))
    .join("rebake")
    .join("store")
}

/// Path of a store object directory: `<store_root>/obj/<name>-<hash>`.
pub fn object_dir(name: &str, hash: &ObjectHash) -> PathBuf {
  store_root().join("obj").join(format!("{}-{}", name, hash.0))
}

/// Path of the verified tarball cache.
pub fn downloads_dir() -> PathBuf {
  store_root().join("downloads")
}

/// Completion marker content.
#[derive(Debug, Serialize, Deserialize)]
pub struct ObjectMarker {
  /// Marker format version.
  pub version: u32,
  /// Object status (always "complete" for finished objects).
  pub status: String,
  /// Full 64-character SHA256 hash of the object contents.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output_hash: Option<String>,
}

/// Write the completion marker with the object's output hash.
/// Called after an object is fully produced, never before.
pub async fn write_complete_marker(object_path: &Path) -> Result<ContentHash, StoreError> {
  let output_hash = hash_directory(object_path, OBJECT_HASH_EXCLUSIONS)?;

  let marker = ObjectMarker {
    version: 1,
    status: "complete".to_string(),
    output_hash: Some(output_hash.0.clone()),
  };
  let content = serde_json::to_string(&marker).map_err(|e| StoreError::WriteMarker { message: e.to_string() })?;
  fs::write(object_path.join(COMPLETE_MARKER), format!("{}\n", content))
    .await
    .map_err(|e| StoreError::WriteMarker { message: e.to_string() })?;

  Ok(output_hash)
}

/// Read the completion marker.
///
/// Returns `None` if the marker doesn't exist.
pub fn read_marker(object_path: &Path) -> Result<Option<ObjectMarker>, StoreError> {
  let marker_path = object_path.join(COMPLETE_MARKER);

  if !marker_path.exists() {
    return Ok(None);
  }

  let content = std::fs::read_to_string(&marker_path).map_err(|e| StoreError::ReadMarker { message: e.to_string() })?;
  let marker: ObjectMarker =
    serde_json::from_str(&content).map_err(|e| StoreError::ParseMarker { message: e.to_string() })?;
  Ok(Some(marker))
}

/// Check if an object directory carries a completion marker.
pub fn is_complete(object_path: &Path) -> bool {
  read_marker(object_path).map(|m| m.is_some()).unwrap_or(false)
}

/// Verify a cached object's content hash against its marker.
///
/// Returns `true` if valid (use the cache), `false` if it must be rebuilt.
fn verify_object_hash(object_path: &Path, marker: &ObjectMarker) -> bool {
  let Some(stored_hash) = &marker.output_hash else {
    debug!(path = ?object_path, "marker without hash, trusting cache");
    return true;
  };

  match hash_directory(object_path, OBJECT_HASH_EXCLUSIONS) {
    Ok(current_hash) => {
      if current_hash.0 == *stored_hash {
        true
      } else {
        warn!(
          path = ?object_path,
          expected = %stored_hash,
          actual = %current_hash.0,
          "store object corrupted, will rebuild"
        );
        false
      }
    }
    Err(e) => {
      warn!(path = ?object_path, error = %e, "failed to hash store object, will rebuild");
      false
    }
  }
}

/// Check whether a valid cached object exists at `object_path`.
///
/// Returns `true` on a verified cache hit. Otherwise removes any incomplete or
/// corrupted remains so the caller can produce the object from scratch.
pub async fn check_cached_object(object_path: &Path) -> Result<bool, StoreError> {
  if !object_path.exists() {
    return Ok(false);
  }

  match read_marker(object_path) {
    Ok(Some(marker)) => {
      if verify_object_hash(object_path, &marker) {
        debug!(path = ?object_path, "store object exists (cache hit)");
        return Ok(true);
      }
      debug!(path = ?object_path, "removing corrupted object");
      fs::remove_dir_all(object_path).await?;
    }
    Ok(None) => {
      debug!(path = ?object_path, "incomplete object found, removing");
      fs::remove_dir_all(object_path).await?;
    }
    Err(e) => {
      debug!(path = ?object_path, error = %e, "invalid marker, removing");
      fs::remove_dir_all(object_path).await?;
    }
  }

  Ok(false)
}
