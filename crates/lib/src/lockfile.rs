//! Lockfile loading and fail-fast validation.
//!
//! The lockfile (`Cargo.lock` at the root of the source tree) is the
//! reproducibility anchor: it records the exact version and checksum of every
//! transitive source dependency. Its schema is owned by the external
//! dependency manager; rebake reads only the `[[package]]`
//! name/version/source/checksum records and treats the rest as opaque. The
//! file is never written by this system.
//!
//! Validation happens before the toolchain is ever invoked: a missing
//! lockfile, a declared dependency without a record, or a registry record
//! without a checksum are all fatal.

use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::store::hash::{ContentHash, hash_bytes};

/// Fixed relative path of the lockfile within the source tree.
pub const LOCKFILE_NAME: &str = "Cargo.lock";

/// Fixed relative path of the dependency manifest within the source tree.
pub const MANIFEST_NAME: &str = "Cargo.toml";

/// Errors that can occur when loading or validating the lockfile.
#[derive(Debug, Error)]
pub enum LockfileError {
  #[error("lockfile missing: {path} (run the dependency manager to generate it)")]
  Missing { path: String },

  #[error("failed to read lockfile: {0}")]
  Read(#[source] io::Error),

  #[error("failed to parse lockfile: {0}")]
  Parse(#[source] toml::de::Error),

  #[error("failed to read manifest {path}: {source}")]
  ManifestRead { path: String, source: io::Error },

  #[error("failed to parse manifest: {0}")]
  ManifestParse(#[source] toml::de::Error),

  #[error("declared dependency '{0}' has no lockfile record")]
  MissingRecord(String),

  #[error("lockfile record for '{0}' has no checksum")]
  MissingChecksum(String),
}

/// One `[[package]]` record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LockRecord {
  pub name: String,
  pub version: String,
  /// Registry or git source; absent for workspace-local packages.
  pub source: Option<String>,
  /// Content checksum; present for registry packages.
  pub checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LockfileDoc {
  #[serde(default)]
  package: Vec<LockRecord>,
}

/// A loaded, read-only lockfile.
#[derive(Debug, Clone)]
pub struct Lockfile {
  records: Vec<LockRecord>,
  /// Hash of the raw file content; part of the build's input hash so a
  /// lockfile edit forces a rebuild.
  content_hash: ContentHash,
}

impl Lockfile {
  /// Load the lockfile from the source tree root.
  ///
  /// An absent lockfile is the fatal [`LockfileError::Missing`]; there is no
  /// "generate one on the fly" path, that would break reproducibility.
  pub fn load(source_root: &Path) -> Result<Self, LockfileError> {
    let path = source_root.join(LOCKFILE_NAME);

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(LockfileError::Missing {
          path: path.display().to_string(),
        });
      }
      Err(e) => return Err(LockfileError::Read(e)),
    };

    let doc: LockfileDoc = toml::from_str(&content).map_err(LockfileError::Parse)?;
    let content_hash = hash_bytes(content.as_bytes());

    debug!(path = %path.display(), packages = doc.package.len(), "loaded lockfile");

    Ok(Self {
      records: doc.package,
      content_hash,
    })
  }

  /// Look up a record by package name.
  pub fn get(&self, name: &str) -> Option<&LockRecord> {
    self.records.iter().find(|r| r.name == name)
  }

  /// Hash of the raw lockfile content.
  pub fn content_hash(&self) -> &ContentHash {
    &self.content_hash
  }

  /// Number of locked packages.
  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Validate the lockfile against the declared dependency names.
  ///
  /// Every declared dependency must have a record, and registry records must
  /// carry a checksum. Workspace-local records (no `source`) are exempt from
  /// the checksum requirement.
  pub fn validate(&self, declared: &[String]) -> Result<(), LockfileError> {
    for name in declared {
      let record = self.get(name).ok_or_else(|| LockfileError::MissingRecord(name.clone()))?;

      if record.source.is_some() && record.checksum.is_none() {
        return Err(LockfileError::MissingChecksum(name.clone()));
      }
    }
    Ok(())
  }
}

#[derive(Debug, Deserialize)]
struct ManifestDoc {
  #[serde(default)]
  dependencies: toml::map::Map<String, toml::Value>,
  #[serde(default, rename = "build-dependencies")]
  build_dependencies: toml::map::Map<String, toml::Value>,
}

/// Read the dependency names declared by the source tree's manifest.
///
/// Only the names are of interest; versions and features belong to the
/// external dependency manager.
pub fn declared_dependencies(source_root: &Path) -> Result<Vec<String>, LockfileError> {
  let path = source_root.join(MANIFEST_NAME);

  let content = fs::read_to_string(&path).map_err(|e| LockfileError::ManifestRead {
    path: path.display().to_string(),
    source: e,
  })?;

  let doc: ManifestDoc = toml::from_str(&content).map_err(LockfileError::ManifestParse)?;

  let mut names: Vec<String> = doc.dependencies.keys().cloned().collect();
  for name in doc.build_dependencies.keys() {
    if !names.contains(name) {
      names.push(name.clone());
    }
  }

  Ok(names)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  const SAMPLE_LOCK: &str = r#"
version = 3

[[package]]
name = "inat"
version = "0.1.0"
dependencies = ["reqwest", "tokio"]

[[package]]
name = "reqwest"
version = "0.12.4"
source = "registry+https://github.com/rust-lang/crates.io-index"
checksum = "566cafdd92868e0939d3fb961bd0dc25fcfaaed179291093b3d43e6b3150ea10"

[[package]]
name = "tokio"
version = "1.38.0"
source = "registry+https://github.com/rust-lang/crates.io-index"
checksum = "ba4f4a02a7a80d6f274636f0aa95c7e383b912d41fe721a31f29e29698585a4a"
"#;

  const SAMPLE_MANIFEST: &str = r#"
[package]
name = "inat"
version = "0.1.0"

[dependencies]
reqwest = "0.12"
tokio = { version = "1", features = ["full"] }
"#;

  fn source_tree(lock: Option<&str>, manifest: Option<&str>) -> TempDir {
    let temp = TempDir::new().unwrap();
    if let Some(lock) = lock {
      std::fs::write(temp.path().join(LOCKFILE_NAME), lock).unwrap();
    }
    if let Some(manifest) = manifest {
      std::fs::write(temp.path().join(MANIFEST_NAME), manifest).unwrap();
    }
    temp
  }

  mod load {
    use super::*;

    #[test]
    fn loads_records() {
      let tree = source_tree(Some(SAMPLE_LOCK), None);
      let lock = Lockfile::load(tree.path()).unwrap();

      assert_eq!(lock.len(), 3);
      let reqwest = lock.get("reqwest").unwrap();
      assert_eq!(reqwest.version, "0.12.4");
      assert!(reqwest.checksum.is_some());
    }

    #[test]
    fn absent_lockfile_is_missing_error() {
      let tree = source_tree(None, None);
      let result = Lockfile::load(tree.path());
      assert!(matches!(result, Err(LockfileError::Missing { .. })));
    }

    #[test]
    fn unparseable_lockfile_is_parse_error() {
      let tree = source_tree(Some("[[package"), None);
      assert!(matches!(Lockfile::load(tree.path()), Err(LockfileError::Parse(_))));
    }

    #[test]
    fn content_hash_tracks_edits() {
      let tree = source_tree(Some(SAMPLE_LOCK), None);
      let hash1 = Lockfile::load(tree.path()).unwrap().content_hash().clone();

      std::fs::write(tree.path().join(LOCKFILE_NAME), SAMPLE_LOCK.replace("0.12.4", "0.12.5")).unwrap();
      let hash2 = Lockfile::load(tree.path()).unwrap().content_hash().clone();

      assert_ne!(hash1, hash2);
    }
  }

  mod validate {
    use super::*;

    fn declared() -> Vec<String> {
      vec!["reqwest".to_string(), "tokio".to_string()]
    }

    #[test]
    fn consistent_lockfile_passes() {
      let tree = source_tree(Some(SAMPLE_LOCK), None);
      let lock = Lockfile::load(tree.path()).unwrap();
      lock.validate(&declared()).unwrap();
    }

    #[test]
    fn removed_record_fails() {
      let stripped: String = SAMPLE_LOCK
        .split("[[package]]")
        .filter(|block| !block.contains("name = \"tokio\""))
        .collect::<Vec<_>>()
        .join("[[package]]");
      let tree = source_tree(Some(&stripped), None);
      let lock = Lockfile::load(tree.path()).unwrap();

      let result = lock.validate(&declared());
      assert!(matches!(result, Err(LockfileError::MissingRecord(name)) if name == "tokio"));
    }

    #[test]
    fn registry_record_without_checksum_fails() {
      let no_checksum = SAMPLE_LOCK.replace(
        "checksum = \"566cafdd92868e0939d3fb961bd0dc25fcfaaed179291093b3d43e6b3150ea10\"\n",
        "",
      );
      let tree = source_tree(Some(&no_checksum), None);
      let lock = Lockfile::load(tree.path()).unwrap();

      let result = lock.validate(&declared());
      assert!(matches!(result, Err(LockfileError::MissingChecksum(name)) if name == "reqwest"));
    }

    #[test]
    fn local_record_without_checksum_passes() {
      // The root package itself has no source and no checksum
      let tree = source_tree(Some(SAMPLE_LOCK), None);
      let lock = Lockfile::load(tree.path()).unwrap();
      lock.validate(&["inat".to_string()]).unwrap();
    }
  }

  mod manifest {
    use super::*;

    #[test]
    fn reads_declared_names() {
      let tree = source_tree(None, Some(SAMPLE_MANIFEST));
      let names = declared_dependencies(tree.path()).unwrap();
      assert_eq!(names, vec!["reqwest".to_string(), "tokio".to_string()]);
    }

    #[test]
    fn missing_manifest_is_error() {
      let tree = source_tree(None, None);
      assert!(matches!(
        declared_dependencies(tree.path()),
        Err(LockfileError::ManifestRead { .. })
      ));
    }
  }
}
