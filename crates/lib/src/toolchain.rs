//! Toolchain provisioning.
//!
//! The build never uses whatever toolchain the host ships. The descriptor
//! pins an exact compiler/linker pair and the provider installs it into the
//! content-addressed store, keyed by the spec hash. A second provision with
//! an unchanged spec is a cache hit and performs no network I/O.
//!
//! Sources use the same locator scheme as other pinned inputs:
//! - `url:<https-url>`: tarball fetched and verified against the pinned
//!   sha256 before unpacking. A hash mismatch aborts; nothing is installed.
//! - `path:<dir>`: a pre-provisioned local toolchain directory, copied into
//!   the store as-is. Local sources are trusted, the way local path inputs
//!   are elsewhere.
//!
//! An unreachable source or unsupported platform aborts the entire build.
//! There is deliberately no fallback to a system toolchain: that would make
//! two machines with different hosts produce different artifacts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::platform::Platform;
use crate::store;
use crate::store::hash::{Hashable, hash_file};

/// Pinned toolchain specification from the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainSpec {
  /// Compiler version, e.g. "1.79.0".
  pub version: String,
  /// `url:` or `path:` locator of the toolchain distribution.
  pub source: String,
  /// SHA256 of the distribution tarball (verified for `url:` sources).
  pub sha256: String,
}

/// A provisioned toolchain, rooted inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
  pub version: String,
  pub root: PathBuf,
  pub cargo: PathBuf,
  pub rustc: PathBuf,
}

/// Errors that can occur while provisioning a toolchain.
#[derive(Debug, Error)]
pub enum ToolchainError {
  #[error("unsupported toolchain source '{0}' (expected url: or path:)")]
  UnsupportedScheme(String),

  #[error("toolchain fetch failed for {url}: {message}")]
  Fetch { url: String, message: String },

  #[error("toolchain hash mismatch for {url}: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("toolchain source directory missing: {0}")]
  SourceMissing(String),

  #[error("toolchain distribution is incomplete: missing {0}")]
  Incomplete(String),

  #[error("failed to unpack toolchain: {message}")]
  Unpack { message: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Store(#[from] store::StoreError),

  #[error("failed to hash toolchain spec: {0}")]
  Hash(#[from] serde_json::Error),
}

/// The value that keys a toolchain in the store: spec plus target platform.
#[derive(Serialize)]
struct ToolchainKey<'a> {
  spec: &'a ToolchainSpec,
  platform: Platform,
}

impl Hashable for ToolchainKey<'_> {}

enum SourceLocator {
  Url(String),
  Path(PathBuf),
}

fn parse_source(source: &str) -> Result<SourceLocator, ToolchainError> {
  if let Some(url) = source.strip_prefix("url:") {
    Ok(SourceLocator::Url(url.to_string()))
  } else if let Some(path) = source.strip_prefix("path:") {
    Ok(SourceLocator::Path(PathBuf::from(path)))
  } else {
    Err(ToolchainError::UnsupportedScheme(source.to_string()))
  }
}

/// Provision the pinned toolchain for `platform`.
///
/// Returns the installed toolchain from the store, installing it first if
/// this spec has never been provisioned on this machine.
pub async fn provision(spec: &ToolchainSpec, platform: Platform) -> Result<Toolchain, ToolchainError> {
  let key = ToolchainKey { spec, platform };
  let hash = key.compute_hash()?;
  let root = store::object_dir("toolchain", &hash);

  if store::check_cached_object(&root).await? {
    debug!(version = %spec.version, path = %root.display(), "toolchain already provisioned");
    return toolchain_at(spec, root);
  }

  info!(version = %spec.version, source = %spec.source, "provisioning toolchain");
  tokio::fs::create_dir_all(&root).await?;

  match parse_source(&spec.source)? {
    SourceLocator::Url(url) => {
      let tarball = fetch_verified(&url, &spec.sha256).await?;
      unpack_tar_gz(&tarball, &root)?;
    }
    SourceLocator::Path(path) => {
      if !path.is_dir() {
        return Err(ToolchainError::SourceMissing(path.display().to_string()));
      }
      copy_tree(&path, &root)?;
    }
  }

  let toolchain = toolchain_at(spec, root.clone())?;
  store::write_complete_marker(&root).await?;

  info!(version = %spec.version, path = %root.display(), "toolchain installed");
  Ok(toolchain)
}

/// Build the `Toolchain` handle, verifying the distribution actually carries
/// a compiler and a build driver.
fn toolchain_at(spec: &ToolchainSpec, root: PathBuf) -> Result<Toolchain, ToolchainError> {
  let cargo = root.join("bin").join("cargo");
  let rustc = root.join("bin").join("rustc");

  if !cargo.exists() {
    return Err(ToolchainError::Incomplete("bin/cargo".to_string()));
  }
  if !rustc.exists() {
    return Err(ToolchainError::Incomplete("bin/rustc".to_string()));
  }

  Ok(Toolchain {
    version: spec.version.clone(),
    root,
    cargo,
    rustc,
  })
}

/// Download a tarball into the store's download cache, verifying its sha256.
///
/// An already-cached tarball with the right hash short-circuits the fetch.
async fn fetch_verified(url: &str, expected_sha256: &str) -> Result<PathBuf, ToolchainError> {
  let downloads = store::downloads_dir();
  tokio::fs::create_dir_all(&downloads).await?;

  let dest = downloads.join(url_to_filename(url));

  if dest.exists() {
    if let Ok(actual) = hash_file(&dest) {
      if actual.0 == expected_sha256 {
        info!(path = %dest.display(), "using cached toolchain tarball");
        return Ok(dest);
      }
      debug!(expected = %expected_sha256, actual = %actual.0, "cached tarball hash mismatch, re-fetching");
    }
  }

  info!(url = %url, "fetching toolchain tarball");
  let response = reqwest::get(url).await.map_err(|e| ToolchainError::Fetch {
    url: url.to_string(),
    message: e.to_string(),
  })?;

  if !response.status().is_success() {
    return Err(ToolchainError::Fetch {
      url: url.to_string(),
      message: format!("HTTP {}", response.status()),
    });
  }

  let bytes = response.bytes().await.map_err(|e| ToolchainError::Fetch {
    url: url.to_string(),
    message: e.to_string(),
  })?;

  let actual = store::hash::hash_bytes(&bytes);
  if actual.0 != expected_sha256 {
    return Err(ToolchainError::HashMismatch {
      url: url.to_string(),
      expected: expected_sha256.to_string(),
      actual: actual.0,
    });
  }

  let mut file = tokio::fs::File::create(&dest).await?;
  file.write_all(&bytes).await?;
  file.flush().await?;

  info!(path = %dest.display(), size = bytes.len(), "toolchain tarball verified");
  Ok(dest)
}

/// Derive a cache filename from a URL.
fn url_to_filename(url: &str) -> String {
  url.rsplit('/').next().unwrap_or("download").to_string()
}

/// Shape of a distribution tarball once its top-level directory is stripped.
///
/// Official `rust-<ver>-<triple>.tar.gz` releases are componentized: the
/// payload is split across component directories (`cargo/bin/cargo`,
/// `rustc/bin/rustc`, `rust-std-*/lib/...`) next to installer metadata like
/// `install.sh`. Plain tarballs carry `bin/` at the root directly.
#[derive(Clone, Copy, PartialEq, Eq)]
enum DistLayout {
  Flat,
  Componentized,
}

/// Scan the archive for `bin/cargo` to decide how many leading path
/// components to strip. A tarball with no cargo anywhere is rejected here,
/// before anything lands in the store.
fn detect_layout(archive_path: &Path) -> Result<DistLayout, ToolchainError> {
  let file = std::fs::File::open(archive_path)?;
  let decoder = flate2::read::GzDecoder::new(std::io::BufReader::new(file));
  let mut archive = tar::Archive::new(decoder);

  for entry in archive.entries().map_err(|e| ToolchainError::Unpack { message: e.to_string() })? {
    let entry = entry.map_err(|e| ToolchainError::Unpack { message: e.to_string() })?;
    let path = entry.path().map_err(|e| ToolchainError::Unpack { message: e.to_string() })?;
    let stripped: PathBuf = path.components().skip(1).collect();

    if stripped == Path::new("bin/cargo") {
      return Ok(DistLayout::Flat);
    }
    if stripped.components().count() == 3 && stripped.ends_with("bin/cargo") {
      return Ok(DistLayout::Componentized);
    }
  }

  Err(ToolchainError::Incomplete("bin/cargo".to_string()))
}

/// Unpack a `.tar.gz` distribution, stripping the top-level directory and
/// merging component directories into a single tree when the release is
/// componentized.
fn unpack_tar_gz(archive_path: &Path, dest: &Path) -> Result<(), ToolchainError> {
  let layout = detect_layout(archive_path)?;
  let strip = match layout {
    DistLayout::Flat => 1,
    DistLayout::Componentized => 2,
  };

  let file = std::fs::File::open(archive_path)?;
  let decoder = flate2::read::GzDecoder::new(std::io::BufReader::new(file));
  let mut archive = tar::Archive::new(decoder);

  for entry in archive.entries().map_err(|e| ToolchainError::Unpack { message: e.to_string() })? {
    let mut entry = entry.map_err(|e| ToolchainError::Unpack { message: e.to_string() })?;
    let path = entry.path().map_err(|e| ToolchainError::Unpack { message: e.to_string() })?;

    let stripped: PathBuf = path.components().skip(strip).collect();
    // Installer metadata (install.sh, components, ...) sits above the strip
    // depth for componentized releases and falls out here.
    if stripped.as_os_str().is_empty() {
      continue;
    }

    // Per-component file lists would collide at the merged root
    if layout == DistLayout::Componentized && stripped == Path::new("manifest.in") {
      continue;
    }

    let dest_path = dest.join(&stripped);
    if let Some(parent) = dest_path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    entry
      .unpack(&dest_path)
      .map_err(|e| ToolchainError::Unpack { message: e.to_string() })?;
  }

  Ok(())
}

/// Copy a local toolchain tree into the store, preserving the unix mode bits
/// (the compiler binaries must stay executable).
fn copy_tree(src: &Path, dest: &Path) -> Result<(), ToolchainError> {
  for entry in WalkDir::new(src) {
    let entry = entry.map_err(|e| ToolchainError::Unpack { message: e.to_string() })?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    if rel.as_os_str().is_empty() {
      continue;
    }

    let target = dest.join(rel);
    if entry.file_type().is_dir() {
      std::fs::create_dir_all(&target)?;
    } else if entry.file_type().is_file() {
      if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::copy(entry.path(), &target)?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  fn spec(source: &str) -> ToolchainSpec {
    ToolchainSpec {
      version: "1.79.0".to_string(),
      source: source.to_string(),
      sha256: "0".repeat(64),
    }
  }

  fn linux() -> Platform {
    "linux-x86_64".parse().unwrap()
  }

  /// Lay out a minimal fake toolchain distribution (bin/cargo, bin/rustc).
  fn fake_distribution(dir: &Path) {
    std::fs::create_dir_all(dir.join("bin")).unwrap();
    std::fs::write(dir.join("bin/cargo"), "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::write(dir.join("bin/rustc"), "#!/bin/sh\nexit 0\n").unwrap();
  }

  fn with_temp_store<T>(f: impl FnOnce() -> T) -> T {
    let temp = TempDir::new().unwrap();
    let store = temp.path().join("store");
    temp_env::with_var("REBAKE_STORE", Some(store.to_str().unwrap()), f)
  }

  fn block_on<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .unwrap()
      .block_on(fut)
  }

  #[test]
  #[serial]
  fn provisions_from_path_source() {
    with_temp_store(|| {
      let dist = TempDir::new().unwrap();
      fake_distribution(dist.path());

      let spec = spec(&format!("path:{}", dist.path().display()));
      let toolchain = block_on(provision(&spec, linux())).unwrap();

      assert_eq!(toolchain.version, "1.79.0");
      assert!(toolchain.cargo.exists());
      assert!(toolchain.rustc.exists());
      assert!(store::is_complete(&toolchain.root));
    });
  }

  #[test]
  #[serial]
  fn second_provision_is_cache_hit() {
    with_temp_store(|| {
      let dist = TempDir::new().unwrap();
      fake_distribution(dist.path());

      let spec = spec(&format!("path:{}", dist.path().display()));
      let first = block_on(provision(&spec, linux())).unwrap();

      // Mutate the source after install; a cache hit must not see it
      std::fs::write(dist.path().join("bin/cargo"), "#!/bin/sh\nexit 1\n").unwrap();

      let second = block_on(provision(&spec, linux())).unwrap();
      assert_eq!(first.root, second.root);
      assert_eq!(std::fs::read_to_string(second.cargo).unwrap(), "#!/bin/sh\nexit 0\n");
    });
  }

  #[test]
  #[serial]
  fn different_platforms_install_separately() {
    with_temp_store(|| {
      let dist = TempDir::new().unwrap();
      fake_distribution(dist.path());

      let spec = spec(&format!("path:{}", dist.path().display()));
      let linux_tc = block_on(provision(&spec, linux())).unwrap();
      let darwin_tc = block_on(provision(&spec, "darwin-aarch64".parse().unwrap())).unwrap();

      assert_ne!(linux_tc.root, darwin_tc.root);
    });
  }

  #[test]
  #[serial]
  fn missing_path_source_fails() {
    with_temp_store(|| {
      let spec = spec("path:/nonexistent/toolchain");
      let result = block_on(provision(&spec, linux()));
      assert!(matches!(result, Err(ToolchainError::SourceMissing(_))));
    });
  }

  #[test]
  #[serial]
  fn incomplete_distribution_fails() {
    with_temp_store(|| {
      let dist = TempDir::new().unwrap();
      // bin/cargo only, no rustc
      std::fs::create_dir_all(dist.path().join("bin")).unwrap();
      std::fs::write(dist.path().join("bin/cargo"), "#!/bin/sh\n").unwrap();

      let spec = spec(&format!("path:{}", dist.path().display()));
      let result = block_on(provision(&spec, linux()));
      assert!(matches!(result, Err(ToolchainError::Incomplete(missing)) if missing == "bin/rustc"));
    });
  }

  /// Build a distribution tarball the way static.rust-lang.org ships them:
  /// a `rust-<ver>-<triple>/` top directory holding either `bin/` directly
  /// or installer metadata plus per-component trees.
  fn dist_tarball(dir: &Path, componentized: bool) -> PathBuf {
    let path = dir.join("rust-1.79.0-x86_64-unknown-linux-gnu.tar.gz");
    let file = std::fs::File::create(&path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
    let mut builder = tar::Builder::new(encoder);

    let top = "rust-1.79.0-x86_64-unknown-linux-gnu";
    let mut add = |entry_path: &str, data: &[u8]| {
      let mut header = tar::Header::new_gnu();
      header.set_size(data.len() as u64);
      header.set_mode(0o755);
      header.set_cksum();
      builder
        .append_data(&mut header, format!("{top}/{entry_path}"), data)
        .unwrap();
    };

    if componentized {
      add("install.sh", b"#!/bin/sh\n");
      add("components", b"cargo\nrustc\n");
      add("rust-installer-version", b"3\n");
      add("cargo/manifest.in", b"file:bin/cargo\n");
      add("cargo/bin/cargo", b"#!/bin/sh\nexit 0\n");
      add("rustc/manifest.in", b"file:bin/rustc\n");
      add("rustc/bin/rustc", b"#!/bin/sh\nexit 0\n");
      add("rustc/lib/librustc_driver.so", b"elf\n");
    } else {
      add("bin/cargo", b"#!/bin/sh\nexit 0\n");
      add("bin/rustc", b"#!/bin/sh\nexit 0\n");
    }

    builder.into_inner().unwrap().finish().unwrap();
    path
  }

  #[test]
  fn unpacks_flat_distribution() {
    let temp = TempDir::new().unwrap();
    let tarball = dist_tarball(temp.path(), false);
    let dest = temp.path().join("unpacked");
    std::fs::create_dir_all(&dest).unwrap();

    unpack_tar_gz(&tarball, &dest).unwrap();

    assert!(dest.join("bin/cargo").exists());
    assert!(dest.join("bin/rustc").exists());
  }

  #[test]
  fn unpacks_componentized_distribution() {
    let temp = TempDir::new().unwrap();
    let tarball = dist_tarball(temp.path(), true);
    let dest = temp.path().join("unpacked");
    std::fs::create_dir_all(&dest).unwrap();

    unpack_tar_gz(&tarball, &dest).unwrap();

    // Component trees merged into a single root
    assert!(dest.join("bin/cargo").exists());
    assert!(dest.join("bin/rustc").exists());
    assert!(dest.join("lib/librustc_driver.so").exists());
    // Installer metadata stays out of the store
    assert!(!dest.join("install.sh").exists());
    assert!(!dest.join("components").exists());
    assert!(!dest.join("manifest.in").exists());
  }

  #[test]
  fn tarball_without_cargo_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("not-a-toolchain.tar.gz");
    let file = std::fs::File::create(&path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(5);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "dist/README", &b"hello"[..]).unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let dest = temp.path().join("unpacked");
    std::fs::create_dir_all(&dest).unwrap();

    let result = unpack_tar_gz(&path, &dest);
    assert!(matches!(result, Err(ToolchainError::Incomplete(missing)) if missing == "bin/cargo"));
  }

  #[test]
  fn unsupported_scheme_fails() {
    let result = parse_source("git:https://example.com/rust.git");
    assert!(matches!(result, Err(ToolchainError::UnsupportedScheme(_))));
  }

  #[test]
  fn url_filenames() {
    assert_eq!(
      url_to_filename("https://static.rust-lang.org/dist/rust-1.79.0.tar.gz"),
      "rust-1.79.0.tar.gz"
    );
  }
}
