//! Build realization.
//!
//! The executor takes the descriptor, the pinned toolchain, and the shared
//! dependency set, validates the source tree's lockfile, and produces the
//! build artifact in the content-addressed store.
//!
//! The object hash covers every build input (descriptor, toolchain spec,
//! dependency set, platform, the lockfile content, and the source tree
//! contents), so an unchanged input graph is a cache hit and the toolchain is
//! not invoked at all. Editing any source file changes the key. Failure is
//! fatal: a failed build leaves no completion marker and the next run purges
//! the partial object.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::deps::DependencySet;
use crate::descriptor::Descriptor;
use crate::lockfile::{self, Lockfile, LockfileError};
use crate::platform::Platform;
use crate::store;
use crate::store::hash::{self, ContentHash, DirHashError, Hashable};
use crate::toolchain::Toolchain;

/// Errors that can occur during build realization.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Lockfile(#[from] LockfileError),

  #[error("build command {program} failed with exit code {code:?}:\n{stderr}")]
  CommandFailed {
    program: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("build produced no binary at {0}")]
  MissingOutput(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Store(#[from] store::StoreError),

  #[error("failed to hash build inputs: {0}")]
  Hash(#[from] serde_json::Error),

  #[error("failed to hash source tree: {0}")]
  SourceHash(#[from] DirHashError),
}

/// Directory names skipped when hashing the source tree. Build products and
/// VCS metadata do not feed the cache key.
const SOURCE_EXCLUSIONS: &[&str] = &["target", ".git"];

/// Everything a single build invocation needs, passed by value.
pub struct BuildRequest<'a> {
  pub descriptor: &'a Descriptor,
  pub toolchain: &'a Toolchain,
  pub deps: Arc<DependencySet>,
  pub platform: Platform,
}

/// Build tuning. Tests substitute the build program with a stub script, the
/// same way action execution is stubbed elsewhere.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  /// Program invoked to drive compilation. `None` means the pinned
  /// toolchain's cargo.
  pub build_program: Option<PathBuf>,
}

/// The immutable build artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  /// Static artifact name ("inat").
  pub name: String,
  /// Static version tag ("0.1.0").
  pub version: String,
  pub platform: Platform,
  /// Store object directory holding the artifact.
  pub store_path: PathBuf,
  /// Absolute path of the runnable binary within the store.
  pub binary: PathBuf,
  /// Entrypoint hint for downstream packaging.
  pub main_program: String,
  /// Content hash of the artifact directory.
  pub output_hash: ContentHash,
}

/// The value that keys an artifact in the store.
#[derive(Serialize)]
struct BuildKey<'a> {
  descriptor: &'a Descriptor,
  deps: &'a DependencySet,
  platform: Platform,
  lockfile: &'a ContentHash,
  source: &'a ContentHash,
}

impl Hashable for BuildKey<'_> {}

/// Realize the build described by `request`.
///
/// Steps, in order:
/// 1. validate the lockfile against the declared dependency manifest
///    (fatal mismatch, before the toolchain is touched);
/// 2. invoke the pinned toolchain in a scrubbed environment;
/// 3. copy the binary into the store and tag it with the static name/version;
/// 4. write the completion marker.
pub async fn realize(request: &BuildRequest<'_>, options: &BuildOptions) -> Result<Artifact, BuildError> {
  let descriptor = request.descriptor;
  let source_root = descriptor.source_root();

  // Lockfile validation comes first: a missing or inconsistent lockfile must
  // fail before any compilation starts.
  let declared = lockfile::declared_dependencies(source_root)?;
  let lock = Lockfile::load(source_root)?;
  lock.validate(&declared)?;
  debug!(packages = lock.len(), "lockfile validated");

  let source_hash = hash::hash_directory(source_root, SOURCE_EXCLUSIONS)?;

  let key = BuildKey {
    descriptor,
    deps: request.deps.as_ref(),
    platform: request.platform,
    lockfile: lock.content_hash(),
    source: &source_hash,
  };
  let hash = key.compute_hash()?;
  let store_path = store::object_dir(&descriptor.project.name, &hash);

  if store::check_cached_object(&store_path).await? {
    info!(name = %descriptor.project.name, hash = %hash, "artifact already built (cache hit)");
    return artifact_at(request, store_path);
  }

  info!(
    name = %descriptor.project.name,
    version = %descriptor.project.version,
    platform = %request.platform,
    hash = %hash,
    "building"
  );

  tokio::fs::create_dir_all(&store_path).await?;
  let tmp_dir = store_path.join("tmp");
  tokio::fs::create_dir_all(&tmp_dir).await?;

  run_build_command(request, options, &tmp_dir).await?;

  // Move the binary into its final store location
  let built = tmp_dir.join("target").join("release").join(descriptor.main_program());
  if !built.exists() {
    return Err(BuildError::MissingOutput(built.display().to_string()));
  }

  let bin_dir = store_path.join("bin");
  tokio::fs::create_dir_all(&bin_dir).await?;
  tokio::fs::copy(&built, bin_dir.join(descriptor.main_program())).await?;

  // Staging leftovers must not end up in the object hash
  tokio::fs::remove_dir_all(&tmp_dir).await?;

  store::write_complete_marker(&store_path).await?;

  info!(path = %store_path.display(), "build complete");
  artifact_at(request, store_path)
}

/// Invoke the build driver with a scrubbed, reproducible environment.
///
/// PATH carries only the toolchain and the declared build-time tools; the
/// dependency set supplies the pkg-config and library locations. Nothing from
/// the host environment leaks in.
async fn run_build_command(
  request: &BuildRequest<'_>,
  options: &BuildOptions,
  tmp_dir: &std::path::Path,
) -> Result<(), BuildError> {
  let descriptor = request.descriptor;
  let toolchain = request.toolchain;
  let deps = &request.deps;

  let program = options.build_program.clone().unwrap_or_else(|| toolchain.cargo.clone());

  let mut path_entries = vec![toolchain.root.join("bin")];
  path_entries.extend(deps.tool_bin_dirs());
  let path = path_entries
    .iter()
    .map(|p| p.to_string_lossy().to_string())
    .collect::<Vec<_>>()
    .join(":");

  let mut command = Command::new(&program);
  command
    .arg("build")
    .arg("--release")
    .arg("--locked")
    .current_dir(descriptor.source_root())
    .env_clear()
    .env("PATH", &path)
    .env("HOME", "/homeless-shelter")
    .env("TMPDIR", tmp_dir)
    .env("CARGO_TARGET_DIR", tmp_dir.join("target"))
    .env("CARGO_HOME", store::store_root().join("cargo-home"))
    .env("PKG_CONFIG_PATH", deps.pkg_config_path())
    .env("LANG", "C")
    .env("LC_ALL", "C")
    // Pinned for reproducible embedded timestamps
    .env("SOURCE_DATE_EPOCH", "315532800");

  if let Some(openssl) = deps.library("openssl") {
    command.env("OPENSSL_LIB_DIR", &openssl.lib_dir);
    command.env("OPENSSL_INCLUDE_DIR", &openssl.include_dir);
  }

  debug!(program = %program.display(), path = %path, "spawning build");

  let output = command.output().await?;

  if !output.status.success() {
    // Surface the substrate's diagnostics verbatim
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    return Err(BuildError::CommandFailed {
      program: program.display().to_string(),
      code: output.status.code(),
      stderr,
    });
  }

  Ok(())
}

/// Build the artifact handle for a completed store object.
fn artifact_at(request: &BuildRequest<'_>, store_path: PathBuf) -> Result<Artifact, BuildError> {
  let descriptor = request.descriptor;
  let main_program = descriptor.main_program().to_string();
  let binary = store_path.join("bin").join(&main_program);

  if !binary.exists() {
    return Err(BuildError::MissingOutput(binary.display().to_string()));
  }

  let marker = store::read_marker(&store_path)?;
  let output_hash = marker
    .and_then(|m| m.output_hash)
    .map(ContentHash)
    .unwrap_or_else(|| ContentHash(String::new()));

  Ok(Artifact {
    name: descriptor.project.name.clone(),
    version: descriptor.project.version.clone(),
    platform: request.platform,
    store_path,
    binary,
    main_program,
    output_hash,
  })
}
