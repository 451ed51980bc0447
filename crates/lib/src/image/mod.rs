//! Container image packaging.
//!
//! Produces a self-contained OCI image layout directory from a built
//! artifact: a base layer carrying the trusted CA bundle and the runtime
//! shared libraries, and an artifact layer carrying the binary at
//! `/bin/<main>`. The entrypoint runs the binary directly, no shell.
//!
//! The runtime environment inside the image reuses the dependency set's
//! library search path, the same value the dev shell exports. Build-time
//! tools never enter a layer.
//!
//! The layout is staged next to the destination and renamed into place, so a
//! failed packaging run never leaves a partial image at the destination.

pub mod oci;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::build::Artifact;
use crate::deps::DependencySet;
use crate::platform::{Arch, Os};
use crate::store::hash::hash_bytes;

use oci::{Descriptor, ImageConfig, Index, Manifest, OciLayout, RootFs, RuntimeConfig};

/// Pinned mtime for every archived entry, for bit-identical layers.
const LAYER_MTIME: u64 = 315532800;

/// Where the CA bundle lands inside the image.
const CA_BUNDLE_DEST: &str = "etc/ssl/certs/ca-certificates.crt";

const HOST_CA_BUNDLES: &[&str] = &[
  "/etc/ssl/certs/ca-certificates.crt",
  "/etc/pki/tls/certs/ca-bundle.crt",
  "/etc/ssl/cert.pem",
];

#[derive(Debug, Error)]
pub enum ImageError {
  #[error("artifact binary missing at {0}; refusing to package")]
  MissingArtifact(String),

  #[error("no CA bundle found; set image.ca-bundle in the descriptor")]
  CaBundleMissing,

  #[error("io error while packaging image: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to encode image metadata: {0}")]
  Json(#[from] serde_json::Error),
}

/// Inputs for one packaging run.
pub struct ImageRequest<'a> {
  pub artifact: &'a Artifact,
  pub deps: Arc<DependencySet>,
  /// Override for the CA bundle baked into the base layer. `None` probes
  /// the usual host locations.
  pub ca_bundle: Option<PathBuf>,
  /// Destination directory for the OCI layout.
  pub output: PathBuf,
}

/// What a packaging run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
  /// Final layout directory.
  pub path: PathBuf,
  /// Image reference recorded in the index (`<name>:latest`).
  pub reference: String,
  pub manifest_digest: String,
  pub layers: usize,
}

/// A finished blob, addressed by the digest of exactly the bytes on disk.
struct Blob {
  digest: String,
  data: Vec<u8>,
}

fn blob(data: Vec<u8>) -> Blob {
  let digest = format!("sha256:{}", hash_bytes(&data).0);
  Blob { digest, data }
}

/// A layer: the gzipped blob plus the digest of its uncompressed tar.
struct Layer {
  blob: Blob,
  diff_id: String,
}

fn layer(tar: Vec<u8>) -> Result<Layer, ImageError> {
  let diff_id = format!("sha256:{}", hash_bytes(&tar).0);
  Ok(Layer {
    blob: blob(gzip(&tar)?),
    diff_id,
  })
}

/// Package `request.artifact` into an OCI image layout at `request.output`.
pub fn package(request: &ImageRequest<'_>) -> Result<ImageSummary, ImageError> {
  let artifact = request.artifact;

  // Everything that can fail from bad inputs fails before any blob exists.
  if !artifact.binary.is_file() {
    return Err(ImageError::MissingArtifact(artifact.binary.display().to_string()));
  }
  let ca_bundle = resolve_ca_bundle(request.ca_bundle.as_deref())?;

  let reference = format!("{}:latest", artifact.name);
  info!(reference = %reference, output = %request.output.display(), "packaging image");

  let base = layer(base_layer(&ca_bundle, &request.deps)?)?;
  let top = layer(artifact_layer(artifact)?)?;

  let config = blob(serde_json::to_vec_pretty(&image_config(request, &[&base, &top]))?);

  let manifest = blob(serde_json::to_vec_pretty(&Manifest {
    schema_version: 2,
    media_type: oci::MEDIA_TYPE_MANIFEST.to_string(),
    config: descriptor(oci::MEDIA_TYPE_CONFIG, &config, None),
    layers: vec![
      descriptor(oci::MEDIA_TYPE_LAYER_GZIP, &base.blob, None),
      descriptor(oci::MEDIA_TYPE_LAYER_GZIP, &top.blob, None),
    ],
  })?);

  let index = Index {
    schema_version: 2,
    media_type: oci::MEDIA_TYPE_INDEX.to_string(),
    manifests: vec![descriptor(
      oci::MEDIA_TYPE_MANIFEST,
      &manifest,
      Some(HashMap::from([(
        oci::ANNOTATION_REF_NAME.to_string(),
        reference.clone(),
      )])),
    )],
  };

  write_layout(&request.output, &index, &[&base.blob, &top.blob, &config, &manifest])?;

  info!(reference = %reference, "image packaged");
  Ok(ImageSummary {
    path: request.output.clone(),
    reference,
    manifest_digest: manifest.digest,
    layers: 2,
  })
}

fn descriptor(media_type: &str, blob: &Blob, annotations: Option<HashMap<String, String>>) -> Descriptor {
  Descriptor {
    media_type: media_type.to_string(),
    digest: blob.digest.clone(),
    size: blob.data.len() as u64,
    annotations,
  }
}

fn resolve_ca_bundle(requested: Option<&Path>) -> Result<PathBuf, ImageError> {
  if let Some(path) = requested {
    if path.is_file() {
      return Ok(path.to_path_buf());
    }
    return Err(ImageError::CaBundleMissing);
  }
  HOST_CA_BUNDLES
    .iter()
    .map(Path::new)
    .find(|p| p.is_file())
    .map(Path::to_path_buf)
    .ok_or(ImageError::CaBundleMissing)
}

/// Base layer: the CA bundle plus the shared objects of every runtime
/// library, at the exact paths the library search path names.
fn base_layer(ca_bundle: &Path, deps: &DependencySet) -> Result<Vec<u8>, ImageError> {
  let mut builder = tar::Builder::new(Vec::new());

  append_file(&mut builder, CA_BUNDLE_DEST, &fs::read(ca_bundle)?, 0o644)?;

  for library in &deps.libraries {
    let dest_dir = library.lib_dir.to_string_lossy();
    let dest_dir = dest_dir.trim_start_matches('/');
    for object in runtime_objects(library.lib_dir.as_path(), &library.runtime_objects)? {
      let name = object.file_name().unwrap_or_default().to_string_lossy().to_string();
      debug!(library = %library.name, object = %name, "adding shared object");
      append_file(&mut builder, &format!("{dest_dir}/{name}"), &fs::read(&object)?, 0o755)?;
    }
  }

  Ok(builder.into_inner()?)
}

/// Artifact layer: the binary alone, at `/bin/<main>`.
fn artifact_layer(artifact: &Artifact) -> Result<Vec<u8>, ImageError> {
  let mut builder = tar::Builder::new(Vec::new());
  append_file(
    &mut builder,
    &format!("bin/{}", artifact.main_program),
    &fs::read(&artifact.binary)?,
    0o755,
  )?;
  Ok(builder.into_inner()?)
}

/// Shared objects under `lib_dir` whose names match the library's declared
/// prefixes. A missing directory contributes nothing (cross-platform
/// packaging on a host without the library installed).
fn runtime_objects(lib_dir: &Path, prefixes: &[String]) -> Result<Vec<PathBuf>, ImageError> {
  let entries = match fs::read_dir(lib_dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      warn!(dir = %lib_dir.display(), "library directory not present on this host, skipping");
      return Ok(Vec::new());
    }
    Err(e) => return Err(e.into()),
  };

  let mut objects: Vec<PathBuf> = entries
    .filter_map(|e| e.ok())
    .map(|e| e.path())
    .filter(|p| p.is_file())
    .filter(|p| {
      let name = p.file_name().unwrap_or_default().to_string_lossy().to_string();
      prefixes.iter().any(|prefix| name.starts_with(prefix.as_str())) && name.contains(".so")
    })
    .collect();
  objects.sort();
  Ok(objects)
}

fn append_file(builder: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8], mode: u32) -> Result<(), ImageError> {
  let mut header = tar::Header::new_gnu();
  header.set_size(data.len() as u64);
  header.set_mode(mode);
  header.set_mtime(LAYER_MTIME);
  header.set_entry_type(tar::EntryType::Regular);
  header.set_cksum();
  builder.append_data(&mut header, path, data)?;
  Ok(())
}

fn image_config(request: &ImageRequest<'_>, layers: &[&Layer]) -> ImageConfig {
  let deps = &request.deps;
  let lib_var = deps.platform.os.library_path_var();

  ImageConfig {
    architecture: oci_arch(deps.platform.arch).to_string(),
    os: oci_os(deps.platform.os).to_string(),
    config: RuntimeConfig {
      env: vec![
        "PATH=/bin".to_string(),
        format!("{lib_var}={}", deps.library_search_path()),
        format!("SSL_CERT_FILE=/{CA_BUNDLE_DEST}"),
      ],
      entrypoint: vec![format!("/bin/{}", request.artifact.main_program)],
    },
    rootfs: RootFs {
      fs_type: "layers".to_string(),
      diff_ids: layers.iter().map(|l| l.diff_id.clone()).collect(),
    },
  }
}

fn oci_arch(arch: Arch) -> &'static str {
  match arch {
    Arch::X86_64 => "amd64",
    Arch::Aarch64 => "arm64",
  }
}

fn oci_os(os: Os) -> &'static str {
  match os {
    Os::Linux => "linux",
    Os::Darwin => "darwin",
  }
}

/// Write the layout into a staging directory, then rename it over the
/// destination.
fn write_layout(output: &Path, index: &Index, blobs: &[&Blob]) -> Result<(), ImageError> {
  let staging = staging_dir(output);
  if staging.exists() {
    fs::remove_dir_all(&staging)?;
  }

  let blob_dir = staging.join("blobs").join("sha256");
  fs::create_dir_all(&blob_dir)?;

  fs::write(staging.join("oci-layout"), serde_json::to_vec_pretty(&OciLayout::v1())?)?;
  fs::write(staging.join("index.json"), serde_json::to_vec_pretty(index)?)?;

  for blob in blobs {
    let name = blob.digest.trim_start_matches("sha256:");
    fs::write(blob_dir.join(name), &blob.data)?;
  }

  if output.exists() {
    fs::remove_dir_all(output)?;
  }
  fs::rename(&staging, output)?;
  Ok(())
}

fn staging_dir(output: &Path) -> PathBuf {
  let name = output.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
  output.with_file_name(format!(".{name}.tmp"))
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, ImageError> {
  let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
  std::io::Write::write_all(&mut encoder, data)?;
  Ok(encoder.finish()?)
}
