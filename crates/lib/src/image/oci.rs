//! OCI image layout wire types.
//!
//! Only the fields this tool emits; the layout is the on-disk OCI image
//! layout v1.0.0 (oci-layout file, blobs/sha256/, index.json).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const MEDIA_TYPE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const MEDIA_TYPE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Annotation key naming the image reference.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// A content descriptor: a typed pointer into the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
  #[serde(rename = "mediaType")]
  pub media_type: String,
  pub digest: String,
  pub size: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub annotations: Option<HashMap<String, String>>,
}

/// Top-level index.json.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
  #[serde(rename = "schemaVersion")]
  pub schema_version: u32,
  #[serde(rename = "mediaType")]
  pub media_type: String,
  pub manifests: Vec<Descriptor>,
}

/// Image manifest: config plus ordered layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
  #[serde(rename = "schemaVersion")]
  pub schema_version: u32,
  #[serde(rename = "mediaType")]
  pub media_type: String,
  pub config: Descriptor,
  pub layers: Vec<Descriptor>,
}

/// Runtime process configuration embedded in the image config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
  #[serde(rename = "Env", default)]
  pub env: Vec<String>,
  #[serde(rename = "Entrypoint", default)]
  pub entrypoint: Vec<String>,
}

/// Uncompressed layer digests, in layer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
  #[serde(rename = "type")]
  pub fs_type: String,
  pub diff_ids: Vec<String>,
}

/// Image configuration blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
  pub architecture: String,
  pub os: String,
  pub config: RuntimeConfig,
  pub rootfs: RootFs,
}

/// Marker file at the layout root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciLayout {
  #[serde(rename = "imageLayoutVersion")]
  pub image_layout_version: String,
}

impl OciLayout {
  pub fn v1() -> Self {
    Self {
      image_layout_version: "1.0.0".to_string(),
    }
  }
}
