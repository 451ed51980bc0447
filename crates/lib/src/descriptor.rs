//! The project descriptor (`rebake.toml`).
//!
//! The descriptor is the single configuration object for a build. Everything
//! that pins the build (toolchain revision, native dependency names, source
//! tree location) lives here and is passed by value into each component, so
//! there is no ambient pinning state anywhere in the process.
//!
//! # Format
//!
//! ```toml
//! dependencies = ["openssl"]
//! build-dependencies = ["pkg-config"]
//!
//! [project]
//! name = "inat"
//! version = "0.1.0"
//!
//! [source]
//! path = "."
//!
//! [toolchain]
//! version = "1.79.0"
//! source = "url:https://static.rust-lang.org/dist/rust-1.79.0-x86_64-unknown-linux-gnu.tar.gz"
//! sha256 = "ab20c8af..."
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deps;
use crate::toolchain::ToolchainSpec;

/// Default descriptor file name.
pub const DESCRIPTOR_FILENAME: &str = "rebake.toml";

/// Errors that can occur when loading a descriptor.
#[derive(Debug, Error)]
pub enum DescriptorError {
  #[error("failed to read descriptor {path}: {source}")]
  Read { path: String, source: io::Error },

  #[error("failed to parse descriptor: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("unknown library '{0}' in dependencies")]
  UnknownLibrary(String),

  #[error("unknown build tool '{0}' in build-dependencies")]
  UnknownTool(String),
}

/// Project identity: the static name/version the artifact is tagged with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
  pub name: String,
  pub version: String,
  /// Which file within the artifact is the runnable entrypoint.
  /// Defaults to the project name.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub main_program: Option<String>,
}

/// Location of the source tree (an opaque compilable unit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
  pub path: PathBuf,
}

/// Container image options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOptions {
  /// Override for the trusted CA bundle baked into the base layer.
  #[serde(rename = "ca-bundle", skip_serializing_if = "Option::is_none")]
  pub ca_bundle: Option<PathBuf>,
}

/// The parsed project descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
  pub project: Project,
  pub source: Source,
  pub toolchain: ToolchainSpec,

  /// Native libraries needed at link and run time.
  #[serde(default)]
  pub dependencies: Vec<String>,

  /// Tools needed only while building; never embedded in the artifact
  /// or the image.
  #[serde(default, rename = "build-dependencies")]
  pub build_dependencies: Vec<String>,

  #[serde(default)]
  pub image: ImageOptions,
}

impl Descriptor {
  /// Load and validate a descriptor from `path`.
  ///
  /// The source path is rewritten to be absolute, anchored at the
  /// descriptor's directory, so later components need no knowledge of where
  /// the descriptor came from.
  pub fn load(path: &Path) -> Result<Self, DescriptorError> {
    let content = fs::read_to_string(path).map_err(|e| DescriptorError::Read {
      path: path.display().to_string(),
      source: e,
    })?;

    let mut descriptor: Descriptor = toml::from_str(&content)?;
    descriptor.validate()?;

    if descriptor.source.path.is_relative() {
      let base = path.parent().unwrap_or(Path::new("."));
      descriptor.source.path = base.join(&descriptor.source.path);
    }

    Ok(descriptor)
  }

  /// Reject library and tool names the resolver does not know.
  /// Better to fail here than halfway through a build.
  fn validate(&self) -> Result<(), DescriptorError> {
    for name in &self.dependencies {
      if !deps::is_known_library(name) {
        return Err(DescriptorError::UnknownLibrary(name.clone()));
      }
    }
    for name in &self.build_dependencies {
      if !deps::is_known_tool(name) {
        return Err(DescriptorError::UnknownTool(name.clone()));
      }
    }
    Ok(())
  }

  /// The entrypoint hint: `main_program` if set, otherwise the project name.
  pub fn main_program(&self) -> &str {
    self.project.main_program.as_deref().unwrap_or(&self.project.name)
  }

  /// Root of the source tree.
  pub fn source_root(&self) -> &Path {
    &self.source.path
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use tempfile::NamedTempFile;

  pub(crate) const SAMPLE: &str = r#"
    dependencies = ["openssl"]
    build-dependencies = ["pkg-config"]

    [project]
    name = "inat"
    version = "0.1.0"

    [source]
    path = "."

    [toolchain]
    version = "1.79.0"
    source = "path:/opt/toolchains/rust-1.79.0"
    sha256 = "0000000000000000000000000000000000000000000000000000000000000000"
  "#;

  fn write_descriptor(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
  }

  mod load {
    use super::*;

    #[test]
    fn parses_sample() {
      let file = write_descriptor(SAMPLE);
      let descriptor = Descriptor::load(file.path()).unwrap();

      assert_eq!(descriptor.project.name, "inat");
      assert_eq!(descriptor.project.version, "0.1.0");
      assert_eq!(descriptor.dependencies, vec!["openssl"]);
      assert_eq!(descriptor.build_dependencies, vec!["pkg-config"]);
      assert_eq!(descriptor.toolchain.version, "1.79.0");
    }

    #[test]
    fn source_path_made_absolute() {
      let file = write_descriptor(SAMPLE);
      let descriptor = Descriptor::load(file.path()).unwrap();
      assert!(descriptor.source_root().is_absolute());
    }

    #[test]
    fn missing_file_is_read_error() {
      let result = Descriptor::load(Path::new("/nonexistent/rebake.toml"));
      assert!(matches!(result, Err(DescriptorError::Read { .. })));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
      let file = write_descriptor("not [valid toml");
      assert!(matches!(Descriptor::load(file.path()), Err(DescriptorError::Parse(_))));
    }

    #[test]
    fn unknown_library_rejected() {
      let content = SAMPLE.replace("\"openssl\"", "\"libdoesnotexist\"");
      let file = write_descriptor(&content);
      let result = Descriptor::load(file.path());
      assert!(matches!(result, Err(DescriptorError::UnknownLibrary(name)) if name == "libdoesnotexist"));
    }

    #[test]
    fn unknown_tool_rejected() {
      let content = SAMPLE.replace("\"pkg-config\"", "\"made-up-tool\"");
      let file = write_descriptor(&content);
      let result = Descriptor::load(file.path());
      assert!(matches!(result, Err(DescriptorError::UnknownTool(name)) if name == "made-up-tool"));
    }
  }

  mod entrypoint {
    use super::*;

    #[test]
    fn defaults_to_project_name() {
      let file = write_descriptor(SAMPLE);
      let descriptor = Descriptor::load(file.path()).unwrap();
      assert_eq!(descriptor.main_program(), "inat");
    }

    #[test]
    fn explicit_hint_wins() {
      let content = SAMPLE.replace(
        "version = \"0.1.0\"\n",
        "version = \"0.1.0\"\n    main_program = \"inat-sync\"\n",
      );
      let file = write_descriptor(&content);
      let descriptor = Descriptor::load(file.path()).unwrap();
      assert_eq!(descriptor.main_program(), "inat-sync");
    }
  }
}
