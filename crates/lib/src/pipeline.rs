//! End-to-end orchestration.
//!
//! The pipeline runs the stages in a fixed order and stops at the first
//! failure: resolve the dependency set, provision the toolchain, realize the
//! build, then hand the result to the dev shell composer or the image
//! packager. Each stage's output feeds the next by value; nothing is
//! re-resolved along the way, so every consumer sees the same dependency set.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::build::{self, Artifact, BuildError, BuildOptions, BuildRequest};
use crate::deps::{self, DependencySet, ResolveError};
use crate::descriptor::{Descriptor, DescriptorError};
use crate::image::{self, ImageError, ImageRequest, ImageSummary};
use crate::platform::Platform;
use crate::shell::{self, ShellEnv};
use crate::toolchain::{self, Toolchain, ToolchainError};

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Descriptor(#[from] DescriptorError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Toolchain(#[from] ToolchainError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Image(#[from] ImageError),
}

/// A loaded pipeline, bound to one descriptor and one target platform.
pub struct Pipeline {
  descriptor: Descriptor,
  platform: Platform,
  build_options: BuildOptions,
}

/// The resolved front half of the pipeline: everything the build, shell, and
/// image stages share.
pub struct Prepared {
  pub deps: Arc<DependencySet>,
  pub toolchain: Toolchain,
}

impl Pipeline {
  /// Load the descriptor at `path` for the current host platform.
  pub fn load(path: &Path) -> Result<Self, PipelineError> {
    Ok(Self::new(Descriptor::load(path)?, Platform::current()))
  }

  pub fn new(descriptor: Descriptor, platform: Platform) -> Self {
    Self {
      descriptor,
      platform,
      build_options: BuildOptions::default(),
    }
  }

  pub fn descriptor(&self) -> &Descriptor {
    &self.descriptor
  }

  pub fn platform(&self) -> Platform {
    self.platform
  }

  #[cfg(test)]
  fn with_build_options(mut self, options: BuildOptions) -> Self {
    self.build_options = options;
    self
  }

  /// Resolve dependencies and provision the toolchain.
  pub async fn prepare(&self) -> Result<Prepared, PipelineError> {
    let deps = deps::resolve(
      self.platform,
      &self.descriptor.dependencies,
      &self.descriptor.build_dependencies,
    )?;
    debug!(
      libraries = deps.libraries.len(),
      tools = deps.tools.len(),
      "dependency set resolved"
    );

    let toolchain = toolchain::provision(&self.descriptor.toolchain, self.platform).await?;
    Ok(Prepared { deps, toolchain })
  }

  /// Realize the build artifact.
  pub async fn build(&self) -> Result<Artifact, PipelineError> {
    let prepared = self.prepare().await?;
    self.build_prepared(&prepared).await
  }

  async fn build_prepared(&self, prepared: &Prepared) -> Result<Artifact, PipelineError> {
    let request = BuildRequest {
      descriptor: &self.descriptor,
      toolchain: &prepared.toolchain,
      deps: Arc::clone(&prepared.deps),
      platform: self.platform,
    };
    Ok(build::realize(&request, &self.build_options).await?)
  }

  /// Compose the development shell environment. Does not build.
  pub async fn shell(&self) -> Result<ShellEnv, PipelineError> {
    let prepared = self.prepare().await?;
    Ok(shell::compose(&prepared.toolchain, &prepared.deps))
  }

  /// Build and package the container image at `output`.
  pub async fn image(&self, output: PathBuf) -> Result<ImageSummary, PipelineError> {
    let prepared = self.prepare().await?;
    let artifact = self.build_prepared(&prepared).await?;

    let request = ImageRequest {
      artifact: &artifact,
      deps: prepared.deps,
      ca_bundle: self.descriptor.image.ca_bundle.clone(),
      output,
    };
    Ok(image::package(&request)?)
  }
}
