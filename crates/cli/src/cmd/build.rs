//! Implementation of the `rebake build` command.
//!
//! Loads the descriptor, resolves dependencies, provisions the pinned
//! toolchain, and realizes the build artifact in the store. A cache hit
//! finishes without invoking the toolchain.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use rebake_lib::descriptor::Descriptor;
use rebake_lib::pipeline::Pipeline;
use rebake_lib::platform::Platform;

use crate::output::{self, format_duration, print_json, print_stat, print_success};

/// Resolve the target platform: explicit `--platform`, else the host.
pub(crate) fn target_platform(requested: Option<&str>) -> Result<Platform> {
  match requested {
    Some(s) => Ok(s.parse()?),
    None => Ok(Platform::current()),
  }
}

pub fn cmd_build(descriptor: &str, platform: Option<&str>, format: output::OutputFormat) -> Result<()> {
  let loaded = Descriptor::load(Path::new(descriptor)).context("Failed to load descriptor")?;
  let pipeline = Pipeline::new(loaded, target_platform(platform)?);

  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let artifact = rt.block_on(pipeline.build()).context("Build failed")?;
  let elapsed = started.elapsed();

  info!(path = %artifact.store_path.display(), "artifact in store");

  if format.is_json() {
    print_json(&serde_json::json!({
      "name": artifact.name,
      "version": artifact.version,
      "platform": artifact.platform.to_string(),
      "binary": artifact.binary,
      "output_hash": artifact.output_hash.0,
    }))?;
  } else {
    print_success(&format!(
      "Built {} v{} for {} in {}",
      artifact.name,
      artifact.version,
      artifact.platform,
      format_duration(elapsed)
    ));
    print_stat("Binary", &artifact.binary.display().to_string());
    print_stat("Output hash", output::truncate_hash(&artifact.output_hash.0));
  }

  Ok(())
}
