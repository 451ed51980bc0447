//! Implementation of the `rebake image` command.
//!
//! Builds the artifact (or takes the cached one) and packages it into an OCI
//! image layout directory. The destination is replaced atomically; a failed
//! run leaves any previous layout untouched.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};

use rebake_lib::descriptor::Descriptor;
use rebake_lib::pipeline::Pipeline;

use crate::cmd::build::target_platform;
use crate::output::{self, format_duration, print_json, print_stat, print_success, symbols};

pub fn cmd_image(
  descriptor: &str,
  platform: Option<&str>,
  output: Option<PathBuf>,
  format: output::OutputFormat,
) -> Result<()> {
  let loaded = Descriptor::load(Path::new(descriptor)).context("Failed to load descriptor")?;
  let pipeline = Pipeline::new(loaded, target_platform(platform)?);

  let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.oci", pipeline.descriptor().project.name)));

  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let summary = rt.block_on(pipeline.image(output)).context("Packaging failed")?;
  let elapsed = started.elapsed();

  if format.is_json() {
    print_json(&serde_json::json!({
      "reference": summary.reference,
      "path": summary.path,
      "manifest_digest": summary.manifest_digest,
      "layers": summary.layers,
    }))?;
  } else {
    print_success(&format!("Packaged {} in {}", summary.reference, format_duration(elapsed)));
    print_stat("Layout", &summary.path.display().to_string());
    print_stat("Manifest", &summary.manifest_digest);
    println!();
    println!(
      "  {} load it with: podman load -i oci:{}",
      symbols::ARROW,
      summary.path.display()
    );
  }

  Ok(())
}
