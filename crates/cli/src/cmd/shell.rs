//! Implementation of the `rebake shell` command.
//!
//! Composes the development environment and either prints it as a sourceable
//! script or launches an interactive subshell with it overlaid. The shell
//! never builds; the pinned toolchain is provisioned if missing.

use std::path::Path;

use anyhow::{Context, Result};

use rebake_lib::pipeline::Pipeline;

use crate::output::print_info;

pub fn cmd_shell(descriptor: &str, print: bool) -> Result<()> {
  let pipeline = Pipeline::load(Path::new(descriptor)).context("Failed to load descriptor")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let env = rt.block_on(pipeline.shell()).context("Failed to compose environment")?;

  if print {
    print!("{}", env.render_script());
    return Ok(());
  }

  print_info(&format!(
    "Entering {} development shell (exit to leave)",
    pipeline.descriptor().project.name
  ));

  let code = rt.block_on(env.enter()).context("Shell session failed")?;
  if code != 0 {
    std::process::exit(code);
  }
  Ok(())
}
