//! Development shell composition.
//!
//! The dev shell and the container image are two projections of the same
//! dependency set: both take their library search path from
//! [`DependencySet::library_search_path`], so a binary that links in the shell
//! runs unchanged in the image.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::deps::DependencySet;
use crate::toolchain::Toolchain;

#[derive(Debug, Error)]
pub enum ShellError {
  #[error("failed to launch shell {shell}: {source}")]
  Launch { shell: String, source: std::io::Error },

  #[error("shell exited abnormally")]
  Abnormal,
}

/// The composed environment: an ordered list of variables overlaid on the
/// interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellEnv {
  pub vars: Vec<(String, String)>,
}

/// Compose the development environment for a provisioned toolchain and a
/// resolved dependency set.
///
/// PATH puts the pinned toolchain first; the host PATH stays reachable behind
/// it so interactive tooling keeps working. Everything else is pinned: the
/// dynamic linker search path, pkg-config lookups, and the OpenSSL build
/// hints all come from the dependency set.
pub fn compose(toolchain: &Toolchain, deps: &Arc<DependencySet>) -> ShellEnv {
  let mut path_entries: Vec<PathBuf> = vec![toolchain.root.join("bin")];
  path_entries.extend(deps.tool_bin_dirs());

  let path = path_entries
    .iter()
    .map(|p| p.to_string_lossy().to_string())
    .collect::<Vec<_>>()
    .join(":");

  let mut vars = vec![
    ("PATH".to_string(), format!("{path}:${{PATH}}")),
    (
      deps.platform.os.library_path_var().to_string(),
      deps.library_search_path(),
    ),
    ("PKG_CONFIG_PATH".to_string(), deps.pkg_config_path()),
  ];

  if let Some(openssl) = deps.library("openssl") {
    vars.push(("OPENSSL_LIB_DIR".to_string(), openssl.lib_dir.to_string_lossy().to_string()));
    vars.push((
      "OPENSSL_INCLUDE_DIR".to_string(),
      openssl.include_dir.to_string_lossy().to_string(),
    ));
  }

  debug!(vars = vars.len(), "composed shell environment");
  ShellEnv { vars }
}

impl ShellEnv {
  /// Render the environment as a sourceable sh script.
  pub fn render_script(&self) -> String {
    let mut out = String::from("# generated by rebake; source from an interactive shell\n");
    for (name, value) in &self.vars {
      out.push_str(&format!("export {name}=\"{value}\"\n"));
    }
    out
  }

  /// Expand a value for direct process injection: `${PATH}` references are
  /// resolved against the current environment.
  fn resolved(&self, value: &str) -> String {
    match std::env::var("PATH") {
      Ok(host) => value.replace("${PATH}", &host),
      Err(_) => value.replace(":${PATH}", "").replace("${PATH}", ""),
    }
  }

  /// Launch an interactive subshell with the composed environment overlaid.
  /// Returns the subshell's exit code.
  pub async fn enter(&self) -> Result<i32, ShellError> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    info!(shell = %shell, "entering development shell");

    let mut command = tokio::process::Command::new(&shell);
    for (name, value) in &self.vars {
      command.env(name, self.resolved(value));
    }

    let status = command.status().await.map_err(|source| ShellError::Launch {
      shell: shell.clone(),
      source,
    })?;

    status.code().ok_or(ShellError::Abnormal)
  }
}
