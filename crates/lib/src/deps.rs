//! Dependency Set resolution.
//!
//! Given a target platform and the descriptor's declared names, the resolver
//! produces the concrete set of native libraries (link + run time) and
//! build-time tools. Resolution is a pure lookup into a fixed registry: no
//! probing, no side effects, and the result for identical requests is the
//! same `Arc`: every consumer (build executor, dev shell, image packager)
//! shares one immutable value, which is what keeps their library paths from
//! diverging.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::{Arch, Os, Platform};

/// Errors that can occur during dependency resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("unknown library '{0}'")]
  UnknownLibrary(String),

  #[error("unknown build tool '{0}'")]
  UnknownTool(String),

  #[error("library '{name}' is not available on {platform}")]
  Unavailable { name: String, platform: Platform },
}

/// A resolved native library: where its shared objects, headers, and
/// pkg-config metadata live on the target platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryRef {
  pub name: String,
  pub lib_dir: PathBuf,
  pub include_dir: PathBuf,
  /// Name the pkg-config helper knows this library by.
  pub pc_name: String,
  /// File name prefixes of the shared objects this library contributes to
  /// the runtime closure (e.g. `libssl` matches `libssl.so.3`).
  pub runtime_objects: Vec<String>,
}

/// A resolved build-time tool. Available on the build PATH, never embedded
/// in the artifact or the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRef {
  pub name: String,
  pub bin_dir: PathBuf,
}

/// The shared, immutable dependency set for one platform.
///
/// Ordered as declared in the descriptor. Handed out as `Arc` so the build
/// executor, dev shell composer, and image packager all hold the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySet {
  pub platform: Platform,
  pub libraries: Vec<LibraryRef>,
  pub tools: Vec<ToolRef>,
}

impl DependencySet {
  /// THE derivation of the dynamic-library search path.
  ///
  /// Both the dev shell and the container image call this; a second
  /// derivation must never exist.
  pub fn library_search_path(&self) -> String {
    self
      .libraries
      .iter()
      .map(|lib| lib.lib_dir.to_string_lossy().to_string())
      .collect::<Vec<_>>()
      .join(":")
  }

  /// pkg-config search path for the build-time helper.
  pub fn pkg_config_path(&self) -> String {
    self
      .libraries
      .iter()
      .map(|lib| lib.lib_dir.join("pkgconfig").to_string_lossy().to_string())
      .collect::<Vec<_>>()
      .join(":")
  }

  /// Directories the build executor puts on PATH for build-time tools.
  pub fn tool_bin_dirs(&self) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for tool in &self.tools {
      if !dirs.contains(&tool.bin_dir) {
        dirs.push(tool.bin_dir.clone());
      }
    }
    dirs
  }

  /// Look up a resolved library by name.
  pub fn library(&self, name: &str) -> Option<&LibraryRef> {
    self.libraries.iter().find(|lib| lib.name == name)
  }
}

/// Library names the registry knows.
const KNOWN_LIBRARIES: &[&str] = &["openssl"];

/// Build tool names the registry knows.
const KNOWN_TOOLS: &[&str] = &["pkg-config"];

pub fn is_known_library(name: &str) -> bool {
  KNOWN_LIBRARIES.contains(&name)
}

pub fn is_known_tool(name: &str) -> bool {
  KNOWN_TOOLS.contains(&name)
}

/// Registry lookup for a library on a platform.
fn library_entry(name: &str, platform: Platform) -> Result<LibraryRef, ResolveError> {
  match name {
    "openssl" => {
      let (lib_dir, include_dir) = match (platform.os, platform.arch) {
        (Os::Linux, Arch::X86_64) => ("/usr/lib/x86_64-linux-gnu", "/usr/include"),
        (Os::Linux, Arch::Aarch64) => ("/usr/lib/aarch64-linux-gnu", "/usr/include"),
        (Os::Darwin, Arch::Aarch64) => ("/opt/homebrew/opt/openssl@3/lib", "/opt/homebrew/opt/openssl@3/include"),
        (Os::Darwin, Arch::X86_64) => ("/usr/local/opt/openssl@3/lib", "/usr/local/opt/openssl@3/include"),
      };
      Ok(LibraryRef {
        name: name.to_string(),
        lib_dir: PathBuf::from(lib_dir),
        include_dir: PathBuf::from(include_dir),
        pc_name: "openssl".to_string(),
        runtime_objects: vec!["libssl".to_string(), "libcrypto".to_string()],
      })
    }
    _ => Err(ResolveError::UnknownLibrary(name.to_string())),
  }
}

/// Registry lookup for a build tool on a platform.
fn tool_entry(name: &str, platform: Platform) -> Result<ToolRef, ResolveError> {
  match name {
    "pkg-config" => {
      let bin_dir = match (platform.os, platform.arch) {
        (Os::Linux, _) => "/usr/bin",
        (Os::Darwin, Arch::Aarch64) => "/opt/homebrew/bin",
        (Os::Darwin, Arch::X86_64) => "/usr/local/bin",
      };
      Ok(ToolRef {
        name: name.to_string(),
        bin_dir: PathBuf::from(bin_dir),
      })
    }
    _ => Err(ResolveError::UnknownTool(name.to_string())),
  }
}

type MemoKey = (Platform, Vec<String>, Vec<String>);

fn memo() -> &'static Mutex<HashMap<MemoKey, Arc<DependencySet>>> {
  static MEMO: OnceLock<Mutex<HashMap<MemoKey, Arc<DependencySet>>>> = OnceLock::new();
  MEMO.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Resolve the dependency set for a platform.
///
/// Idempotent and memoized per (platform, names): identical requests return
/// the same `Arc`, so `Arc::ptr_eq` holds across all consumers.
pub fn resolve(platform: Platform, libraries: &[String], tools: &[String]) -> Result<Arc<DependencySet>, ResolveError> {
  let key: MemoKey = (platform, libraries.to_vec(), tools.to_vec());

  let mut table = memo().lock().expect("dependency memo poisoned");
  if let Some(set) = table.get(&key) {
    return Ok(Arc::clone(set));
  }

  let mut resolved_libs = Vec::with_capacity(libraries.len());
  for name in libraries {
    resolved_libs.push(library_entry(name, platform)?);
  }

  let mut resolved_tools = Vec::with_capacity(tools.len());
  for name in tools {
    resolved_tools.push(tool_entry(name, platform)?);
  }

  let set = Arc::new(DependencySet {
    platform,
    libraries: resolved_libs,
    tools: resolved_tools,
  });
  table.insert(key, Arc::clone(&set));

  Ok(set)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn linux() -> Platform {
    "linux-x86_64".parse().unwrap()
  }

  fn openssl_set() -> Arc<DependencySet> {
    resolve(linux(), &["openssl".to_string()], &["pkg-config".to_string()]).unwrap()
  }

  mod resolution {
    use super::*;

    #[test]
    fn resolves_openssl_on_linux() {
      let set = openssl_set();
      assert_eq!(set.libraries.len(), 1);
      let lib = set.library("openssl").unwrap();
      assert_eq!(lib.lib_dir, PathBuf::from("/usr/lib/x86_64-linux-gnu"));
      assert_eq!(lib.pc_name, "openssl");
    }

    #[test]
    fn resolves_pkg_config_tool() {
      let set = openssl_set();
      assert_eq!(set.tools.len(), 1);
      assert_eq!(set.tools[0].bin_dir, PathBuf::from("/usr/bin"));
    }

    #[test]
    fn unknown_library_fails() {
      let result = resolve(linux(), &["libzzz".to_string()], &[]);
      assert!(matches!(result, Err(ResolveError::UnknownLibrary(name)) if name == "libzzz"));
    }

    #[test]
    fn unknown_tool_fails() {
      let result = resolve(linux(), &[], &["cmakez".to_string()]);
      assert!(matches!(result, Err(ResolveError::UnknownTool(_))));
    }

    #[test]
    fn lib_dirs_differ_per_arch() {
      let x86 = resolve("linux-x86_64".parse().unwrap(), &["openssl".to_string()], &[]).unwrap();
      let arm = resolve("linux-aarch64".parse().unwrap(), &["openssl".to_string()], &[]).unwrap();
      assert_ne!(
        x86.library("openssl").unwrap().lib_dir,
        arm.library("openssl").unwrap().lib_dir
      );
    }
  }

  mod single_sourcing {
    use super::*;

    #[test]
    fn repeated_resolution_is_referentially_equal() {
      let first = openssl_set();
      let second = openssl_set();
      assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn different_platforms_get_different_sets() {
      let linux = openssl_set();
      let darwin = resolve(
        "darwin-aarch64".parse().unwrap(),
        &["openssl".to_string()],
        &["pkg-config".to_string()],
      )
      .unwrap();
      assert!(!Arc::ptr_eq(&linux, &darwin));
    }
  }

  mod derivations {
    use super::*;

    #[test]
    fn library_search_path_joins_lib_dirs() {
      let set = openssl_set();
      assert_eq!(set.library_search_path(), "/usr/lib/x86_64-linux-gnu");
    }

    #[test]
    fn pkg_config_path_points_into_lib_dirs() {
      let set = openssl_set();
      assert_eq!(set.pkg_config_path(), "/usr/lib/x86_64-linux-gnu/pkgconfig");
    }

    #[test]
    fn tool_bin_dirs_deduplicated() {
      let set = openssl_set();
      assert_eq!(set.tool_bin_dirs(), vec![PathBuf::from("/usr/bin")]);
    }
  }
}
