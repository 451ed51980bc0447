//! Target platform identification.
//!
//! Platforms are written `{os}-{arch}` (e.g. `linux-x86_64`), the same form
//! the descriptor and CLI use. Anything rebake does not know how to build for
//! is rejected up front; there is no fallback platform.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operating system of a build target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
  Linux,
  Darwin,
}

impl Os {
  /// Detect the current operating system at compile time.
  #[cfg(target_os = "linux")]
  pub const fn current() -> Self {
    Os::Linux
  }

  #[cfg(target_os = "macos")]
  pub const fn current() -> Self {
    Os::Darwin
  }

  pub const fn as_str(&self) -> &'static str {
    match self {
      Os::Linux => "linux",
      Os::Darwin => "darwin",
    }
  }

  /// Name of the dynamic-library search path variable on this OS.
  pub const fn library_path_var(&self) -> &'static str {
    match self {
      Os::Linux => "LD_LIBRARY_PATH",
      Os::Darwin => "DYLD_LIBRARY_PATH",
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// CPU architecture of a build target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
  X86_64,
  Aarch64,
}

impl Arch {
  /// Detect the current architecture at compile time.
  #[cfg(target_arch = "x86_64")]
  pub const fn current() -> Self {
    Arch::X86_64
  }

  #[cfg(target_arch = "aarch64")]
  pub const fn current() -> Self {
    Arch::Aarch64
  }

  pub const fn as_str(&self) -> &'static str {
    match self {
      Arch::X86_64 => "x86_64",
      Arch::Aarch64 => "aarch64",
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Error parsing or resolving a platform identifier.
#[derive(Debug, Error)]
pub enum PlatformError {
  #[error("unsupported platform: {0}")]
  Unsupported(String),
}

/// Combined platform identifier (e.g. `linux-x86_64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
  pub os: Os,
  pub arch: Arch,
}

impl Platform {
  pub const fn new(os: Os, arch: Arch) -> Self {
    Self { os, arch }
  }

  /// Detect the current platform at compile time.
  pub const fn current() -> Self {
    Self {
      os: Os::current(),
      arch: Arch::current(),
    }
  }

  /// The Rust target triple rebake passes to the pinned toolchain.
  pub const fn target_triple(&self) -> &'static str {
    match (self.os, self.arch) {
      (Os::Linux, Arch::X86_64) => "x86_64-unknown-linux-gnu",
      (Os::Linux, Arch::Aarch64) => "aarch64-unknown-linux-gnu",
      (Os::Darwin, Arch::X86_64) => "x86_64-apple-darwin",
      (Os::Darwin, Arch::Aarch64) => "aarch64-apple-darwin",
    }
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.os, self.arch)
  }
}

impl FromStr for Platform {
  type Err = PlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (os, arch) = s.split_once('-').ok_or_else(|| PlatformError::Unsupported(s.to_string()))?;

    let os = match os {
      "linux" => Os::Linux,
      "darwin" => Os::Darwin,
      _ => return Err(PlatformError::Unsupported(s.to_string())),
    };
    let arch = match arch {
      "x86_64" => Arch::X86_64,
      "aarch64" => Arch::Aarch64,
      _ => return Err(PlatformError::Unsupported(s.to_string())),
    };

    Ok(Platform::new(os, arch))
  }
}

/// Host information for status output.
#[derive(Debug, Clone)]
pub struct HostInfo {
  pub platform: Platform,
  pub hostname: String,
  pub username: String,
}

impl HostInfo {
  /// Gather current host information.
  pub fn current() -> Self {
    Self {
      platform: Platform::current(),
      hostname: whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string()),
      username: whoami::username(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn platform_string_format() {
    let platform = Platform::new(Os::Linux, Arch::X86_64);
    assert_eq!(platform.to_string(), "linux-x86_64");

    let platform = Platform::new(Os::Darwin, Arch::Aarch64);
    assert_eq!(platform.to_string(), "darwin-aarch64");
  }

  #[test]
  fn parse_roundtrip() {
    let platform: Platform = "linux-x86_64".parse().unwrap();
    assert_eq!(platform, Platform::new(Os::Linux, Arch::X86_64));
    assert_eq!(platform.to_string().parse::<Platform>().unwrap(), platform);
  }

  #[test]
  fn parse_rejects_unknown() {
    assert!("windows-x86_64".parse::<Platform>().is_err());
    assert!("linux-riscv64".parse::<Platform>().is_err());
    assert!("not-a-platform-at-all".parse::<Platform>().is_err());
    assert!("linux".parse::<Platform>().is_err());
  }

  #[test]
  fn library_path_var_per_os() {
    assert_eq!(Os::Linux.library_path_var(), "LD_LIBRARY_PATH");
    assert_eq!(Os::Darwin.library_path_var(), "DYLD_LIBRARY_PATH");
  }

  #[test]
  fn target_triples() {
    assert_eq!(
      Platform::new(Os::Linux, Arch::X86_64).target_triple(),
      "x86_64-unknown-linux-gnu"
    );
    assert_eq!(
      Platform::new(Os::Darwin, Arch::Aarch64).target_triple(),
      "aarch64-apple-darwin"
    );
  }

  #[test]
  fn host_info_detects_something() {
    let info = HostInfo::current();
    assert!(!info.hostname.is_empty());
    assert!(!info.username.is_empty());
    assert!(info.platform.to_string().contains('-'));
  }
}
