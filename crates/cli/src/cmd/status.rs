//! Status command implementation.
//!
//! Displays host platform information, the store location, and per-object
//! store usage.

use std::path::Path;

use anyhow::Result;

use rebake_lib::platform::HostInfo;
use rebake_lib::store;

use crate::output::{self, format_bytes, print_json, print_stat, print_success};

pub fn cmd_status(verbose: bool, format: output::OutputFormat) -> Result<()> {
  let host = HostInfo::current();
  let store_root = store::store_root();
  let objects = list_objects(&store_root);
  let usage: u64 = objects.iter().map(|(_, size)| size).sum();

  if format.is_json() {
    let object_list: Vec<_> = objects
      .iter()
      .map(|(name, size)| serde_json::json!({ "name": name, "size_bytes": size }))
      .collect();
    print_json(&serde_json::json!({
      "platform": host.platform.to_string(),
      "hostname": host.hostname,
      "username": host.username,
      "store_root": store_root,
      "objects": { "count": objects.len(), "items": object_list },
      "store_usage_bytes": usage,
    }))?;
  } else {
    print_success(&format!("rebake v{}", env!("CARGO_PKG_VERSION")));
    println!();
    print_stat("Platform", &host.platform.to_string());
    print_stat("Hostname", &host.hostname);
    print_stat("User", &host.username);
    print_stat("Store", &store_root.display().to_string());
    println!();
    print_stat("Objects", &objects.len().to_string());
    print_stat("Store usage", &format_bytes(usage));

    if verbose && !objects.is_empty() {
      println!();
      println!("Objects:");
      for (name, size) in &objects {
        println!("  {} {} ({})", output::symbols::INFO, name, format_bytes(*size));
      }
    }
  }

  Ok(())
}

fn list_objects(store_root: &Path) -> Vec<(String, u64)> {
  let obj_dir = store_root.join("obj");
  let mut objects = Vec::new();

  if let Ok(entries) = std::fs::read_dir(&obj_dir) {
    for entry in entries.flatten() {
      let path = entry.path();
      if path.is_dir() {
        objects.push((entry.file_name().to_string_lossy().to_string(), dir_size(&path)));
      }
    }
  }

  objects.sort();
  objects
}

fn dir_size(path: &Path) -> u64 {
  let mut size = 0;
  if let Ok(entries) = std::fs::read_dir(path) {
    for entry in entries.flatten() {
      let entry_path = entry.path();
      if entry_path.is_file() {
        size += entry.metadata().map(|m| m.len()).unwrap_or(0);
      } else if entry_path.is_dir() {
        size += dir_size(&entry_path);
      }
    }
  }
  size
}
