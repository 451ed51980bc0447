//! rebake-lib: Core types and logic for rebake
//!
//! This crate provides the building blocks of the reproducible build and
//! packaging pipeline:
//! - `Descriptor`: the declarative project description (rebake.toml)
//! - `DependencySet`: one shared resolution of the external dependencies
//! - `Toolchain`: the pinned compiler distribution, provisioned on demand
//! - `Artifact`: the immutable build output in the content-addressed store
//! - `ShellEnv` / image packaging: two projections of the same dependency set

pub mod build;
pub mod deps;
pub mod descriptor;
pub mod image;
pub mod lockfile;
pub mod pipeline;
pub mod platform;
pub mod shell;
pub mod store;
pub mod toolchain;
