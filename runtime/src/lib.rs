//! skr runtime - skill artifact store, dependency resolution and installation.
//!
//! This crate packages skill directories as OCI artifacts, keeps them in a
//! local image layout, resolves their dependency graphs, installs them into
//! agent skill directories and serves the store over the OCI distribution API.

#![allow(clippy::result_large_err)]

pub mod install;
pub mod oci;
pub mod resolve;
pub mod serve;
pub mod skill;

// Re-export common types
pub use install::{Installer, MutableTags, RefreshPolicy};
pub use oci::{Descriptor, Digest, Manifest, RegistryClient, SkillReference, Store};
pub use resolve::{Puller, Resolver};
pub use serve::{LocalBackend, ProxyBackend, RegistryBackend};
pub use skill::Skill;

/// skr runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
