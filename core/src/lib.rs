//! skr core - foundational types shared across the skr workspace.
//!
//! Error types and project configuration live here so the runtime and the
//! CLI agree on them.

pub mod config;
pub mod error;

pub use config::{AgentConfig, ProjectConfig};
pub use error::{Result, SkrError};

/// skr version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
