//! skr CLI - build, share and install agent skills as OCI artifacts.

pub mod commands;
pub mod output;
