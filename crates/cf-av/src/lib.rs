//! # cf-av
//!
//! External tool plumbing for the clipforge pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg,
//!   ffprobe, and the configured authorized executable.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout,
//!   working-directory, and cancellation support for running external processes.
//! - **Sandboxes** ([`Sandbox`]) -- attempt-scoped temporary directories with
//!   input staging and output relocation.
//! - **Probing** ([`probe::FfprobeProber`]) -- describe input files as
//!   [`cf_core::AssetDescriptor`]s by shelling out to ffprobe.

pub mod command;
pub mod probe;
pub mod sandbox;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{tail_lines, ToolCommand, ToolOutput};
pub use probe::{build_catalog, FfprobeProber, Prober};
pub use sandbox::Sandbox;
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
