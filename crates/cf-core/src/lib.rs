//! cf-core: shared error taxonomy, configuration and the asset model.
//!
//! This crate is the foundational dependency for all other cf-* crates. It
//! defines the classified [`Error`] every pipeline stage funnels into, the
//! TOML-backed [`config::Config`], and the typed [`AssetDescriptor`] that the
//! metadata collaborator produces and the prompt composer consumes.

pub mod asset;
pub mod config;
pub mod error;

// Re-export the most commonly used items at the crate root.
pub use asset::*;
pub use error::{Error, ErrorKind, Result};
