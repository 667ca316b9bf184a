//! Clipforge - natural-language media composition
//!
//! This library crate exposes the binary's config loading for integration
//! testing. The pipeline itself lives in the `cf-*` crates.

pub mod config;
