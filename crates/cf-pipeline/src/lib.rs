//! # cf-pipeline
//!
//! The command synthesis and safe-execution pipeline.
//!
//! This crate provides:
//!
//! - **[`PromptComposer`]** -- renders an instruction and asset descriptors
//!   into a [`GenerationRequest`].
//! - **[`CommandSynthesizer`]** -- asks the generation backend for a command
//!   and extracts exactly one command line from the answer.
//! - **[`CommandValidator`]** -- tokenizes the candidate, enforces the
//!   executable allow-list, and dry-runs it into a null sink.
//! - **[`SandboxExecutor`]** -- runs a validated [`ExecutionPlan`] for real
//!   inside its sandbox.
//! - **[`RetryController`]** -- composes once and drives bounded attempts,
//!   reporting state transitions through a [`ProgressSender`].

pub mod context;
pub mod execute;
pub mod prompt;
pub mod retry;
pub mod synthesize;
pub mod validate;

// Re-export key types at the crate root.
pub use context::{AttemptState, ProgressSender, RunContext};
pub use execute::SandboxExecutor;
pub use prompt::{render_asset_line, GenerationParams, GenerationRequest, PromptComposer, Sampling};
pub use retry::{AttemptResult, Composition, RetryController};
pub use synthesize::{strip_output_placeholder, CandidateCommand, CommandSynthesizer, Extraction};
pub use validate::{tokenize, CommandValidator, ExecutionPlan};
