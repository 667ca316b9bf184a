//! # cf-llm
//!
//! The generation backend seam.
//!
//! [`GenerationBackend`] is the only thing the pipeline knows about text
//! generation: it takes a [`CompletionRequest`] and returns free-form text.
//! [`OpenAiCompatibleClient`] implements it against any chat-completions
//! endpoint (OpenRouter by default). The client is constructed once by the
//! caller and shared by reference across requests.

pub mod backend;
pub mod openai;
pub mod types;

pub use backend::GenerationBackend;
pub use openai::OpenAiCompatibleClient;
pub use types::{ChatMessage, ChatRole, CompletionRequest, CompletionResponse};
