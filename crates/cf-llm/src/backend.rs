//! The [`GenerationBackend`] trait.

use async_trait::async_trait;

use crate::types::{CompletionRequest, CompletionResponse};

/// A text-generation backend.
///
/// Implementations are stateless per call and must be safe to share across
/// concurrent requests (`Send + Sync`).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short identifier used in logs.
    fn id(&self) -> &str;

    /// Send one completion request.
    ///
    /// Transport, authentication and protocol failures are
    /// [`cf_core::Error::Backend`]. An empty answer is not an error here; the
    /// caller decides whether the text is usable.
    async fn complete(&self, request: &CompletionRequest) -> cf_core::Result<CompletionResponse>;
}
