//! Bounded retry loop over synthesize → validate → execute.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cf_av::{Sandbox, ToolRegistry};
use cf_core::config::Config;
use cf_core::{AssetCatalog, Error, ErrorKind, Result};
use cf_llm::GenerationBackend;
use serde::Serialize;
use tracing::Instrument;

use crate::context::{AttemptState, RunContext};
use crate::execute::SandboxExecutor;
use crate::prompt::{GenerationParams, GenerationRequest, PromptComposer};
use crate::synthesize::CommandSynthesizer;
use crate::validate::CommandValidator;

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptResult {
    pub attempt: u32,
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub command_text: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
}

impl AttemptResult {
    fn succeeded(attempt: u32, output_path: PathBuf, command_text: String) -> Self {
        Self {
            attempt,
            success: true,
            output_path: Some(output_path),
            command_text: Some(command_text),
            error_kind: None,
            error_detail: None,
        }
    }

    fn failed(attempt: u32, command_text: Option<String>, error: &Error) -> Self {
        Self {
            attempt,
            success: false,
            output_path: None,
            command_text,
            error_kind: Some(error.kind()),
            error_detail: Some(
                error
                    .diagnostic()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            ),
        }
    }
}

/// A successful invocation.
#[derive(Debug, Clone, Serialize)]
pub struct Composition {
    /// Absolute path of the artifact in the output directory.
    pub output_path: PathBuf,
    /// The generated command text of the successful attempt.
    pub command_text: String,
    /// Markdown shown next to the result.
    pub explanation: String,
    /// Every attempt in order, the last one being the success.
    pub attempts: Vec<AttemptResult>,
}

/// What a single successful attempt hands back to the loop.
struct AttemptOutput {
    artifact: PathBuf,
    command_text: String,
    display_command: String,
}

/// Orchestrates attempts for one invocation at a time; shareable across
/// concurrent invocations.
#[derive(Debug, Clone)]
pub struct RetryController {
    composer: PromptComposer,
    synthesizer: CommandSynthesizer,
    validator: CommandValidator,
    executor: SandboxExecutor,
    sandbox_root: Option<PathBuf>,
    output_dir: PathBuf,
    output_name: String,
    keep_sandbox: bool,
}

impl RetryController {
    /// Wire the pipeline from config.
    ///
    /// # Errors
    ///
    /// [`Error::Tool`] when the authorized executable is not in `tools`.
    pub fn new(config: &Config, backend: Arc<dyn GenerationBackend>, tools: &ToolRegistry) -> Result<Self> {
        let pipeline = &config.pipeline;
        let tool = tools.require(&pipeline.executable)?.clone();

        Ok(Self {
            composer: PromptComposer::from_config(config),
            synthesizer: CommandSynthesizer::new(backend, pipeline.output_name.clone()),
            validator: CommandValidator::new(
                pipeline.executable.clone(),
                tool.clone(),
                pipeline.output_name.clone(),
            ),
            executor: SandboxExecutor::new(tool),
            sandbox_root: pipeline.sandbox_root.clone(),
            output_dir: pipeline.output_dir.clone(),
            output_name: pipeline.output_name.clone(),
            keep_sandbox: pipeline.keep_sandbox,
        })
    }

    pub fn composer(&self) -> &PromptComposer {
        &self.composer
    }

    /// Compose once, then run up to `max_attempts` attempts.
    ///
    /// Returns the composition of the first successful attempt, the first
    /// non-retryable error, or the last attempt's error when every attempt
    /// failed.
    ///
    /// The output placeholder name is reserved first, so an asset carrying
    /// it is offered and staged under a suffixed name.
    pub async fn run(
        &self,
        instruction: &str,
        catalog: &AssetCatalog,
        params: &GenerationParams,
        max_attempts: u32,
        ctx: &RunContext,
    ) -> Result<Composition> {
        if max_attempts == 0 {
            return Err(Error::input("max_attempts must be at least 1"));
        }

        let mut catalog = catalog.clone();
        catalog.reserve(&self.output_name);
        let catalog = &catalog;

        ctx.progress.send(0, AttemptState::Composing);
        let request = match self.composer.compose(instruction, &catalog.descriptors(), params) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Composition failed: {e}");
                ctx.progress.send(0, AttemptState::Failed);
                return Err(e);
            }
        };
        tracing::info!(
            assets = request.assets.len(),
            model = %request.sampling.model,
            max_attempts,
            "Composed generation request"
        );

        let mut attempts = Vec::new();
        let mut number = 0;
        loop {
            number += 1;
            let span = tracing::info_span!("attempt", number);
            let mut command_text = None;
            let result = self
                .attempt(number, &request, catalog, ctx, &mut command_text)
                .instrument(span)
                .await;

            match result {
                Ok(out) => {
                    tracing::info!("Attempt {number} succeeded: {}", out.artifact.display());
                    ctx.progress.send(number, AttemptState::Succeeded);
                    attempts.push(AttemptResult::succeeded(
                        number,
                        out.artifact.clone(),
                        out.command_text.clone(),
                    ));
                    let explanation = explain(&out.display_command, &out.artifact, number);
                    return Ok(Composition {
                        output_path: out.artifact,
                        command_text: out.command_text,
                        explanation,
                        attempts,
                    });
                }
                Err(e) => {
                    attempts.push(AttemptResult::failed(number, command_text, &e));
                    if !e.is_retryable() {
                        tracing::error!("Attempt {number} failed ({}), not retrying: {e}", e.kind());
                        ctx.progress.send(number, AttemptState::Failed);
                        return Err(e);
                    }
                    if number >= max_attempts {
                        tracing::error!("All {max_attempts} attempts failed; last error ({}): {e}", e.kind());
                        ctx.progress.send(number, AttemptState::Failed);
                        return Err(e);
                    }
                    tracing::warn!("Attempt {number} failed ({}): {e}", e.kind());
                    ctx.progress.send(number, AttemptState::RetryPending);
                }
            }
        }
    }

    /// One full synthesize → validate → execute cycle in a fresh sandbox.
    async fn attempt(
        &self,
        number: u32,
        request: &GenerationRequest,
        catalog: &AssetCatalog,
        ctx: &RunContext,
        command_text: &mut Option<String>,
    ) -> Result<AttemptOutput> {
        let token = &ctx.cancellation;
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        ctx.progress.send(number, AttemptState::Synthesizing);
        let candidate = tokio::select! {
            candidate = self.synthesizer.synthesize(request) => candidate?,
            _ = token.cancelled() => return Err(Error::Cancelled),
        };
        *command_text = Some(candidate.command_text.clone());

        let mut sandbox = Sandbox::create(self.sandbox_root.as_deref())?;
        let result = self.run_in_sandbox(number, &candidate, catalog, ctx, &mut sandbox).await;
        if self.keep_sandbox {
            let kept = sandbox.keep();
            tracing::info!("Kept sandbox {}", kept.display());
        }
        result
    }

    async fn run_in_sandbox(
        &self,
        number: u32,
        candidate: &crate::synthesize::CandidateCommand,
        catalog: &AssetCatalog,
        ctx: &RunContext,
        sandbox: &mut Sandbox,
    ) -> Result<AttemptOutput> {
        let token = &ctx.cancellation;
        sandbox.stage(catalog)?;

        ctx.progress.send(number, AttemptState::Validating);
        let plan = self.validator.validate(candidate, sandbox, token).await?;

        ctx.progress.send(number, AttemptState::Executing);
        let produced = self.executor.execute(&plan, token).await?;
        let artifact = sandbox.finalize(&produced, &self.output_dir)?;

        Ok(AttemptOutput {
            artifact,
            command_text: plan.command_text.clone(),
            display_command: plan.display_command(),
        })
    }
}

/// Markdown explanation shown with the result.
fn explain(display_command: &str, artifact: &Path, attempts: u32) -> String {
    let file = artifact
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tries = if attempts == 1 {
        "1 attempt".to_string()
    } else {
        format!("{attempts} attempts")
    };
    format!(
        "### Generated command\n\n```bash\n{display_command}\n```\n\nProduced `{file}` after {tries}."
    )
}
