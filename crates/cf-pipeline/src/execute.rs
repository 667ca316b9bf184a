//! The real run of a validated plan.

use std::path::PathBuf;

use cf_av::{tail_lines, ToolCommand, ToolConfig};
use cf_core::{Error, Result};
use tokio_util::sync::CancellationToken;

use crate::validate::{ExecutionPlan, DIAGNOSTIC_CHARS, DIAGNOSTIC_LINES};

/// Runs validated plans inside their sandbox.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    tool: ToolConfig,
}

impl SandboxExecutor {
    pub fn new(tool: ToolConfig) -> Self {
        Self { tool }
    }

    /// Run the plan for real, writing to `plan.output_path`.
    ///
    /// Returns the absolute path of the produced artifact, still inside the
    /// sandbox.
    ///
    /// # Errors
    ///
    /// [`Error::Execution`] on non-zero exit or timeout,
    /// [`Error::OutputMissing`] when the tool succeeds without writing the
    /// output, and environment errors for spawn failure or cancellation.
    pub async fn execute(&self, plan: &ExecutionPlan, cancellation: &CancellationToken) -> Result<PathBuf> {
        let mut cmd = ToolCommand::new(self.tool.path.clone());
        cmd.args(plan.args().iter().cloned())
            .arg("-y")
            .arg(plan.output_path.to_string_lossy())
            .current_dir(&plan.sandbox_dir)
            .timeout(self.tool.timeout)
            .cancellation(cancellation.clone());
        tracing::debug!("Executing: {}", plan.display_command());

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(Error::Timeout { after, .. }) => {
                return Err(Error::Execution {
                    diagnostic: format!("run timed out after {}s", after.as_secs()),
                })
            }
            Err(e) => return Err(e),
        };

        if !output.success() {
            return Err(Error::Execution {
                diagnostic: tail_lines(&output.stderr, DIAGNOSTIC_LINES, DIAGNOSTIC_CHARS),
            });
        }
        if !plan.output_path.is_file() {
            return Err(Error::OutputMissing {
                path: plan.output_path.clone(),
            });
        }

        plan.output_path.canonicalize().map_err(Error::from)
    }
}
