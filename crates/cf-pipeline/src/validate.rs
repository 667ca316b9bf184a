//! Command validation: tokenization, the executable allow-list and the dry run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cf_av::{tail_lines, Sandbox, ToolCommand, ToolConfig};
use cf_core::{Error, Result};
use tokio_util::sync::CancellationToken;

use crate::synthesize::CandidateCommand;

/// Lines of tool stderr kept in a diagnostic.
pub(crate) const DIAGNOSTIC_LINES: usize = 20;
/// Characters of tool stderr kept in a diagnostic.
pub(crate) const DIAGNOSTIC_CHARS: usize = 4000;

/// Appended to the arguments for the dry run: encode into the null muxer.
const NULL_SINK: [&str; 3] = ["-f", "null", "-"];

/// A validated command bound to one sandbox and one output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Full token list; `tokens[0]` is the authorized executable name.
    pub tokens: Vec<String>,
    /// The normalized candidate text the tokens came from.
    pub command_text: String,
    pub sandbox_dir: PathBuf,
    /// Sanitized asset name → staged path inside `sandbox_dir`.
    pub input_files: BTreeMap<String, PathBuf>,
    /// Unique per attempt; inside `sandbox_dir`.
    pub output_path: PathBuf,
}

impl ExecutionPlan {
    /// Arguments after the executable name.
    pub fn args(&self) -> &[String] {
        &self.tokens[1..]
    }

    /// The command as it runs for real, relative to the sandbox.
    pub fn display_command(&self) -> String {
        let output_name = self
            .output_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut words = self.tokens.clone();
        words.push("-y".into());
        words.push(output_name);
        shell_words::join(words)
    }
}

/// Split `command_text` into shell words and enforce the executable allow-list.
///
/// # Errors
///
/// [`Error::MalformedCommand`] for unbalanced quoting,
/// [`Error::WrongExecutable`] when the first word is not exactly `executable`.
pub fn tokenize(command_text: &str, executable: &str) -> Result<Vec<String>> {
    let tokens = shell_words::split(command_text).map_err(|e| Error::MalformedCommand {
        command: command_text.to_string(),
        message: e.to_string(),
    })?;

    match tokens.first() {
        Some(first) if first == executable => Ok(tokens),
        first => Err(Error::WrongExecutable {
            expected: executable.to_string(),
            found: first.cloned().unwrap_or_default(),
        }),
    }
}

/// Validates candidate commands against the authorized tool.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    executable: String,
    tool: ToolConfig,
    output_name: String,
}

impl CommandValidator {
    /// `executable` is the name a command must start with; `tool` is what
    /// actually gets spawned.
    pub fn new(executable: impl Into<String>, tool: ToolConfig, output_name: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            tool,
            output_name: output_name.into(),
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// Tokenize, check the executable, dry-run in `sandbox`.
    ///
    /// The sandbox must already hold the staged inputs. Whatever the dry run
    /// writes is purged before returning, pass or fail, and any staged input
    /// it overwrote is restored.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedCommand`], [`Error::WrongExecutable`],
    /// [`Error::DryRunFailed`] (non-zero exit or timeout), and environment
    /// errors if the tool cannot be spawned or the run is cancelled.
    pub async fn validate(
        &self,
        candidate: &CandidateCommand,
        sandbox: &Sandbox,
        cancellation: &CancellationToken,
    ) -> Result<ExecutionPlan> {
        let tokens = tokenize(&candidate.command_text, &self.executable)?;

        let dry_run = self.dry_run(&tokens[1..], sandbox.path(), cancellation).await;
        let purged = sandbox.purge_untracked()?;
        if purged > 0 {
            tracing::debug!("Dry run left {purged} entries behind; purged");
        }
        let restored = sandbox.restore_staged()?;
        if restored > 0 {
            tracing::debug!("Dry run modified {restored} staged inputs; restored");
        }
        dry_run?;

        Ok(ExecutionPlan {
            tokens,
            command_text: candidate.command_text.clone(),
            sandbox_dir: sandbox.path().to_path_buf(),
            input_files: sandbox.staged().clone(),
            output_path: sandbox.unique_output(&self.output_name),
        })
    }

    async fn dry_run(&self, args: &[String], dir: &Path, cancellation: &CancellationToken) -> Result<()> {
        let mut cmd = ToolCommand::new(self.tool.path.clone());
        cmd.args(args.iter().cloned())
            .args(NULL_SINK)
            .current_dir(dir)
            .timeout(self.tool.timeout)
            .cancellation(cancellation.clone());
        tracing::debug!("Dry run: {} {}", self.executable, shell_words::join(cmd.get_args()));

        match cmd.output().await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(Error::DryRunFailed {
                diagnostic: tail_lines(&output.stderr, DIAGNOSTIC_LINES, DIAGNOSTIC_CHARS),
            }),
            Err(Error::Timeout { after, .. }) => Err(Error::DryRunFailed {
                diagnostic: format!("dry run timed out after {}s", after.as_secs()),
            }),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn tokenize_respects_quotes() {
        let tokens = tokenize(
            r#"ffmpeg -i "my file.png" -vf 'scale=640:-1' -an"#,
            "ffmpeg",
        )
        .unwrap();
        assert_eq!(
            tokens,
            vec!["ffmpeg", "-i", "my file.png", "-vf", "scale=640:-1", "-an"]
        );
    }

    #[test]
    fn tokenize_does_not_expand_globs() {
        let tokens = tokenize("ffmpeg -i *.png", "ffmpeg").unwrap();
        assert_eq!(tokens[2], "*.png");
    }

    #[test]
    fn unbalanced_quote_is_malformed() {
        assert_matches!(
            tokenize(r#"ffmpeg -i "bg.png"#, "ffmpeg"),
            Err(Error::MalformedCommand { .. })
        );
    }

    #[test]
    fn wrong_executable_rejected() {
        for text in [
            "rm -rf /",
            "/usr/bin/ffmpeg -i a.png",
            "FFMPEG -i a.png",
            "ffmpeg2 -i a.png",
            "sudo ffmpeg -i a.png",
        ] {
            assert_matches!(
                tokenize(text, "ffmpeg"),
                Err(Error::WrongExecutable { ref found, .. }) if !found.is_empty(),
                "{text}"
            );
        }
    }

    #[test]
    fn empty_tokens_are_wrong_executable() {
        assert_matches!(
            tokenize("   ", "ffmpeg"),
            Err(Error::WrongExecutable { ref found, .. }) if found.is_empty()
        );
    }

    #[test]
    fn display_command_appends_real_output() {
        let plan = ExecutionPlan {
            tokens: vec!["ffmpeg".into(), "-i".into(), "my file.png".into()],
            command_text: "ffmpeg -i 'my file.png'".into(),
            sandbox_dir: PathBuf::from("/tmp/sb"),
            input_files: BTreeMap::new(),
            output_path: PathBuf::from("/tmp/sb/output_1.mp4"),
        };
        assert_eq!(plan.args(), ["-i", "my file.png"]);
        assert_eq!(plan.display_command(), "ffmpeg -i 'my file.png' -y output_1.mp4");
    }

    #[cfg(unix)]
    mod dry_run {
        use super::*;
        use crate::synthesize::CandidateCommand;
        use cf_core::{AssetCatalog, AssetDescriptor, AssetMedia, Dimensions};
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        /// Stand-in tool: always litters the working directory, fails on
        /// `--bad`, stalls on `--slow`, overwrites `bg.png` on `--clobber`.
        fn fake_tool(dir: &Path) -> ToolConfig {
            let path = dir.join("fake-ffmpeg");
            std::fs::write(
                &path,
                "#!/bin/sh\n\
                 for a in \"$@\"; do\n\
                 \x20 if [ \"$a\" = \"--bad\" ]; then echo 'Unrecognized option --bad' >&2; exit 1; fi\n\
                 \x20 if [ \"$a\" = \"--slow\" ]; then sleep 5; fi\n\
                 \x20 if [ \"$a\" = \"--clobber\" ]; then echo broken > bg.png; fi\n\
                 done\n\
                 echo partial > leftover.tmp\n\
                 exit 0\n",
            )
            .unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            ToolConfig::new("ffmpeg", path).with_timeout(Duration::from_secs(2))
        }

        fn candidate(text: &str) -> CandidateCommand {
            CandidateCommand::extract(text, "output.mp4").unwrap()
        }

        fn entries(dir: &Path) -> usize {
            std::fs::read_dir(dir).unwrap().count()
        }

        #[tokio::test]
        async fn passing_dry_run_yields_plan_and_leaves_no_files() {
            let tools = tempfile::tempdir().unwrap();
            let validator = CommandValidator::new("ffmpeg", fake_tool(tools.path()), "output.mp4");
            let mut sandbox = Sandbox::create(None).unwrap();
            sandbox.stage(&AssetCatalog::new()).unwrap();

            let plan = validator
                .validate(&candidate("ffmpeg -i bg.png output.mp4"), &sandbox, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(plan.tokens, vec!["ffmpeg", "-i", "bg.png"]);
            assert_eq!(plan.sandbox_dir, sandbox.path());
            assert!(plan.output_path.starts_with(sandbox.path()));
            assert!(!plan.output_path.exists());
            assert_eq!(entries(sandbox.path()), 0);
        }

        #[tokio::test]
        async fn inputs_overwritten_by_dry_run_are_restored() {
            let tools = tempfile::tempdir().unwrap();
            let validator = CommandValidator::new("ffmpeg", fake_tool(tools.path()), "output.mp4");

            let uploads = tempfile::tempdir().unwrap();
            let source = uploads.path().join("bg.png");
            std::fs::write(&source, b"original pixels").unwrap();
            let mut catalog = AssetCatalog::new();
            catalog.push(
                source,
                AssetDescriptor::new(
                    "bg.png",
                    15,
                    AssetMedia::Image {
                        dimensions: Dimensions::new(16, 16),
                    },
                )
                .unwrap(),
            );
            let mut sandbox = Sandbox::create(None).unwrap();
            sandbox.stage(&catalog).unwrap();

            validator
                .validate(&candidate("ffmpeg -y -i bg.png --clobber"), &sandbox, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(
                std::fs::read(sandbox.path().join("bg.png")).unwrap(),
                b"original pixels"
            );
            assert_eq!(entries(sandbox.path()), 1);
        }

        #[tokio::test]
        async fn failing_dry_run_carries_diagnostic() {
            let tools = tempfile::tempdir().unwrap();
            let validator = CommandValidator::new("ffmpeg", fake_tool(tools.path()), "output.mp4");
            let sandbox = Sandbox::create(None).unwrap();

            let err = validator
                .validate(&candidate("ffmpeg --bad"), &sandbox, &CancellationToken::new())
                .await
                .unwrap_err();
            assert_matches!(err, Error::DryRunFailed { ref diagnostic } if diagnostic.contains("Unrecognized option"));
            assert_eq!(entries(sandbox.path()), 0);
        }

        #[tokio::test]
        async fn dry_run_timeout_is_dry_run_failure() {
            let tools = tempfile::tempdir().unwrap();
            let tool = fake_tool(tools.path()).with_timeout(Duration::from_millis(200));
            let validator = CommandValidator::new("ffmpeg", tool, "output.mp4");
            let sandbox = Sandbox::create(None).unwrap();

            let err = validator
                .validate(&candidate("ffmpeg --slow"), &sandbox, &CancellationToken::new())
                .await
                .unwrap_err();
            assert_matches!(err, Error::DryRunFailed { ref diagnostic } if diagnostic.contains("timed out"));
        }

        #[tokio::test]
        async fn wrong_executable_never_spawns() {
            let tools = tempfile::tempdir().unwrap();
            let validator = CommandValidator::new("ffmpeg", fake_tool(tools.path()), "output.mp4");
            let sandbox = Sandbox::create(None).unwrap();

            let err = validator
                .validate(&candidate("sh -c 'touch pwned'"), &sandbox, &CancellationToken::new())
                .await
                .unwrap_err();
            assert_matches!(err, Error::WrongExecutable { .. });
            assert_eq!(entries(sandbox.path()), 0);
        }
    }
}
