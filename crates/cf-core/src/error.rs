//! Unified error type for clipforge.
//!
//! All crates funnel their failures into [`Error`]. Every variant belongs to
//! one [`ErrorKind`], which is what callers see and what the retry controller
//! uses to decide between another attempt and giving up.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Unified error type covering all failure modes in clipforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller supplied an unusable instruction, asset set or parameter.
    #[error("Input error: {0}")]
    Input(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Config error: {0}")]
    Config(String),

    /// The generation backend was unreachable, refused the request, or
    /// answered with something that is not a completion.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The generation backend answered but no command text could be extracted.
    #[error("Backend returned no usable text")]
    EmptyResponse,

    /// The candidate command could not be split into shell words.
    #[error("Malformed command: {message}")]
    MalformedCommand {
        /// The candidate text as extracted from the response.
        command: String,
        /// Why tokenization failed.
        message: String,
    },

    /// The candidate command does not invoke the authorized binary.
    #[error("Wrong executable: expected `{expected}`, found `{found}`")]
    WrongExecutable {
        /// The only binary the pipeline may run.
        expected: String,
        /// The first token of the candidate (empty when there was none).
        found: String,
    },

    /// The authorized tool rejected the arguments during the dry run.
    #[error("Dry run failed: {diagnostic}")]
    DryRunFailed {
        /// Captured diagnostic stream of the tool.
        diagnostic: String,
    },

    /// The real run exited non-zero (or timed out) after a passing dry run.
    #[error("Execution failed: {diagnostic}")]
    Execution {
        /// Captured diagnostic stream of the tool.
        diagnostic: String,
    },

    /// The real run exited zero but the expected artifact is not there.
    #[error("Output missing: {}", path.display())]
    OutputMissing {
        /// The path the tool was told to write.
        path: PathBuf,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be found or spawned, or failed outside the
    /// dry/real run (probing, version checks).
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An external tool exceeded its wall-clock budget and was killed.
    #[error("Tool error [{tool}]: timed out after {}s", after.as_secs())]
    Timeout {
        /// Name of the tool that was killed.
        tool: String,
        /// The budget that was exceeded.
        after: Duration,
    },

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// The surrounding request was cancelled mid-attempt.
    #[error("Cancelled")]
    Cancelled,

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classified error kind surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Input,
    Config,
    Backend,
    EmptyResponse,
    MalformedCommand,
    WrongExecutable,
    DryRunFailed,
    Execution,
    OutputMissing,
    Environment,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether another attempt may succeed where this one failed.
    ///
    /// Only generation, validation and execution failures qualify; caller
    /// input and environment problems are fatal on first sight.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Backend
                | Self::EmptyResponse
                | Self::MalformedCommand
                | Self::WrongExecutable
                | Self::DryRunFailed
                | Self::Execution
                | Self::OutputMissing
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Input => "InputError",
            Self::Config => "ConfigError",
            Self::Backend => "BackendError",
            Self::EmptyResponse => "EmptyResponseError",
            Self::MalformedCommand => "MalformedCommandError",
            Self::WrongExecutable => "WrongExecutableError",
            Self::DryRunFailed => "DryRunFailedError",
            Self::Execution => "ExecutionError",
            Self::OutputMissing => "OutputMissingError",
            Self::Environment => "EnvironmentError",
            Self::Cancelled => "CancelledError",
            Self::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

impl serde::Serialize for ErrorKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Error {
    /// The classified kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Input(_) => ErrorKind::Input,
            Error::Config(_) => ErrorKind::Config,
            Error::Backend(_) => ErrorKind::Backend,
            Error::EmptyResponse => ErrorKind::EmptyResponse,
            Error::MalformedCommand { .. } => ErrorKind::MalformedCommand,
            Error::WrongExecutable { .. } => ErrorKind::WrongExecutable,
            Error::DryRunFailed { .. } => ErrorKind::DryRunFailed,
            Error::Execution { .. } => ErrorKind::Execution,
            Error::OutputMissing { .. } => ErrorKind::OutputMissing,
            Error::Io { .. } | Error::Tool { .. } | Error::Timeout { .. } | Error::Probe(_) => {
                ErrorKind::Environment
            }
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for `self.kind().is_retryable()`.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// The diagnostic payload captured from the tool, if this error has one.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Error::DryRunFailed { diagnostic } | Error::Execution { diagnostic } => {
                Some(diagnostic)
            }
            Error::MalformedCommand { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Convenience constructor for [`Error::Input`].
    pub fn input(message: impl Into<String>) -> Self {
        Error::Input(message.into())
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Backend`].
    pub fn backend(message: impl fmt::Display) -> Self {
        Error::Backend(message.to_string())
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_display_and_kind() {
        let err = Error::input("instruction is empty");
        assert_eq!(err.to_string(), "Input error: instruction is empty");
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(!err.is_retryable());
    }

    #[test]
    fn backend_is_retryable() {
        let err = Error::backend("connection refused");
        assert_eq!(err.to_string(), "Backend error: connection refused");
        assert!(err.is_retryable());
        assert!(Error::EmptyResponse.is_retryable());
    }

    #[test]
    fn wrong_executable_display() {
        let err = Error::WrongExecutable {
            expected: "ffmpeg".into(),
            found: "rm".into(),
        };
        assert_eq!(
            err.to_string(),
            "Wrong executable: expected `ffmpeg`, found `rm`"
        );
        assert_eq!(err.kind().to_string(), "WrongExecutableError");
        assert!(err.is_retryable());
    }

    #[test]
    fn dry_run_failed_carries_diagnostic() {
        let err = Error::DryRunFailed {
            diagnostic: "Unrecognized option 'foo'".into(),
        };
        assert_eq!(err.diagnostic(), Some("Unrecognized option 'foo'"));
        assert_eq!(err.kind(), ErrorKind::DryRunFailed);
    }

    #[test]
    fn execution_and_output_missing_are_retryable() {
        let exec = Error::Execution {
            diagnostic: "Conversion failed!".into(),
        };
        assert!(exec.is_retryable());

        let missing = Error::OutputMissing {
            path: PathBuf::from("/tmp/out.mp4"),
        };
        assert_eq!(missing.to_string(), "Output missing: /tmp/out.mp4");
        assert!(missing.is_retryable());
        assert_eq!(missing.diagnostic(), None);
    }

    #[test]
    fn environment_errors_are_fatal() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.kind(), ErrorKind::Environment);
        assert!(!err.is_retryable());

        let err = Error::tool("ffmpeg", "not found in PATH");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: not found in PATH");
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeout_display() {
        let err = Error::Timeout {
            tool: "ffmpeg".into(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: timed out after 30s");
        assert_eq!(err.kind(), ErrorKind::Environment);
    }

    #[test]
    fn cancelled_is_not_retried() {
        assert_eq!(Error::Cancelled.kind().to_string(), "CancelledError");
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn kind_serializes_as_display_name() {
        let json = serde_json::to_string(&ErrorKind::DryRunFailed).unwrap();
        assert_eq!(json, "\"DryRunFailedError\"");
    }
}
