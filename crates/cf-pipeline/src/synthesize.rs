//! Command synthesis: backend call plus extraction of one command line.

use std::sync::{Arc, LazyLock};

use cf_core::{Error, Result};
use cf_llm::GenerationBackend;
use regex::Regex;

use crate::prompt::GenerationRequest;

static FENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:bash|sh|shell)[ \t]*\r?\n(.*?)```").expect("Invalid fence regex")
});

/// How the command text was found in a backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Interior of the first ```bash / ```sh / ```shell block, verbatim.
    Fenced(String),
    /// The whole response with its newlines collapsed.
    PlainText(String),
}

impl Extraction {
    pub fn parse(response: &str) -> Self {
        match FENCE_REGEX.captures(response).and_then(|c| c.get(1)) {
            Some(body) => Self::Fenced(body.as_str().trim().to_string()),
            None => Self::PlainText(collapse_lines(response)),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Fenced(text) | Self::PlainText(text) => text,
        }
    }

    pub fn is_fenced(&self) -> bool {
        matches!(self, Self::Fenced(_))
    }
}

fn collapse_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove standalone shell words equal to `output_name` (bare or quoted).
///
/// Occurrences inside longer words are left alone.
pub fn strip_output_placeholder(command: &str, output_name: &str) -> String {
    if output_name.is_empty() {
        return command.trim().to_string();
    }
    let name = regex::escape(output_name);
    let pattern = format!(r#"(^|\s)(?:"{name}"|'{name}'|{name})(\s|$)"#);
    let Ok(re) = Regex::new(&pattern) else {
        return command.trim().to_string();
    };

    // Adjacent placeholders share a separator, so repeat until stable.
    let mut current = command.to_string();
    loop {
        let next = re.replace_all(&current, "${1}${2}").into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current.trim().to_string()
}

/// A candidate command: the raw response and the extracted, normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateCommand {
    pub raw_response: String,
    pub extraction: Extraction,
    /// Extracted text with the output placeholder removed.
    pub command_text: String,
}

impl CandidateCommand {
    /// Extract and normalize a command from free-form response text.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyResponse`] when nothing remains after extraction.
    pub fn extract(raw_response: &str, output_name: &str) -> Result<Self> {
        if raw_response.trim().is_empty() {
            return Err(Error::EmptyResponse);
        }
        let extraction = Extraction::parse(raw_response);
        let command_text = strip_output_placeholder(extraction.text(), output_name);
        if command_text.is_empty() {
            return Err(Error::EmptyResponse);
        }
        Ok(Self {
            raw_response: raw_response.to_string(),
            extraction,
            command_text,
        })
    }
}

/// Sends composed requests to the backend and extracts one command line.
#[derive(Clone)]
pub struct CommandSynthesizer {
    backend: Arc<dyn GenerationBackend>,
    output_name: String,
}

impl std::fmt::Debug for CommandSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSynthesizer")
            .field("backend", &self.backend.id())
            .field("output_name", &self.output_name)
            .finish()
    }
}

impl CommandSynthesizer {
    pub fn new(backend: Arc<dyn GenerationBackend>, output_name: impl Into<String>) -> Self {
        Self {
            backend,
            output_name: output_name.into(),
        }
    }

    /// # Errors
    ///
    /// [`Error::Backend`] on transport or auth failure, [`Error::EmptyResponse`]
    /// when the backend returns no usable text.
    pub async fn synthesize(&self, request: &GenerationRequest) -> Result<CandidateCommand> {
        let response = self.backend.complete(&request.to_completion()).await?;
        let candidate = CandidateCommand::extract(&response.content, &self.output_name)?;
        tracing::debug!(
            backend = self.backend.id(),
            fenced = candidate.extraction.is_fenced(),
            "Candidate command: {}",
            candidate.command_text
        );
        Ok(candidate)
    }
}
