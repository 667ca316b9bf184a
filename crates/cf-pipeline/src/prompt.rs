//! Prompt composition: instruction + asset descriptors → [`GenerationRequest`].

use std::fmt::Write as _;

use cf_core::config::{Config, MAX_TEMPERATURE};
use cf_core::{AssetDescriptor, Error, Result};
use cf_llm::{ChatMessage, CompletionRequest};
use serde::{Deserialize, Serialize};

/// Caller-chosen generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub top_p: f32,
    pub temperature: f32,
    /// Backend selector; `None` means the configured default model.
    pub model: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            top_p: 0.7,
            temperature: 0.1,
            model: None,
        }
    }
}

impl GenerationParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_p: config.pipeline.top_p,
            temperature: config.pipeline.temperature,
            model: None,
        }
    }
}

/// Resolved sampling settings carried by a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    pub top_p: f32,
    pub temperature: f32,
    pub model: String,
}

/// The composed request. Built once per invocation and reused unchanged by
/// every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub instruction: String,
    pub assets: Vec<AssetDescriptor>,
    pub sampling: Sampling,
    pub max_tokens: u32,
    pub system_directive: String,
    pub user_content: String,
}

impl GenerationRequest {
    /// The wire-level request sent to the backend.
    pub fn to_completion(&self) -> CompletionRequest {
        CompletionRequest {
            model: self.sampling.model.clone(),
            messages: vec![
                ChatMessage::system(self.system_directive.clone()),
                ChatMessage::user(self.user_content.clone()),
            ],
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            max_tokens: self.max_tokens,
        }
    }
}

/// Renders an instruction and asset set into a [`GenerationRequest`].
#[derive(Debug, Clone)]
pub struct PromptComposer {
    executable: String,
    output_name: String,
    default_model: String,
    /// Allowed backend selectors; empty means any.
    models: Vec<String>,
    max_tokens: u32,
}

impl PromptComposer {
    pub fn new(executable: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            output_name: output_name.into(),
            default_model: String::new(),
            models: Vec::new(),
            max_tokens: 2048,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            executable: config.pipeline.executable.clone(),
            output_name: config.pipeline.output_name.clone(),
            default_model: config.backend.default_model.clone(),
            models: config.backend.models.clone(),
            max_tokens: config.backend.max_tokens,
        }
    }

    pub fn with_models(mut self, default_model: impl Into<String>, models: Vec<String>) -> Self {
        self.default_model = default_model.into();
        self.models = models;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Compose the request.
    ///
    /// # Errors
    ///
    /// [`Error::Input`] for an empty instruction, an empty asset list,
    /// sampling values out of range, or a model outside the allow-list.
    pub fn compose(
        &self,
        instruction: &str,
        assets: &[AssetDescriptor],
        params: &GenerationParams,
    ) -> Result<GenerationRequest> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(Error::input("the instruction is empty"));
        }
        if assets.is_empty() {
            return Err(Error::input("at least one media asset is required"));
        }
        let sampling = self.sampling(params)?;

        Ok(GenerationRequest {
            instruction: instruction.to_string(),
            assets: assets.to_vec(),
            sampling,
            max_tokens: self.max_tokens,
            system_directive: self.system_directive(),
            user_content: self.user_content(instruction, assets),
        })
    }

    fn sampling(&self, params: &GenerationParams) -> Result<Sampling> {
        if !(0.0..=1.0).contains(&params.top_p) {
            return Err(Error::input(format!(
                "top_p must be between 0 and 1, got {}",
                params.top_p
            )));
        }
        if !(0.0..=MAX_TEMPERATURE).contains(&params.temperature) {
            return Err(Error::input(format!(
                "temperature must be between 0 and {MAX_TEMPERATURE}, got {}",
                params.temperature
            )));
        }

        let model = params
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.default_model.clone());
        if !self.models.is_empty() && !self.models.contains(&model) {
            return Err(Error::input(format!(
                "model '{model}' is not one of: {}",
                self.models.join(", ")
            )));
        }

        Ok(Sampling {
            top_p: params.top_p,
            temperature: params.temperature,
            model,
        })
    }

    /// The fixed system-level directive.
    pub fn system_directive(&self) -> String {
        let exe = &self.executable;
        let out = &self.output_name;
        format!(
            "You are a very experienced media engineer working in a UNIX terminal. \
You are an {exe} expert.\n\
You are given:\n\
(1) a set of media assets (images, videos, audio) with their details\n\
(2) the objective of the media transformation\n\
Your objective is to generate the SIMPLEST POSSIBLE single {exe} command that achieves the objective.\n\
Key requirements:\n\
- Use the absolute minimum number of {exe} options needed\n\
- Avoid complex filter chains or filter_complex unless the objective requires them\n\
- Prefer simple concatenation, scaling and basic filters\n\
- Output exactly ONE command that will be pasted directly into the terminal\n\
- Never chain multiple commands together\n\
- Write the command on a single line\n\
- Refer to input files by the exact names listed\n\
- Always name the output file \"{out}\"\n\
Reply with the command inside a ```bash code block."
        )
    }

    fn user_content(&self, instruction: &str, assets: &[AssetDescriptor]) -> String {
        let mut content = String::from("Available assets:\n");
        for asset in assets {
            content.push_str("- ");
            content.push_str(&render_asset_line(asset));
            content.push('\n');
        }
        let _ = write!(
            content,
            "\nObjective: {instruction}\n\
Make sure the final output file is named \"{}\".\n\n\
YOUR {} COMMAND:",
            self.output_name,
            self.executable.to_uppercase()
        );
        content
    }
}

/// One prompt line per asset: kind and name, then the facts that kind has.
pub fn render_asset_line(asset: &AssetDescriptor) -> String {
    let mut line = format!("{} {}", asset.kind(), asset.name);
    if let Some(dimensions) = asset.media.dimensions() {
        let _ = write!(line, ", dimensions {dimensions}");
    }
    if let Some(secs) = asset.media.duration_secs() {
        let _ = write!(line, ", duration {secs:.2}s");
    }
    if let Some(channels) = asset.media.channels() {
        let plural = if channels == 1 { "" } else { "s" };
        let _ = write!(line, ", {channels} audio channel{plural}");
    }
    line
}
