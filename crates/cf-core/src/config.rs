//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries the
//! tool, backend, pipeline and limit sections. Every section defaults
//! sensibly so a completely empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub backend: BackendConfig,
    pub pipeline: PipelineConfig,
    pub limits: LimitsConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.pipeline.max_attempts == 0 {
            return Err(Error::Config("pipeline.max_attempts must be at least 1".into()));
        }
        if self.pipeline.executable.trim().is_empty() {
            return Err(Error::Config("pipeline.executable is empty".into()));
        }
        if self.pipeline.output_name.trim().is_empty() {
            return Err(Error::Config("pipeline.output_name is empty".into()));
        }
        if !(0.0..=1.0).contains(&self.pipeline.top_p) {
            return Err(Error::Config(format!(
                "pipeline.top_p {} is outside [0, 1]",
                self.pipeline.top_p
            )));
        }
        if !(0.0..=MAX_TEMPERATURE).contains(&self.pipeline.temperature) {
            return Err(Error::Config(format!(
                "pipeline.temperature {} is outside [0, {MAX_TEMPERATURE}]",
                self.pipeline.temperature
            )));
        }
        if self.tools.timeout_secs == 0 || self.backend.timeout_secs == 0 {
            return Err(Error::Config("timeouts must be at least one second".into()));
        }
        Ok(())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.backend.api_key.is_none() && std::env::var(&self.backend.api_key_env).is_err() {
            warnings.push(format!(
                "no backend api_key configured and ${} is not set",
                self.backend.api_key_env
            ));
        }

        if !self.backend.models.is_empty() && !self.backend.models.contains(&self.backend.default_model)
        {
            warnings.push(format!(
                "backend.default_model '{}' is not listed in backend.models",
                self.backend.default_model
            ));
        }

        if std::path::Path::new(&self.pipeline.output_name).extension().is_none() {
            warnings.push(format!(
                "pipeline.output_name '{}' has no extension; outputs will be written without one",
                self.pipeline.output_name
            ));
        }

        if self.pipeline.keep_sandbox {
            warnings.push("pipeline.keep_sandbox is enabled; sandboxes are never deleted".into());
        }

        if self.pipeline.max_attempts > 5 {
            warnings.push(format!(
                "pipeline.max_attempts is {}; each attempt costs a backend call",
                self.pipeline.max_attempts
            ));
        }

        warnings
    }
}

/// Upper bound of the temperature range accepted by the pipeline.
pub const MAX_TEMPERATURE: f32 = 5.0;

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// Wall-clock budget for every dry run and real run.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            timeout_secs: 300,
        }
    }
}

/// Generation backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Inline API key; takes precedence over `api_key_env`.
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub default_model: String,
    /// Models a caller may select. Empty means any.
    pub models: Vec<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub site_url: Option<String>,
    pub app_name: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".into(),
            api_key: None,
            api_key_env: "OPENROUTER_API_KEY".into(),
            default_model: "deepseek/deepseek-chat".into(),
            models: vec![
                "deepseek/deepseek-chat".into(),
                "anthropic/claude-3-opus".into(),
                "meta-llama/llama-2-70b-chat".into(),
                "google/gemini-pro".into(),
            ],
            max_tokens: 2048,
            timeout_secs: 120,
            site_url: Some("http://localhost:7860".into()),
            app_name: Some("clipforge".into()),
        }
    }
}

impl BackendConfig {
    /// Resolve the API key from the inline value or the environment.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }
        std::env::var(&self.api_key_env).map_err(|_| {
            Error::Config(format!(
                "no backend api key: set backend.api_key or ${}",
                self.api_key_env
            ))
        })
    }
}

/// Pipeline behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// The only binary a generated command may invoke.
    pub executable: String,
    /// Output name the backend is told to target; replaced per attempt.
    pub output_name: String,
    pub max_attempts: u32,
    /// Leave attempt sandboxes on disk for inspection.
    pub keep_sandbox: bool,
    /// Parent directory for sandboxes (system temp dir when unset).
    pub sandbox_root: Option<PathBuf>,
    /// Where successful artifacts are moved before the sandbox goes away.
    pub output_dir: PathBuf,
    pub top_p: f32,
    pub temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            executable: "ffmpeg".into(),
            output_name: "output.mp4".into(),
            max_attempts: 2,
            keep_sandbox: false,
            sandbox_root: None,
            output_dir: PathBuf::from("./outputs"),
            top_p: 0.7,
            temperature: 0.1,
        }
    }
}

/// Per-asset admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_asset_bytes: u64,
    pub max_duration_secs: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_asset_bytes: 10_000_000,
            max_duration_secs: 120.0,
        }
    }
}
