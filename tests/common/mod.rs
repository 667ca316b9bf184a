//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which owns a temp directory holding a stand-in
//! `ffmpeg` script, the sandbox root, the output directory and the source
//! assets, and [`ScriptedBackend`], a generation backend that replays canned
//! replies and records every request it receives.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cf_av::{ToolConfig, ToolRegistry};
use cf_core::config::Config;
use cf_core::{AssetCatalog, AssetDescriptor, AssetMedia, Dimensions, Result};
use cf_llm::{CompletionRequest, CompletionResponse, GenerationBackend};
use cf_pipeline::RetryController;
use tempfile::TempDir;

/// Stand-in ffmpeg. Logs every invocation, checks that `-i` inputs exist in
/// the working directory, fails on any `--bad*` option after littering the
/// directory, accepts the null sink and otherwise writes its last argument.
const FAKE_FFMPEG: &str = r#"#!/bin/sh
echo "$*" >> '@LOG@'
prev=""
last=""
for a in "$@"; do
  if [ "$prev" = "-i" ] && [ ! -f "$a" ]; then echo "$a: No such file or directory" >&2; exit 1; fi
  case "$a" in --bad*) echo partial > scratch.tmp; echo "Unrecognized option '$a'." >&2; exit 1 ;; esac
  prev="$a"
  last="$a"
done
if [ "$last" = "-" ]; then exit 0; fi
echo video > "$last"
"#;

pub struct TestHarness {
    pub dir: TempDir,
    pub config: Config,
    pub tools: ToolRegistry,
    log: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let log = dir.path().join("ffmpeg.log");

        let ffmpeg = dir.path().join("ffmpeg");
        let script = FAKE_FFMPEG.replace("@LOG@", &log.to_string_lossy());
        std::fs::write(&ffmpeg, script).unwrap();
        std::fs::set_permissions(&ffmpeg, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut tools = ToolRegistry::default();
        tools.insert(ToolConfig::new("ffmpeg", ffmpeg));

        let mut config = Config::default();
        config.pipeline.output_dir = dir.path().join("outputs");
        config.pipeline.sandbox_root = Some(dir.path().join("sandboxes"));

        Self {
            dir,
            config,
            tools,
            log,
        }
    }

    /// Write a source file named `raw_name` and add it to `catalog`.
    pub fn add_asset(&self, catalog: &mut AssetCatalog, raw_name: &str, media: AssetMedia) {
        let source = self.dir.path().join("uploads").join(raw_name);
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"media").unwrap();
        catalog.push(source, AssetDescriptor::new(raw_name, 5, media).unwrap());
    }

    /// The Scenario A asset set: 30 s mono voice-over and a 1920x1080 image.
    pub fn voice_and_background(&self) -> AssetCatalog {
        let mut catalog = AssetCatalog::new();
        self.add_asset(
            &mut catalog,
            "voice.wav",
            AssetMedia::Audio {
                duration_secs: 30.0,
                channels: 1,
            },
        );
        self.add_asset(
            &mut catalog,
            "bg.png",
            AssetMedia::Image {
                dimensions: Dimensions::new(1920, 1080),
            },
        );
        catalog
    }

    pub fn controller(&self, backend: Arc<ScriptedBackend>) -> RetryController {
        RetryController::new(&self.config, backend, &self.tools).unwrap()
    }

    /// Argument lists of every tool invocation so far, in order.
    pub fn tool_calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn sandboxes(&self) -> Vec<PathBuf> {
        dir_entries(&self.dir.path().join("sandboxes"))
    }

    pub fn outputs(&self) -> Vec<PathBuf> {
        dir_entries(&self.dir.path().join("outputs"))
    }
}

pub fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|d| d.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    entries.sort();
    entries
}

/// Answers call `n` with `replies[n]`, repeating the last reply.
pub struct ScriptedBackend {
    replies: Vec<String>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = &self.replies[n.min(self.replies.len() - 1)];
        Ok(CompletionResponse {
            content: reply.clone(),
            model: request.model.clone(),
            finish_reason: Some("stop".into()),
        })
    }
}
