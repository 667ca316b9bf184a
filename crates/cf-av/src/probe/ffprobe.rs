//! FFprobe-based [`Prober`] implementation.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format -show_streams`
//! and maps the JSON output into an [`AssetDescriptor`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use cf_core::{AssetDescriptor, AssetMedia, Dimensions, MediaCategory};
use serde::Deserialize;

use super::Prober;
use crate::command::ToolCommand;
use crate::tools::ToolConfig;

/// Probing a single file should never take long.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    /// Path to the ffprobe binary.
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    /// Create a new prober using the given ffprobe path.
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self {
            ffprobe_path,
            timeout: PROBE_TIMEOUT,
        }
    }

    /// Create a prober from a registry entry.
    pub fn from_tool(tool: &ToolConfig) -> Self {
        Self {
            ffprobe_path: tool.path.clone(),
            timeout: tool.timeout.min(PROBE_TIMEOUT),
        }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn probe(&self, path: &Path) -> cf_core::Result<Option<AssetDescriptor>> {
        let Some(category) = MediaCategory::from_path(path) else {
            return Ok(None);
        };

        let size_bytes = tokio::fs::metadata(path).await?.len();

        let mut cmd = ToolCommand::new(self.ffprobe_path.clone());
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path.to_string_lossy())
        .timeout(self.timeout);

        let output = cmd.execute().await?;
        let ff: FfprobeOutput = serde_json::from_str(&output.stdout)
            .map_err(|e| cf_core::Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

        let raw_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        descriptor_from_probe(&raw_name, size_bytes, category, ff)
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u32>,
    duration: Option<String>,
}

impl FfprobeOutput {
    fn first_stream(&self, codec_type: &str) -> Option<&FfprobeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(codec_type))
    }

    /// Container duration, falling back to the given stream's own duration.
    fn duration_secs(&self, stream: &FfprobeStream) -> Option<f64> {
        self.format
            .duration
            .as_deref()
            .or(stream.duration.as_deref())
            .and_then(|s| s.parse::<f64>().ok())
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

fn descriptor_from_probe(
    raw_name: &str,
    size_bytes: u64,
    category: MediaCategory,
    ff: FfprobeOutput,
) -> cf_core::Result<Option<AssetDescriptor>> {
    let video = ff.first_stream("video");
    let audio = ff.first_stream("audio");

    let media = match category {
        MediaCategory::Image => match video {
            Some(v) => AssetMedia::Image {
                dimensions: dimensions(v)?,
            },
            None => return Ok(None),
        },
        MediaCategory::Audio => match audio {
            Some(a) => AssetMedia::Audio {
                duration_secs: required_duration(&ff, a)?,
                channels: a.channels.unwrap_or(2),
            },
            None => return Ok(None),
        },
        MediaCategory::Video => match (video, audio) {
            (Some(v), Some(a)) => AssetMedia::VideoWithAudio {
                dimensions: dimensions(v)?,
                duration_secs: required_duration(&ff, v)?,
                channels: a.channels.unwrap_or(2),
            },
            (Some(v), None) => AssetMedia::Video {
                dimensions: dimensions(v)?,
                duration_secs: required_duration(&ff, v)?,
            },
            (None, _) => return Ok(None),
        },
    };

    AssetDescriptor::new(raw_name, size_bytes, media).map(Some)
}

fn dimensions(stream: &FfprobeStream) -> cf_core::Result<Dimensions> {
    match (stream.width, stream.height) {
        (Some(w), Some(h)) => Ok(Dimensions::new(w, h)),
        _ => Err(cf_core::Error::Probe(
            "video stream reports no dimensions".into(),
        )),
    }
}

fn required_duration(ff: &FfprobeOutput, stream: &FfprobeStream) -> cf_core::Result<f64> {
    ff.duration_secs(stream)
        .ok_or_else(|| cf_core::Error::Probe("no duration reported".into()))
}
