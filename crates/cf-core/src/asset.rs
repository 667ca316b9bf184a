//! Asset model: typed descriptors of the media a request may use.
//!
//! Descriptors are produced by a metadata prober, rendered into the prompt by
//! the composer and staged into sandboxes by the executor. The name a
//! descriptor carries is the sanitized name used everywhere downstream, so
//! sanitization happens exactly once, at construction.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::LimitsConfig;
use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// MediaCategory
// ---------------------------------------------------------------------------

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tiff", "gif"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "aac", "flac"];
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "webm", "flv", "wmv", "mpg", "mpeg", "m4v", "3gp", "3g2", "3gpp",
];

/// Coarse media category derived from a file extension.
///
/// This decides which probe path a file takes; files with no category are
/// skipped before any tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Audio,
    Video,
}

impl MediaCategory {
    /// Classify a path by its (case-insensitive) extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Audio)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// AssetKind / AssetMedia
// ---------------------------------------------------------------------------

/// The kind of an asset as presented to the generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
    Image,
    Audio,
    Video,
    VideoWithAudio,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
            Self::VideoWithAudio => write!(f, "video-with-audio"),
        }
    }
}

/// Pixel dimensions, rendered as `WxH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Kind-specific media facts. Each variant carries exactly the fields that
/// kind requires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AssetMedia {
    Image {
        dimensions: Dimensions,
    },
    Audio {
        duration_secs: f64,
        channels: u32,
    },
    Video {
        dimensions: Dimensions,
        duration_secs: f64,
    },
    VideoWithAudio {
        dimensions: Dimensions,
        duration_secs: f64,
        channels: u32,
    },
}

impl AssetMedia {
    pub fn kind(&self) -> AssetKind {
        match self {
            Self::Image { .. } => AssetKind::Image,
            Self::Audio { .. } => AssetKind::Audio,
            Self::Video { .. } => AssetKind::Video,
            Self::VideoWithAudio { .. } => AssetKind::VideoWithAudio,
        }
    }

    /// Present for image and video kinds.
    pub fn dimensions(&self) -> Option<Dimensions> {
        match *self {
            Self::Image { dimensions }
            | Self::Video { dimensions, .. }
            | Self::VideoWithAudio { dimensions, .. } => Some(dimensions),
            Self::Audio { .. } => None,
        }
    }

    /// Present for audio and video kinds.
    pub fn duration_secs(&self) -> Option<f64> {
        match *self {
            Self::Audio { duration_secs, .. }
            | Self::Video { duration_secs, .. }
            | Self::VideoWithAudio { duration_secs, .. } => Some(duration_secs),
            Self::Image { .. } => None,
        }
    }

    /// Present when an audio stream exists.
    pub fn channels(&self) -> Option<u32> {
        match *self {
            Self::Audio { channels, .. } | Self::VideoWithAudio { channels, .. } => Some(channels),
            Self::Image { .. } | Self::Video { .. } => None,
        }
    }

    fn check(&self) -> Result<()> {
        if let Some(d) = self.dimensions() {
            if d.width == 0 || d.height == 0 {
                return Err(Error::Probe(format!("invalid dimensions {d}")));
            }
        }
        if let Some(secs) = self.duration_secs() {
            if !secs.is_finite() || secs < 0.0 {
                return Err(Error::Probe(format!("invalid duration {secs}")));
            }
        }
        if self.channels() == Some(0) {
            return Err(Error::Probe("audio stream reports zero channels".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AssetDescriptor
// ---------------------------------------------------------------------------

/// Normalized description of one input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Sanitized file name; unique within a catalog.
    pub name: String,
    pub size_bytes: u64,
    #[serde(flatten)]
    pub media: AssetMedia,
}

impl AssetDescriptor {
    /// Build a descriptor, sanitizing `raw_name` and checking the media facts.
    pub fn new(raw_name: &str, size_bytes: u64, media: AssetMedia) -> Result<Self> {
        media.check()?;
        Ok(Self {
            name: sanitize_name(raw_name),
            size_bytes,
            media,
        })
    }

    pub fn kind(&self) -> AssetKind {
        self.media.kind()
    }
}

/// Reduce a file name to characters that survive shell-word splitting and
/// cannot be mistaken for a tool option.
///
/// Any directory part is dropped; every character outside `[A-Za-z0-9._-]`
/// becomes `_`.
pub fn sanitize_name(raw: &str) -> String {
    let base = raw.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(raw);

    let mut name: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.starts_with('-') {
        name.insert(0, '_');
    }
    if name.is_empty() || name.chars().all(|c| c == '.') {
        name = "asset".into();
    }
    name
}

// ---------------------------------------------------------------------------
// AssetCatalog
// ---------------------------------------------------------------------------

/// A recognized input file: where it lives and how it is described.
#[derive(Debug, Clone)]
pub struct Asset {
    pub source: PathBuf,
    pub descriptor: AssetDescriptor,
}

/// The ordered set of assets for one request.
///
/// Insertion order is preserved and names are made unique on insert.
#[derive(Debug, Clone, Default)]
pub struct AssetCatalog {
    assets: Vec<Asset>,
    names: HashSet<String>,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an asset, renaming its descriptor if the name is already taken.
    pub fn push(&mut self, source: PathBuf, mut descriptor: AssetDescriptor) -> &AssetDescriptor {
        descriptor.name = unique_name(&descriptor.name, &self.names);
        self.names.insert(descriptor.name.clone());
        self.assets.push(Asset { source, descriptor });
        &self.assets[self.assets.len() - 1].descriptor
    }

    /// Claim `name` for something other than an asset, such as the output
    /// placeholder. An asset already holding it is renamed, and later pushes
    /// skip it.
    pub fn reserve(&mut self, name: &str) {
        if !self.names.insert(name.to_string()) {
            if let Some(asset) = self.assets.iter_mut().find(|a| a.descriptor.name == name) {
                let renamed = unique_name(name, &self.names);
                self.names.insert(renamed.clone());
                asset.descriptor.name = renamed;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter()
    }

    /// Descriptors in insertion order.
    pub fn descriptors(&self) -> Vec<AssetDescriptor> {
        self.assets.iter().map(|a| a.descriptor.clone()).collect()
    }

    /// Enforce size and duration limits on every asset.
    pub fn check_limits(&self, limits: &LimitsConfig) -> Result<()> {
        for asset in &self.assets {
            let d = &asset.descriptor;
            if d.size_bytes > limits.max_asset_bytes {
                return Err(Error::Input(format!(
                    "asset '{}' is {} bytes; the limit is {} bytes",
                    d.name, d.size_bytes, limits.max_asset_bytes
                )));
            }
            if let Some(secs) = d.media.duration_secs() {
                if secs > limits.max_duration_secs {
                    return Err(Error::Input(format!(
                        "asset '{}' lasts {:.1}s; the limit is {:.1}s",
                        d.name, secs, limits.max_duration_secs
                    )));
                }
            }
        }
        Ok(())
    }
}

fn unique_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    };
    (2..)
        .map(|n| format!("{stem}_{n}{ext}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}
