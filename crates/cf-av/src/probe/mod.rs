//! Metadata probing: turn input files into [`AssetDescriptor`]s.
//!
//! A [`Prober`] either describes a file or signals that its kind is not
//! recognized. [`build_catalog`] runs a prober over a list of files and
//! assembles the request's [`AssetCatalog`].

pub mod ffprobe;

pub use self::ffprobe::FfprobeProber;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cf_core::config::LimitsConfig;
use cf_core::{AssetCatalog, AssetDescriptor, MediaCategory};

/// A media metadata prober.
///
/// Implementations must be safe to share across threads (`Send + Sync`).
#[async_trait]
pub trait Prober: Send + Sync {
    /// Human-readable name identifying this prober implementation.
    fn name(&self) -> &'static str;

    /// Whether the file's extension is one the pipeline accepts.
    fn supports(&self, path: &Path) -> bool {
        MediaCategory::from_path(path).is_some()
    }

    /// Describe the file at `path`.
    ///
    /// Returns `Ok(None)` when the file is not a recognized kind (skip it).
    async fn probe(&self, path: &Path) -> cf_core::Result<Option<AssetDescriptor>>;
}

/// Probe every file in `paths` and collect the recognized ones.
///
/// Unrecognized or unreadable files are skipped with a warning. The result
/// is an [`cf_core::Error::Input`] when nothing usable remains or when an
/// asset breaks `limits`.
pub async fn build_catalog(
    paths: &[PathBuf],
    prober: &dyn Prober,
    limits: &LimitsConfig,
) -> cf_core::Result<AssetCatalog> {
    if paths.is_empty() {
        return Err(cf_core::Error::input("no assets were provided"));
    }

    let mut catalog = AssetCatalog::new();
    for path in paths {
        if !prober.supports(path) {
            tracing::warn!("Skipping {}: unsupported file type", path.display());
            continue;
        }

        match prober.probe(path).await {
            Ok(Some(descriptor)) => {
                let added = catalog.push(path.clone(), descriptor);
                tracing::debug!(
                    prober = prober.name(),
                    "Recognized {} as {} ({})",
                    path.display(),
                    added.name,
                    added.kind()
                );
            }
            Ok(None) => {
                tracing::warn!("Skipping {}: media kind not recognized", path.display());
            }
            Err(e) => {
                tracing::warn!(prober = prober.name(), error = %e, "Skipping {}", path.display());
            }
        }
    }

    if catalog.is_empty() {
        return Err(cf_core::Error::input(
            "none of the provided files is a supported image, audio or video asset",
        ));
    }
    catalog.check_limits(limits)?;
    Ok(catalog)
}
