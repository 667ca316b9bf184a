//! Attempt-scoped sandbox directories.
//!
//! A [`Sandbox`] is a fresh, uniquely named temporary directory that serves
//! as the working directory of the authorized tool. Inputs are copied in
//! under their sanitized names, outputs get a unique name per attempt, and
//! the directory is removed when the sandbox is dropped unless it is
//! explicitly kept.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use cf_core::AssetCatalog;
use tempfile::TempDir;

const SANDBOX_PREFIX: &str = "clipforge-";

/// Ephemeral working directory for one attempt.
///
/// # Example
///
/// ```no_run
/// use cf_av::Sandbox;
///
/// # fn example(catalog: &cf_core::AssetCatalog) -> cf_core::Result<()> {
/// let mut sandbox = Sandbox::create(None)?;
/// sandbox.stage(catalog)?;
/// let output = sandbox.unique_output("output.mp4");
/// // ... run the tool with `sandbox.path()` as its working directory ...
/// # let _ = output;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Sandbox {
    temp_dir: TempDir,
    staged: BTreeMap<String, PathBuf>,
    fingerprints: BTreeMap<String, Fingerprint>,
}

/// Where a staged input came from and what the staged copy looked like.
#[derive(Debug, Clone)]
struct Fingerprint {
    source: PathBuf,
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(source: &Path, staged: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(staged)?;
        Ok(Self {
            source: source.to_path_buf(),
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    fn matches(&self, staged: &Path) -> bool {
        match std::fs::symlink_metadata(staged) {
            Ok(meta) => meta.is_file() && meta.len() == self.len && meta.modified().ok() == self.modified,
            Err(_) => false,
        }
    }
}

impl Sandbox {
    /// Create a new sandbox under `root`, or the system temp dir when `None`.
    pub fn create(root: Option<&Path>) -> cf_core::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SANDBOX_PREFIX);

        let temp_dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| sandbox_error("create sandbox root", e))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| sandbox_error("create temp dir", e))?;

        tracing::debug!("Created sandbox {}", temp_dir.path().display());
        Ok(Self {
            temp_dir,
            staged: BTreeMap::new(),
            fingerprints: BTreeMap::new(),
        })
    }

    /// Path to the sandbox directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Copy every asset of `catalog` into the sandbox under its descriptor
    /// name and return the name → sandbox path map.
    pub fn stage(&mut self, catalog: &AssetCatalog) -> cf_core::Result<&BTreeMap<String, PathBuf>> {
        for asset in catalog.iter() {
            let name = &asset.descriptor.name;
            let dest = self.temp_dir.path().join(name);
            std::fs::copy(&asset.source, &dest).map_err(|e| cf_core::Error::Tool {
                tool: "sandbox".to_string(),
                message: format!(
                    "failed to copy {} into sandbox as {name}: {e}",
                    asset.source.display()
                ),
            })?;
            let fingerprint =
                Fingerprint::of(&asset.source, &dest).map_err(|e| sandbox_error("inspect staged input", e))?;
            self.fingerprints.insert(name.clone(), fingerprint);
            self.staged.insert(name.clone(), dest);
        }
        Ok(&self.staged)
    }

    /// Copy back every staged input whose size or modification time no
    /// longer matches what was staged (overwritten, truncated or removed).
    ///
    /// Returns the number of inputs restored.
    pub fn restore_staged(&self) -> cf_core::Result<usize> {
        let mut restored = 0;
        for (name, dest) in &self.staged {
            let Some(fingerprint) = self.fingerprints.get(name) else {
                continue;
            };
            if fingerprint.matches(dest) {
                continue;
            }

            if dest.is_dir() {
                std::fs::remove_dir_all(dest).map_err(|e| sandbox_error("restore staged input", e))?;
            } else if dest.symlink_metadata().is_ok() {
                std::fs::remove_file(dest).map_err(|e| sandbox_error("restore staged input", e))?;
            }
            std::fs::copy(&fingerprint.source, dest).map_err(|e| sandbox_error("restore staged input", e))?;
            if let Some(modified) = fingerprint.modified {
                std::fs::File::options()
                    .write(true)
                    .open(dest)
                    .and_then(|f| f.set_modified(modified))
                    .map_err(|e| sandbox_error("restore staged input", e))?;
            }

            tracing::warn!("Staged input {name} was modified by the tool; restored");
            restored += 1;
        }
        Ok(restored)
    }

    /// The staged inputs, keyed by sanitized name.
    pub fn staged(&self) -> &BTreeMap<String, PathBuf> {
        &self.staged
    }

    /// A fresh output path inside the sandbox, `output_<uuid>` with the
    /// extension of `template_name`.
    pub fn unique_output(&self, template_name: &str) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        let file_name = match Path::new(template_name).extension() {
            Some(ext) => format!("output_{id}.{}", ext.to_string_lossy()),
            None => format!("output_{id}"),
        };
        self.temp_dir.path().join(file_name)
    }

    /// Remove everything in the sandbox that is not a staged input.
    ///
    /// Returns the number of entries removed.
    pub fn purge_untracked(&self) -> cf_core::Result<usize> {
        let mut removed = 0;
        let entries =
            std::fs::read_dir(self.path()).map_err(|e| sandbox_error("list sandbox", e))?;

        for entry in entries {
            let entry = entry.map_err(|e| sandbox_error("list sandbox", e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if self.staged.contains_key(&name) {
                continue;
            }
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            result.map_err(|e| sandbox_error("purge sandbox", e))?;
            tracing::debug!("Purged untracked sandbox entry {name}");
            removed += 1;
        }

        Ok(removed)
    }

    /// Move `artifact` out of the sandbox into `dest_dir` (created if
    /// needed), keeping its file name. Returns the absolute destination.
    pub fn finalize(&self, artifact: &Path, dest_dir: &Path) -> cf_core::Result<PathBuf> {
        if !artifact.exists() {
            return Err(cf_core::Error::OutputMissing {
                path: artifact.to_path_buf(),
            });
        }

        std::fs::create_dir_all(dest_dir).map_err(|e| sandbox_error("create output dir", e))?;
        let file_name = artifact
            .file_name()
            .ok_or_else(|| cf_core::Error::Internal("artifact has no file name".into()))?;
        let dest = dest_dir.join(file_name);

        // Try rename first (same filesystem), fall back to copy+remove.
        if let Err(rename_err) = std::fs::rename(artifact, &dest) {
            tracing::debug!("Rename to {} failed ({rename_err}); copying", dest.display());
            copy_then_remove(artifact, &dest)?;
        }

        dest.canonicalize()
            .map_err(|e| sandbox_error("resolve output path", e))
    }

    /// Leave the directory on disk and return its path.
    pub fn keep(self) -> PathBuf {
        #[allow(deprecated)]
        self.temp_dir.into_path()
    }
}

/// Copy `from` to `to`, then remove `from`. A failed removal is only logged.
fn copy_then_remove(from: &Path, to: &Path) -> cf_core::Result<()> {
    std::fs::copy(from, to).map_err(|e| sandbox_error("copy output to destination", e))?;
    if let Err(e) = std::fs::remove_file(from) {
        tracing::warn!("Failed to remove {} after copying it out: {e}", from.display());
    }
    Ok(())
}

fn sandbox_error(action: &str, e: std::io::Error) -> cf_core::Error {
    cf_core::Error::Tool {
        tool: "sandbox".to_string(),
        message: format!("failed to {action}: {e}"),
    }
}
