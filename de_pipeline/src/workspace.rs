use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::Result;

enum Storage {
    /// Removed when the workspace is dropped.
    Scratch(TempDir),
    /// Left on disk for inspection.
    Kept(PathBuf),
}

/// Intermediate files of one comparison: engine count table, condition sheet and the
/// engine's result table. Every comparison gets its own directory, so comparisons never
/// overwrite each other's files.
pub struct ComparisonWorkspace {
    storage: Storage,
}

/// Directory name for a comparison.
pub(crate) fn slug(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));
    let slug = re.replace_all(name.trim(), "_").trim_matches('_').to_string();
    if slug.is_empty() {
        "comparison".to_string()
    } else {
        slug
    }
}

impl ComparisonWorkspace {
    /// Scratch directory under `parent` (system temp when `None`), deleted on drop.
    pub fn scratch(parent: Option<&Path>, comparison: &str) -> Result<Self> {
        let prefix = format!("{}-", slug(comparison));
        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                tempfile::Builder::new().prefix(&prefix).tempdir_in(parent)?
            }
            None => tempfile::Builder::new().prefix(&prefix).tempdir()?,
        };
        debug!("Scratch workspace for '{}' at {}", comparison, dir.path().display());
        Ok(ComparisonWorkspace { storage: Storage::Scratch(dir) })
    }

    /// Persistent directory `parent/<comparison>`, kept after the run. Files left there
    /// by an earlier run are removed.
    pub fn kept(parent: &Path, comparison: &str) -> Result<Self> {
        let dir = parent.join(slug(comparison));
        fs::create_dir_all(&dir)?;
        debug!("Keeping workspace for '{}' at {}", comparison, dir.display());
        let workspace = ComparisonWorkspace { storage: Storage::Kept(dir) };
        for stale in [workspace.counts_path(), workspace.conditions_path(), workspace.results_path()] {
            if stale.exists() {
                debug!("Removing {} from an earlier run", stale.display());
                fs::remove_file(&stale)?;
            }
        }
        Ok(workspace)
    }

    pub fn dir(&self) -> &Path {
        match &self.storage {
            Storage::Scratch(dir) => dir.path(),
            Storage::Kept(dir) => dir,
        }
    }

    pub fn counts_path(&self) -> PathBuf {
        self.dir().join("count.csv")
    }

    pub fn conditions_path(&self) -> PathBuf {
        self.dir().join("cond.csv")
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir().join("de.csv")
    }
}

impl Drop for ComparisonWorkspace {
    fn drop(&mut self) {
        let storage = std::mem::replace(&mut self.storage, Storage::Kept(PathBuf::new()));
        if let Storage::Scratch(dir) = storage {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Could not remove workspace {}: {}", path.display(), e);
            }
        }
    }
}
