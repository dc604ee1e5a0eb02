//! Cleanup sweeper for mirror folders left over from the old naming scheme.
//!
//! Older builds named folders after the full catalog timestamp
//! (`2020-01-02T00:00:00 - Title`). Those folders are removed only when
//! every entry inside is a symlink, since links can always be rebuilt from
//! the source tree and anything else might be real data.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Substring that marks a folder created by the old naming scheme.
pub const LEGACY_TIMESTAMP_MARKER: &str = "T00:00:00";

/// Whether a mirror folder name comes from the old naming scheme.
pub fn is_legacy_folder(name: &str) -> bool {
    name.contains(LEGACY_TIMESTAMP_MARKER)
}

/// A legacy folder that was left in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFolder {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub skipped: Vec<SkippedFolder>,
}

impl CleanupReport {
    pub fn summary(&self) -> String {
        format!("{} removed, {} skipped", self.removed.len(), self.skipped.len())
    }
}

/// Directories at `target_root/<channel>/<folder>` matching the legacy predicate.
pub fn legacy_candidates(target_root: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    let Ok(channels) = fs::read_dir(target_root) else {
        return candidates;
    };

    for channel in channels.filter_map(|e| e.ok()) {
        if !channel.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let Ok(folders) = fs::read_dir(channel.path()) else {
            continue;
        };
        for folder in folders.filter_map(|e| e.ok()) {
            let is_dir = folder.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let legacy = folder.file_name().to_str().map(is_legacy_folder).unwrap_or(false);
            if is_dir && legacy {
                candidates.push(folder.path());
            }
        }
    }

    candidates.sort();
    candidates
}

/// Entry inside a candidate that blocks removal, if any.
fn first_non_symlink(dir: &Path) -> io::Result<Option<PathBuf>> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_symlink() {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

/// Remove every symlink inside `dir`, then `dir` itself.
///
/// Each entry's type is checked again right before removal; the first
/// non-symlink stops the removal and leaves it and the folder in place.
fn remove_symlink_folder(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !fs::symlink_metadata(&path)?.file_type().is_symlink() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a symlink", path.display()),
            ));
        }
        fs::remove_file(&path)?;
    }
    fs::remove_dir(dir)
}

/// Sweep the target tree once.
pub fn sweep(target_root: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();

    for dir in legacy_candidates(target_root) {
        match first_non_symlink(&dir) {
            Ok(None) => match remove_symlink_folder(&dir) {
                Ok(()) => report.removed.push(dir),
                Err(e) => report.skipped.push(SkippedFolder {
                    path: dir,
                    reason: format!("removal failed: {}", e),
                }),
            },
            Ok(Some(blocker)) => {
                let name = blocker
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                report.skipped.push(SkippedFolder {
                    path: dir,
                    reason: format!("contains non-symlink entry '{}'", name),
                });
            }
            Err(e) => report.skipped.push(SkippedFolder {
                path: dir,
                reason: format!("could not list folder: {}", e),
            }),
        }
    }

    report
}
