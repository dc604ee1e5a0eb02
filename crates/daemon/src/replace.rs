//! Replacer module for swapping a transcoded temp file over its original.
//!
//! The encode always writes a hidden sibling of the original, so the final
//! step is a same-directory rename.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during file replacement.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// The temp file is missing or empty.
    #[error("Encoded output {0} is missing or empty")]
    EmptyOutput(PathBuf),

    /// Neither rename nor remove-then-rename succeeded.
    #[error("Failed to move {temp} over {original}: {source}")]
    RenameFailed {
        original: PathBuf,
        temp: PathBuf,
        source: std::io::Error,
    },
}

/// Temp path for a transcode of `original`: `.{stem}.transcoding{ext}` in the same directory.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use organizerr::replace::temp_path_for;
///
/// let temp = temp_path_for(Path::new("/media/UC1/abc.webm"));
/// assert_eq!(temp, Path::new("/media/UC1/.abc.transcoding.webm"));
/// ```
pub fn temp_path_for(original: &Path) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    original.with_file_name(format!(".{}.transcoding{}", stem, ext))
}

/// Move `temp` over `original`.
///
/// Tries a plain rename first. If that fails and the original still exists,
/// the original is removed and the rename retried. On failure the temp file
/// is left in place; if the original is already gone the temp file is the
/// only copy of the video.
pub fn replace_original(original: &Path, temp: &Path) -> Result<(), ReplaceError> {
    let non_empty = fs::metadata(temp).map(|m| m.len() > 0).unwrap_or(false);
    if !non_empty {
        return Err(ReplaceError::EmptyOutput(temp.to_path_buf()));
    }

    let first = match fs::rename(temp, original) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    if !original.exists() {
        return Err(rename_failed(original, temp, first));
    }
    fs::remove_file(original).map_err(|e| rename_failed(original, temp, e))?;
    fs::rename(temp, original).map_err(|e| rename_failed(original, temp, e))
}

fn rename_failed(original: &Path, temp: &Path, source: std::io::Error) -> ReplaceError {
    ReplaceError::RenameFailed {
        original: original.to_path_buf(),
        temp: temp.to_path_buf(),
        source,
    }
}

/// Remove a temp file if it exists, ignoring errors.
pub fn discard_temp(temp: &Path) {
    if temp.exists() {
        let _ = fs::remove_file(temp);
    }
}
