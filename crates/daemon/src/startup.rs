//! Startup checks for Organizerr
//!
//! Provides preflight checks run before the daemon starts serving:
//! - The mirror target root exists or can be created
//! - The source root is present (warning only)
//! - ffmpeg and ffprobe can be executed (warning only; only transcodes need them)

use crate::config::Config;
use std::fs;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Target root {path} is unusable: {source}")]
    TargetRoot {
        path: String,
        source: std::io::Error,
    },

    #[error("{tool} not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },
}

/// Non-fatal findings from the startup checks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartupReport {
    pub warnings: Vec<String>,
    pub ffmpeg_version: Option<String>,
}

/// Parse the version token from `ffmpeg -version` / `ffprobe -version` output
///
/// Handles the N-prefixed builds (`n7.1-...`) and git snapshots (`N-112345-g...`).
pub fn parse_tool_version(version_output: &str) -> Option<String> {
    let line = version_output.lines().next()?.to_lowercase();
    let rest = line.split(" version ").nth(1)?;
    let token = rest.split_whitespace().next()?;
    let token = token.strip_prefix('n').unwrap_or(token);
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Run `<bin> -version` and return the parsed version
pub fn check_tool_available(bin: &Path) -> Result<String, StartupError> {
    let tool = bin.display().to_string();
    let output = Command::new(bin)
        .arg("-version")
        .output()
        .map_err(|e| StartupError::ToolUnavailable {
            tool: tool.clone(),
            reason: format!("failed to run {} -version: {}", tool, e),
        })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            tool: tool.clone(),
            reason: format!("{} -version exited with {}", tool, output.status),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_tool_version(&stdout).unwrap_or_else(|| "unknown".to_string()))
}

/// Make sure the mirror root exists
pub fn ensure_target_root(path: &Path) -> Result<(), StartupError> {
    fs::create_dir_all(path).map_err(|source| StartupError::TargetRoot {
        path: path.display().to_string(),
        source,
    })
}

/// Run all startup checks in order
///
/// Only an unusable target root is fatal; everything else is reported as a warning.
pub fn run_startup_checks(cfg: &Config) -> Result<StartupReport, StartupError> {
    let mut report = StartupReport::default();

    ensure_target_root(&cfg.paths.target_root)?;

    if !cfg.paths.source_root.is_dir() {
        report.warnings.push(format!(
            "Source root {} does not exist; passes will find no files",
            cfg.paths.source_root.display()
        ));
    }

    match check_tool_available(&cfg.transcode.ffmpeg_bin) {
        Ok(version) => report.ffmpeg_version = Some(version),
        Err(e) => report.warnings.push(format!("{}; transcodes will fail", e)),
    }
    if let Err(e) = check_tool_available(&cfg.transcode.ffprobe_bin) {
        report
            .warnings
            .push(format!("{}; every file will be fully re-encoded", e));
    }

    Ok(report)
}
