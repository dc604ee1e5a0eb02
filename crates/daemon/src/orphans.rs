//! Orphan detector: finds mirror links whose target no longer exists.
//!
//! Metadata for an orphan is recovered from where the link sits:
//! `<channel>/<published> - <title>/video.<ext>`, and the video id from the
//! dangling target's file name.

use crate::layout::{is_link_file_name, MirrorLayout, FOLDER_SEPARATOR};
use crate::record::{now_rfc3339, VideoRecord, VideoStatus};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Placeholder for fields that cannot be recovered.
pub const UNKNOWN: &str = "unknown";

/// A dangling mirror link and what could be recovered about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanRecord {
    pub video_id: String,
    pub title: String,
    pub channel: String,
    pub published: String,
    pub symlink_path: PathBuf,
    /// Raw link target as stored in the link
    pub target: PathBuf,
}

impl OrphanRecord {
    /// Store row for this orphan.
    ///
    /// Orphans whose id could not be recovered are keyed by their link path so
    /// that distinct unknown orphans keep separate rows.
    pub fn to_record(&self) -> VideoRecord {
        let video_id = if self.video_id == UNKNOWN {
            format!("{}:{}", UNKNOWN, self.symlink_path.display())
        } else {
            self.video_id.clone()
        };
        VideoRecord {
            video_id,
            title: self.title.clone(),
            channel: self.channel.clone(),
            published: self.published.clone(),
            symlink_path: self.symlink_path.to_string_lossy().to_string(),
            status: VideoStatus::Missing,
            last_updated: now_rfc3339(),
        }
    }
}

/// Split `"<date> - <title>"` on the first separator.
///
/// Without a separator the whole name is the title and the date is unknown.
pub fn parse_folder_name(name: &str) -> (String, String) {
    match name.split_once(FOLDER_SEPARATOR) {
        Some((date, title)) => (date.to_string(), title.to_string()),
        None => (UNKNOWN.to_string(), name.to_string()),
    }
}

fn name_of(path: Option<&Path>) -> String {
    path.and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Build the orphan record for a dangling link.
pub fn orphan_from_link(link: &Path, target: &Path) -> OrphanRecord {
    let folder = link.parent();
    let (published, title) = parse_folder_name(&name_of(folder));
    let channel = name_of(folder.and_then(|f| f.parent()));

    let video_id = target
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string();

    OrphanRecord {
        video_id,
        title,
        channel,
        published,
        symlink_path: link.to_path_buf(),
        target: target.to_path_buf(),
    }
}

/// Walk the mirror and return every dangling `video.*` link.
///
/// Link targets are host paths; they are mapped back to the local source
/// root before checking for existence.
pub fn detect_orphans(layout: &MirrorLayout) -> Vec<OrphanRecord> {
    let mut orphans = Vec::new();
    if !layout.target_root.is_dir() {
        return orphans;
    }

    let entries = WalkDir::new(&layout.target_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok());

    for entry in entries {
        if !entry.path_is_symlink() {
            continue;
        }
        let is_video = entry.file_name().to_str().map(is_link_file_name).unwrap_or(false);
        if !is_video {
            continue;
        }

        let link = entry.path();
        let Ok(target) = fs::read_link(link) else {
            continue;
        };

        let absolute = if target.is_absolute() {
            target.clone()
        } else {
            link.parent().map(|p| p.join(&target)).unwrap_or_else(|| target.clone())
        };
        let local = layout.to_local(&absolute);
        if local.exists() {
            continue;
        }

        orphans.push(orphan_from_link(link, &target));
    }

    orphans
}
