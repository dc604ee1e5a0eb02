//! Reconciler: walks the raw archive and keeps the link mirror in step with the catalog.
//!
//! Every `<source_root>/<channel>/<video_id>.<ext>` whose id is known to the
//! catalog gets a link at its canonical mirror path. Link handling is
//! idempotent and never touches a non-link file sitting at the destination.

use crate::layout::MirrorLayout;
use crate::record::{VideoMeta, VideoRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What happened at one link destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum LinkOutcome {
    /// No entry existed; a link was created.
    Created,
    /// A link already pointed at the expected target.
    Verified,
    /// A link pointed elsewhere and was replaced.
    Fixed,
    /// A regular file or directory occupies the destination; left alone.
    Occupied,
    /// The filesystem refused an operation.
    Failed(String),
}

/// Per-id result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkResult {
    pub video_id: String,
    pub link_path: PathBuf,
    pub outcome: LinkOutcome,
}

/// Batch report of one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub results: Vec<LinkResult>,
    pub created: usize,
    pub fixed: usize,
    pub verified: usize,
    pub occupied: usize,
    pub failed: usize,
    /// Source files whose id is not (yet) in the catalog
    pub unmatched: usize,
}

impl ReconcileReport {
    fn push(&mut self, result: LinkResult) {
        match &result.outcome {
            LinkOutcome::Created => self.created += 1,
            LinkOutcome::Verified => self.verified += 1,
            LinkOutcome::Fixed => self.fixed += 1,
            LinkOutcome::Occupied => self.occupied += 1,
            LinkOutcome::Failed(_) => self.failed += 1,
        }
        self.results.push(result);
    }

    /// Links created or repaired in this pass
    pub fn new_links(&self) -> usize {
        self.created + self.fixed
    }

    /// One line per failed or occupied destination
    pub fn failures(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                LinkOutcome::Failed(reason) => Some(format!(
                    "{}: could not link {}: {}",
                    r.video_id,
                    r.link_path.display(),
                    reason
                )),
                LinkOutcome::Occupied => Some(format!(
                    "{}: {} is occupied by a non-link entry",
                    r.video_id,
                    r.link_path.display()
                )),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} new, {} fixed, {} verified, {} occupied, {} failed, {} not in catalog",
            self.created, self.fixed, self.verified, self.occupied, self.failed, self.unmatched
        )
    }
}

/// Output of [`reconcile`]: the report plus the rows to persist.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePass {
    pub report: ReconcileReport,
    pub records: Vec<VideoRecord>,
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

/// Regular files exactly one directory below `source_root`, sorted by path.
///
/// Hidden channel directories and hidden files are skipped.
pub fn source_files(source_root: &Path) -> Vec<PathBuf> {
    if !source_root.is_dir() {
        return Vec::new();
    }

    let walker = WalkDir::new(source_root)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

    walker
        .filter_map(|e| e.ok())
        .filter(|entry| entry.depth() == 2 && entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// First file in `channel_dir` whose stem is `video_id`, in name order.
pub fn find_source_file(channel_dir: &Path, video_id: &str) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = fs::read_dir(channel_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.file_stem().and_then(|s| s.to_str()) == Some(video_id))
        .collect();
    matches.sort();
    matches.into_iter().next()
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Bring `link` to point at `target`.
///
/// Inspects the destination without following links:
/// - nothing there: create the link
/// - a link to `target`: leave it
/// - a link elsewhere (dangling or not): replace it
/// - anything else: leave it alone
pub fn ensure_link(link: &Path, target: &Path) -> io::Result<LinkOutcome> {
    match fs::symlink_metadata(link) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            create_symlink(target, link)?;
            Ok(LinkOutcome::Created)
        }
        Err(e) => Err(e),
        Ok(meta) if meta.file_type().is_symlink() => {
            if fs::read_link(link)? == target {
                Ok(LinkOutcome::Verified)
            } else {
                fs::remove_file(link)?;
                create_symlink(target, link)?;
                Ok(LinkOutcome::Fixed)
            }
        }
        Ok(_) => Ok(LinkOutcome::Occupied),
    }
}

/// Create the mirror folders and link for one source file.
fn link_one(layout: &MirrorLayout, meta: &VideoMeta, source: &Path) -> io::Result<(PathBuf, LinkOutcome)> {
    let extension = source.extension().and_then(|e| e.to_str());
    let link = layout.canonical_link(meta, extension);

    let host_target = layout.to_host(source).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is outside the source root", source.display()),
        )
    })?;

    fs::create_dir_all(layout.video_dir(meta))?;
    let outcome = ensure_link(&link, &host_target)?;
    Ok((link, outcome))
}

/// Run one reconciliation pass over the source tree.
///
/// Filesystem failures are recorded per id and never abort the pass. Every
/// matched id yields a `linked` row regardless of its link outcome, except an
/// id whose canonical path was already claimed earlier in the same pass: that
/// one is reported as failed and the existing link is kept.
pub fn reconcile(catalog: &HashMap<String, VideoMeta>, layout: &MirrorLayout) -> ReconcilePass {
    let mut pass = ReconcilePass::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut claimed: HashMap<PathBuf, String> = HashMap::new();

    for file in source_files(&layout.source_root) {
        let Some(video_id) = file.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };

        let Some(meta) = catalog.get(&video_id) else {
            pass.report.unmatched += 1;
            continue;
        };

        if !seen.insert(video_id.clone()) {
            continue;
        }

        let channel_dir = file.parent().unwrap_or(&layout.source_root);
        let source = find_source_file(channel_dir, &video_id).unwrap_or_else(|| file.clone());

        let canonical = layout.canonical_link(meta, source.extension().and_then(|e| e.to_str()));
        if let Some(owner) = claimed.get(&canonical) {
            let reason = format!("canonical path already claimed by {}", owner);
            pass.report.push(LinkResult {
                video_id,
                link_path: canonical,
                outcome: LinkOutcome::Failed(reason),
            });
            continue;
        }
        claimed.insert(canonical, video_id.clone());

        let (link_path, outcome) = match link_one(layout, meta, &source) {
            Ok(done) => done,
            Err(e) => {
                let extension = source.extension().and_then(|e| e.to_str());
                (
                    layout.canonical_link(meta, extension),
                    LinkOutcome::Failed(e.to_string()),
                )
            }
        };

        pass.records.push(VideoRecord::linked(&video_id, meta, &link_path));
        pass.report.push(LinkResult {
            video_id,
            link_path,
            outcome,
        });
    }

    pass
}
