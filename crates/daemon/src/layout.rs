//! Mirror layout: canonical link paths and host-root translation.

use crate::config::PathsConfig;
use crate::record::VideoMeta;
use crate::sanitize::sanitize;
use std::path::{Path, PathBuf};

/// Separator between the date and the title in a mirror folder name.
pub const FOLDER_SEPARATOR: &str = " - ";

/// File stem of every link inside a mirror folder.
pub const LINK_STEM: &str = "video";

/// The three roots the mirror works with.
///
/// `source_root` is the raw archive as this process sees it; `host_source_root`
/// is the same tree as seen by whoever follows the links. Links are always
/// written with host paths.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorLayout {
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    pub host_source_root: PathBuf,
}

impl MirrorLayout {
    pub fn new(source_root: PathBuf, target_root: PathBuf, host_source_root: PathBuf) -> Self {
        Self {
            source_root,
            target_root,
            host_source_root,
        }
    }

    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(
            paths.source_root.clone(),
            paths.target_root.clone(),
            paths.host_source_root.clone(),
        )
    }

    /// `target_root/<channel>`
    pub fn channel_dir(&self, meta: &VideoMeta) -> PathBuf {
        self.target_root.join(sanitize(&meta.channel_name))
    }

    /// `target_root/<channel>/<published> - <title>`
    pub fn video_dir(&self, meta: &VideoMeta) -> PathBuf {
        self.channel_dir(meta).join(folder_name(meta))
    }

    /// `target_root/<channel>/<published> - <title>/video<ext>`
    ///
    /// `extension` is given without the leading dot.
    pub fn canonical_link(&self, meta: &VideoMeta, extension: Option<&str>) -> PathBuf {
        self.video_dir(meta).join(link_file_name(extension))
    }

    /// Host-visible path of a file under the local source root.
    ///
    /// Returns `None` when the file does not live under `source_root`.
    pub fn to_host(&self, local: &Path) -> Option<PathBuf> {
        local
            .strip_prefix(&self.source_root)
            .ok()
            .map(|rel| self.host_source_root.join(rel))
    }

    /// Local path for a host-visible path.
    ///
    /// Paths outside the host root are returned unchanged.
    pub fn to_local(&self, host: &Path) -> PathBuf {
        match host.strip_prefix(&self.host_source_root) {
            Ok(rel) => self.source_root.join(rel),
            Err(_) => host.to_path_buf(),
        }
    }
}

/// `<published> - <sanitized title>`
pub fn folder_name(meta: &VideoMeta) -> String {
    format!("{}{}{}", meta.published, FOLDER_SEPARATOR, sanitize(&meta.title))
}

/// `video.<ext>`, or bare `video` for extensionless files
pub fn link_file_name(extension: Option<&str>) -> String {
    match extension {
        Some(ext) if !ext.is_empty() => format!("{}.{}", LINK_STEM, ext),
        _ => LINK_STEM.to_string(),
    }
}

/// True for `video` or `video.<anything>`
pub fn is_link_file_name(name: &str) -> bool {
    name == LINK_STEM || name.starts_with(&format!("{}.", LINK_STEM))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> MirrorLayout {
        MirrorLayout::new(
            PathBuf::from("/app/source"),
            PathBuf::from("/app/target"),
            PathBuf::from("/mnt/user/tubearchives/bp"),
        )
    }

    fn meta(title: &str, channel: &str, published: &str) -> VideoMeta {
        VideoMeta {
            title: title.to_string(),
            channel_id: None,
            channel_name: channel.to_string(),
            published: published.to_string(),
        }
    }

    #[test]
    fn test_canonical_link() {
        let link = layout().canonical_link(&meta("T", "Ch", "2020-01-02"), Some("mp4"));
        assert_eq!(link, PathBuf::from("/app/target/Ch/2020-01-02 - T/video.mp4"));
    }

    #[test]
    fn test_canonical_link_sanitizes_components() {
        let link = layout().canonical_link(&meta("Why? A/B", "Chan: One", "2021-03-04"), Some("webm"));
        assert_eq!(
            link,
            PathBuf::from("/app/target/Chan_ One/2021-03-04 - Why_ A_B/video.webm")
        );
    }

    #[test]
    fn test_host_translation_round_trip() {
        let l = layout();
        let local = PathBuf::from("/app/source/UC123/abc.mp4");
        let host = l.to_host(&local).unwrap();
        assert_eq!(host, PathBuf::from("/mnt/user/tubearchives/bp/UC123/abc.mp4"));
        assert_eq!(l.to_local(&host), local);
    }

    #[test]
    fn test_translation_outside_roots() {
        let l = layout();
        assert!(l.to_host(Path::new("/elsewhere/abc.mp4")).is_none());
        assert_eq!(l.to_local(Path::new("/elsewhere/abc.mp4")), PathBuf::from("/elsewhere/abc.mp4"));
        // Component-wise prefix: "bp2" is not under "bp"
        assert_eq!(
            l.to_local(Path::new("/mnt/user/tubearchives/bp2/x.mp4")),
            PathBuf::from("/mnt/user/tubearchives/bp2/x.mp4")
        );
    }

    #[test]
    fn test_link_file_names() {
        assert_eq!(link_file_name(Some("mkv")), "video.mkv");
        assert_eq!(link_file_name(None), "video");
        assert!(is_link_file_name("video.mp4"));
        assert!(!is_link_file_name("videos.mp4"));
    }
}
