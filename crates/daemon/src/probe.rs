//! Codec probing via ffprobe.
//!
//! Only the first video and first audio stream matter for codec
//! normalization; anything ffprobe cannot tell us is reported as unknown.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Video codec every file is normalized to.
pub const TARGET_VIDEO_CODEC: &str = "h264";

/// Audio codec every file is normalized to.
pub const TARGET_AUDIO_CODEC: &str = "aac";

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe exited unsuccessfully.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// ffprobe could not be started.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codecs of the first video and audio stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    pub video: Option<String>,
    pub audio: Option<String>,
}

impl CodecInfo {
    /// Both streams already match the normalization target.
    pub fn is_compliant(&self) -> bool {
        self.video_matches() && self.audio_matches()
    }

    pub fn video_matches(&self) -> bool {
        self.video.as_deref() == Some(TARGET_VIDEO_CODEC)
    }

    pub fn audio_matches(&self) -> bool {
        self.audio.as_deref() == Some(TARGET_AUDIO_CODEC)
    }

    pub fn describe(&self) -> String {
        format!(
            "video={} audio={}",
            self.video.as_deref().unwrap_or("unknown"),
            self.audio.as_deref().unwrap_or("unknown")
        )
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
    }
}

/// Probes `path` with `<ffprobe_bin> -v quiet -print_format json -show_streams`.
pub fn probe_codecs(ffprobe_bin: &Path, path: &Path) -> Result<CodecInfo, ProbeError> {
    let output = Command::new(ffprobe_bin)
        .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
        .arg(path)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_output(&stdout)
}

/// Parses ffprobe JSON output into the codecs of the first video and audio stream.
pub fn parse_ffprobe_output(json_str: &str) -> Result<CodecInfo, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let mut info = CodecInfo::default();
    for stream in ffprobe.streams.unwrap_or_default() {
        let codec = stream.codec_name.map(|c| c.to_lowercase());
        match stream.codec_type.as_deref() {
            Some("video") if info.video.is_none() => info.video = codec,
            Some("audio") if info.audio.is_none() => info.audio = codec,
            _ => {}
        }
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compliant_file() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1920},
                {"index": 1, "codec_type": "audio", "codec_name": "aac", "channels": 2}
            ]
        }"#;
        let info = parse_ffprobe_output(json).unwrap();
        assert!(info.is_compliant());
    }

    #[test]
    fn test_first_stream_of_each_type_wins() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "codec_name": "VP9"},
                {"codec_type": "audio", "codec_name": "opus"},
                {"codec_type": "video", "codec_name": "h264"},
                {"codec_type": "audio", "codec_name": "aac"}
            ]
        }"#;
        let info = parse_ffprobe_output(json).unwrap();
        assert_eq!(info.video.as_deref(), Some("vp9"));
        assert_eq!(info.audio.as_deref(), Some("opus"));
        assert!(!info.is_compliant());
    }

    #[test]
    fn test_attachment_streams_ignored() {
        let json = r#"{
            "streams": [
                {"codec_type": "attachment", "codec_name": "ttf"},
                {"codec_type": "video", "codec_name": "h264"}
            ]
        }"#;
        let info = parse_ffprobe_output(json).unwrap();
        assert!(info.video_matches());
        assert!(!info.audio_matches());
        assert_eq!(info.describe(), "video=h264 audio=unknown");
    }

    #[test]
    fn test_missing_streams_is_unknown() {
        let info = parse_ffprobe_output("{}").unwrap();
        assert_eq!(info, CodecInfo::default());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            parse_ffprobe_output("not json"),
            Err(ProbeError::ParseError(_))
        ));
    }

    #[test]
    fn test_missing_binary_is_io_error() {
        let result = probe_codecs(
            Path::new("/nonexistent/ffprobe-binary"),
            Path::new("/tmp/x.mp4"),
        );
        assert!(matches!(result, Err(ProbeError::Io(_))));
    }
}
