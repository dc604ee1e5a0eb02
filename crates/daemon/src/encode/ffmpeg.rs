//! ffmpeg encoder selection and command building for H.264/AAC normalization.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Render node handed to ffmpeg for VAAPI encodes
const VAAPI_DEVICE: &str = "/dev/dri/renderD128";

/// AAC bitrate used for every audio re-encode
const AUDIO_BITRATE: &str = "192k";

/// Substrings in ffmpeg stderr that point at a GPU or driver problem rather
/// than a problem with the input file.
pub const GPU_FAILURE_SIGNATURES: &[&str] = &[
    "no nvenc capable devices",
    "cannot load libcuda",
    "cannot load libnvidia-encode",
    "cuda_error",
    "openencodesessionex failed",
    "nvenc api version",
    "failed to initialise vaapi",
    "failed to initialize vaapi",
    "vainitialize failed",
    "device creation failed",
    "failed to set value '/dev/dri",
    "error creating a mfx session",
    "amf failed",
    "dll amfrt64.dll failed to open",
    "videotoolbox session",
    "error while opening encoder",
];

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// ffmpeg exited with non-zero status
    #[error("ffmpeg ({encoder}) failed with exit code {code:?}: {stderr_tail}")]
    FfmpegFailed {
        encoder: String,
        code: Option<i32>,
        stderr_tail: String,
    },

    /// IO error while launching ffmpeg
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// H.264 encoders in the order they are preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum H264Encoder {
    /// NVIDIA NVENC
    Nvenc,
    /// AMD AMF
    Amf,
    /// Apple VideoToolbox
    VideoToolbox,
    /// VA-API (Intel/AMD on Linux)
    Vaapi,
    /// libx264
    Software,
}

impl H264Encoder {
    /// Name of the encoder as ffmpeg knows it
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            H264Encoder::Nvenc => "h264_nvenc",
            H264Encoder::Amf => "h264_amf",
            H264Encoder::VideoToolbox => "h264_videotoolbox",
            H264Encoder::Vaapi => "h264_vaapi",
            H264Encoder::Software => "libx264",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, H264Encoder::Software)
    }

    /// Hardware encoder native to the build platform
    pub fn platform() -> Self {
        if cfg!(target_os = "macos") {
            H264Encoder::VideoToolbox
        } else {
            H264Encoder::Vaapi
        }
    }

    /// Candidates from most to least preferred
    pub fn priority() -> [H264Encoder; 4] {
        [
            H264Encoder::Nvenc,
            H264Encoder::Amf,
            H264Encoder::platform(),
            H264Encoder::Software,
        ]
    }

    /// Encoder-specific quality arguments
    fn quality_args(&self) -> &'static [&'static str] {
        match self {
            H264Encoder::Nvenc => &["-preset", "p5", "-rc", "vbr", "-cq", "23"],
            H264Encoder::Amf => &["-quality", "balanced", "-rc", "cqp", "-qp_i", "23", "-qp_p", "23"],
            H264Encoder::VideoToolbox => &["-q:v", "65"],
            H264Encoder::Vaapi => &["-qp", "23"],
            H264Encoder::Software => &["-preset", "medium", "-crf", "23"],
        }
    }
}

impl std::fmt::Display for H264Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

/// Whether `ffmpeg -encoders` output lists an encoder by exact name.
pub fn encoder_listed(encoders_output: &str, name: &str) -> bool {
    encoders_output
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

/// Pick the most preferred encoder present in `ffmpeg -encoders` output.
///
/// Falls back to libx264 when nothing better is listed.
pub fn select_encoder(encoders_output: &str) -> H264Encoder {
    H264Encoder::priority()
        .into_iter()
        .find(|enc| !enc.is_hardware() || encoder_listed(encoders_output, enc.ffmpeg_name()))
        .unwrap_or(H264Encoder::Software)
}

/// Returns the first GPU/driver failure signature found in `stderr`.
pub fn detect_gpu_failure(stderr: &str) -> Option<&'static str> {
    let lower = stderr.to_lowercase();
    GPU_FAILURE_SIGNATURES
        .iter()
        .find(|&&sig| lower.contains(sig))
        .copied()
}

/// How a file is brought to H.264/AAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStrategy {
    /// Video is already H.264: copy it, re-encode audio only
    AudioOnly,
    /// Re-encode video with the given encoder and audio to AAC
    Full(H264Encoder),
}

impl EncodeStrategy {
    pub fn encoder(&self) -> Option<H264Encoder> {
        match self {
            EncodeStrategy::AudioOnly => None,
            EncodeStrategy::Full(enc) => Some(*enc),
        }
    }

    /// Value passed to `-c:v`
    pub fn video_codec(&self) -> &'static str {
        match self {
            EncodeStrategy::AudioOnly => "copy",
            EncodeStrategy::Full(enc) => enc.ffmpeg_name(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            EncodeStrategy::AudioOnly => "audio-only (video copy)".to_string(),
            EncodeStrategy::Full(enc) => format!("full re-encode with {}", enc),
        }
    }
}

/// Parameters of one ffmpeg invocation
#[derive(Debug, Clone, PartialEq)]
pub struct EncodePlan {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub strategy: EncodeStrategy,
}

impl EncodePlan {
    pub fn new(input_path: PathBuf, output_path: PathBuf, strategy: EncodeStrategy) -> Self {
        Self {
            input_path,
            output_path,
            strategy,
        }
    }

    /// Same plan, full software re-encode
    pub fn software_fallback(&self) -> Self {
        Self {
            strategy: EncodeStrategy::Full(H264Encoder::Software),
            ..self.clone()
        }
    }
}

fn is_mp4_family(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_lowercase().as_str(), "mp4" | "m4v" | "mov"))
        .unwrap_or(false)
}

/// Muxer to force for containers that cannot carry H.264/AAC
///
/// WebM only accepts VP8/VP9/AV1 with Vorbis/Opus, so `.webm` files are
/// written as Matroska under their original name.
pub fn output_muxer(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("webm") => Some("matroska"),
        _ => None,
    }
}

/// Build the ffmpeg argument list for a plan
pub fn build_ffmpeg_args(plan: &EncodePlan) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];

    if plan.strategy == EncodeStrategy::Full(H264Encoder::Vaapi) {
        args.push("-vaapi_device".into());
        args.push(VAAPI_DEVICE.into());
    }

    args.push("-i".into());
    args.push(plan.input_path.clone().into());

    // First video stream, every audio stream if present
    args.extend(["-map", "0:v:0", "-map", "0:a?"].map(OsString::from));

    match plan.strategy {
        EncodeStrategy::AudioOnly => {
            args.extend(["-c:v", "copy"].map(OsString::from));
        }
        EncodeStrategy::Full(enc) => {
            if enc == H264Encoder::Vaapi {
                args.extend(["-vf", "format=nv12,hwupload"].map(OsString::from));
            } else {
                args.extend(["-pix_fmt", "yuv420p"].map(OsString::from));
            }
            args.push("-c:v".into());
            args.push(enc.ffmpeg_name().into());
            args.extend(enc.quality_args().iter().map(OsString::from));
        }
    }

    args.extend(["-c:a", "aac", "-b:a", AUDIO_BITRATE].map(OsString::from));

    if is_mp4_family(&plan.output_path) {
        args.extend(["-movflags", "+faststart"].map(OsString::from));
    }

    if let Some(muxer) = output_muxer(&plan.output_path) {
        args.push("-f".into());
        args.push(muxer.into());
    }

    args.push(plan.output_path.clone().into());
    args
}

/// Build the ffmpeg command for a plan
pub fn build_ffmpeg_command(ffmpeg_bin: &Path, plan: &EncodePlan) -> Command {
    let mut cmd = Command::new(ffmpeg_bin);
    cmd.args(build_ffmpeg_args(plan));
    cmd
}

/// Last `max_chars` characters of ffmpeg stderr, for logs and errors
pub fn stderr_tail(stderr: &str, max_chars: usize) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max_chars).collect()
}
