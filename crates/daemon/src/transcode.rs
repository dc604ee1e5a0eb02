//! Transcode pipeline: probe, pick an encoder, encode into a temp file, swap it in.
//!
//! Everything here is blocking and is meant to run on a blocking thread.
//! External tools are reached through [`MediaTools`] so the pipeline can be
//! exercised without ffmpeg installed.

use crate::encode::ffmpeg::stderr_tail;
use crate::encode::{
    build_ffmpeg_command, detect_gpu_failure, select_encoder, EncodeError, EncodePlan,
    EncodeStrategy, H264Encoder,
};
use crate::layout::MirrorLayout;
use crate::probe::{probe_codecs, CodecInfo, ProbeError};
use crate::replace::{discard_temp, replace_original, temp_path_for, ReplaceError};
use crate::ringlog::SharedLog;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;

/// Characters of ffmpeg stderr kept in errors and log lines
const STDERR_TAIL_CHARS: usize = 400;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Replace(#[from] ReplaceError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeOutcome {
    /// Already H.264/AAC, nothing was run
    AlreadyCompliant,
    Transcoded {
        strategy: EncodeStrategy,
        /// The hardware attempt failed and libx264 was used instead
        retried: bool,
    },
}

/// Result of one ffmpeg run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stderr: String,
}

/// External media tools the pipeline depends on.
pub trait MediaTools: Send + Sync {
    fn probe(&self, path: &Path) -> Result<CodecInfo, ProbeError>;

    /// Raw `ffmpeg -encoders` listing
    fn list_encoders(&self) -> io::Result<String>;

    fn run_encode(&self, plan: &EncodePlan) -> io::Result<EncodeOutput>;
}

/// [`MediaTools`] backed by the ffmpeg and ffprobe executables.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
}

impl FfmpegTools {
    pub fn new(ffmpeg_bin: PathBuf, ffprobe_bin: PathBuf) -> Self {
        Self {
            ffmpeg_bin,
            ffprobe_bin,
        }
    }
}

impl MediaTools for FfmpegTools {
    fn probe(&self, path: &Path) -> Result<CodecInfo, ProbeError> {
        probe_codecs(&self.ffprobe_bin, path)
    }

    fn list_encoders(&self) -> io::Result<String> {
        let output = Command::new(&self.ffmpeg_bin)
            .args(["-hide_banner", "-encoders"])
            .output()?;
        if !output.status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("ffmpeg -encoders exited with {}", output.status),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_encode(&self, plan: &EncodePlan) -> io::Result<EncodeOutput> {
        let output = build_ffmpeg_command(&self.ffmpeg_bin, plan).output()?;
        Ok(EncodeOutput {
            success: output.status.success(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Single-file transcode pipeline
pub struct Transcoder {
    tools: Arc<dyn MediaTools>,
    layout: MirrorLayout,
    log: SharedLog,
}

impl Transcoder {
    pub fn new(tools: Arc<dyn MediaTools>, layout: MirrorLayout, log: SharedLog) -> Self {
        Self { tools, layout, log }
    }

    /// Local file behind `path`.
    ///
    /// Mirror links carry host paths, so a symlink's target is mapped back
    /// under the local source root.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, TranscodeError> {
        let is_link = fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        let resolved = if is_link {
            let target = fs::read_link(path)?;
            let absolute = if target.is_absolute() {
                target
            } else {
                path.parent().map(|p| p.join(&target)).unwrap_or(target)
            };
            self.layout.to_local(&absolute)
        } else {
            path.to_path_buf()
        };

        if !resolved.is_file() {
            return Err(TranscodeError::NotFound(resolved));
        }
        Ok(resolved)
    }

    /// Best available H.264 encoder, queried fresh on every call.
    pub fn select_encoder(&self) -> H264Encoder {
        match self.tools.list_encoders() {
            Ok(listing) => select_encoder(&listing),
            Err(e) => {
                self.log
                    .warn(format!("Encoder query failed, using libx264: {}", e));
                H264Encoder::Software
            }
        }
    }

    pub fn transcode(&self, path: &Path) -> Result<TranscodeOutcome, TranscodeError> {
        let encoder = self.select_encoder();
        self.transcode_with(path, encoder)
    }

    /// Run the pipeline with an already selected encoder.
    pub fn transcode_with(
        &self,
        path: &Path,
        encoder: H264Encoder,
    ) -> Result<TranscodeOutcome, TranscodeError> {
        let source = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => {
                self.log.error(format!("{}: {}", path.display(), e));
                return Err(e);
            }
        };
        self.log.info(format!("Transcode requested: {}", source.display()));

        let Some(strategy) = self.plan_strategy(&source, encoder) else {
            self.log
                .info(format!("{} is already h264/aac, skipping", source.display()));
            return Ok(TranscodeOutcome::AlreadyCompliant);
        };

        let temp = temp_path_for(&source);
        let plan = EncodePlan::new(source.clone(), temp.clone(), strategy);
        let (plan, retried) = self.encode(plan)?;

        if let Err(e) = replace_original(&source, &temp) {
            // With the original gone the temp file is the only copy left
            if source.exists() {
                discard_temp(&temp);
            }
            self.log.error(format!("Replace failed: {}", e));
            return Err(e.into());
        }

        self.log.info(format!(
            "Transcoded {} ({})",
            source.display(),
            plan.strategy.describe()
        ));
        Ok(TranscodeOutcome::Transcoded {
            strategy: plan.strategy,
            retried,
        })
    }

    /// Probe `source` and decide what to run; `None` when it is already h264/aac.
    ///
    /// A failed probe counts as unknown codecs and forces a full re-encode.
    pub fn plan_strategy(&self, source: &Path, encoder: H264Encoder) -> Option<EncodeStrategy> {
        let codecs = match self.tools.probe(source) {
            Ok(info) => info,
            Err(e) => {
                self.log
                    .warn(format!("Probe failed for {}: {}", source.display(), e));
                CodecInfo::default()
            }
        };
        self.log.info(format!("Probed {}", codecs.describe()));

        if codecs.is_compliant() {
            None
        } else if codecs.video_matches() {
            Some(EncodeStrategy::AudioOnly)
        } else {
            Some(EncodeStrategy::Full(encoder))
        }
    }

    /// Run ffmpeg, retrying once with libx264 when a hardware encoder fails
    /// with a GPU/driver signature. Returns the plan that succeeded.
    fn encode(&self, mut plan: EncodePlan) -> Result<(EncodePlan, bool), TranscodeError> {
        let mut retried = false;
        loop {
            self.log.info(format!("Encoding: {}", plan.strategy.describe()));

            let output = match self.tools.run_encode(&plan) {
                Ok(output) => output,
                Err(e) => {
                    discard_temp(&plan.output_path);
                    self.log.error(format!("Could not start ffmpeg: {}", e));
                    return Err(EncodeError::Io(e).into());
                }
            };
            if output.success {
                return Ok((plan, retried));
            }

            discard_temp(&plan.output_path);
            let hardware = plan
                .strategy
                .encoder()
                .map(|enc| enc.is_hardware())
                .unwrap_or(false);

            if hardware && !retried {
                if let Some(signature) = detect_gpu_failure(&output.stderr) {
                    self.log.warn(format!(
                        "Hardware encode failed ({}), retrying with libx264",
                        signature
                    ));
                    plan = plan.software_fallback();
                    retried = true;
                    continue;
                }
            }

            let tail = stderr_tail(&output.stderr, STDERR_TAIL_CHARS);
            self.log.error(format!(
                "ffmpeg failed with exit code {:?}: {}",
                output.code, tail
            ));
            return Err(EncodeError::FfmpegFailed {
                encoder: plan
                    .strategy
                    .encoder()
                    .map(|enc| enc.ffmpeg_name().to_string())
                    .unwrap_or_else(|| "copy".to_string()),
                code: output.code,
                stderr_tail: tail,
            }
            .into());
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ringlog::RingLog;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted stand-in for ffmpeg/ffprobe
    pub(crate) struct FakeTools {
        pub codecs: CodecInfo,
        pub probe_fails: bool,
        pub encoders: String,
        pub results: Mutex<VecDeque<EncodeOutput>>,
        pub plans: Mutex<Vec<EncodePlan>>,
    }

    impl FakeTools {
        pub(crate) fn new(codecs: CodecInfo, encoders: &str, results: Vec<EncodeOutput>) -> Self {
            Self {
                codecs,
                probe_fails: false,
                encoders: encoders.to_string(),
                results: Mutex::new(results.into()),
                plans: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing_probe(mut self) -> Self {
            self.probe_fails = true;
            self
        }

        pub(crate) fn encode_calls(&self) -> Vec<EncodePlan> {
            self.plans.lock().unwrap().clone()
        }
    }

    impl MediaTools for FakeTools {
        fn probe(&self, _path: &Path) -> Result<CodecInfo, ProbeError> {
            if self.probe_fails {
                return Err(ProbeError::FfprobeFailed("moov atom not found".to_string()));
            }
            Ok(self.codecs.clone())
        }

        fn list_encoders(&self) -> io::Result<String> {
            Ok(self.encoders.clone())
        }

        fn run_encode(&self, plan: &EncodePlan) -> io::Result<EncodeOutput> {
            self.plans.lock().unwrap().push(plan.clone());
            let result = self.results.lock().unwrap().pop_front().unwrap_or(EncodeOutput {
                success: true,
                code: Some(0),
                stderr: String::new(),
            });
            // Mimic ffmpeg leaving a partial file behind
            fs::write(&plan.output_path, b"encoded")?;
            Ok(result)
        }
    }

    pub(crate) fn codecs(video: &str, audio: &str) -> CodecInfo {
        CodecInfo {
            video: Some(video.to_string()),
            audio: Some(audio.to_string()),
        }
    }

    fn failure(stderr: &str) -> EncodeOutput {
        EncodeOutput {
            success: false,
            code: Some(1),
            stderr: stderr.to_string(),
        }
    }

    fn setup(tools: FakeTools) -> (TempDir, Arc<FakeTools>, Transcoder, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let layout = MirrorLayout::new(
            tmp.path().join("source"),
            tmp.path().join("target"),
            PathBuf::from("/mnt/host/bp"),
        );
        let dir = layout.source_root.join("UC1");
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("abc.webm");
        fs::write(&file, b"original").unwrap();

        let tools = Arc::new(tools);
        let transcoder = Transcoder::new(
            tools.clone(),
            layout,
            RingLog::shared("transcode", 100, 500),
        );
        (tmp, tools, transcoder, file)
    }

    #[test]
    fn test_compliant_file_is_not_encoded() {
        let (_tmp, tools, t, file) = setup(FakeTools::new(codecs("h264", "aac"), "", vec![]));

        let outcome = t.transcode(&file).unwrap();
        assert_eq!(outcome, TranscodeOutcome::AlreadyCompliant);
        assert!(tools.encode_calls().is_empty());
        assert_eq!(fs::read(&file).unwrap(), b"original");
    }

    #[test]
    fn test_h264_video_gets_audio_only() {
        let (_tmp, tools, t, file) = setup(FakeTools::new(codecs("h264", "opus"), "", vec![]));

        let outcome = t.transcode(&file).unwrap();
        assert_eq!(
            outcome,
            TranscodeOutcome::Transcoded {
                strategy: EncodeStrategy::AudioOnly,
                retried: false
            }
        );
        assert_eq!(tools.encode_calls().len(), 1);
        assert_eq!(fs::read(&file).unwrap(), b"encoded");
        assert!(!temp_path_for(&file).exists());
    }

    #[test]
    fn test_probe_failure_forces_full_encode() {
        let listing = " V....D h264_nvenc  NVIDIA NVENC H.264 encoder";
        let tools = FakeTools::new(codecs("h264", "aac"), listing, vec![]).failing_probe();
        let (_tmp, tools, t, file) = setup(tools);

        let outcome = t.transcode(&file).unwrap();
        assert_eq!(
            outcome,
            TranscodeOutcome::Transcoded {
                strategy: EncodeStrategy::Full(H264Encoder::Nvenc),
                retried: false
            }
        );
        let calls = tools.encode_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].strategy, EncodeStrategy::Full(H264Encoder::Nvenc));
        assert_eq!(fs::read(&file).unwrap(), b"encoded");
    }

    #[test]
    fn test_gpu_failure_retries_once_in_software() {
        let listing = " V....D h264_nvenc  NVIDIA NVENC H.264 encoder";
        let (_tmp, tools, t, file) = setup(FakeTools::new(
            codecs("vp9", "opus"),
            listing,
            vec![failure("[h264_nvenc] No NVENC capable devices found")],
        ));

        let outcome = t.transcode(&file).unwrap();
        assert_eq!(
            outcome,
            TranscodeOutcome::Transcoded {
                strategy: EncodeStrategy::Full(H264Encoder::Software),
                retried: true
            }
        );
        let calls = tools.encode_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].strategy, EncodeStrategy::Full(H264Encoder::Nvenc));
        assert_eq!(calls[1].strategy, EncodeStrategy::Full(H264Encoder::Software));
    }

    #[test]
    fn test_software_failure_is_terminal() {
        let (_tmp, tools, t, file) = setup(FakeTools::new(
            codecs("vp9", "opus"),
            "",
            vec![failure("cuda_error but libx264 was used")],
        ));

        let result = t.transcode(&file);
        assert!(matches!(
            result,
            Err(TranscodeError::Encode(EncodeError::FfmpegFailed { .. }))
        ));
        assert_eq!(tools.encode_calls().len(), 1);
        assert!(!temp_path_for(&file).exists());
        assert_eq!(fs::read(&file).unwrap(), b"original");
    }

    #[test]
    fn test_second_gpu_failure_is_not_retried_again() {
        let listing = " V....D h264_amf  AMD AMF H.264 Encoder";
        let (_tmp, tools, t, file) = setup(FakeTools::new(
            codecs("vp9", "aac"),
            listing,
            vec![failure("AMF failed"), failure("AMF failed")],
        ));

        assert!(t.transcode(&file).is_err());
        assert_eq!(tools.encode_calls().len(), 2);
        assert!(!temp_path_for(&file).exists());
    }

    #[test]
    fn test_hardware_failure_without_signature_is_terminal() {
        let listing = " V....D h264_nvenc  NVIDIA NVENC H.264 encoder";
        let (_tmp, tools, t, file) = setup(FakeTools::new(
            codecs("vp9", "aac"),
            listing,
            vec![failure("Invalid data found when processing input")],
        ));

        assert!(t.transcode(&file).is_err());
        assert_eq!(tools.encode_calls().len(), 1);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let (tmp, tools, t, _file) = setup(FakeTools::new(codecs("vp9", "aac"), "", vec![]));
        let result = t.transcode(&tmp.path().join("nope.mp4"));
        assert!(matches!(result, Err(TranscodeError::NotFound(_))));
        assert!(tools.encode_calls().is_empty());
    }

    #[test]
    fn test_symlink_resolves_through_host_root() {
        let (tmp, tools, t, file) = setup(FakeTools::new(codecs("vp9", "aac"), "", vec![]));
        let link = tmp.path().join("video.webm");
        std::os::unix::fs::symlink("/mnt/host/bp/UC1/abc.webm", &link).unwrap();

        assert_eq!(t.resolve(&link).unwrap(), file);
        t.transcode(&link).unwrap();
        assert_eq!(tools.encode_calls()[0].input_path, file);
        // Link itself is left alone
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    }
}
