//! Encoding module for codec normalization

pub mod ffmpeg;

pub use ffmpeg::{
    build_ffmpeg_args, build_ffmpeg_command, detect_gpu_failure, select_encoder, EncodeError,
    EncodePlan, EncodeStrategy, H264Encoder,
};
