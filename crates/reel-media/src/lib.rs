//! Transcoder adapter over the FFmpeg CLI.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a runner with timeout support
//! - FFprobe media inspection
//! - Midpoint thumbnail extraction
//! - The `Transcoder` capability trait with Local and Cloud implementations

pub mod command;
pub mod config;
pub mod error;
pub mod probe;
pub mod thumbnail;
pub mod transcoder;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use config::{MediaConfig, TranscoderKind};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use thumbnail::generate_thumbnail;
pub use transcoder::{
    build_transcoder, check_duration, output_paths, CloudTranscoder, LocalTranscoder, OutputPaths,
    Transcoder,
};
