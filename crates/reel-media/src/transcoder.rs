//! The transcoder capability and its implementations.
//!
//! Callers depend on `Arc<dyn Transcoder>`; which implementation sits behind it
//! is decided once, from [`MediaConfig`], by [`build_transcoder`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use reel_models::TranscodeResult;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::config::{MediaConfig, TranscoderKind};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};
use crate::thumbnail::generate_thumbnail;

/// Validate-then-transcode capability.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Implementation name for logs.
    fn name(&self) -> &'static str;

    /// Cheap pre-check run at ingest. Unreadable media or a duration over the
    /// limit yields [`MediaError::InvalidMedia`].
    async fn validate(&self, input: &Path) -> MediaResult<VideoInfo>;

    /// Produce the rendition and thumbnail for `input` inside `output_dir`,
    /// with filenames derived from `name`.
    async fn transcode(&self, input: &Path, output_dir: &Path, name: &str) -> MediaResult<TranscodeResult>;
}

/// Build the transcoder selected by configuration.
pub fn build_transcoder(config: &MediaConfig) -> Arc<dyn Transcoder> {
    match config.transcoder {
        TranscoderKind::Local => Arc::new(LocalTranscoder::new(config.clone())),
        TranscoderKind::Cloud => Arc::new(CloudTranscoder::new(config.max_duration_secs)),
    }
}

/// Deterministic artifact locations for one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub output: PathBuf,
    pub partial: PathBuf,
    pub thumbnail: PathBuf,
}

/// Paths are a pure function of `(output_dir, name)`, so a retried attempt
/// overwrites whatever a previous attempt left behind.
pub fn output_paths(output_dir: &Path, name: &str) -> MediaResult<OutputPaths> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(MediaError::internal(format!("unsafe output name '{name}'")));
    }
    Ok(OutputPaths {
        output: output_dir.join(format!("{name}.mp4")),
        partial: output_dir.join(format!("{name}.partial.mp4")),
        thumbnail: output_dir.join(format!("{name}_thumb.jpg")),
    })
}

/// Enforce the duration limit on probed media.
pub fn check_duration(info: &VideoInfo, max_duration_secs: u32) -> MediaResult<()> {
    let secs = info.whole_seconds();
    if secs > max_duration_secs {
        return Err(MediaError::invalid_media(format!(
            "video is {secs}s long, the limit is {max_duration_secs}s"
        )));
    }
    Ok(())
}

async fn probe_and_check(input: &Path, max_duration_secs: u32) -> MediaResult<VideoInfo> {
    let info = match probe_video(input).await {
        Ok(info) => info,
        // Missing binaries are an operator problem, not a bad upload.
        Err(e @ (MediaError::FfprobeNotFound | MediaError::Io(_))) => return Err(e),
        Err(MediaError::InvalidMedia(reason)) => return Err(MediaError::InvalidMedia(reason)),
        Err(e) => return Err(MediaError::invalid_media(format!("unreadable media: {e}"))),
    };
    check_duration(&info, max_duration_secs)?;
    Ok(info)
}

/// Transcodes with FFmpeg on the local host.
#[derive(Debug, Clone)]
pub struct LocalTranscoder {
    config: MediaConfig,
    runner: FfmpegRunner,
}

impl LocalTranscoder {
    pub fn new(config: MediaConfig) -> Self {
        let runner = FfmpegRunner::new(config.ffmpeg_timeout_secs.map(Duration::from_secs));
        Self { config, runner }
    }

    fn rendition_command(&self, input: &Path, partial: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, partial)
            .h264("fast", 23)
            .aac("128k")
            .faststart()
            .filter(format!("scale={}:-2", self.config.rendition_width))
            .container("mp4")
    }
}

#[async_trait]
impl Transcoder for LocalTranscoder {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn validate(&self, input: &Path) -> MediaResult<VideoInfo> {
        probe_and_check(input, self.config.max_duration_secs).await
    }

    async fn transcode(&self, input: &Path, output_dir: &Path, name: &str) -> MediaResult<TranscodeResult> {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
        let paths = output_paths(output_dir, name)?;

        debug!(input = %input.display(), output = %paths.output.display(), "Encoding rendition");
        let cmd = self.rendition_command(input, &paths.partial);
        if let Err(e) = self.runner.run(&cmd).await {
            if let Err(cleanup) = tokio::fs::remove_file(&paths.partial).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial rendition {}: {}", paths.partial.display(), cleanup);
                }
            }
            return Err(e);
        }
        tokio::fs::rename(&paths.partial, &paths.output).await?;

        let info = probe_video(&paths.output).await?;
        generate_thumbnail(
            &self.runner,
            &paths.output,
            &paths.thumbnail,
            info.duration / 2.0,
            &self.config.thumbnail_size,
        )
        .await?;

        info!(
            name = %name,
            duration_sec = info.whole_seconds(),
            "Transcoded {}",
            paths.output.display()
        );

        Ok(TranscodeResult {
            output_path: paths.output,
            thumbnail_path: paths.thumbnail,
            duration_sec: info.whole_seconds(),
        })
    }
}

/// Placeholder for a hosted transcoding service.
#[derive(Debug, Clone)]
pub struct CloudTranscoder {
    max_duration_secs: u32,
}

impl CloudTranscoder {
    pub fn new(max_duration_secs: u32) -> Self {
        Self { max_duration_secs }
    }
}

#[async_trait]
impl Transcoder for CloudTranscoder {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn validate(&self, input: &Path) -> MediaResult<VideoInfo> {
        probe_and_check(input, self.max_duration_secs).await
    }

    async fn transcode(&self, _input: &Path, _output_dir: &Path, _name: &str) -> MediaResult<TranscodeResult> {
        Err(MediaError::NotImplemented(
            "cloud transcoding is not available".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(duration: f64) -> VideoInfo {
        VideoInfo {
            duration,
            width: 1080,
            height: 1920,
            codec: "h264".to_string(),
            has_audio: true,
        }
    }

    #[test]
    fn test_duration_limit() {
        assert!(check_duration(&info(90.0), 90).is_ok());
        // Fractional seconds over the limit are truncated.
        assert!(check_duration(&info(90.7), 90).is_ok());
        let err = check_duration(&info(95.0), 90).unwrap_err();
        assert!(matches!(err, MediaError::InvalidMedia(_)));
    }

    #[test]
    fn test_output_paths_are_deterministic() {
        let dir = Path::new("/data/uploads/processed");
        let first = output_paths(dir, "v1").unwrap();
        let second = output_paths(dir, "v1").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.output, dir.join("v1.mp4"));
        assert_eq!(first.thumbnail, dir.join("v1_thumb.jpg"));
        assert_ne!(first.partial, first.output);
    }

    #[test]
    fn test_output_paths_reject_traversal() {
        let dir = Path::new("/data");
        assert!(output_paths(dir, "../x").is_err());
        assert!(output_paths(dir, "").is_err());
        assert!(output_paths(dir, ".hidden").is_err());
    }

    #[test]
    fn test_rendition_command_shape() {
        let transcoder = LocalTranscoder::new(MediaConfig::default());
        let args = transcoder
            .rendition_command(Path::new("in.mov"), Path::new("out/v1.partial.mp4"))
            .build_args();
        assert!(args.contains(&"scale=720:-2".to_string()));
        assert!(args.contains(&"aac".to_string()));
        let f = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f + 1], "mp4");
    }

    #[tokio::test]
    async fn test_cloud_transcode_not_implemented() {
        let cloud = CloudTranscoder::new(90);
        let err = cloud
            .transcode(Path::new("in.mp4"), Path::new("/tmp"), "v1")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NotImplemented(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_local_transcode_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalTranscoder::new(MediaConfig::default());
        let err = local
            .transcode(&dir.path().join("missing.mp4"), dir.path(), "v1")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[test]
    fn test_build_transcoder_by_config() {
        let config = MediaConfig {
            transcoder: TranscoderKind::Cloud,
            ..Default::default()
        };
        assert_eq!(build_transcoder(&config).name(), "cloud");
        assert_eq!(build_transcoder(&MediaConfig::default()).name(), "local");
    }
}
