//! FFmpeg invocation.
//!
//! `FfmpegCommand` collects options in two groups: those placed before `-i`
//! (seeking) and those applying to the output. `FfmpegRunner` spawns the
//! process, keeps the tail of stderr for error reports and kills the child
//! when the timeout elapses.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    before_input: Vec<String>,
    options: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            before_input: Vec::new(),
            options: Vec::new(),
        }
    }

    /// Output option `flag value`.
    pub fn option(mut self, flag: &str, value: impl ToString) -> Self {
        self.options.push(flag.to_string());
        self.options.push(value.to_string());
        self
    }

    /// Start decoding at `seconds` (input-side seek, fast and keyframe-accurate).
    pub fn seek(mut self, seconds: f64) -> Self {
        self.before_input.push("-ss".to_string());
        self.before_input.push(format!("{:.3}", seconds.max(0.0)));
        self
    }

    /// H.264 video at the given x264 preset and CRF.
    pub fn h264(self, preset: &str, crf: u8) -> Self {
        self.option("-c:v", "libx264")
            .option("-preset", preset)
            .option("-crf", crf)
    }

    /// AAC audio at `bitrate` (e.g. `128k`).
    pub fn aac(self, bitrate: &str) -> Self {
        self.option("-c:a", "aac").option("-b:a", bitrate)
    }

    /// Put the moov atom first so playback starts before the download ends.
    pub fn faststart(self) -> Self {
        self.option("-movflags", "+faststart")
    }

    pub fn filter(self, video_filter: impl ToString) -> Self {
        self.option("-vf", video_filter)
    }

    /// Force the container; the output name need not carry the extension.
    pub fn container(self, format: &str) -> Self {
        self.option("-f", format)
    }

    pub fn frames(self, count: u32) -> Self {
        self.option("-frames:v", count)
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Full argument list, always overwriting the output.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];
        args.extend(self.before_input.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().into_owned());
        args.extend(self.options.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    /// `None` lets FFmpeg run for as long as it takes.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let ffmpeg = check_ffmpeg()?;
        let args = cmd.build_args();
        debug!(output = %cmd.output_path().display(), "ffmpeg {}", args.join(" "));

        let started = Instant::now();
        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        let tail = tokio::spawn(stderr_tail(stderr));

        let waited: MediaResult<ExitStatus> = match self.timeout {
            None => child.wait().await.map_err(Into::into),
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status.map_err(Into::into),
                Err(_) => {
                    warn!(output = %cmd.output_path().display(), "FFmpeg exceeded {}s, killing", limit.as_secs());
                    let _ = child.kill().await;
                    Err(MediaError::Timeout(limit.as_secs()))
                }
            },
        };
        let stderr = tail.await.unwrap_or_default();
        metrics::histogram!("reel_ffmpeg_duration_seconds").record(started.elapsed().as_secs_f64());

        let status = waited?;
        if status.success() {
            return Ok(());
        }
        Err(MediaError::ffmpeg_failed(
            format!("FFmpeg exited with {status}"),
            (!stderr.is_empty()).then_some(stderr),
            status.code(),
        ))
    }
}

async fn stderr_tail(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

/// Locate `ffmpeg` on PATH.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Locate `ffprobe` on PATH.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
