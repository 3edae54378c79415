//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Video file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Video codec
    pub codec: String,
    /// Whether an audio stream is present
    pub has_audio: bool,
}

impl VideoInfo {
    /// Duration truncated to whole seconds, the unit duration limits are expressed in.
    pub fn whole_seconds(&self) -> u32 {
        if self.duration.is_finite() && self.duration > 0.0 {
            self.duration.floor() as u32
        } else {
            0
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Inspect `path` with FFprobe.
///
/// A file FFprobe can read but that has no video stream is `InvalidMedia`.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    let ffprobe = check_ffprobe()?;

    let output = Command::new(ffprobe)
        .args(["-v", "error", "-of", "json"])
        .args(["-show_entries", "format=duration:stream=codec_type,codec_name,width,height,duration"])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(MediaError::FfprobeFailed {
            message: format!("cannot read {}", path.display()),
            stderr: (!stderr.is_empty()).then_some(stderr),
        });
    }

    parse_probe_output(&output.stdout)
}

fn parse_seconds(value: Option<&String>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

fn parse_probe_output(raw: &[u8]) -> MediaResult<VideoInfo> {
    let report: ProbeReport = serde_json::from_slice(raw)?;

    let video = report
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::invalid_media("no video stream"))?;

    // Some containers only carry the duration on the stream.
    let duration = parse_seconds(report.format.duration.as_ref())
        .or_else(|| parse_seconds(video.duration.as_ref()))
        .unwrap_or(0.0);

    Ok(VideoInfo {
        duration,
        width: video.width.unwrap_or_default(),
        height: video.height.unwrap_or_default(),
        codec: video.codec_name.clone().unwrap_or_default(),
        has_audio: report.streams.iter().any(|s| s.codec_type == "audio"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let raw = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1080, "height": 1920},
                {"codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"duration": "61.480000"}
        }"#;

        let info = parse_probe_output(raw).unwrap();
        assert_eq!(info.width, 1080);
        assert_eq!(info.codec, "h264");
        assert!(info.has_audio);
        assert_eq!(info.whole_seconds(), 61);
    }

    #[test]
    fn test_audio_only_is_invalid() {
        let raw = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "12.0"}}"#;
        let err = parse_probe_output(raw).unwrap_err();
        assert!(matches!(err, MediaError::InvalidMedia(_)));
    }

    #[test]
    fn test_stream_duration_fallback() {
        let raw = br#"{"streams": [{"codec_type": "video", "duration": "8.5"}], "format": {"duration": "N/A"}}"#;
        let info = parse_probe_output(raw).unwrap();
        assert_eq!(info.whole_seconds(), 8);
    }

    #[test]
    fn test_missing_duration_is_zero() {
        let raw = br#"{"streams": [{"codec_type": "video"}], "format": {}}"#;
        let info = parse_probe_output(raw).unwrap();
        assert_eq!(info.whole_seconds(), 0);
    }
}
