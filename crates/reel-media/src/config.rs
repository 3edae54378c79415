//! Transcoder configuration.

use std::str::FromStr;

/// Which transcoder implementation to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscoderKind {
    /// FFmpeg on the worker host
    #[default]
    Local,
    /// Hosted transcoding service (not wired up yet)
    Cloud,
}

impl FromStr for TranscoderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "ffmpeg" => Ok(TranscoderKind::Local),
            "cloud" => Ok(TranscoderKind::Cloud),
            other => Err(format!("unknown transcoder '{other}'")),
        }
    }
}

/// Media configuration.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Transcoder implementation
    pub transcoder: TranscoderKind,
    /// Longest accepted upload, whole seconds
    pub max_duration_secs: u32,
    /// Width of the rendition (height keeps aspect)
    pub rendition_width: u32,
    /// Thumbnail size as `WxH`
    pub thumbnail_size: String,
    /// Kill FFmpeg if a single invocation runs longer than this
    pub ffmpeg_timeout_secs: Option<u64>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            transcoder: TranscoderKind::Local,
            max_duration_secs: 90,
            rendition_width: 720,
            thumbnail_size: "320x240".to_string(),
            ffmpeg_timeout_secs: Some(900), // 15 minutes
        }
    }
}

impl MediaConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            transcoder: std::env::var("TRANSCODER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.transcoder),
            max_duration_secs: std::env::var("MAX_VIDEO_DURATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_duration_secs),
            rendition_width: std::env::var("RENDITION_WIDTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rendition_width),
            thumbnail_size: std::env::var("THUMBNAIL_SIZE").unwrap_or(defaults.thumbnail_size),
            ffmpeg_timeout_secs: match std::env::var("FFMPEG_TIMEOUT_SECS") {
                Ok(v) if v == "0" => None,
                Ok(v) => v.parse().ok().or(defaults.ffmpeg_timeout_secs),
                Err(_) => defaults.ffmpeg_timeout_secs,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcoder_kind_parsing() {
        assert_eq!("local".parse::<TranscoderKind>().unwrap(), TranscoderKind::Local);
        assert_eq!(" Cloud ".parse::<TranscoderKind>().unwrap(), TranscoderKind::Cloud);
        assert!("mux".parse::<TranscoderKind>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = MediaConfig::default();
        assert_eq!(config.max_duration_secs, 90);
        assert_eq!(config.transcoder, TranscoderKind::Local);
    }
}
