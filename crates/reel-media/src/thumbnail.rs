//! Thumbnail generation.

use std::path::Path;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Grab one JPEG frame at `at_secs` and scale it to `size` (`WxH`).
pub async fn generate_thumbnail(
    runner: &FfmpegRunner,
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    at_secs: f64,
    size: &str,
) -> MediaResult<()> {
    let cmd = thumbnail_command(video_path.as_ref(), output_path.as_ref(), at_secs, size);
    runner.run(&cmd).await
}

fn thumbnail_command(video_path: &Path, output_path: &Path, at_secs: f64, size: &str) -> FfmpegCommand {
    FfmpegCommand::new(video_path, output_path)
        .seek(at_secs)
        .frames(1)
        .filter(thumbnail_filter(size))
        .option("-q:v", 3)
}

fn thumbnail_filter(size: &str) -> String {
    format!("scale={}", size.replace('x', ":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_filter() {
        assert_eq!(thumbnail_filter("320x240"), "scale=320:240");
    }

    #[test]
    fn test_negative_offset_clamps_to_start() {
        let args = thumbnail_command(Path::new("a.mp4"), Path::new("a.jpg"), -1.0, "320x240").build_args();
        let seek = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[seek + 1], "0.000");
    }
}
