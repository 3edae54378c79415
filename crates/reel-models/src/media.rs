//! Transcoding output.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Artifacts produced by one successful transcode attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeResult {
    /// Playable rendition
    pub output_path: PathBuf,
    /// JPEG thumbnail
    pub thumbnail_path: PathBuf,
    /// Probed duration of the rendition, whole seconds
    pub duration_sec: u32,
}
