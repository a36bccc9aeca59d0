//! Input measurement with ffprobe.
//!
//! The frame rate reported here is the container's *nominal* rate
//! (`r_frame_rate` of the first video stream, `avg_frame_rate` as fallback).
//! Variable-frame-rate sources are therefore re-timed to a constant rate on
//! reassembly. This is an accepted approximation, not a bug.

use crate::frame_rate::FrameRate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe ran but reported failure.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// The file has no video stream.
    #[error("no video stream found")]
    NoVideoStream,

    /// The video stream reports no usable frame rate.
    #[error("no usable frame rate (r_frame_rate={0:?})")]
    NoFrameRate(String),

    /// ffprobe could not be started.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the pipeline needs to know about an input before extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    /// Nominal frame rate of the first video stream.
    pub frame_rate: FrameRate,
    /// Whether reassembly has an audio track to carry over
    pub has_audio: bool,
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub r_frame_rate: Option<String>,
        pub avg_frame_rate: Option<String>,
    }
}

/// Probes a video file using ffprobe.
///
/// Runs `ffprobe -v quiet -print_format json -show_streams -show_format <path>`
/// and parses the JSON output.
pub async fn probe_file(ffprobe: &Path, path: &Path) -> Result<ProbeResult, ProbeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_output(&stdout)
}

/// Parses ffprobe JSON output into a ProbeResult.
pub fn parse_ffprobe_output(json_str: &str) -> Result<ProbeResult, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();

    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeError::NoVideoStream)?;

    let has_audio = streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let frame_rate = [&video.r_frame_rate, &video.avg_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|r| FrameRate::parse(r))
        .ok_or_else(|| {
            ProbeError::NoFrameRate(video.r_frame_rate.clone().unwrap_or_default())
        })?;

    Ok(ProbeResult {
        frame_rate,
        has_audio,
    })
}
