//! ffmpeg invocations for frame extraction and reassembly.

use crate::config::EncodeConfig;
use crate::frame_rate::FrameRate;
use crate::runner::StageInvocation;
use std::path::{Path, PathBuf};

/// Fixed-width frame numbering: lexicographic order equals chronological order
pub const FRAME_PATTERN: &str = "%08d.png";
pub const FRAME_EXTENSION: &str = "png";

/// Palette pass for decent GIF colours
const GIF_FILTER: &str = "[0:v]split[a][b];[a]palettegen[p];[b][p]paletteuse";

/// Build the extraction invocation.
///
/// `ffmpeg -hide_banner -y -i <input> -map 0:v:0 -r <rate> -start_number 1 <dir>/%08d.png`
///
/// Sampling at the nominal `rate` keeps the extracted sequence constant-rate
/// even for variable-frame-rate sources, which is what reassembly assumes.
pub fn build_extract_invocation(
    ffmpeg: &Path,
    input: &Path,
    frames_dir: &Path,
    rate: FrameRate,
) -> StageInvocation {
    StageInvocation::new("ffmpeg", ffmpeg)
        .args(["-hide_banner", "-y", "-i"])
        .arg(input)
        .args(["-map", "0:v:0", "-r"])
        .arg(rate.to_string())
        .args(["-start_number", "1"])
        .arg(frames_dir.join(FRAME_PATTERN))
}

/// Everything the reassembly stage needs
#[derive(Debug, Clone, PartialEq)]
pub struct ReassembleParams {
    /// Directory holding the numbered frames
    pub frames_dir: PathBuf,
    /// Playback rate of the sequence (nominal rate times interpolation multiplier)
    pub frame_rate: FrameRate,
    /// Original input when it carries an audio track
    pub audio_source: Option<PathBuf>,
    pub output_path: PathBuf,
    /// GIF path: palette filter, no audio
    pub gif: bool,
}

/// Build the reassembly invocation.
///
/// Video: first video stream from the frames, first audio stream (optional,
/// `1:a:0?`) from the original input when it has one. GIF: palette filter,
/// no audio.
pub fn build_reassemble_invocation(
    ffmpeg: &Path,
    encode: &EncodeConfig,
    params: &ReassembleParams,
) -> StageInvocation {
    let inv = StageInvocation::new("ffmpeg", ffmpeg)
        .args(["-hide_banner", "-y", "-framerate"])
        .arg(params.frame_rate.to_string())
        .args(["-start_number", "1", "-i"])
        .arg(params.frames_dir.join(FRAME_PATTERN));

    let inv = match (&params.audio_source, params.gif) {
        (_, true) => inv.args(["-filter_complex", GIF_FILTER, "-loop", "0"]),
        (Some(audio), false) => inv
            .arg("-i")
            .arg(audio)
            .args(["-map", "0:v:0", "-map", "1:a:0?", "-c:v"])
            .arg(&encode.video_codec)
            .arg("-pix_fmt")
            .arg(&encode.pixel_format)
            .arg("-c:a")
            .arg(&encode.audio_codec)
            .arg("-shortest"),
        (None, false) => inv
            .args(["-map", "0:v:0", "-c:v"])
            .arg(&encode.video_codec)
            .arg("-pix_fmt")
            .arg(&encode.pixel_format),
    };

    inv.arg(&params.output_path)
}
