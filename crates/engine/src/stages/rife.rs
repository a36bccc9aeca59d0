//! rife-ncnn-vulkan frame interpolation.

use super::ffmpeg::FRAME_PATTERN;
use crate::config::InterpolationConfig;
use crate::runner::StageInvocation;
use std::path::Path;

/// Build the interpolation invocation.
///
/// `rife -m <model> -i <in> -o <out> -n <target frames> -f %08d.png [extra...]`
///
/// `target_frames` is the measured frame count times the interpolation
/// multiplier; output frames are numbered from 1 like the extracted ones.
pub fn build_interpolate_invocation(
    cfg: &InterpolationConfig,
    input_dir: &Path,
    output_dir: &Path,
    target_frames: u64,
) -> StageInvocation {
    let label = tool_label(&cfg.executable);
    StageInvocation::new(label, &cfg.executable)
        .arg("-m")
        .arg(&cfg.model_path)
        .arg("-i")
        .arg(input_dir)
        .arg("-o")
        .arg(output_dir)
        .arg("-n")
        .arg(target_frames.to_string())
        .arg("-f")
        .arg(FRAME_PATTERN)
        .args(cfg.extra_args.iter())
}

/// File name of an executable path, used to label messages
pub(crate) fn tool_label(executable: &Path) -> String {
    executable
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.to_string_lossy().into_owned())
}
