//! realesrgan-ncnn-vulkan frame upscaling.

use super::ffmpeg::FRAME_EXTENSION;
use super::rife::tool_label;
use crate::config::UpscaleConfig;
use crate::runner::StageInvocation;
use std::path::Path;

/// Build the upscaling invocation.
///
/// `realesrgan -m <model dir> -n <model name> -i <in> -o <out> -s <scale> -f png [extra...]`
///
/// Real-ESRGAN keeps input file names, so the `%08d.png` numbering survives.
pub fn build_upscale_invocation(
    cfg: &UpscaleConfig,
    input_dir: &Path,
    output_dir: &Path,
    scale: u32,
) -> StageInvocation {
    StageInvocation::new(tool_label(&cfg.executable), &cfg.executable)
        .arg("-m")
        .arg(&cfg.model_dir)
        .arg("-n")
        .arg(&cfg.model_name)
        .arg("-i")
        .arg(input_dir)
        .arg("-o")
        .arg(output_dir)
        .arg("-s")
        .arg(scale.to_string())
        .arg("-f")
        .arg(FRAME_EXTENSION)
        .args(cfg.extra_args.iter())
}
