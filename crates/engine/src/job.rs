//! Per-file working record.
//!
//! A `PipelineJob` is created when an input is popped from the queue and is
//! dropped when its stage chain finishes, fails or is cancelled. Working
//! directories are namespaced by the job id so queued files never share them;
//! they are only created when the stage that writes them actually runs.

use crate::frame_rate::FrameRate;
use crate::params::JobParameters;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Extension used when the input has none and no override is given
pub const FALLBACK_FORMAT: &str = "mp4";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineJob {
    /// Short unique id used to namespace working directories
    pub id: String,
    /// 1-based position in the batch
    pub index: usize,
    pub input_path: PathBuf,
    /// Input file name without its extension
    pub basename: String,
    /// Resolved output container (override or input extension)
    pub format: String,
    pub output_path: PathBuf,
    /// Extracted frames
    pub frames_dir: PathBuf,
    /// Interpolated frames; equals `frames_dir` when interpolation is skipped
    pub interpolated_dir: Option<PathBuf>,
    /// Upscaled frames; equals `interpolated_dir` when upscaling is skipped
    pub upscaled_dir: Option<PathBuf>,
    pub frame_rate: Option<FrameRate>,
    pub frame_count: Option<u64>,
    /// Whether the input has an audio track; assumed until probed
    pub has_audio: bool,
}

/// Split a path into (basename, extension), both as UTF-8 (lossy).
pub fn split_name(path: &Path) -> (String, Option<String>) {
    let basename = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty());
    (basename, extension)
}

/// `<basename><suffix>.<format>`, e.g. `clip_anime2x.mp4`
pub fn output_file_name(basename: &str, suffix: &str, format: &str) -> String {
    format!("{}{}.{}", basename, suffix, format)
}

impl PipelineJob {
    /// Derive a job for `input` with a fresh random id
    pub fn new(index: usize, input: &Path, params: &JobParameters, suffix: &str) -> Self {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self::with_id(id, index, input, params, suffix)
    }

    /// Derive a job with a caller-chosen id
    pub fn with_id(
        id: String,
        index: usize,
        input: &Path,
        params: &JobParameters,
        suffix: &str,
    ) -> Self {
        let (basename, extension) = split_name(input);
        let format = params
            .normalized_format()
            .or(extension)
            .unwrap_or_else(|| FALLBACK_FORMAT.to_string());
        let output_path = params
            .output_dir
            .join(output_file_name(&basename, suffix, &format));
        let frames_dir = params.output_dir.join(format!("frames_{}", id));

        Self {
            id,
            index,
            input_path: input.to_path_buf(),
            basename,
            format,
            output_path,
            frames_dir,
            interpolated_dir: None,
            upscaled_dir: None,
            frame_rate: None,
            frame_count: None,
            has_audio: true,
        }
    }

    /// GIF output takes the palette path without audio
    pub fn is_gif(&self) -> bool {
        self.format.eq_ignore_ascii_case("gif")
    }

    /// Directory the interpolation stage writes to when it runs
    pub fn interpolation_target(&self) -> PathBuf {
        sibling(&self.frames_dir, "_inter")
    }

    /// Directory the upscaling stage writes to when it runs
    pub fn upscale_target(&self) -> PathBuf {
        sibling(&self.frames_dir, "_up")
    }

    /// Input of the interpolation stage
    pub fn interpolation_source(&self) -> &Path {
        &self.frames_dir
    }

    /// Input of the upscaling stage
    pub fn upscale_source(&self) -> &Path {
        self.interpolated_dir.as_deref().unwrap_or(&self.frames_dir)
    }

    /// Frames the reassembly stage encodes
    pub fn reassembly_source(&self) -> &Path {
        self.upscaled_dir
            .as_deref()
            .unwrap_or_else(|| self.upscale_source())
    }

    /// Every working directory this job may have created, in stage order
    pub fn working_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.frames_dir.clone()];
        for dir in [&self.interpolated_dir, &self.upscaled_dir].into_iter().flatten() {
            if !dirs.contains(dir) {
                dirs.push(dir.clone());
            }
        }
        dirs
    }
}

fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
