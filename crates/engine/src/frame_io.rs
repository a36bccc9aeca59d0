//! Frame extraction and reassembly.
//!
//! The engine drives extraction one effect at a time (probe, ffmpeg, count)
//! so it can cancel between steps, and counts frames with
//! [`count_frames_async`]. [`extract`] and [`reassemble`] are standalone
//! entry points running the same steps back to back, for callers that use
//! frame I/O without an [`Engine`](crate::engine::Engine).

use crate::config::{EncodeConfig, ToolsConfig};
use crate::error::PipelineError;
use crate::frame_rate::FrameRate;
use crate::probe::probe_file;
use crate::runner::{Notify, RunnerEvent, StageRunner};
use crate::stages::{
    build_extract_invocation, build_reassemble_invocation, ReassembleParams, FRAME_EXTENSION,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// What extraction measured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extracted {
    pub frame_rate: FrameRate,
    pub frame_count: u64,
}

/// Count the frame images directly inside `dir`
pub fn count_frames(dir: &Path) -> Result<u64, PipelineError> {
    let mut count = 0;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            PipelineError::Io(format!("reading frames in {}: {}", dir.display(), e))
        })?;
        let is_frame = entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(FRAME_EXTENSION))
                .unwrap_or(false);
        if is_frame {
            count += 1;
        }
    }
    Ok(count)
}

/// [`count_frames`] on the blocking pool
pub async fn count_frames_async(dir: PathBuf) -> Result<u64, PipelineError> {
    tokio::task::spawn_blocking(move || count_frames(&dir))
        .await
        .map_err(|e| PipelineError::Io(format!("frame count task failed: {}", e)))?
}

/// Tool output goes to the debug log only
fn log_output(tool: &'static str) -> Notify {
    Arc::new(move |event| {
        if let RunnerEvent::Output(line) = event {
            tracing::debug!(tool, "{}", line);
        }
    })
}

/// Decode `input` into numbered frames under `frames_dir`. Standalone; the
/// engine runs these steps as separate effects.
///
/// The rate is the container's nominal rate; the count is what ffmpeg wrote.
pub async fn extract(
    tools: &ToolsConfig,
    runner: &StageRunner,
    input: &Path,
    frames_dir: &Path,
) -> Result<Extracted, PipelineError> {
    let probe = probe_file(&tools.ffprobe, input)
        .await
        .map_err(|e| PipelineError::Probe(e.to_string()))?;

    tokio::fs::create_dir_all(frames_dir)
        .await
        .map_err(|e| PipelineError::io("creating frames directory", e))?;

    let invocation = build_extract_invocation(&tools.ffmpeg, input, frames_dir, probe.frame_rate);
    let label = invocation.label.clone();
    runner
        .start(invocation, log_output("ffmpeg"))
        .wait()
        .await
        .into_result(&label)?;

    let frame_count = count_frames_async(frames_dir.to_path_buf()).await?;
    if frame_count == 0 {
        return Err(PipelineError::Io(format!(
            "no frames extracted from {}",
            input.display()
        )));
    }

    Ok(Extracted {
        frame_rate: probe.frame_rate,
        frame_count,
    })
}

/// Encode the numbered frames of `params.frames_dir` into `params.output_path`.
/// Standalone; the engine launches the same invocation through its runner.
pub async fn reassemble(
    ffmpeg: &Path,
    encode: &EncodeConfig,
    runner: &StageRunner,
    params: &ReassembleParams,
) -> Result<(), PipelineError> {
    let invocation = build_reassemble_invocation(ffmpeg, encode, params);
    let label = invocation.label.clone();
    runner
        .start(invocation, log_output("ffmpeg"))
        .wait()
        .await
        .into_result(&label)
}
