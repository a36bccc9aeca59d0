//! Preflight checks run before a batch is submitted.
//!
//! Verifies that the tools the requested run needs can actually be started:
//! - `ffmpeg -version` and `ffprobe -version` succeed and report a version
//! - the interpolation tool and its model, when interpolation is requested
//! - the upscaling tool and its model directory, when upscaling is requested

use crate::config::Config;
use crate::params::Multiplier;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("{tool} not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("could not parse {tool} version from output: {output}")]
    Version { tool: String, output: String },

    #[error("{tool} model not found at {}", .path.display())]
    ModelMissing { tool: String, path: PathBuf },
}

/// Parse the major version from `<program> -version` output.
///
/// Handles release builds (`ffmpeg version 6.1.1 ...`) and
/// n-prefixed git builds (`ffmpeg version n8.0-...`).
pub fn parse_tool_version(version_output: &str, program: &str) -> Option<u32> {
    let marker = format!("{} version", program.to_lowercase());
    let line = version_output
        .lines()
        .map(str::to_lowercase)
        .find(|line| line.contains(&marker))?;

    let version = line
        .split(marker.as_str())
        .nth(1)?
        .split_whitespace()
        .next()?
        .trim_start_matches('n')
        .to_string();

    version.split(['.', '-']).next()?.parse().ok()
}

/// Run `<path> -version` and return the major version
pub fn check_ffmpeg_tool(path: &Path, program: &str) -> Result<u32, PreflightError> {
    let output = Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| PreflightError::ToolUnavailable {
            tool: program.to_string(),
            reason: format!("{} -version failed: {}", path.display(), e),
        })?;

    if !output.status.success() {
        return Err(PreflightError::ToolUnavailable {
            tool: program.to_string(),
            reason: format!("{} -version exited with {}", path.display(), output.status),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let major = parse_tool_version(&stdout, program).ok_or_else(|| PreflightError::Version {
        tool: program.to_string(),
        output: stdout.lines().next().unwrap_or("(empty)").to_string(),
    })?;
    tracing::info!(tool = program, major, "found tool");
    Ok(major)
}

/// The ncnn tools exit non-zero on `-h`, so only a failed spawn counts.
fn check_launchable(path: &Path, tool: &str) -> Result<(), PreflightError> {
    Command::new(path)
        .arg("-h")
        .stdin(Stdio::null())
        .output()
        .map(|_| ())
        .map_err(|e| PreflightError::ToolUnavailable {
            tool: tool.to_string(),
            reason: format!("{} could not be started: {}", path.display(), e),
        })
}

fn check_model(path: &Path, tool: &str) -> Result<(), PreflightError> {
    if path.exists() {
        Ok(())
    } else {
        Err(PreflightError::ModelMissing {
            tool: tool.to_string(),
            path: path.to_path_buf(),
        })
    }
}

/// Run every check the requested multipliers need, in pipeline order
pub fn run_preflight(
    cfg: &Config,
    interpolation: Multiplier,
    upscale: Multiplier,
) -> Result<(), PreflightError> {
    check_ffmpeg_tool(&cfg.tools.ffmpeg, "ffmpeg")?;
    check_ffmpeg_tool(&cfg.tools.ffprobe, "ffprobe")?;

    if !interpolation.is_passthrough() {
        check_launchable(&cfg.interpolation.executable, "interpolation tool")?;
        check_model(&cfg.interpolation.model_path, "interpolation tool")?;
    }
    if !upscale.is_passthrough() {
        check_launchable(&cfg.upscale.executable, "upscaling tool")?;
        check_model(&cfg.upscale.model_dir, "upscaling tool")?;
    }
    Ok(())
}
