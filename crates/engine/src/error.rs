//! Failure taxonomy for the pipeline engine.
//!
//! Every failure ends up as the message of a single `[ERROR]` progress event,
//! so the variants carry owned, human-readable descriptions and are cheap to clone.

use thiserror::Error;

/// Error type for anything that can stop a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The executable is missing or could not be spawned
    #[error("{tool} could not be started: {reason}")]
    Launch { tool: String, reason: String },

    /// The tool ran and exited with a non-zero status
    #[error("{tool} exited with code {code}")]
    Execution { tool: String, code: i32 },

    /// The tool was terminated by a signal
    #[error("{tool} crashed (terminated by signal)")]
    Crashed { tool: String },

    /// The tool was stopped on request
    #[error("{tool} was cancelled")]
    Cancelled { tool: String },

    /// Extraction or reassembly could not read/write its files
    #[error("I/O failure: {0}")]
    Io(String),

    /// ffprobe could not measure the input
    #[error("probe failed: {0}")]
    Probe(String),

    /// Submission parameters were rejected
    #[error("invalid parameters: {0}")]
    Validation(String),
}

impl PipelineError {
    /// Wrap an io error with a short description of what was being done
    pub fn io(context: &str, err: std::io::Error) -> Self {
        PipelineError::Io(format!("{}: {}", context, err))
    }
}
