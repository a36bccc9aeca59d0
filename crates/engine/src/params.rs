//! Submission parameters.
//!
//! A `JobParameters` value is built once per submission and never mutated by
//! the engine; per-file state lives in [`crate::job::PipelineJob`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Error type for rejected submissions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("unsupported multiplier {0} (expected 1, 2 or 4)")]
    UnsupportedMultiplier(u32),

    #[error("Please provide non-empty paths: no input files given")]
    NoInputs,

    #[error("Please provide non-empty paths: no output directory given")]
    EmptyOutputDir,

    #[error("output directory does not exist: {0}")]
    OutputDirMissing(PathBuf),

    #[error("output directory is not writable: {0}")]
    OutputDirNotWritable(PathBuf),

    #[error("input file does not exist: {0}")]
    InputMissing(PathBuf),

    #[error("invalid output format: {0:?}")]
    InvalidFormat(String),
}

/// Interpolation / upscaling factor. `One` means the stage is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum Multiplier {
    #[default]
    One,
    Two,
    Four,
}

impl Multiplier {
    pub const ALL: [Multiplier; 3] = [Multiplier::One, Multiplier::Two, Multiplier::Four];

    pub fn factor(self) -> u32 {
        match self {
            Multiplier::One => 1,
            Multiplier::Two => 2,
            Multiplier::Four => 4,
        }
    }

    /// True when the stage does nothing and its input is passed through
    pub fn is_passthrough(self) -> bool {
        self == Multiplier::One
    }
}

impl TryFrom<u32> for Multiplier {
    type Error = ParamsError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Multiplier::One),
            2 => Ok(Multiplier::Two),
            4 => Ok(Multiplier::Four),
            other => Err(ParamsError::UnsupportedMultiplier(other)),
        }
    }
}

impl From<Multiplier> for u32 {
    fn from(m: Multiplier) -> u32 {
        m.factor()
    }
}

impl FromStr for Multiplier {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .trim_end_matches(['x', 'X'])
            .parse()
            .map_err(|_| ParamsError::UnsupportedMultiplier(0))?;
        Multiplier::try_from(value)
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.factor())
    }
}

/// Everything one submission needs, fixed for the whole batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    pub interpolation: Multiplier,
    pub upscale: Multiplier,
    /// Input files, processed in order
    pub inputs: Vec<PathBuf>,
    /// Directory receiving artifacts and per-job working directories
    pub output_dir: PathBuf,
    /// Container/extension override; `None` keeps the input's extension
    pub format_override: Option<String>,
    pub reveal_on_completion: bool,
}

impl JobParameters {
    /// Parameters with both stages skipped, no override and no reveal
    pub fn new(inputs: Vec<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpolation: Multiplier::One,
            upscale: Multiplier::One,
            inputs,
            output_dir: output_dir.into(),
            format_override: None,
            reveal_on_completion: false,
        }
    }

    pub fn with_interpolation(mut self, m: Multiplier) -> Self {
        self.interpolation = m;
        self
    }

    pub fn with_upscale(mut self, m: Multiplier) -> Self {
        self.upscale = m;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format_override = Some(format.into());
        self
    }

    pub fn with_reveal(mut self, reveal: bool) -> Self {
        self.reveal_on_completion = reveal;
        self
    }

    /// The override as a bare lowercase extension (`".GIF"` -> `"gif"`),
    /// or `None` when absent or blank.
    pub fn normalized_format(&self) -> Option<String> {
        self.format_override
            .as_deref()
            .map(|f| f.trim().trim_start_matches('.').to_lowercase())
            .filter(|f| !f.is_empty())
    }

    /// Check the submission before anything is queued.
    ///
    /// Inputs must be non-empty and exist; the output directory must be
    /// non-empty, exist, and accept a new file from this process.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.inputs.is_empty() {
            return Err(ParamsError::NoInputs);
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ParamsError::EmptyOutputDir);
        }

        let meta = std::fs::metadata(&self.output_dir)
            .map_err(|_| ParamsError::OutputDirMissing(self.output_dir.clone()))?;
        if !meta.is_dir() {
            return Err(ParamsError::OutputDirMissing(self.output_dir.clone()));
        }
        if tempfile::tempfile_in(&self.output_dir).is_err() {
            return Err(ParamsError::OutputDirNotWritable(self.output_dir.clone()));
        }

        if let Some(missing) = self.inputs.iter().find(|p| !p.is_file()) {
            return Err(ParamsError::InputMissing(missing.clone()));
        }

        if let Some(format) = self.normalized_format() {
            if !format.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ParamsError::InvalidFormat(format));
            }
        }

        Ok(())
    }
}
