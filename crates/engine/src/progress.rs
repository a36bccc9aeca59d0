//! Progress events: the engine's only observable output besides artifacts.
//!
//! Events carry structured fields; `Display` renders the textual contract
//! consumed by log readers (`[INFO i/total] message` and `[ERROR] message`).

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Error,
}

/// What an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// A stage is starting or a tool is being launched
    Phase,
    /// A line of diagnostic output from the running tool
    ToolOutput,
    /// One input reached its artifact
    JobFinished,
    /// The queue is exhausted
    BatchFinished,
    /// One input failed and was skipped
    JobFailed,
    /// A failure stopped the batch
    Halted,
    /// A submission was refused
    Rejected,
    /// The batch was cancelled on request
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub severity: Severity,
    pub kind: ProgressKind,
    /// 1-based index of the current job
    pub index: usize,
    pub total: usize,
    pub message: String,
}

impl ProgressEvent {
    pub fn info(kind: ProgressKind, index: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            kind,
            index,
            total,
            message: message.into(),
        }
    }

    pub fn error(kind: ProgressKind, index: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            index,
            total,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// True for the events after which the engine is idle again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ProgressKind::BatchFinished
                | ProgressKind::Halted
                | ProgressKind::Rejected
                | ProgressKind::Cancelled
        )
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Info => write!(f, "[INFO {}/{}] {}", self.index, self.total, self.message),
            Severity::Error => write!(f, "[ERROR] {}", self.message),
        }
    }
}
