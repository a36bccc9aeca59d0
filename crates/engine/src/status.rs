//! Status snapshot shared between the engine driver and observers.

use crate::machine::{EngineState, PipelineMachine};
use crate::progress::ProgressEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Point-in-time view of the engine, refreshed after every state-machine step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StatusSnapshot {
    pub timestamp_unix_ms: i64,
    pub state: EngineState,
    pub current_input: Option<String>,
    /// 1-based index of the running job, 0 before the first one starts
    pub current_index: usize,
    pub total: usize,
    pub remaining: usize,
    pub finished: usize,
    pub failed: usize,
    /// Textual form of the last progress event
    pub last_message: Option<String>,
}

pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(RwLock::new(StatusSnapshot::default()))
}

impl StatusSnapshot {
    pub fn capture(machine: &PipelineMachine, last: Option<&ProgressEvent>) -> Self {
        let queue = machine.queue();
        Self {
            timestamp_unix_ms: timestamp_ms(),
            state: machine.state(),
            current_input: machine
                .current_job()
                .map(|job| job.input_path.display().to_string()),
            current_index: queue.current_index(),
            total: queue.total(),
            remaining: queue.remaining(),
            finished: machine.finished(),
            failed: machine.failed(),
            last_message: last.map(|ev| ev.to_string()),
        }
    }
}

fn timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
