//! FIFO queue of pending input files with total/remaining bookkeeping.

use std::collections::VecDeque;
use std::path::PathBuf;

/// Pending inputs of the current batch.
///
/// `total` is fixed when a batch is loaded; the 1-based index of the job
/// currently running is `total - remaining`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQueue {
    pending: VecDeque<PathBuf>,
    total: usize,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue with a fresh batch
    pub fn load(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.pending = paths.into_iter().collect();
        self.total = self.pending.len();
    }

    /// Add paths after the pending ones
    pub fn append(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        let before = self.pending.len();
        self.pending.extend(paths);
        self.total += self.pending.len() - before;
    }

    /// Add paths before the pending ones, keeping their relative order
    pub fn prepend(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        let paths: Vec<PathBuf> = paths.into_iter().collect();
        self.total += paths.len();
        for path in paths.into_iter().rev() {
            self.pending.push_front(path);
        }
    }

    pub fn pop(&mut self) -> Option<PathBuf> {
        self.pending.pop_front()
    }

    /// Drop everything still pending. `total` is kept for reporting.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// 1-based index of the most recently popped job
    pub fn current_index(&self) -> usize {
        self.total - self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
