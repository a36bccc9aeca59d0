//! Engine handle and driver task.
//!
//! [`Engine::start`] spawns a driver that owns the [`PipelineMachine`] and
//! carries out its effects: probes and frame counts run on their own tasks,
//! tools run through the [`StageRunner`], and every answer comes back as an
//! [`Event`] on the driver's internal channel. Callers never block; they
//! submit and cancel through the handle and read progress from the returned
//! receiver.

use crate::config::Config;
use crate::error::PipelineError;
use crate::frame_io::count_frames_async;
use crate::machine::{Effect, Event, PipelineMachine, RunId};
use crate::params::JobParameters;
use crate::probe::probe_file;
use crate::progress::{ProgressEvent, ProgressKind};
use crate::reveal::{opener, reveal};
use crate::runner::{Notify, RunnerEvent, StageHandle, StageInvocation, StageRunner};
use crate::status::{new_shared_status, SharedStatus, StatusSnapshot};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Error type for engine handle operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// The driver task is gone
    #[error("engine has shut down")]
    Closed,
}

#[derive(Debug)]
enum Command {
    Submit(JobParameters),
    Cancel,
}

/// Handle to a running engine
#[derive(Debug)]
pub struct Engine {
    commands: mpsc::UnboundedSender<Command>,
    status: SharedStatus,
    driver: JoinHandle<()>,
}

impl Engine {
    /// Spawn the driver. Must be called from within a tokio runtime.
    pub fn start(config: Config) -> (Engine, mpsc::UnboundedReceiver<ProgressEvent>) {
        Self::start_with_opener(config, PathBuf::from(opener()))
    }

    fn start_with_opener(
        config: Config,
        opener: PathBuf,
    ) -> (Engine, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let status = new_shared_status();

        let driver = Driver {
            runner: StageRunner::new(Duration::from_millis(config.pipeline.cancel_grace_ms)),
            ffprobe: config.tools.ffprobe.clone(),
            opener,
            machine: PipelineMachine::new(config),
            events: event_tx,
            progress: progress_tx,
            status: status.clone(),
            active: None,
            terminating: None,
            last_event: None,
        };
        let driver = tokio::spawn(driver.run(command_rx, event_rx));

        (
            Engine {
                commands: command_tx,
                status,
                driver,
            },
            progress_rx,
        )
    }

    /// Queue a batch. Rejections arrive on the progress stream.
    pub fn submit(&self, params: JobParameters) -> Result<(), EngineError> {
        self.commands
            .send(Command::Submit(params))
            .map_err(|_| EngineError::Closed)
    }

    /// Stop the running batch. Idempotent; a no-op when idle.
    pub fn cancel(&self) {
        if self.commands.send(Command::Cancel).is_err() {
            tracing::debug!("cancel after shutdown ignored");
        }
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// Stop accepting commands, cancel any running tool and wait for the driver
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.driver.await {
            tracing::error!(error = %e, "engine driver panicked");
        }
    }
}

struct Driver {
    machine: PipelineMachine,
    runner: StageRunner,
    ffprobe: PathBuf,
    /// Program that shows the output directory
    opener: PathBuf,
    events: mpsc::UnboundedSender<Event>,
    progress: mpsc::UnboundedSender<ProgressEvent>,
    status: SharedStatus,
    /// The one outstanding tool invocation
    active: Option<(RunId, StageHandle)>,
    /// A cancelled invocation that may still be inside its grace period
    terminating: Option<StageHandle>,
    last_event: Option<ProgressEvent>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            let event = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Submit(params)) => match self.admit(params) {
                        Some(event) => event,
                        None => continue,
                    },
                    Some(Command::Cancel) => Event::Cancel,
                    None => break,
                },
                Some(event) = events.recv() => event,
            };
            self.step(event).await;
        }

        self.settle().await;
        if let Some((_, handle)) = self.active.take() {
            tracing::info!(tool = handle.label(), "shutting down, stopping running tool");
            handle.cancel();
            handle.wait().await;
        }
    }

    /// Wait until a cancelled tool has really exited
    async fn settle(&mut self) {
        if let Some(handle) = self.terminating.take() {
            if !handle.is_finished() {
                tracing::info!(tool = handle.label(), "waiting for cancelled tool to exit");
            }
            handle.wait().await;
        }
    }

    /// Validate a submission against the filesystem. Busy engines reject in
    /// the machine so the busy message wins over validation.
    fn admit(&mut self, params: JobParameters) -> Option<Event> {
        if !self.machine.is_idle() {
            return Some(Event::Submit(params));
        }
        match params.validate() {
            Ok(()) => Some(Event::Submit(params)),
            Err(e) => {
                let error = PipelineError::Validation(e.to_string());
                tracing::warn!(%error, "submission rejected");
                self.publish(ProgressEvent::error(
                    ProgressKind::Rejected,
                    0,
                    params.inputs.len(),
                    error.to_string(),
                ));
                None
            }
        }
    }

    async fn step(&mut self, event: Event) {
        if let Event::Exited { run, .. } = &event {
            if self.active.as_ref().map(|(active, _)| active) == Some(run) {
                self.active = None;
            }
        }

        for effect in self.machine.advance(event) {
            self.perform(effect).await;
        }

        let snapshot = StatusSnapshot::capture(&self.machine, self.last_event.as_ref());
        *self.status.write().await = snapshot;
    }

    async fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::Emit(event) => self.publish(event),
            Effect::Probe { run, input } => {
                let ffprobe = self.ffprobe.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    let event = match probe_file(&ffprobe, &input).await {
                        Ok(result) => Event::Probed { run, result },
                        Err(e) => Event::Failed {
                            run,
                            error: PipelineError::Probe(e.to_string()),
                        },
                    };
                    let _ = events.send(event);
                });
            }
            Effect::Launch {
                run,
                invocation,
                prepare,
            } => self.launch(run, invocation, prepare).await,
            Effect::CountFrames { run, dir } => {
                let events = self.events.clone();
                tokio::spawn(async move {
                    let event = match count_frames_async(dir).await {
                        Ok(frames) => Event::Counted { run, frames },
                        Err(error) => Event::Failed { run, error },
                    };
                    let _ = events.send(event);
                });
            }
            Effect::Terminate => {
                if let Some((run, handle)) = self.active.take() {
                    tracing::info!(run, tool = handle.label(), "terminating running tool");
                    handle.cancel();
                    self.settle().await;
                    self.terminating = Some(handle);
                }
            }
            Effect::Reveal(dir) => {
                reveal(&self.opener, &dir).await;
            }
        }
    }

    async fn launch(&mut self, run: RunId, invocation: StageInvocation, prepare: Vec<PathBuf>) {
        self.settle().await;

        for dir in &prepare {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                let error = PipelineError::io(&format!("creating {}", dir.display()), e);
                let _ = self.events.send(Event::Failed { run, error });
                return;
            }
        }

        if let Some((stale, handle)) = self.active.take() {
            tracing::warn!(stale, "previous invocation still running, stopping it");
            handle.cancel();
            handle.wait().await;
        }

        let events = self.events.clone();
        let notify: Notify = Arc::new(move |event| {
            let event = match event {
                RunnerEvent::Output(line) => Event::Output { run, line },
                RunnerEvent::Exited(outcome) => Event::Exited { run, outcome },
            };
            let _ = events.send(event);
        });
        let handle = self.runner.start(invocation, notify);
        self.active = Some((run, handle));
    }

    fn publish(&mut self, event: ProgressEvent) {
        if self.progress.send(event.clone()).is_err() {
            tracing::debug!("progress receiver dropped");
        }
        self.last_event = Some(event);
    }
}
