//! The pipeline state machine.
//!
//! `PipelineMachine` owns the queue and the per-file working record and is
//! deliberately inert: it never spawns a process or touches the filesystem.
//! Every input, whether a submission, a cancellation or the completion of
//! some outside work, arrives as an [`Event`] through
//! [`PipelineMachine::advance`], which returns the [`Effect`]s the driver has
//! to carry out.
//!
//! Each outstanding piece of outside work is tagged with a [`RunId`]. Only
//! the event answering the most recent request is accepted; anything else
//! (late output of a cancelled tool, the exit of a process that was killed)
//! is dropped, so a cancelled stage can never advance a fresh batch.
//!
//! Per job the machine walks
//! `Extracting -> Interpolating -> Upscaling -> Reassembling -> Advancing`.
//! A stage whose multiplier is 1 is passed through synchronously within the
//! same `advance` call and its output directory is its input directory.

use crate::config::{Config, FailurePolicy};
use crate::error::PipelineError;
use crate::job::PipelineJob;
use crate::params::{JobParameters, Multiplier};
use crate::probe::ProbeResult;
use crate::progress::{ProgressEvent, ProgressKind};
use crate::queue::JobQueue;
use crate::runner::{StageInvocation, StageOutcome};
use crate::stages::{
    build_extract_invocation, build_interpolate_invocation, build_reassemble_invocation,
    build_upscale_invocation, ReassembleParams,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Identifies one request for outside work
pub type RunId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    Extracting,
    Interpolating,
    Upscaling,
    Reassembling,
    Advancing,
}

/// Everything that can move the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Start a batch
    Submit(JobParameters),
    /// Stop the running batch; no-op when idle
    Cancel,
    /// Answer to [`Effect::Probe`]
    Probed { run: RunId, result: ProbeResult },
    /// Diagnostic line from the tool started by [`Effect::Launch`]
    Output { run: RunId, line: String },
    /// Terminal outcome of the tool started by [`Effect::Launch`]
    Exited { run: RunId, outcome: StageOutcome },
    /// Answer to [`Effect::CountFrames`]
    Counted { run: RunId, frames: u64 },
    /// The requested work could not be carried out at all
    Failed { run: RunId, error: PipelineError },
}

/// Work the driver performs on the machine's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Publish a progress event
    Emit(ProgressEvent),
    /// Measure the input; answer with `Probed` or `Failed`
    Probe { run: RunId, input: PathBuf },
    /// Create `prepare` directories, then start the tool; answer with
    /// `Output`* then `Exited`, or `Failed` if the directories cannot be made
    Launch {
        run: RunId,
        invocation: StageInvocation,
        prepare: Vec<PathBuf>,
    },
    /// Count extracted frames; answer with `Counted` or `Failed`
    CountFrames { run: RunId, dir: PathBuf },
    /// Stop whatever tool is running
    Terminate,
    /// Show the output directory to the user
    Reveal(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Waiting {
    Probe,
    Tool,
    Count,
}

/// The pure pipeline state machine
#[derive(Debug)]
pub struct PipelineMachine {
    config: Config,
    state: EngineState,
    queue: JobQueue,
    params: Option<JobParameters>,
    job: Option<PipelineJob>,
    last_run: RunId,
    waiting: Option<(RunId, Waiting)>,
    tool: String,
    finished: usize,
    failed: usize,
}

impl PipelineMachine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: EngineState::Idle,
            queue: JobQueue::new(),
            params: None,
            job: None,
            last_run: 0,
            waiting: None,
            tool: String::new(),
            finished: 0,
            failed: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == EngineState::Idle
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn current_job(&self) -> Option<&PipelineJob> {
        self.job.as_ref()
    }

    /// Jobs of the current (or last) batch that produced their artifact
    pub fn finished(&self) -> usize {
        self.finished
    }

    /// Jobs of the current (or last) batch skipped after a failure
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Run id of the request the machine is waiting on
    pub fn outstanding(&self) -> Option<RunId> {
        self.waiting.map(|(run, _)| run)
    }

    /// Single dispatch point: consume one event, return the effects to run.
    pub fn advance(&mut self, event: Event) -> Vec<Effect> {
        let mut out = Vec::new();
        match event {
            Event::Submit(params) => self.on_submit(params, &mut out),
            Event::Cancel => self.on_cancel(&mut out),
            Event::Probed { run, result } => {
                if self.accept(run, Waiting::Probe) {
                    self.on_probed(result, &mut out);
                }
            }
            Event::Output { run, line } => {
                if self.outstanding() == Some(run) {
                    debug!(tool = %self.tool, "{}", line);
                    out.push(self.info(ProgressKind::ToolOutput, line));
                }
            }
            Event::Exited { run, outcome } => {
                if self.accept(run, Waiting::Tool) {
                    self.on_exited(outcome, &mut out);
                }
            }
            Event::Counted { run, frames } => {
                if self.accept(run, Waiting::Count) {
                    self.on_counted(frames, &mut out);
                }
            }
            Event::Failed { run, error } => {
                if self.outstanding() == Some(run) {
                    self.waiting = None;
                    self.fail(error, &mut out);
                }
            }
        }
        out
    }

    fn accept(&mut self, run: RunId, kind: Waiting) -> bool {
        if self.waiting == Some((run, kind)) {
            self.waiting = None;
            true
        } else {
            debug!(run, ?kind, state = ?self.state, "dropping stale event");
            false
        }
    }

    fn issue(&mut self, kind: Waiting) -> RunId {
        self.last_run += 1;
        self.waiting = Some((self.last_run, kind));
        self.last_run
    }

    fn info(&self, kind: ProgressKind, message: impl Into<String>) -> Effect {
        Effect::Emit(ProgressEvent::info(
            kind,
            self.queue.current_index(),
            self.queue.total(),
            message,
        ))
    }

    fn error(&self, kind: ProgressKind, message: impl Into<String>) -> Effect {
        Effect::Emit(ProgressEvent::error(
            kind,
            self.queue.current_index(),
            self.queue.total(),
            message,
        ))
    }

    fn multiplier(&self, pick: fn(&JobParameters) -> Multiplier) -> Multiplier {
        self.params.as_ref().map(pick).unwrap_or_default()
    }

    fn on_submit(&mut self, params: JobParameters, out: &mut Vec<Effect>) {
        if !self.is_idle() {
            warn!(state = ?self.state, "submission rejected, engine is busy");
            out.push(self.error(
                ProgressKind::Rejected,
                "Engine is busy: cancel the running batch before submitting another.",
            ));
            return;
        }

        self.queue.load(params.inputs.iter().cloned());
        self.finished = 0;
        self.failed = 0;
        info!(
            total = self.queue.total(),
            interpolation = %params.interpolation,
            upscale = %params.upscale,
            "batch submitted"
        );
        self.params = Some(params);
        self.advance_queue(out);
    }

    fn on_cancel(&mut self, out: &mut Vec<Effect>) {
        if self.is_idle() {
            debug!("cancel while idle ignored");
            return;
        }

        info!(state = ?self.state, "cancelling batch");
        out.push(self.info(ProgressKind::Phase, "Trying kill process."));
        out.push(Effect::Terminate);
        let dropped = self.queue.remaining();
        out.push(self.info(
            ProgressKind::Cancelled,
            format!("Cancelled with {} left.", dropped),
        ));
        self.queue.clear();
        self.log_abandoned();
        self.go_idle();
    }

    fn advance_queue(&mut self, out: &mut Vec<Effect>) {
        self.state = EngineState::Advancing;
        self.job = None;
        match self.queue.pop() {
            Some(input) => self.start_job(input, out),
            None => self.finish_batch(out),
        }
    }

    fn start_job(&mut self, input: PathBuf, out: &mut Vec<Effect>) {
        let Some(params) = self.params.as_ref() else {
            warn!("no parameters for queued input, going idle");
            self.go_idle();
            return;
        };
        let job = PipelineJob::new(
            self.queue.current_index(),
            &input,
            params,
            &self.config.pipeline.output_suffix,
        );
        info!(
            index = job.index,
            input = %job.input_path.display(),
            output = %job.output_path.display(),
            "starting job"
        );

        self.state = EngineState::Extracting;
        out.push(self.info(ProgressKind::Phase, "Extracting Frames."));
        let run = self.issue(Waiting::Probe);
        out.push(Effect::Probe {
            run,
            input: job.input_path.clone(),
        });
        self.job = Some(job);
    }

    fn on_probed(&mut self, result: ProbeResult, out: &mut Vec<Effect>) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        job.frame_rate = Some(result.frame_rate);
        job.has_audio = result.has_audio;
        let invocation = build_extract_invocation(
            &self.config.tools.ffmpeg,
            &job.input_path,
            &job.frames_dir,
            result.frame_rate,
        );
        let prepare = vec![job.frames_dir.clone()];
        self.launch(invocation, prepare, out);
    }

    fn on_exited(&mut self, outcome: StageOutcome, out: &mut Vec<Effect>) {
        let tool = std::mem::take(&mut self.tool);
        if let Err(error) = outcome.into_result(&tool) {
            self.fail(error, out);
            return;
        }
        info!(tool = %tool, state = ?self.state, "stage completed");

        match self.state {
            EngineState::Extracting => {
                let Some(job) = self.job.as_ref() else {
                    return;
                };
                let dir = job.frames_dir.clone();
                let run = self.issue(Waiting::Count);
                out.push(Effect::CountFrames { run, dir });
            }
            EngineState::Interpolating => self.enter_upscaling(out),
            EngineState::Upscaling => self.enter_reassembly(out),
            EngineState::Reassembling => self.finish_job(out),
            EngineState::Idle | EngineState::Advancing => {
                warn!(state = ?self.state, "tool exit with no stage running");
            }
        }
    }

    fn on_counted(&mut self, frames: u64, out: &mut Vec<Effect>) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        if frames == 0 {
            let error = PipelineError::Io(format!(
                "no frames extracted from {}",
                job.input_path.display()
            ));
            self.fail(error, out);
            return;
        }
        job.frame_count = Some(frames);
        let fps = job
            .frame_rate
            .map(|rate| rate.approx())
            .unwrap_or_else(|| "unknown".to_string());

        out.push(self.info(
            ProgressKind::Phase,
            format!("Processing a video with {} frames and {} fps.", frames, fps),
        ));
        self.enter_interpolation(out);
    }

    fn enter_interpolation(&mut self, out: &mut Vec<Effect>) {
        self.state = EngineState::Interpolating;
        out.push(self.info(ProgressKind::Phase, "Interpolating Frames."));
        let multiplier = self.multiplier(|p| p.interpolation);
        let Some(job) = self.job.as_mut() else {
            return;
        };

        if multiplier.is_passthrough() {
            job.interpolated_dir = Some(job.frames_dir.clone());
            self.enter_upscaling(out);
            return;
        }

        let target = job.interpolation_target();
        let target_frames = job.frame_count.unwrap_or(0) * multiplier.factor() as u64;
        let invocation = build_interpolate_invocation(
            &self.config.interpolation,
            job.interpolation_source(),
            &target,
            target_frames,
        );
        job.interpolated_dir = Some(target.clone());
        self.launch(invocation, vec![target], out);
    }

    fn enter_upscaling(&mut self, out: &mut Vec<Effect>) {
        self.state = EngineState::Upscaling;
        out.push(self.info(ProgressKind::Phase, "Upsampling Frames."));
        let multiplier = self.multiplier(|p| p.upscale);
        let Some(job) = self.job.as_mut() else {
            return;
        };

        if multiplier.is_passthrough() {
            job.upscaled_dir = Some(job.upscale_source().to_path_buf());
            self.enter_reassembly(out);
            return;
        }

        let target = job.upscale_target();
        let invocation = build_upscale_invocation(
            &self.config.upscale,
            job.upscale_source(),
            &target,
            multiplier.factor(),
        );
        job.upscaled_dir = Some(target.clone());
        self.launch(invocation, vec![target], out);
    }

    fn enter_reassembly(&mut self, out: &mut Vec<Effect>) {
        self.state = EngineState::Reassembling;
        out.push(self.info(ProgressKind::Phase, "Concatenating Frames."));
        let factor = self.multiplier(|p| p.interpolation).factor();
        let Some(job) = self.job.as_ref() else {
            return;
        };
        let Some(rate) = job.frame_rate else {
            self.fail(PipelineError::Probe("frame rate was never measured".into()), out);
            return;
        };
        let Some(frame_rate) = rate.scaled(factor) else {
            let error = PipelineError::Probe(format!("frame rate {} x{} is out of range", rate, factor));
            self.fail(error, out);
            return;
        };

        let params = ReassembleParams {
            frames_dir: job.reassembly_source().to_path_buf(),
            frame_rate,
            audio_source: job.has_audio.then(|| job.input_path.clone()),
            output_path: job.output_path.clone(),
            gif: job.is_gif(),
        };
        let invocation =
            build_reassemble_invocation(&self.config.tools.ffmpeg, &self.config.encode, &params);
        self.launch(invocation, Vec::new(), out);
    }

    fn launch(&mut self, invocation: StageInvocation, prepare: Vec<PathBuf>, out: &mut Vec<Effect>) {
        let command_line = invocation.command_line();
        info!(command = %command_line, "launching stage");
        out.push(self.info(ProgressKind::Phase, format!("Running {}", command_line)));
        self.tool = invocation.label.clone();
        let run = self.issue(Waiting::Tool);
        out.push(Effect::Launch {
            run,
            invocation,
            prepare,
        });
    }

    fn finish_job(&mut self, out: &mut Vec<Effect>) {
        self.finished += 1;
        if let Some(job) = self.job.as_ref() {
            info!(output = %job.output_path.display(), "job finished");
        }
        out.push(self.info(
            ProgressKind::JobFinished,
            format!("Finished with {} left.", self.queue.remaining()),
        ));
        self.advance_queue(out);
    }

    fn finish_batch(&mut self, out: &mut Vec<Effect>) {
        let message = if self.failed == 0 {
            format!("All {} files processed.", self.queue.total())
        } else {
            format!(
                "Batch finished: {} succeeded, {} failed.",
                self.finished, self.failed
            )
        };
        info!(finished = self.finished, failed = self.failed, "batch finished");
        out.push(self.info(ProgressKind::BatchFinished, message));

        if let Some(params) = self.params.as_ref() {
            if params.reveal_on_completion {
                out.push(Effect::Reveal(params.output_dir.clone()));
            }
        }
        self.go_idle();
    }

    fn fail(&mut self, error: PipelineError, out: &mut Vec<Effect>) {
        self.waiting = None;
        self.tool.clear();
        let message = format!("Process failed: {}", error);
        self.log_abandoned();

        match self.config.pipeline.failure_policy {
            FailurePolicy::Halt => {
                error!(%error, state = ?self.state, "stage failed, halting batch");
                out.push(self.error(ProgressKind::Halted, message));
                self.queue.clear();
                self.go_idle();
            }
            FailurePolicy::Skip => {
                warn!(%error, state = ?self.state, "stage failed, skipping job");
                self.failed += 1;
                out.push(self.error(ProgressKind::JobFailed, message));
                self.advance_queue(out);
            }
        }
    }

    fn log_abandoned(&self) {
        if let Some(job) = &self.job {
            info!(job = %job.id, dirs = ?job.working_dirs(), "job abandoned, working directories kept");
        }
    }

    /// Working directories are left on disk for outside cleanup
    fn go_idle(&mut self) {
        self.state = EngineState::Idle;
        self.job = None;
        self.params = None;
        self.waiting = None;
        self.tool.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_rate::FrameRate;
    use crate::progress::Severity;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::path::Path;

    const RIFE: &str = "rife-ncnn-vulkan";
    const REALESRGAN: &str = "realesrgan-ncnn-vulkan";

    fn machine() -> PipelineMachine {
        PipelineMachine::new(Config::default())
    }

    fn params(count: usize, inter: Multiplier, up: Multiplier) -> JobParameters {
        let inputs = (1..=count)
            .map(|i| PathBuf::from(format!("/in/clip{}.mp4", i)))
            .collect();
        JobParameters::new(inputs, "/out")
            .with_interpolation(inter)
            .with_upscale(up)
    }

    fn probe(rate: &str) -> ProbeResult {
        ProbeResult {
            frame_rate: FrameRate::parse(rate).unwrap(),
            has_audio: true,
        }
    }

    /// Feed `first`, then keep answering effects with `respond` until quiet
    fn drive(
        m: &mut PipelineMachine,
        first: Event,
        mut respond: impl FnMut(&Effect) -> Option<Event>,
    ) -> Vec<Effect> {
        let mut log = Vec::new();
        let mut pending = VecDeque::from([first]);
        while let Some(event) = pending.pop_front() {
            for effect in m.advance(event) {
                if let Some(next) = respond(&effect) {
                    pending.push_back(next);
                }
                log.push(effect);
            }
        }
        log
    }

    /// Answer every request successfully
    fn succeed(frames: u64, rate: &'static str) -> impl FnMut(&Effect) -> Option<Event> {
        move |effect| answer(effect, frames, rate)
    }

    fn answer(effect: &Effect, frames: u64, rate: &str) -> Option<Event> {
        match effect {
            Effect::Probe { run, .. } => Some(Event::Probed {
                run: *run,
                result: probe(rate),
            }),
            Effect::Launch { run, .. } => Some(Event::Exited {
                run: *run,
                outcome: StageOutcome::Completed,
            }),
            Effect::CountFrames { run, .. } => Some(Event::Counted { run: *run, frames }),
            _ => None,
        }
    }

    fn emitted(log: &[Effect]) -> Vec<&ProgressEvent> {
        log.iter()
            .filter_map(|e| match e {
                Effect::Emit(ev) => Some(ev),
                _ => None,
            })
            .collect()
    }

    fn of_kind(log: &[Effect], kind: ProgressKind) -> Vec<&ProgressEvent> {
        emitted(log).into_iter().filter(|ev| ev.kind == kind).collect()
    }

    fn launches(log: &[Effect]) -> Vec<&StageInvocation> {
        log.iter()
            .filter_map(|e| match e {
                Effect::Launch { invocation, .. } => Some(invocation),
                _ => None,
            })
            .collect()
    }

    fn probes(log: &[Effect]) -> usize {
        log.iter()
            .filter(|e| matches!(e, Effect::Probe { .. }))
            .count()
    }

    fn last_run(effects: &[Effect]) -> RunId {
        effects
            .iter()
            .rev()
            .find_map(|e| match e {
                Effect::Probe { run, .. }
                | Effect::Launch { run, .. }
                | Effect::CountFrames { run, .. } => Some(*run),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn all_success_finishes_every_job_in_order() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(3, Multiplier::Two, Multiplier::Two)),
            succeed(10, "24/1"),
        );

        let finished = of_kind(&log, ProgressKind::JobFinished);
        let indices: Vec<usize> = finished.iter().map(|ev| ev.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(finished.iter().all(|ev| ev.total == 3));
        assert_eq!(finished[0].to_string(), "[INFO 1/3] Finished with 2 left.");
        assert_eq!(finished[2].to_string(), "[INFO 3/3] Finished with 0 left.");

        let last = emitted(&log).last().copied().unwrap();
        assert_eq!(last.kind, ProgressKind::BatchFinished);
        assert!(emitted(&log).iter().all(|ev| ev.severity == Severity::Info));
        assert!(m.is_idle());
        assert_eq!(m.finished(), 3);
        assert_eq!(m.outstanding(), None);
    }

    #[test]
    fn multiplier_one_never_launches_its_tool() {
        for inter in Multiplier::ALL {
            for up in Multiplier::ALL {
                let mut m = machine();
                let log = drive(&mut m, Event::Submit(params(1, inter, up)), succeed(10, "24/1"));
                let labels: Vec<&str> = launches(&log).iter().map(|i| i.label.as_str()).collect();

                let rife = labels.iter().filter(|l| **l == RIFE).count();
                let esrgan = labels.iter().filter(|l| **l == REALESRGAN).count();
                assert_eq!(rife, usize::from(!inter.is_passthrough()), "{} {}", inter, up);
                assert_eq!(esrgan, usize::from(!up.is_passthrough()), "{} {}", inter, up);
                assert_eq!(of_kind(&log, ProgressKind::JobFinished).len(), 1);
            }
        }
    }

    #[test]
    fn skipped_stage_passes_its_input_through() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::One, Multiplier::Two)),
            succeed(10, "24/1"),
        );
        let launched = launches(&log);
        let frames_dir = PathBuf::from(launched[0].args_lossy().last().unwrap())
            .parent()
            .unwrap()
            .to_path_buf();

        let upscale = launched[1];
        assert_eq!(upscale.label, REALESRGAN);
        assert_eq!(
            upscale.flag_value("-i"),
            Some(frames_dir.to_string_lossy().into_owned())
        );

        let both_skipped = {
            let mut m = machine();
            drive(
                &mut m,
                Event::Submit(params(1, Multiplier::One, Multiplier::One)),
                succeed(10, "24/1"),
            )
        };
        let launched = launches(&both_skipped);
        assert_eq!(launched.len(), 2);
        let extract_pattern = launched[0].args_lossy().last().unwrap().clone();
        assert_eq!(launched[1].flag_value("-start_number"), Some("1".into()));
        assert!(launched[1].args_lossy().contains(&extract_pattern));
    }

    #[test]
    fn stages_run_in_strict_order() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::Two, Multiplier::Two)),
            succeed(10, "24/1"),
        );

        let steps: Vec<String> = log
            .iter()
            .filter_map(|e| match e {
                Effect::Probe { .. } => Some("probe".to_string()),
                Effect::CountFrames { .. } => Some("count".to_string()),
                Effect::Launch { invocation, .. } => Some(invocation.label.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            steps,
            vec!["probe", "ffmpeg", "count", RIFE, REALESRGAN, "ffmpeg"]
        );

        let phases: Vec<String> = of_kind(&log, ProgressKind::Phase)
            .iter()
            .map(|ev| ev.message.clone())
            .filter(|msg| !msg.starts_with("Running "))
            .collect();
        assert_eq!(
            phases,
            vec![
                "Extracting Frames.",
                "Processing a video with 10 frames and 24 fps.",
                "Interpolating Frames.",
                "Upsampling Frames.",
                "Concatenating Frames.",
            ]
        );
    }

    #[test]
    fn next_stage_waits_for_exit() {
        let mut m = machine();
        let effects = m.advance(Event::Submit(params(1, Multiplier::Two, Multiplier::One)));
        let effects = m.advance(Event::Probed {
            run: last_run(&effects),
            result: probe("24/1"),
        });
        let extract_run = last_run(&effects);

        let effects = m.advance(Event::Output {
            run: extract_run,
            line: "frame=  5".into(),
        });
        assert_eq!(effects.len(), 1);
        assert_eq!(m.state(), EngineState::Extracting);

        let effects = m.advance(Event::Exited {
            run: extract_run,
            outcome: StageOutcome::Completed,
        });
        assert!(matches!(effects.as_slice(), [Effect::CountFrames { .. }]));
        assert_eq!(m.state(), EngineState::Extracting);

        let effects = m.advance(Event::Counted {
            run: last_run(&effects),
            frames: 10,
        });
        assert_eq!(m.state(), EngineState::Interpolating);
        assert_eq!(launches(&effects)[0].label, RIFE);
    }

    #[test]
    fn error_in_second_job_halts_batch() {
        let mut m = machine();
        let mut upscales = 0;
        let log = drive(
            &mut m,
            Event::Submit(params(3, Multiplier::One, Multiplier::Two)),
            |effect| match effect {
                Effect::Launch {
                    run, invocation, ..
                } if invocation.label == REALESRGAN => {
                    upscales += 1;
                    let outcome = if upscales == 2 {
                        StageOutcome::FailedExit(1)
                    } else {
                        StageOutcome::Completed
                    };
                    Some(Event::Exited { run: *run, outcome })
                }
                other => answer(other, 10, "24/1"),
            },
        );

        let errors: Vec<&ProgressEvent> =
            emitted(&log).into_iter().filter(|ev| ev.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "[ERROR] Process failed: realesrgan-ncnn-vulkan exited with code 1"
        );
        assert_eq!(errors[0].kind, ProgressKind::Halted);
        assert_eq!(probes(&log), 2);
        assert_eq!(of_kind(&log, ProgressKind::JobFinished).len(), 1);
        assert!(of_kind(&log, ProgressKind::BatchFinished).is_empty());
        assert!(m.is_idle());
        assert!(m.queue().is_empty());
    }

    #[test]
    fn skip_policy_continues_with_next_job() {
        let mut config = Config::default();
        config.pipeline.failure_policy = FailurePolicy::Skip;
        let mut m = PipelineMachine::new(config);
        let mut upscales = 0;
        let log = drive(
            &mut m,
            Event::Submit(params(3, Multiplier::One, Multiplier::Two)),
            |effect| match effect {
                Effect::Launch {
                    run, invocation, ..
                } if invocation.label == REALESRGAN => {
                    upscales += 1;
                    let outcome = if upscales == 2 {
                        StageOutcome::Crashed
                    } else {
                        StageOutcome::Completed
                    };
                    Some(Event::Exited { run: *run, outcome })
                }
                other => answer(other, 10, "24/1"),
            },
        );

        let failed = of_kind(&log, ProgressKind::JobFailed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].index, 2);
        assert_eq!(probes(&log), 3);
        let finished: Vec<usize> = of_kind(&log, ProgressKind::JobFinished)
            .iter()
            .map(|ev| ev.index)
            .collect();
        assert_eq!(finished, vec![1, 3]);

        let batch = of_kind(&log, ProgressKind::BatchFinished);
        assert_eq!(batch[0].message, "Batch finished: 2 succeeded, 1 failed.");
        assert_eq!((m.finished(), m.failed()), (2, 1));
        assert!(m.is_idle());
    }

    #[test]
    fn ten_frames_at_24fps_doubled() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::Two, Multiplier::One)),
            succeed(10, "24/1"),
        );
        let launched = launches(&log);

        let rife = launched.iter().find(|i| i.label == RIFE).unwrap();
        assert_eq!(rife.flag_value("-n"), Some("20".into()));

        let reassemble = launched.last().unwrap();
        assert_eq!(reassemble.flag_value("-framerate"), Some("48".into()));
        assert!(reassemble
            .args_lossy()
            .iter()
            .any(|a| a.ends_with("_inter/%08d.png")));
    }

    #[test]
    fn silent_input_reassembles_without_audio_input() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::One, Multiplier::One)),
            |effect| match effect {
                Effect::Probe { run, .. } => Some(Event::Probed {
                    run: *run,
                    result: ProbeResult {
                        has_audio: false,
                        ..probe("24/1")
                    },
                }),
                other => answer(other, 10, "24/1"),
            },
        );
        let reassembly = launches(&log).last().copied().unwrap().clone();

        assert_eq!(reassembly.args_lossy().iter().filter(|a| *a == "-i").count(), 1);
        assert_eq!(reassembly.flag_value("-c:a"), None);
        assert_eq!(of_kind(&log, ProgressKind::JobFinished).len(), 1);
    }

    #[test]
    fn unrepresentable_output_rate_halts() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::Two, Multiplier::One)),
            succeed(10, "4294967295/1"),
        );

        let halted = of_kind(&log, ProgressKind::Halted);
        assert_eq!(halted.len(), 1);
        assert!(halted[0].message.contains("out of range"), "{}", halted[0].message);
        assert!(!launches(&log)
            .iter()
            .any(|inv| inv.flag_value("-framerate").is_some()));
        assert!(m.is_idle());
    }

    #[test]
    fn ntsc_rate_stays_exact_when_scaled() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::Four, Multiplier::One)),
            succeed(12, "24000/1001"),
        );
        let launched = launches(&log);

        assert_eq!(launched[0].flag_value("-r"), Some("24000/1001".into()));
        assert_eq!(launched[1].flag_value("-n"), Some("48".into()));
        assert_eq!(
            launched.last().unwrap().flag_value("-framerate"),
            Some("96000/1001".into())
        );
        assert!(emitted(&log)
            .iter()
            .any(|ev| ev.message == "Processing a video with 12 frames and 23.976 fps."));
    }

    #[test]
    fn output_naming_and_gif_path() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(JobParameters::new(vec![PathBuf::from("/in/clip.mp4")], "/out")),
            succeed(10, "24/1"),
        );
        let video = launches(&log).last().unwrap().args_lossy();
        assert!(Path::new(video.last().unwrap()).ends_with("clip_anime2x.mp4"));
        assert!(video.contains(&"1:a:0?".to_string()));

        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(
                JobParameters::new(vec![PathBuf::from("/in/clip.mp4")], "/out").with_format("GIF"),
            ),
            succeed(10, "24/1"),
        );
        let gif = launches(&log).last().unwrap().args_lossy();
        assert!(Path::new(gif.last().unwrap()).ends_with("clip_anime2x.gif"));
        assert!(gif.contains(&"-filter_complex".to_string()));
        assert!(!gif.contains(&"/in/clip.mp4".to_string()));
    }

    #[test]
    fn launches_prepare_their_output_directories() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::Two, Multiplier::Two)),
            succeed(10, "24/1"),
        );
        let prepared: Vec<Vec<PathBuf>> = log
            .iter()
            .filter_map(|e| match e {
                Effect::Launch { prepare, .. } => Some(prepare.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(prepared.len(), 4);
        let frames = &prepared[0][0];
        assert!(frames.starts_with("/out"));
        assert!(frames
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("frames_"));
        assert!(prepared[1][0].to_string_lossy().ends_with("_inter"));
        assert!(prepared[2][0].to_string_lossy().ends_with("_up"));
        assert!(prepared[3].is_empty());
    }

    #[test]
    fn jobs_get_distinct_working_directories() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(2, Multiplier::One, Multiplier::One)),
            succeed(10, "24/1"),
        );
        let dirs: Vec<&PathBuf> = log
            .iter()
            .filter_map(|e| match e {
                Effect::CountFrames { dir, .. } => Some(dir),
                _ => None,
            })
            .collect();
        assert_eq!(dirs.len(), 2);
        assert_ne!(dirs[0], dirs[1]);
    }

    #[test]
    fn cancel_when_idle_is_noop() {
        let mut m = machine();
        assert!(m.advance(Event::Cancel).is_empty());
        assert!(m.advance(Event::Cancel).is_empty());
        assert!(m.is_idle());

        let effects = m.advance(Event::Submit(params(1, Multiplier::One, Multiplier::One)));
        assert_eq!(
            effects[0],
            Effect::Emit(ProgressEvent::info(
                ProgressKind::Phase,
                1,
                1,
                "Extracting Frames."
            ))
        );
        assert!(matches!(effects[1], Effect::Probe { .. }));
    }

    #[test]
    fn cancel_mid_stage_terminates_and_ignores_late_events() {
        let mut m = machine();
        let effects = m.advance(Event::Submit(params(2, Multiplier::Two, Multiplier::One)));
        let effects = m.advance(Event::Probed {
            run: last_run(&effects),
            result: probe("24/1"),
        });
        let effects = m.advance(Event::Exited {
            run: last_run(&effects),
            outcome: StageOutcome::Completed,
        });
        let effects = m.advance(Event::Counted {
            run: last_run(&effects),
            frames: 10,
        });
        let rife_run = last_run(&effects);
        assert_eq!(m.state(), EngineState::Interpolating);

        let effects = m.advance(Event::Cancel);
        let messages: Vec<String> = emitted(&effects).iter().map(|e| e.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "[INFO 1/2] Trying kill process.",
                "[INFO 1/2] Cancelled with 1 left."
            ]
        );
        assert!(effects.contains(&Effect::Terminate));
        assert!(m.is_idle());
        assert!(m.queue().is_empty());

        assert!(m
            .advance(Event::Output {
                run: rife_run,
                line: "late".into()
            })
            .is_empty());
        assert!(m
            .advance(Event::Exited {
                run: rife_run,
                outcome: StageOutcome::Cancelled
            })
            .is_empty());
        assert!(m.is_idle());

        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::One, Multiplier::One)),
            succeed(5, "30/1"),
        );
        assert_eq!(of_kind(&log, ProgressKind::JobFinished).len(), 1);
    }

    #[test]
    fn stale_exit_cannot_advance_new_batch() {
        let mut m = machine();
        let effects = m.advance(Event::Submit(params(1, Multiplier::One, Multiplier::One)));
        let effects = m.advance(Event::Probed {
            run: last_run(&effects),
            result: probe("24/1"),
        });
        let old_extract = last_run(&effects);
        m.advance(Event::Cancel);

        let effects = m.advance(Event::Submit(params(1, Multiplier::One, Multiplier::One)));
        let new_probe = last_run(&effects);
        assert_ne!(new_probe, old_extract);

        assert!(m
            .advance(Event::Exited {
                run: old_extract,
                outcome: StageOutcome::Completed
            })
            .is_empty());
        assert_eq!(m.outstanding(), Some(new_probe));
        assert_eq!(m.state(), EngineState::Extracting);
    }

    #[test]
    fn submit_while_busy_is_rejected() {
        let mut m = machine();
        let effects = m.advance(Event::Submit(params(2, Multiplier::One, Multiplier::One)));
        let outstanding = last_run(&effects);

        let effects = m.advance(Event::Submit(params(5, Multiplier::One, Multiplier::One)));
        let events = emitted(&effects);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ProgressKind::Rejected);
        assert!(events[0].is_error());
        assert_eq!(m.queue().total(), 2);
        assert_eq!(m.outstanding(), Some(outstanding));
    }

    #[test]
    fn empty_submission_completes_immediately() {
        let mut m = machine();
        let effects = m.advance(Event::Submit(
            JobParameters::new(Vec::new(), "/out").with_reveal(true),
        ));

        assert_eq!(
            effects,
            vec![
                Effect::Emit(ProgressEvent::info(
                    ProgressKind::BatchFinished,
                    0,
                    0,
                    "All 0 files processed."
                )),
                Effect::Reveal(PathBuf::from("/out")),
            ]
        );
        assert!(m.is_idle());
    }

    #[test]
    fn reveal_only_when_requested() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::One, Multiplier::One).with_reveal(true)),
            succeed(3, "24/1"),
        );
        assert_eq!(log.last(), Some(&Effect::Reveal(PathBuf::from("/out"))));

        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::One, Multiplier::One)),
            succeed(3, "24/1"),
        );
        assert!(!log.iter().any(|e| matches!(e, Effect::Reveal(_))));
    }

    #[test]
    fn reveal_skipped_when_batch_halts() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::One, Multiplier::One).with_reveal(true)),
            |effect| match effect {
                Effect::Probe { run, .. } => Some(Event::Failed {
                    run: *run,
                    error: PipelineError::Probe("no video stream found".into()),
                }),
                _ => None,
            },
        );
        assert!(!log.iter().any(|e| matches!(e, Effect::Reveal(_))));
        assert_eq!(
            emitted(&log).last().unwrap().to_string(),
            "[ERROR] Process failed: probe failed: no video stream found"
        );
    }

    #[test]
    fn zero_frames_is_an_io_failure() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::Two, Multiplier::One)),
            succeed(0, "24/1"),
        );
        let last = emitted(&log).last().copied().unwrap();
        assert_eq!(last.kind, ProgressKind::Halted);
        assert!(last.message.contains("no frames extracted"));
        assert!(launches(&log).iter().all(|i| i.label != RIFE));
    }

    #[test]
    fn launch_error_is_reported_with_reason() {
        let mut m = machine();
        let log = drive(
            &mut m,
            Event::Submit(params(1, Multiplier::Two, Multiplier::One)),
            |effect| match effect {
                Effect::Launch {
                    run, invocation, ..
                } if invocation.label == RIFE => Some(Event::Exited {
                    run: *run,
                    outcome: StageOutcome::LaunchError("No such file or directory".into()),
                }),
                other => answer(other, 10, "24/1"),
            },
        );
        assert_eq!(
            emitted(&log).last().unwrap().to_string(),
            "[ERROR] Process failed: rife-ncnn-vulkan could not be started: No such file or directory"
        );
    }

    #[test]
    fn tool_output_is_forwarded_with_index() {
        let mut m = machine();
        let effects = m.advance(Event::Submit(params(2, Multiplier::One, Multiplier::One)));
        let effects = m.advance(Event::Probed {
            run: last_run(&effects),
            result: probe("24/1"),
        });
        let effects = m.advance(Event::Output {
            run: last_run(&effects),
            line: "frame=  120 fps= 60".into(),
        });

        assert_eq!(
            effects,
            vec![Effect::Emit(ProgressEvent::info(
                ProgressKind::ToolOutput,
                1,
                2,
                "frame=  120 fps= 60"
            ))]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_finished_indices_count_up(
            count in 1usize..8,
            inter in prop::sample::select(Multiplier::ALL.to_vec()),
            up in prop::sample::select(Multiplier::ALL.to_vec()),
            frames in 1u64..500,
        ) {
            let mut m = machine();
            let log = drive(&mut m, Event::Submit(params(count, inter, up)), succeed(frames, "30000/1001"));

            let finished = of_kind(&log, ProgressKind::JobFinished);
            let indices: Vec<usize> = finished.iter().map(|ev| ev.index).collect();
            prop_assert_eq!(indices, (1..=count).collect::<Vec<_>>());
            prop_assert!(finished.iter().all(|ev| ev.total == count));
            prop_assert_eq!(probes(&log), count);
            prop_assert!(m.is_idle());

            let expected_launches = count
                * (2 + usize::from(!inter.is_passthrough()) + usize::from(!up.is_passthrough()));
            prop_assert_eq!(launches(&log).len(), expected_launches);
        }
    }
}
