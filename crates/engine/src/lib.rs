//! anime2x engine
//!
//! Batch frame pipeline: extract frames with ffmpeg, interpolate them with
//! rife, upscale them with Real-ESRGAN and reassemble the result, one input at
//! a time, reporting progress as a stream of events.

pub mod engine;
pub mod error;
pub mod frame_io;
pub mod frame_rate;
pub mod inputs;
pub mod job;
pub mod machine;
pub mod params;
pub mod preflight;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod reveal;
pub mod runner;
pub mod stages;
pub mod status;
pub mod status_server;

#[cfg(all(test, unix))]
mod test_tools;

pub use anime2x_config as config;
pub use anime2x_config::{Config, ConfigError, FailurePolicy};
pub use engine::{Engine, EngineError};
pub use error::PipelineError;
pub use frame_io::{count_frames, count_frames_async, extract, reassemble, Extracted};
pub use frame_rate::FrameRate;
pub use inputs::{collect_inputs, is_video_file, scan_directory, VIDEO_EXTENSIONS};
pub use job::PipelineJob;
pub use machine::{Effect, EngineState, Event, PipelineMachine, RunId};
pub use params::{JobParameters, Multiplier, ParamsError};
pub use preflight::{check_ffmpeg_tool, parse_tool_version, run_preflight, PreflightError};
pub use probe::{probe_file, ProbeError, ProbeResult};
pub use progress::{ProgressEvent, ProgressKind, Severity};
pub use queue::JobQueue;
pub use runner::{StageHandle, StageInvocation, StageOutcome, StageRunner};
pub use status::{new_shared_status, SharedStatus, StatusSnapshot};
pub use status_server::{create_status_router, run_status_server, ServerError};
