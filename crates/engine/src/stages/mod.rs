//! Invocation builders for the external tools driven by the pipeline

pub mod ffmpeg;
pub mod realesrgan;
pub mod rife;

pub use ffmpeg::{
    build_extract_invocation, build_reassemble_invocation, ReassembleParams, FRAME_EXTENSION,
    FRAME_PATTERN,
};
pub use realesrgan::build_upscale_invocation;
pub use rife::build_interpolate_invocation;
