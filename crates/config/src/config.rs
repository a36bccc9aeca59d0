//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Locations of the ffmpeg toolchain used for extraction, probing and reassembly
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

/// Frame interpolation tool (rife-ncnn-vulkan invocation contract)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterpolationConfig {
    #[serde(default = "default_rife_executable")]
    pub executable: PathBuf,
    /// Model directory passed with `-m`
    #[serde(default = "default_rife_model")]
    pub model_path: PathBuf,
    /// Extra arguments appended verbatim (GPU id, thread counts, ...)
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_rife_executable() -> PathBuf {
    PathBuf::from("rife-ncnn-vulkan")
}

fn default_rife_model() -> PathBuf {
    PathBuf::from("rife/rife-v4.6")
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            executable: default_rife_executable(),
            model_path: default_rife_model(),
            extra_args: Vec::new(),
        }
    }
}

/// Frame upscaling tool (realesrgan-ncnn-vulkan invocation contract)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpscaleConfig {
    #[serde(default = "default_realesrgan_executable")]
    pub executable: PathBuf,
    /// Directory holding the model files, passed with `-m`
    #[serde(default = "default_realesrgan_models")]
    pub model_dir: PathBuf,
    /// Model name passed with `-n`
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_realesrgan_executable() -> PathBuf {
    PathBuf::from("realesrgan-ncnn-vulkan")
}

fn default_realesrgan_models() -> PathBuf {
    PathBuf::from("realesrgan/models")
}

fn default_model_name() -> String {
    "realesr-animevideov3".to_string()
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self {
            executable: default_realesrgan_executable(),
            model_dir: default_realesrgan_models(),
            model_name: default_model_name(),
            extra_args: Vec::new(),
        }
    }
}

/// Encoder settings for the reassembly stage (passed through to ffmpeg)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodeConfig {
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    /// Codec for the remuxed original audio track
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            video_codec: default_video_codec(),
            pixel_format: default_pixel_format(),
            audio_codec: default_audio_codec(),
        }
    }
}

/// What the engine does when one job of a batch fails
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abandon the failing job and the rest of the queue
    #[default]
    Halt,
    /// Abandon the failing job only and continue with the next one
    Skip,
}

impl FailurePolicy {
    /// Parse a policy name ("halt" / "skip"), case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "halt" | "stop" => Some(FailurePolicy::Halt),
            "skip" | "continue" => Some(FailurePolicy::Skip),
            _ => None,
        }
    }
}

/// Pipeline behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Suffix appended to the input basename for the final artifact
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// How long a cancelled tool gets to exit after SIGTERM before it is killed
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_output_suffix() -> String {
    "_anime2x".to_string()
}

fn default_cancel_grace_ms() -> u64 {
    3000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_suffix: default_output_suffix(),
            failure_policy: FailurePolicy::default(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub interpolation: InterpolationConfig,
    #[serde(default)]
    pub upscale: UpscaleConfig,
    #[serde(default)]
    pub encode: EncodeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - ANIME2X_FFMPEG -> tools.ffmpeg
    /// - ANIME2X_FFPROBE -> tools.ffprobe
    /// - ANIME2X_RIFE -> interpolation.executable
    /// - ANIME2X_RIFE_MODEL -> interpolation.model_path
    /// - ANIME2X_REALESRGAN -> upscale.executable
    /// - ANIME2X_REALESRGAN_MODELS -> upscale.model_dir
    /// - ANIME2X_FAILURE_POLICY -> pipeline.failure_policy
    /// - ANIME2X_CANCEL_GRACE_MS -> pipeline.cancel_grace_ms
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = env_path("ANIME2X_FFMPEG") {
            self.tools.ffmpeg = path;
        }
        if let Some(path) = env_path("ANIME2X_FFPROBE") {
            self.tools.ffprobe = path;
        }
        if let Some(path) = env_path("ANIME2X_RIFE") {
            self.interpolation.executable = path;
        }
        if let Some(path) = env_path("ANIME2X_RIFE_MODEL") {
            self.interpolation.model_path = path;
        }
        if let Some(path) = env_path("ANIME2X_REALESRGAN") {
            self.upscale.executable = path;
        }
        if let Some(path) = env_path("ANIME2X_REALESRGAN_MODELS") {
            self.upscale.model_dir = path;
        }

        // ANIME2X_FAILURE_POLICY: "halt" or "skip", anything else keeps the current value
        if let Ok(val) = env::var("ANIME2X_FAILURE_POLICY") {
            if let Some(policy) = FailurePolicy::parse(&val) {
                self.pipeline.failure_policy = policy;
            }
        }

        if let Ok(val) = env::var("ANIME2X_CANCEL_GRACE_MS") {
            if let Ok(ms) = val.trim().parse::<u64>() {
                self.pipeline.cancel_grace_ms = ms;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    /// (environment overrides still apply).
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let mut config = Config::default();
            config.apply_env_overrides();
            return Ok(config);
        }
        Self::load(path)
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
