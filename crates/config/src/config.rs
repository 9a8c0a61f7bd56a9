//! Core configuration structures, YAML loading, and validation.
//!
//! Settings priority is CLI flags > settings file > built-in defaults.
//! This crate owns the file and default layers; the CLI crate applies the
//! flag layer on top before calling [`Config::validate`].

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default seconds per chunk when the source has no chapters (10 minutes).
pub const DEFAULT_CHUNK_DURATION: u32 = 600;

/// Minimum accepted chunk duration in seconds.
pub const MIN_CHUNK_DURATION: u32 = 1;

/// Maximum accepted chunk duration in seconds (24 hours).
pub const MAX_CHUNK_DURATION: u32 = 86400;

/// Error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading the settings file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// One or more validation problems, joined into a single message.
    #[error("configuration validation failed:\n  - {0}")]
    Validation(String),
}

/// Encoding mode selecting the resource constraint preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// CPU slots only.
    CpuOnly,
    /// Single GPU encoder plus parallel GPU scaling.
    GpuOnly,
    /// Both CPU and GPU resources.
    #[default]
    Mixed,
}

impl Mode {
    /// All accepted mode spellings, for error messages and flag parsing.
    pub fn values() -> &'static [&'static str] {
        &["cpu-only", "gpu-only", "mixed"]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::CpuOnly => "cpu-only",
            Mode::GpuOnly => "gpu-only",
            Mode::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu-only" => Ok(Mode::CpuOnly),
            "gpu-only" => Ok(Mode::GpuOnly),
            "mixed" => Ok(Mode::Mixed),
            other => Err(format!(
                "invalid mode '{}', must be one of: {}",
                other,
                Mode::values().join(", ")
            )),
        }
    }
}

/// Audio encoding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Audio codec, e.g. "libopus", "aac", "libmp3lame".
    pub codec: String,
    /// Audio bitrate, e.g. "128k", "192k", "320k".
    pub bitrate: String,
    /// Sample rate in Hz, e.g. 48000, 44100.
    pub sample_rate: u32,
    /// Channel count: 1 (mono), 2 (stereo), 6 (5.1).
    pub channels: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: "libopus".to_string(),
            bitrate: "128k".to_string(),
            sample_rate: 48000,
            channels: 2,
        }
    }
}

impl AudioConfig {
    /// Collects validation problems into `errors`.
    fn validate_into(&self, errors: &mut Vec<String>) {
        if self.codec.is_empty() {
            errors.push("audio codec is required".to_string());
        }
        if self.bitrate.is_empty() {
            errors.push("audio bitrate is required".to_string());
        }
        if self.sample_rate == 0 {
            errors.push("audio sample rate must be positive".to_string());
        }
        if self.channels == 0 {
            errors.push("audio channels must be positive".to_string());
        } else if self.channels > 8 {
            errors.push("audio channels cannot exceed 8".to_string());
        }
    }
}

/// Video encoding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Video codec, e.g. "libx264", "libx265", "libsvtav1".
    pub codec: String,
    /// Constant Rate Factor, 0-51, lower is better quality.
    pub crf: u32,
    /// Encoder preset, e.g. "ultrafast", "medium", "veryslow".
    pub preset: String,
    /// Target bitrate, e.g. "5M" (empty = use CRF).
    pub bitrate: String,
    /// Output resolution as WIDTHxHEIGHT (empty = keep original).
    pub resolution: String,
    /// Output frame rate (0 = keep original).
    pub frame_rate: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            crf: 23,
            preset: "medium".to_string(),
            bitrate: String::new(),
            resolution: String::new(),
            frame_rate: 0,
        }
    }
}

impl VideoConfig {
    fn validate_into(&self, errors: &mut Vec<String>) {
        if self.codec.is_empty() {
            errors.push("video codec is required".to_string());
        }
        if self.crf > 51 {
            errors.push("video CRF must be between 0 and 51".to_string());
        }
        if self.preset.is_empty() {
            errors.push("video preset is required".to_string());
        }
        if !self.resolution.is_empty() && !is_valid_resolution(&self.resolution) {
            errors.push(
                "video resolution must be in format WIDTHxHEIGHT (e.g., 1920x1080)".to_string(),
            );
        }
    }
}

/// Final mux settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixingConfig {
    /// Copy the video stream without re-encoding.
    pub copy_video: bool,
    /// Copy audio streams without re-encoding.
    pub copy_audio: bool,
}

impl Default for MixingConfig {
    fn default() -> Self {
        Self {
            copy_video: true,
            copy_audio: true,
        }
    }
}

/// Complete transcoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the source media file (required).
    pub input: PathBuf,
    /// Path to the final container (required).
    pub output: PathBuf,

    /// Seconds per chunk in the fixed-width fallback.
    pub chunk_duration: u32,
    /// Parallel worker count; 0 = auto-detect logical CPU count.
    pub workers: u32,
    /// Encoding mode selecting the resource preset.
    pub mode: Mode,

    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub mixing: MixingConfig,

    /// Fail the run on any chunk error or gap.
    pub strict_mode: bool,
    /// Emit debug-level entries to the session log.
    pub verbose: bool,
    /// Print the effective configuration and sample commands, then exit.
    pub dry_run: bool,
    /// Pre-split the source at chapter boundaries before encoding.
    pub pre_split: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::new(),
            chunk_duration: DEFAULT_CHUNK_DURATION,
            workers: 0,
            mode: Mode::Mixed,
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
            mixing: MixingConfig::default(),
            strict_mode: true,
            verbose: false,
            dry_run: false,
            pre_split: false,
        }
    }
}

impl Config {
    /// Load configuration from a YAML settings file, with unset keys
    /// filled from the built-in defaults.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Resolve `workers == 0` to the host logical CPU count.
    pub fn resolve_workers(&mut self) {
        if self.workers == 0 {
            self.workers = num_cpus::get() as u32;
        }
    }

    /// Validate the final configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.input.as_os_str().is_empty() {
            errors.push("input file is required".to_string());
        } else if !self.input.exists() {
            errors.push(format!("input file does not exist: {}", self.input.display()));
        }

        if self.output.as_os_str().is_empty() {
            errors.push("output file is required".to_string());
        }

        if self.chunk_duration < MIN_CHUNK_DURATION {
            errors.push(format!(
                "chunk duration must be at least {} second(s)",
                MIN_CHUNK_DURATION
            ));
        } else if self.chunk_duration > MAX_CHUNK_DURATION {
            errors.push(format!(
                "chunk duration cannot exceed {} seconds",
                MAX_CHUNK_DURATION
            ));
        }

        self.audio.validate_into(&mut errors);
        self.video.validate_into(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("\n  - ")))
        }
    }
}

/// Checks a WIDTHxHEIGHT resolution string such as "1920x1080".
fn is_valid_resolution(res: &str) -> bool {
    let mut parts = res.split('x');
    let (Some(w), Some(h), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    matches!(
        (w.parse::<u32>(), h.parse::<u32>()),
        (Ok(w), Ok(h)) if w > 0 && h > 0
    )
}

/// Searches the standard locations for a settings file.
///
/// Returns `None` when no file is found, which is non-fatal; the caller
/// proceeds with built-in defaults.
pub fn find_config_file() -> Option<PathBuf> {
    let mut locations = vec![PathBuf::from("./parenc.yaml"), PathBuf::from("./parenc.yml")];
    if let Ok(home) = env::var("HOME") {
        locations.push(Path::new(&home).join(".parenc/config.yaml"));
        locations.push(Path::new(&home).join(".parenc/config.yml"));
    }
    locations.push(PathBuf::from("/etc/parenc/config.yaml"));
    locations.push(PathBuf::from("/etc/parenc/config.yml"));

    locations.into_iter().find(|p| p.exists())
}
