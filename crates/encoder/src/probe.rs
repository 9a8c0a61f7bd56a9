//! Media probing: extracting duration, stream presence, and chapter
//! markers from a source file.
//!
//! The planner and pipeline consume the [`MediaSource`] trait rather than
//! [`ProbeResult`] directly, which decouples them from the ffprobe tool
//! and keeps them testable with in-memory fixtures.

use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The probe tool could not be executed or exited non-zero.
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    /// The probe tool produced unparsable output.
    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// The container reported no usable duration.
    #[error("duration not available in format metadata")]
    MissingDuration,

    /// IO error while spawning the probe tool.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A chapter marker with start and end as decimal-second strings, exactly
/// as the probe tool reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterInfo {
    pub start_time: String,
    pub end_time: String,
}

/// The minimal media metadata the planner and pipeline need.
pub trait MediaSource {
    /// Container duration in seconds.
    fn duration(&self) -> Result<f64, ProbeError>;

    /// Chapter markers in probe order; empty when the container has none.
    fn chapters(&self) -> Vec<ChapterInfo>;

    fn has_chapters(&self) -> bool {
        !self.chapters().is_empty()
    }

    fn has_audio(&self) -> bool;

    fn has_video(&self) -> bool;
}

/// A media stream (audio, video, subtitle, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub index: u32,
    pub codec_name: String,
    pub codec_type: String,
}

/// Container-level format information.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormatInfo {
    pub format_name: String,
    pub format_long_name: String,
    /// Duration as reported (decimal seconds string); empty if absent.
    pub duration: String,
    pub size_bytes: u64,
}

/// Complete metadata extracted from a media file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub chapters: Vec<ChapterInfo>,
    pub streams: Vec<Stream>,
    pub format: FormatInfo,
}

impl ProbeResult {
    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    pub fn audio_streams(&self) -> Vec<&Stream> {
        self.streams
            .iter()
            .filter(|s| s.codec_type == "audio")
            .collect()
    }

    pub fn video_streams(&self) -> Vec<&Stream> {
        self.streams
            .iter()
            .filter(|s| s.codec_type == "video")
            .collect()
    }
}

impl MediaSource for ProbeResult {
    fn duration(&self) -> Result<f64, ProbeError> {
        if self.format.duration.is_empty() {
            return Err(ProbeError::MissingDuration);
        }
        self.format.duration.parse::<f64>().map_err(|e| {
            ProbeError::ParseError(format!(
                "failed to parse duration '{}': {}",
                self.format.duration, e
            ))
        })
    }

    fn chapters(&self) -> Vec<ChapterInfo> {
        self.chapters.clone()
    }

    fn has_audio(&self) -> bool {
        !self.audio_streams().is_empty()
    }

    fn has_video(&self) -> bool {
        !self.video_streams().is_empty()
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub chapters: Option<Vec<Chapter>>,
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Chapter {
        pub start_time: Option<String>,
        pub end_time: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub index: Option<u32>,
        pub codec_name: Option<String>,
        pub codec_type: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub format_name: Option<String>,
        pub format_long_name: Option<String>,
        pub duration: Option<String>,
        pub size: Option<String>,
    }
}

/// Probes a media file with ffprobe and parses the JSON output.
///
/// Runs `ffprobe -v quiet -print_format json -show_chapters -show_streams
/// -show_format <path>`.
pub fn probe(source_path: &Path) -> Result<ProbeResult, ProbeError> {
    if source_path.as_os_str().is_empty() {
        return Err(ProbeError::ProbeFailed("source path cannot be empty".to_string()));
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_chapters",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::ProbeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_probe_output(&stdout)
}

/// Parses ffprobe JSON output into a [`ProbeResult`].
pub fn parse_probe_output(json_str: &str) -> Result<ProbeResult, ProbeError> {
    let raw: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let format = raw.format.ok_or_else(|| {
        ProbeError::ParseError("missing format information in ffprobe output".to_string())
    })?;

    let chapters = raw
        .chapters
        .unwrap_or_default()
        .into_iter()
        .map(|c| ChapterInfo {
            start_time: c.start_time.unwrap_or_default(),
            end_time: c.end_time.unwrap_or_default(),
        })
        .collect();

    let streams = raw
        .streams
        .unwrap_or_default()
        .into_iter()
        .map(|s| Stream {
            index: s.index.unwrap_or(0),
            codec_name: s.codec_name.unwrap_or_default(),
            codec_type: s.codec_type.unwrap_or_default(),
        })
        .collect();

    let size_bytes = format
        .size
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(ProbeResult {
        chapters,
        streams,
        format: FormatInfo {
            format_name: format.format_name.unwrap_or_default(),
            format_long_name: format.format_long_name.unwrap_or_default(),
            duration: format.duration.unwrap_or_default(),
            size_bytes,
        },
    })
}
