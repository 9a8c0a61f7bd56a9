//! Real-time encoding progress: the sample model and the transcoder
//! diagnostic-line parser.
//!
//! The parser accepts both the stats format (everything on one line) and
//! the key=value-per-line progress format. Fields are extracted
//! independently; anything absent from a line leaves the sample
//! unchanged.

use crate::timeutil::parse_timestamp;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of an encoding task as seen through its progress samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// Waiting in queue.
    Queued,
    /// Subprocess spawned, no data yet.
    Starting,
    /// Actively encoding.
    Encoding,
    /// Finished successfully.
    Completed,
    /// Terminated with an error.
    Failed,
    /// User cancelled.
    Cancelled,
}

impl ProgressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressState::Queued => "queued",
            ProgressState::Starting => "starting",
            ProgressState::Encoding => "encoding",
            ProgressState::Completed => "completed",
            ProgressState::Failed => "failed",
            ProgressState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ProgressState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback receiving progress updates during encoding.
pub type ProgressSink = Arc<dyn Fn(&EncodingProgress) + Send + Sync>;

/// A progress sample for one encoding task.
#[derive(Debug, Clone)]
pub struct EncodingProgress {
    /// Current frame number.
    pub frame: i64,
    /// Frames per second being processed.
    pub fps: f64,
    /// Current output timestamp as reported (HH:MM:SS.ss).
    pub current_time: String,
    /// Current bitrate, e.g. "128.0kbits/s".
    pub bitrate: String,
    /// Realtime-speed multiplier, e.g. 2.34.
    pub speed: f64,
    /// Emitted size, e.g. "1024kB".
    pub size: String,
    /// Total duration in seconds, for fractional completion.
    pub total_duration: f64,
    /// Percentage complete, monotone non-decreasing in [0, 100].
    pub progress: f64,
    pub state: ProgressState,
    pub started_at: Instant,
    pub updated_at: Instant,
}

impl EncodingProgress {
    /// Creates a queued sample for a task covering `total_duration`
    /// seconds of media.
    pub fn new(total_duration: f64) -> Self {
        let now = Instant::now();
        Self {
            frame: 0,
            fps: 0.0,
            current_time: String::new(),
            bitrate: String::new(),
            speed: 0.0,
            size: String::new(),
            total_duration,
            progress: 0.0,
            state: ProgressState::Queued,
            started_at: now,
            updated_at: now,
        }
    }

    /// Recomputes fractional completion from the current output position.
    ///
    /// Progress never decreases within a task and is clamped to 100.
    pub fn update_position(&mut self, current_seconds: f64) {
        if self.total_duration > 0.0 {
            let pct = (current_seconds / self.total_duration * 100.0).min(100.0);
            if pct > self.progress {
                self.progress = pct;
            }
        }
        self.updated_at = Instant::now();
    }

    /// Estimated time remaining based on elapsed time and completion.
    pub fn eta(&self) -> Duration {
        if self.speed <= 0.0 || self.progress <= 0.0 {
            return Duration::ZERO;
        }

        let elapsed = self.started_at.elapsed();
        let total_estimated = elapsed.as_secs_f64() / (self.progress / 100.0);
        let remaining = total_estimated - elapsed.as_secs_f64();
        if remaining <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(remaining)
        }
    }

    /// Human-readable one-line summary.
    pub fn format_summary(&self) -> String {
        format!(
            "Progress: {:.1}% | Speed: {:.2}x | Bitrate: {} | Size: {} | ETA: {}",
            self.progress,
            self.speed,
            self.bitrate,
            self.size,
            format_duration(self.eta()),
        )
    }
}

fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "calculating...".to_string();
    }

    let total = d.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if total < 60 {
        format!("{}s", seconds)
    } else if total < 3600 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}h{}m{}s", hours, minutes, seconds)
    }
}

/// Parses transcoder diagnostic lines into progress updates.
pub struct ProgressParser {
    frame_re: Regex,
    fps_re: Regex,
    size_re: Regex,
    time_re: Regex,
    bitrate_re: Regex,
    speed_re: Regex,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self {
            // Match both "frame=123" and "frame= 123" spellings
            frame_re: Regex::new(r"^frame=\s*(\d+)").unwrap(),
            fps_re: Regex::new(r"^fps=\s*([0-9.]+)").unwrap(),
            // Key-value mode spells these "total_size" and "out_time"
            size_re: Regex::new(r"^(?:total_)?size=\s*([0-9]+)").unwrap(),
            time_re: Regex::new(r"^(?:out_)?time=\s*([0-9:.]+)").unwrap(),
            bitrate_re: Regex::new(r"^bitrate=\s*([0-9.]+)").unwrap(),
            // Speed may lead a line or sit mid-line in the stats format
            speed_re: Regex::new(r"(?:^|\s)speed=\s*([0-9.]+)x?").unwrap(),
        }
    }

    /// Parses a single diagnostic line, updating `progress`.
    ///
    /// Returns true when any field was extracted. The `progress=continue`
    /// and `progress=end` markers are acknowledged but carry no data. A
    /// successful extraction moves a Starting sample to Encoding.
    pub fn parse_line(&self, line: &str, progress: &mut EncodingProgress) -> bool {
        let line = line.trim();
        if line.is_empty() || line == "progress=continue" || line == "progress=end" {
            return false;
        }

        let mut updated = false;

        if let Some(caps) = self.frame_re.captures(line) {
            if let Ok(frame) = caps[1].parse::<i64>() {
                progress.frame = frame;
                updated = true;
            }
        }

        if let Some(caps) = self.fps_re.captures(line) {
            if let Ok(fps) = caps[1].parse::<f64>() {
                progress.fps = fps;
                updated = true;
            }
        }

        if let Some(caps) = self.size_re.captures(line) {
            progress.size = format!("{}kB", &caps[1]);
            updated = true;
        }

        if let Some(caps) = self.time_re.captures(line) {
            progress.current_time = caps[1].to_string();
            let seconds = parse_timestamp(&caps[1]);
            if seconds > 0.0 {
                progress.update_position(seconds);
            }
            updated = true;
        }

        if let Some(caps) = self.bitrate_re.captures(line) {
            progress.bitrate = format!("{}kbits/s", &caps[1]);
            updated = true;
        }

        if let Some(caps) = self.speed_re.captures(line) {
            if let Ok(speed) = caps[1].parse::<f64>() {
                progress.speed = speed;
                updated = true;
            }
        }

        if updated && progress.state == ProgressState::Starting {
            progress.state = ProgressState::Encoding;
        }

        updated
    }
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}
