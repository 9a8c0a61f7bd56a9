//! The uniform runnable unit executed by the orchestrator.
//!
//! Every specialized builder (audio, video, split, concat, mux)
//! implements [`Command`], letting the scheduler and the driver treat
//! work items uniformly: build the argument vector, run it as an ffmpeg
//! subprocess, or render it for a dry run.

pub mod audio;
pub mod concat;
pub mod mux;
pub mod split;
pub mod video;

pub use audio::AudioBuilder;
pub use concat::ConcatBuilder;
pub use mux::MuxBuilder;
pub use split::SplitBuilder;
pub use video::VideoBuilder;

use crate::progress::{EncodingProgress, ProgressParser, ProgressSink, ProgressState};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command as Subprocess, Stdio};
use thiserror::Error;

/// Low priority: optional post-processing.
pub const PRIORITY_LOW: i32 = 0;
/// Normal priority: standard encoding tasks.
pub const PRIORITY_NORMAL: i32 = 5;
/// High priority: critical chunks, final concatenation.
pub const PRIORITY_HIGH: i32 = 10;

/// How many trailing diagnostic lines are kept for error reporting.
const STDERR_TAIL_LINES: usize = 20;

/// Error type for command execution.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The subprocess exited with a non-zero status.
    #[error("ffmpeg exited with code {code}: {tail}")]
    SubprocessFailed { code: i32, tail: String },

    /// The subprocess was killed by a signal.
    #[error("ffmpeg was terminated by a signal")]
    Terminated,

    /// The subprocess could not be spawned or piped.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The type of an encoding task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    AudioExtractEncode,
    VideoEncode,
    StreamSplit,
    ConcatJoin,
    Mux,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::AudioExtractEncode => "audio-extract-encode",
            TaskType::VideoEncode => "video-encode",
            TaskType::StreamSplit => "stream-split",
            TaskType::ConcatJoin => "concat-join",
            TaskType::Mux => "mux",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ffmpeg invocation that can be built, executed, or previewed.
///
/// Builders are fluent and consuming; mutation happens before first use
/// only. `run` blocks until the subprocess finishes, which is why the
/// orchestrator wraps it in a blocking worker.
pub trait Command: Send {
    /// Constructs the ffmpeg argument vector.
    fn build_args(&self) -> Vec<String>;

    /// Executes the command, streaming progress to the attached sink if
    /// any, and fails on a non-zero exit status.
    fn run(&self) -> Result<(), CommandError>;

    /// Renders the command as a human-readable string without executing.
    fn dry_run(&self) -> String;

    /// Priority level for task scheduling; higher runs first.
    fn priority(&self) -> i32;

    fn task_type(&self) -> TaskType;

    /// The primary input file.
    fn input_path(&self) -> &Path;

    /// The produced output file.
    fn output_path(&self) -> &Path;
}

/// Renders an argument vector as a `ffmpeg ...` command line.
pub(crate) fn render_command(args: &[String]) -> String {
    format!("ffmpeg {}", args.join(" "))
}

/// Runs ffmpeg with the given arguments, consuming output silently.
///
/// Stderr is captured so a failure can report the trailing diagnostic
/// lines.
pub(crate) fn execute(args: &[String]) -> Result<(), CommandError> {
    let output = Subprocess::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .output()?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(exit_error(output.status.code(), tail_of(&stderr)))
}

/// Runs ffmpeg with the given arguments, parsing its diagnostic stream
/// line-wise and delivering each update to `sink` before the next read.
///
/// `total_duration` is the media length covered by this command, used for
/// fractional completion.
pub(crate) fn execute_with_progress(
    args: &[String],
    total_duration: f64,
    sink: &ProgressSink,
) -> Result<(), CommandError> {
    let sink = &**sink;

    let mut child = Subprocess::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut progress = EncodingProgress::new(total_duration);
    progress.state = ProgressState::Starting;
    sink(&progress);

    let parser = ProgressParser::new();
    let mut tail: Vec<String> = Vec::new();

    // stderr handle exists: we piped it above
    let stderr = child.stderr.take().expect("stderr was piped");
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);

        // The transcoder rewrites its stats line with carriage returns
        for piece in line.split('\r') {
            let piece = piece.trim_end_matches('\n');
            if piece.is_empty() {
                continue;
            }
            if parser.parse_line(piece, &mut progress) {
                sink(&progress);
            }
            push_tail(&mut tail, piece);
        }
    }

    let status = child.wait()?;

    if status.success() {
        progress.state = ProgressState::Completed;
        progress.progress = 100.0;
        sink(&progress);
        Ok(())
    } else {
        progress.state = ProgressState::Failed;
        sink(&progress);
        Err(exit_error(status.code(), tail.join("\n")))
    }
}

fn exit_error(code: Option<i32>, tail: String) -> CommandError {
    match code {
        Some(code) => CommandError::SubprocessFailed { code, tail },
        None => CommandError::Terminated,
    }
}

fn push_tail(tail: &mut Vec<String>, line: &str) {
    if tail.len() == STDERR_TAIL_LINES {
        tail.remove(0);
    }
    tail.push(line.to_string());
}

fn tail_of(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Asserts that `args` contains `flag` immediately followed by `value`.
    pub fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    /// Asserts that `args` contains a standalone `flag`.
    pub fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|arg| arg == flag)
    }
}
