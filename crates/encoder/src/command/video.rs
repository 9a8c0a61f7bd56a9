//! Video encode command builder.
//!
//! Encodes one chunk window of the source video stream. Audio in the
//! chunk is stream-copied; the real audio track is produced by the audio
//! pipeline and muxed at the end.

use super::{Command, CommandError, TaskType, PRIORITY_NORMAL};
use crate::chunk::Chunk;
use crate::progress::ProgressSink;
use crate::timeutil::format_seconds;
use std::path::{Path, PathBuf};

/// Builds ffmpeg commands that encode one video chunk.
pub struct VideoBuilder {
    chunk: Chunk,
    output_path: PathBuf,
    codec: String,
    crf: u32,
    preset: String,
    bitrate: String,
    resolution: String,
    frame_rate: u32,
    pixel_format: String,
    extra_args: Vec<String>,
    priority: i32,
    progress_sink: Option<ProgressSink>,
}

impl VideoBuilder {
    /// Creates a builder for the given chunk and output path with H.264
    /// defaults.
    pub fn new(chunk: Chunk, output_path: impl Into<PathBuf>) -> Self {
        Self {
            chunk,
            output_path: output_path.into(),
            codec: "libx264".to_string(),
            crf: 23,
            preset: "medium".to_string(),
            bitrate: String::new(),
            resolution: String::new(),
            frame_rate: 0,
            pixel_format: "yuv420p".to_string(),
            extra_args: Vec::new(),
            priority: PRIORITY_NORMAL,
            progress_sink: None,
        }
    }

    /// Sets the video codec (e.g. "libx264", "libx265", "libsvtav1").
    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    /// Sets the Constant Rate Factor (0-51, lower is better quality).
    pub fn crf(mut self, crf: u32) -> Self {
        self.crf = crf;
        self
    }

    /// Sets the encoding preset.
    pub fn preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    /// Sets a target bitrate (e.g. "5M"); empty keeps CRF-driven quality.
    pub fn bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = bitrate.into();
        self
    }

    /// Sets the output resolution as "WIDTHxHEIGHT"; rendered as a scale
    /// filter. Empty keeps the original.
    pub fn resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = resolution.into();
        self
    }

    /// Sets the output frame rate (0 = keep original).
    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Sets the pixel format.
    pub fn pixel_format(mut self, pixfmt: impl Into<String>) -> Self {
        self.pixel_format = pixfmt.into();
        self
    }

    /// Appends custom ffmpeg arguments, e.g. encoder-specific params.
    pub fn extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches a sink receiving progress updates while encoding.
    pub fn progress_sink(mut self, sink: ProgressSink) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    /// The scale filter derived from the configured resolution, if any.
    fn scale_filter(&self) -> Option<String> {
        if self.resolution.is_empty() {
            return None;
        }
        let mut parts = self.resolution.split('x');
        let (Some(w), Some(h)) = (parts.next(), parts.next()) else {
            return None;
        };
        Some(format!("scale={}:{}", w, h))
    }
}

impl Command for VideoBuilder {
    fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-i".into(), self.chunk.encode_input().display().to_string()];

        // Pre-split segments already cover exactly the chunk window
        if self.chunk.segment_path.is_none() {
            args.push("-ss".into());
            args.push(format_seconds(self.chunk.start_time));
            args.push("-to".into());
            args.push(format_seconds(self.chunk.end_time));
        }

        if let Some(filter) = self.scale_filter() {
            args.push("-vf".into());
            args.push(filter);
        }

        args.push("-c:v".into());
        args.push(self.codec.clone());

        if !self.bitrate.is_empty() {
            args.push("-b:v".into());
            args.push(self.bitrate.clone());
        }

        if self.crf <= 51 {
            args.push("-crf".into());
            args.push(self.crf.to_string());
        }

        if !self.preset.is_empty() {
            args.push("-preset".into());
            args.push(self.preset.clone());
        }

        if self.frame_rate > 0 {
            args.push("-r".into());
            args.push(self.frame_rate.to_string());
        }

        if !self.pixel_format.is_empty() {
            args.push("-pix_fmt".into());
            args.push(self.pixel_format.clone());
        }

        // Any audio in the chunk rides along without re-encoding
        args.push("-c:a".into());
        args.push("copy".into());

        args.extend(self.extra_args.iter().cloned());

        args.push("-y".into());
        args.push(self.output_path.display().to_string());
        args
    }

    fn run(&self) -> Result<(), CommandError> {
        let args = self.build_args();
        match &self.progress_sink {
            Some(sink) => super::execute_with_progress(&args, self.chunk.duration(), sink),
            None => super::execute(&args),
        }
    }

    fn dry_run(&self) -> String {
        super::render_command(&self.build_args())
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn task_type(&self) -> TaskType {
        TaskType::VideoEncode
    }

    fn input_path(&self) -> &Path {
        self.chunk.encode_input()
    }

    fn output_path(&self) -> &Path {
        &self.output_path
    }
}
