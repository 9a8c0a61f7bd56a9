//! Mux command builder.
//!
//! Combines the concatenated video file with one or more audio tracks
//! into the final container, stream-copying by default.

use super::{Command, CommandError, TaskType, PRIORITY_HIGH};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Builds the final audio/video mux command.
pub struct MuxBuilder {
    video_input: PathBuf,
    audio_inputs: Vec<PathBuf>,
    output_path: PathBuf,

    copy_video: bool,
    copy_audio: bool,
    video_codec: String,
    audio_codec: String,
    video_bitrate: String,
    audio_bitrate: String,

    // BTreeMap keeps the rendered argument order deterministic
    metadata: BTreeMap<String, String>,
    extra_args: Vec<String>,
    priority: i32,
}

impl MuxBuilder {
    pub fn new(video_input: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            video_input: video_input.into(),
            audio_inputs: Vec::new(),
            output_path: output_path.into(),
            copy_video: true,
            copy_audio: true,
            video_codec: String::new(),
            audio_codec: String::new(),
            video_bitrate: String::new(),
            audio_bitrate: String::new(),
            metadata: BTreeMap::new(),
            extra_args: Vec::new(),
            priority: PRIORITY_HIGH,
        }
    }

    /// Adds an audio input; call repeatedly for multiple tracks.
    pub fn audio_track(mut self, audio_path: impl Into<PathBuf>) -> Self {
        self.audio_inputs.push(audio_path.into());
        self
    }

    /// Copies the video stream without re-encoding.
    pub fn copy_video(mut self, copy: bool) -> Self {
        self.copy_video = copy;
        self
    }

    /// Copies audio streams without re-encoding.
    pub fn copy_audio(mut self, copy: bool) -> Self {
        self.copy_audio = copy;
        self
    }

    /// Re-encodes video with the given codec instead of copying.
    pub fn video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = codec.into();
        self.copy_video = false;
        self
    }

    /// Re-encodes audio with the given codec instead of copying.
    pub fn audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = codec.into();
        self.copy_audio = false;
        self
    }

    pub fn video_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.video_bitrate = bitrate.into();
        self
    }

    pub fn audio_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.audio_bitrate = bitrate.into();
        self
    }

    /// Adds output metadata (title, author, comment, ...).
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

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
}

impl Command for MuxBuilder {
    fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-i".into(), self.video_input.display().to_string()];

        for audio in &self.audio_inputs {
            args.push("-i".into());
            args.push(audio.display().to_string());
        }

        // Video from the first input, audio from each later input
        args.push("-map".into());
        args.push("0:v".into());
        for i in 0..self.audio_inputs.len() {
            args.push("-map".into());
            args.push(format!("{}:a", i + 1));
        }

        if self.copy_video {
            args.push("-c:v".into());
            args.push("copy".into());
        } else {
            if !self.video_codec.is_empty() {
                args.push("-c:v".into());
                args.push(self.video_codec.clone());
            }
            if !self.video_bitrate.is_empty() {
                args.push("-b:v".into());
                args.push(self.video_bitrate.clone());
            }
        }

        if self.copy_audio {
            args.push("-c:a".into());
            args.push("copy".into());
        } else {
            if !self.audio_codec.is_empty() {
                args.push("-c:a".into());
                args.push(self.audio_codec.clone());
            }
            if !self.audio_bitrate.is_empty() {
                args.push("-b:a".into());
                args.push(self.audio_bitrate.clone());
            }
        }

        for (key, value) in &self.metadata {
            args.push("-metadata".into());
            args.push(format!("{}={}", key, value));
        }

        args.extend(self.extra_args.iter().cloned());

        args.push("-y".into());
        args.push(self.output_path.display().to_string());
        args
    }

    fn run(&self) -> Result<(), CommandError> {
        super::execute(&self.build_args())
    }

    fn dry_run(&self) -> String {
        super::render_command(&self.build_args())
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn task_type(&self) -> TaskType {
        TaskType::Mux
    }

    fn input_path(&self) -> &Path {
        &self.video_input
    }

    fn output_path(&self) -> &Path {
        &self.output_path
    }
}
