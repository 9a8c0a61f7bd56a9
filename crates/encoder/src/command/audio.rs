//! Audio extract-and-encode command builder.
//!
//! Extracts the audio of one chunk window from the source (or from a
//! pre-split segment) and encodes it with the configured codec.

use super::{Command, CommandError, TaskType, PRIORITY_NORMAL};
use crate::chunk::Chunk;
use crate::progress::ProgressSink;
use crate::timeutil::format_seconds;
use std::path::{Path, PathBuf};

/// Builds ffmpeg commands that extract and encode one audio chunk.
pub struct AudioBuilder {
    chunk: Chunk,
    output_path: PathBuf,
    codec: String,
    bitrate: String,
    sample_rate: u32,
    channels: u32,
    filters: Vec<String>,
    priority: i32,
    progress_sink: Option<ProgressSink>,
}

impl AudioBuilder {
    /// Creates a builder for the given chunk and output path with Opus
    /// defaults.
    pub fn new(chunk: Chunk, output_path: impl Into<PathBuf>) -> Self {
        Self {
            chunk,
            output_path: output_path.into(),
            codec: "libopus".to_string(),
            bitrate: "128k".to_string(),
            sample_rate: 0,
            channels: 0,
            filters: Vec::new(),
            priority: PRIORITY_NORMAL,
            progress_sink: None,
        }
    }

    /// Sets the audio codec (e.g. "libopus", "aac", "libmp3lame").
    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    /// Sets the audio bitrate (e.g. "128k", "192k").
    pub fn bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = bitrate.into();
        self
    }

    /// Sets the sample rate in Hz (0 = keep original).
    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Sets the channel count (0 = keep original).
    pub fn channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    /// Appends an audio filter (e.g. "volume=0.5").
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        if !filter.is_empty() {
            self.filters.push(filter);
        }
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
}

impl Command for AudioBuilder {
    fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-i".into(), self.chunk.encode_input().display().to_string()];

        // Pre-split segments already cover exactly the chunk window
        if self.chunk.segment_path.is_none() {
            args.push("-ss".into());
            args.push(format_seconds(self.chunk.start_time));
            args.push("-to".into());
            args.push(format_seconds(self.chunk.end_time));
        }

        args.push("-vn".into());
        args.push("-c:a".into());
        args.push(self.codec.clone());
        args.push("-b:a".into());
        args.push(self.bitrate.clone());

        if self.sample_rate > 0 {
            args.push("-ar".into());
            args.push(self.sample_rate.to_string());
        }

        if self.channels > 0 {
            args.push("-ac".into());
            args.push(self.channels.to_string());
        }

        if !self.filters.is_empty() {
            args.push("-af".into());
            args.push(self.filters.join(","));
        }

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
        TaskType::AudioExtractEncode
    }

    fn input_path(&self) -> &Path {
        self.chunk.encode_input()
    }

    fn output_path(&self) -> &Path {
        &self.output_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::test_support::{has_flag, has_flag_with_value};
    use proptest::prelude::*;

    fn test_chunk() -> Chunk {
        Chunk::new(1, 0.0, 30.53, "/media/film.mkv").unwrap()
    }

    #[test]
    fn test_default_args() {
        let builder = AudioBuilder::new(test_chunk(), "/tmp/audio_chunk_001.opus");
        let args = builder.build_args();

        assert!(has_flag_with_value(&args, "-i", "/media/film.mkv"));
        assert!(has_flag_with_value(&args, "-ss", "00:00:00.00"));
        assert!(has_flag_with_value(&args, "-to", "00:00:30.53"));
        assert!(has_flag(&args, "-vn"));
        assert!(has_flag_with_value(&args, "-c:a", "libopus"));
        assert!(has_flag_with_value(&args, "-b:a", "128k"));
        assert!(has_flag(&args, "-y"));
        assert_eq!(args.last().unwrap(), "/tmp/audio_chunk_001.opus");

        // Optional knobs absent by default
        assert!(!args.contains(&"-ar".to_string()));
        assert!(!args.contains(&"-ac".to_string()));
        assert!(!args.contains(&"-af".to_string()));
    }

    #[test]
    fn test_optional_knobs() {
        let builder = AudioBuilder::new(test_chunk(), "/tmp/out.opus")
            .codec("aac")
            .bitrate("192k")
            .sample_rate(44100)
            .channels(6);
        let args = builder.build_args();

        assert!(has_flag_with_value(&args, "-c:a", "aac"));
        assert!(has_flag_with_value(&args, "-b:a", "192k"));
        assert!(has_flag_with_value(&args, "-ar", "44100"));
        assert!(has_flag_with_value(&args, "-ac", "6"));
    }

    #[test]
    fn test_filters_joined() {
        let builder = AudioBuilder::new(test_chunk(), "/tmp/out.opus")
            .filter("volume=0.5")
            .filter("loudnorm")
            .filter("");
        let args = builder.build_args();

        assert!(has_flag_with_value(&args, "-af", "volume=0.5,loudnorm"));
    }

    #[test]
    fn test_segment_input_skips_seeking() {
        let mut chunk = test_chunk();
        chunk.segment_path = Some(PathBuf::from("/tmp/segments/segment_000.mkv"));

        let builder = AudioBuilder::new(chunk, "/tmp/out.opus");
        let args = builder.build_args();

        assert!(has_flag_with_value(&args, "-i", "/tmp/segments/segment_000.mkv"));
        assert!(!args.contains(&"-ss".to_string()));
        assert!(!args.contains(&"-to".to_string()));
    }

    #[test]
    fn test_dry_run_renders_command() {
        let builder = AudioBuilder::new(test_chunk(), "/tmp/out.opus");
        let rendered = builder.dry_run();

        assert!(rendered.starts_with("ffmpeg "));
        assert!(rendered.contains("-c:a libopus"));
        assert!(rendered.contains("/tmp/out.opus"));
    }

    #[test]
    fn test_command_metadata() {
        let builder = AudioBuilder::new(test_chunk(), "/tmp/out.opus").priority(super::PRIORITY_NORMAL + 2);

        assert_eq!(Command::priority(&builder), 7);
        assert_eq!(builder.task_type(), TaskType::AudioExtractEncode);
        assert_eq!(builder.input_path(), Path::new("/media/film.mkv"));
        assert_eq!(builder.output_path(), Path::new("/tmp/out.opus"));
    }

    // Every built command carries the required argument set, for any
    // chunk window and knob combination.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_audio_command_completeness(
            start in 0.0f64..5_000.0,
            width in 0.1f64..900.0,
            bitrate_k in 32u32..512,
            sample_rate in prop::option::of(8_000u32..192_000),
            channels in prop::option::of(1u32..9),
        ) {
            let chunk = Chunk::new(3, start, start + width, "/media/film.mkv").unwrap();
            let bitrate = format!("{}k", bitrate_k);

            let mut builder = AudioBuilder::new(chunk, "/tmp/audio_chunk_003.opus")
                .codec("libopus")
                .bitrate(&bitrate);
            if let Some(rate) = sample_rate {
                builder = builder.sample_rate(rate);
            }
            if let Some(ch) = channels {
                builder = builder.channels(ch);
            }

            let args = builder.build_args();

            prop_assert!(has_flag_with_value(&args, "-i", "/media/film.mkv"));
            prop_assert!(has_flag(&args, "-ss"));
            prop_assert!(has_flag(&args, "-to"));
            prop_assert!(has_flag(&args, "-vn"));
            prop_assert!(has_flag_with_value(&args, "-c:a", "libopus"));
            prop_assert!(has_flag_with_value(&args, "-b:a", &bitrate));
            prop_assert_eq!(args.last().unwrap(), "/tmp/audio_chunk_003.opus");

            match sample_rate {
                Some(rate) => prop_assert!(has_flag_with_value(&args, "-ar", &rate.to_string())),
                None => prop_assert!(!has_flag(&args, "-ar")),
            }
            match channels {
                Some(ch) => prop_assert!(has_flag_with_value(&args, "-ac", &ch.to_string())),
                None => prop_assert!(!has_flag(&args, "-ac")),
            }
        }
    }
}
