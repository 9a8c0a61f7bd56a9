//! Stream-split command builder.
//!
//! Splits the source at chapter boundaries into stream-copied Matroska
//! segments, so encode commands can read small trimmed files instead of
//! seeking into one large source.

use super::{Command, CommandError, TaskType, PRIORITY_HIGH};
use crate::probe::ChapterInfo;
use std::path::{Path, PathBuf};

/// Builds the ffmpeg command that splits a source into segments.
pub struct SplitBuilder {
    source_path: PathBuf,
    output_dir: PathBuf,
    chapters: Vec<ChapterInfo>,
    output_pattern: PathBuf,
    priority: i32,
}

impl SplitBuilder {
    pub fn new(
        source_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        chapters: Vec<ChapterInfo>,
    ) -> Self {
        let output_dir = output_dir.into();
        let output_pattern = output_dir.join("segment_%03d.mkv");
        Self {
            source_path: source_path.into(),
            output_dir,
            chapters,
            output_pattern,
            priority: PRIORITY_HIGH,
        }
    }

    /// The path of the segment at `index` (0-based, probe order).
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("segment_{:03}.mkv", index))
    }

    /// Comma-separated split points: the start time of every chapter but
    /// the first.
    fn segment_times(&self) -> String {
        if self.chapters.len() <= 1 {
            return String::new();
        }
        self.chapters[1..]
            .iter()
            .map(|c| c.start_time.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Command for SplitBuilder {
    fn build_args(&self) -> Vec<String> {
        vec![
            "-i".into(),
            self.source_path.display().to_string(),
            "-c".into(),
            "copy".into(),
            "-map".into(),
            "0".into(),
            "-f".into(),
            "segment".into(),
            "-segment_format".into(),
            "matroska".into(),
            "-segment_times".into(),
            self.segment_times(),
            "-reset_timestamps".into(),
            "1".into(),
            self.output_pattern.display().to_string(),
        ]
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
        TaskType::StreamSplit
    }

    fn input_path(&self) -> &Path {
        &self.source_path
    }

    fn output_path(&self) -> &Path {
        &self.output_pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::test_support::has_flag_with_value;

    fn chapters(bounds: &[(&str, &str)]) -> Vec<ChapterInfo> {
        bounds
            .iter()
            .map(|(s, e)| ChapterInfo {
                start_time: s.to_string(),
                end_time: e.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_split_args() {
        let builder = SplitBuilder::new(
            "/media/film.mkv",
            "/tmp/segments",
            chapters(&[
                ("0.000000", "141.640000"),
                ("141.640000", "282.070000"),
                ("282.070000", "423.720000"),
            ]),
        );
        let args = builder.build_args();

        assert!(has_flag_with_value(&args, "-i", "/media/film.mkv"));
        assert!(has_flag_with_value(&args, "-c", "copy"));
        assert!(has_flag_with_value(&args, "-map", "0"));
        assert!(has_flag_with_value(&args, "-f", "segment"));
        assert!(has_flag_with_value(&args, "-segment_format", "matroska"));
        assert!(has_flag_with_value(&args, "-segment_times", "141.640000,282.070000"));
        assert!(has_flag_with_value(&args, "-reset_timestamps", "1"));
        assert_eq!(args.last().unwrap(), "/tmp/segments/segment_%03d.mkv");
    }

    #[test]
    fn test_single_chapter_has_no_split_points() {
        let builder = SplitBuilder::new(
            "/media/film.mkv",
            "/tmp/segments",
            chapters(&[("0.0", "600.0")]),
        );
        assert_eq!(builder.segment_times(), "");
    }

    #[test]
    fn test_segment_path_numbering() {
        let builder = SplitBuilder::new("/media/film.mkv", "/tmp/segments", Vec::new());

        assert_eq!(
            builder.segment_path(0),
            PathBuf::from("/tmp/segments/segment_000.mkv")
        );
        assert_eq!(
            builder.segment_path(12),
            PathBuf::from("/tmp/segments/segment_012.mkv")
        );
    }

    #[test]
    fn test_metadata() {
        let builder = SplitBuilder::new("/media/film.mkv", "/tmp/segments", Vec::new());

        assert_eq!(builder.task_type(), TaskType::StreamSplit);
        assert_eq!(Command::priority(&builder), PRIORITY_HIGH);
        assert_eq!(builder.input_path(), Path::new("/media/film.mkv"));
        assert!(builder.dry_run().contains("-f segment"));
    }
}
