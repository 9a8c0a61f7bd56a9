//! Concat-join command builder.
//!
//! Stream-copies the files enumerated in a concat list into one output.
//! The finalizer writes the list file and owns its lifetime.

use super::{Command, CommandError, TaskType, PRIORITY_HIGH};
use std::path::{Path, PathBuf};

/// Builds the ffmpeg concat-demuxer join command.
pub struct ConcatBuilder {
    list_path: PathBuf,
    output_path: PathBuf,
    priority: i32,
}

impl ConcatBuilder {
    pub fn new(list_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            list_path: list_path.into(),
            output_path: output_path.into(),
            priority: PRIORITY_HIGH,
        }
    }
}

impl Command for ConcatBuilder {
    fn build_args(&self) -> Vec<String> {
        vec![
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            self.list_path.display().to_string(),
            "-c".into(),
            "copy".into(),
            "-y".into(),
            self.output_path.display().to_string(),
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
        TaskType::ConcatJoin
    }

    fn input_path(&self) -> &Path {
        &self.list_path
    }

    fn output_path(&self) -> &Path {
        &self.output_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::test_support::{has_flag, has_flag_with_value};

    #[test]
    fn test_concat_args() {
        let builder = ConcatBuilder::new("/tmp/concat-123.txt", "/tmp/final_audio.opus");
        let args = builder.build_args();

        assert!(has_flag_with_value(&args, "-f", "concat"));
        assert!(has_flag_with_value(&args, "-safe", "0"));
        assert!(has_flag_with_value(&args, "-i", "/tmp/concat-123.txt"));
        assert!(has_flag_with_value(&args, "-c", "copy"));
        assert!(has_flag(&args, "-y"));
        assert_eq!(args.last().unwrap(), "/tmp/final_audio.opus");
    }

    #[test]
    fn test_metadata() {
        let builder = ConcatBuilder::new("/tmp/list.txt", "/tmp/out.mkv");

        assert_eq!(builder.task_type(), TaskType::ConcatJoin);
        assert_eq!(Command::priority(&builder), PRIORITY_HIGH);
        assert_eq!(builder.input_path(), Path::new("/tmp/list.txt"));
        assert_eq!(builder.output_path(), Path::new("/tmp/out.mkv"));
        assert!(builder.dry_run().contains("-f concat"));
    }
}
