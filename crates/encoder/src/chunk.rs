//! Chunk model: the unit of parallelism.
//!
//! A chunk is a half-open time window over a source file, produced by the
//! planner and immutable thereafter. Start and end times use `f64` to
//! preserve fractional seconds, which matters for chapter boundaries and
//! audio sync.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for chunk validation.
#[derive(Debug, Error, PartialEq)]
pub enum ChunkError {
    /// The source path is empty or whitespace-only.
    #[error("source_path cannot be empty")]
    EmptySourcePath,

    /// The start time is negative.
    #[error("start_time cannot be negative")]
    NegativeStartTime,

    /// The end time is not positive.
    #[error("end_time must be greater than 0")]
    ZeroEndTime,

    /// The start time is not before the end time.
    #[error("start_time must be less than end_time")]
    InvalidRange,
}

/// A segment of media to be encoded independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 1-based id, contiguous across a plan.
    pub id: u32,
    /// Window start in seconds from the beginning of the source.
    pub start_time: f64,
    /// Window end in seconds; always greater than `start_time`.
    pub end_time: f64,
    /// The probed source file.
    pub source_path: PathBuf,
    /// Pre-split segment file covering exactly this window, if the
    /// chapter pre-split phase produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_path: Option<PathBuf>,
}

impl Chunk {
    /// Creates a validated chunk.
    pub fn new(
        id: u32,
        start_time: f64,
        end_time: f64,
        source_path: impl Into<PathBuf>,
    ) -> Result<Self, ChunkError> {
        let chunk = Self {
            id,
            start_time,
            end_time,
            source_path: source_path.into(),
            segment_path: None,
        };
        chunk.validate()?;
        Ok(chunk)
    }

    /// Checks the chunk invariants.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.source_path.as_os_str().is_empty()
            || self
                .source_path
                .to_string_lossy()
                .trim()
                .is_empty()
        {
            return Err(ChunkError::EmptySourcePath);
        }
        if self.start_time < 0.0 {
            return Err(ChunkError::NegativeStartTime);
        }
        if self.end_time <= 0.0 {
            return Err(ChunkError::ZeroEndTime);
        }
        if self.start_time >= self.end_time {
            return Err(ChunkError::InvalidRange);
        }
        Ok(())
    }

    /// Window length in seconds.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// The file an encode command should read: the pre-split segment when
    /// one exists, otherwise the original source (with seeking).
    pub fn encode_input(&self) -> &Path {
        self.segment_path.as_deref().unwrap_or(&self.source_path)
    }
}
