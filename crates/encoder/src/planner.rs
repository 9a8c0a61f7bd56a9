//! Chunk planning: turning probe output and settings into an ordered,
//! validated sequence of chunks.
//!
//! Chapter markers are preferred when the caller opts in and the source
//! has them; otherwise the plan is fixed-width with the final chunk
//! clamped to the container duration. Any unparsable chapter is fatal to
//! the whole plan rather than silently degrading to fixed-width chunks.

use crate::chunk::{Chunk, ChunkError};
use crate::probe::{MediaSource, ProbeError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default seconds per fixed-width chunk (10 minutes).
pub const DEFAULT_CHUNK_DURATION: u32 = 600;

/// Minimum allowed chunk duration in seconds.
pub const MIN_CHUNK_DURATION: u32 = 1;

/// Maximum allowed chunk duration in seconds (24 hours).
pub const MAX_CHUNK_DURATION: u32 = 86400;

/// Error type for planning and plan validation.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("source path cannot be empty")]
    EmptySourcePath,

    #[error("chunk duration must be at least {MIN_CHUNK_DURATION} second(s)")]
    ChunkDurationTooShort,

    #[error("chunk duration cannot exceed {MAX_CHUNK_DURATION} seconds")]
    ChunkDurationTooLong,

    #[error("invalid duration: {0:.2} seconds")]
    InvalidDuration(f64),

    #[error("failed to get duration: {0}")]
    Probe(#[from] ProbeError),

    #[error("failed to parse {field} for chapter {index}: '{value}'")]
    ChapterParse {
        index: usize,
        field: &'static str,
        value: String,
    },

    #[error("invalid chunk {index}: {source}")]
    InvalidChunk {
        index: usize,
        #[source]
        source: ChunkError,
    },

    #[error("chunk list is empty")]
    EmptyPlan,

    #[error("chunk {index} has different source path: expected {expected}, got {actual}")]
    MixedSources {
        index: usize,
        expected: PathBuf,
        actual: PathBuf,
    },

    #[error("chunk {index} has incorrect ID: expected {expected}, got {actual}")]
    NonSequentialIds {
        index: usize,
        expected: u32,
        actual: u32,
    },

    #[error(
        "chunks {left} and {right} overlap: chunk {left} ends at {end:.2}, chunk {right} starts at {start:.2}"
    )]
    Overlap {
        left: u32,
        right: u32,
        end: f64,
        start: f64,
    },

    #[error(
        "gap between chunks {left} and {right}: chunk {left} ends at {end:.2}, chunk {right} starts at {start:.2}"
    )]
    Gap {
        left: u32,
        right: u32,
        end: f64,
        start: f64,
    },
}

/// Plans chunks for parallel processing of one source file.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    source_path: PathBuf,
    chunk_duration: u32,
    prefer_chapters: bool,
}

impl ChunkPlanner {
    /// Creates a planner with default settings: 10-minute fixed-width
    /// fallback, chapters preferred.
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            chunk_duration: DEFAULT_CHUNK_DURATION,
            prefer_chapters: true,
        }
    }

    /// Sets the fixed-width chunk duration in seconds.
    pub fn chunk_duration(mut self, duration: u32) -> Self {
        self.chunk_duration = duration;
        self
    }

    /// Sets whether chapter markers are used when available.
    pub fn prefer_chapters(mut self, prefer: bool) -> Self {
        self.prefer_chapters = prefer;
        self
    }

    /// Produces the ordered chunk list for the probed source.
    pub fn plan(&self, media: &dyn MediaSource) -> Result<Vec<Chunk>, PlanError> {
        if self.source_path.as_os_str().is_empty() {
            return Err(PlanError::EmptySourcePath);
        }
        if self.chunk_duration < MIN_CHUNK_DURATION {
            return Err(PlanError::ChunkDurationTooShort);
        }
        if self.chunk_duration > MAX_CHUNK_DURATION {
            return Err(PlanError::ChunkDurationTooLong);
        }

        let duration = media.duration()?;
        if duration <= 0.0 {
            return Err(PlanError::InvalidDuration(duration));
        }

        if self.prefer_chapters && media.has_chapters() {
            return self.plan_from_chapters(media);
        }

        self.plan_fixed_width(duration)
    }

    /// Builds one chunk per chapter marker, in probe order.
    fn plan_from_chapters(&self, media: &dyn MediaSource) -> Result<Vec<Chunk>, PlanError> {
        let chapters = media.chapters();
        let mut chunks = Vec::with_capacity(chapters.len());

        for (i, chapter) in chapters.iter().enumerate() {
            let start_time = parse_chapter_time(&chapter.start_time).ok_or_else(|| {
                PlanError::ChapterParse {
                    index: i + 1,
                    field: "start_time",
                    value: chapter.start_time.clone(),
                }
            })?;
            let end_time = parse_chapter_time(&chapter.end_time).ok_or_else(|| {
                PlanError::ChapterParse {
                    index: i + 1,
                    field: "end_time",
                    value: chapter.end_time.clone(),
                }
            })?;

            let chunk = Chunk::new(i as u32 + 1, start_time, end_time, &self.source_path)
                .map_err(|source| PlanError::InvalidChunk {
                    index: i + 1,
                    source,
                })?;
            chunks.push(chunk);
        }

        Ok(chunks)
    }

    /// Builds ⌈duration / width⌉ fixed-width chunks, clamping the last
    /// end time to the container duration.
    fn plan_fixed_width(&self, duration: f64) -> Result<Vec<Chunk>, PlanError> {
        let width = f64::from(self.chunk_duration);
        let count = ((duration / width).ceil() as usize).max(1);

        let mut chunks = Vec::with_capacity(count);
        for i in 0..count {
            let start_time = i as f64 * width;
            let end_time = (start_time + width).min(duration);

            let chunk = Chunk::new(i as u32 + 1, start_time, end_time, &self.source_path)
                .map_err(|source| PlanError::InvalidChunk {
                    index: i + 1,
                    source,
                })?;
            chunks.push(chunk);
        }

        Ok(chunks)
    }
}

/// Parses a chapter time string such as "141.640000" into seconds.
fn parse_chapter_time(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|t| t.is_finite())
}

/// Post-condition validator for a produced plan.
///
/// Confirms the plan is non-empty, each chunk is individually valid, all
/// chunks share one source, ids run 1..N, adjacent chunks never overlap,
/// and adjacent gaps stay within the 1-second rounding slack.
pub fn validate_chunks(chunks: &[Chunk]) -> Result<(), PlanError> {
    if chunks.is_empty() {
        return Err(PlanError::EmptyPlan);
    }

    for (i, chunk) in chunks.iter().enumerate() {
        chunk.validate().map_err(|source| PlanError::InvalidChunk {
            index: i + 1,
            source,
        })?;
    }

    let first_source: &Path = &chunks[0].source_path;
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.source_path != first_source {
            return Err(PlanError::MixedSources {
                index: i + 1,
                expected: first_source.to_path_buf(),
                actual: chunk.source_path.clone(),
            });
        }
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let expected = i as u32 + 1;
        if chunk.id != expected {
            return Err(PlanError::NonSequentialIds {
                index: i + 1,
                expected,
                actual: chunk.id,
            });
        }
    }

    for pair in chunks.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);

        if current.end_time > next.start_time {
            return Err(PlanError::Overlap {
                left: current.id,
                right: next.id,
                end: current.end_time,
                start: next.start_time,
            });
        }

        // Up to one second of slack absorbs chapter rounding
        if next.start_time > current.end_time + 1.0 {
            return Err(PlanError::Gap {
                left: current.id,
                right: next.id,
                end: current.end_time,
                start: next.start_time,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ChapterInfo;
    use proptest::prelude::*;

    /// In-memory media source for planner tests.
    struct FakeMedia {
        duration: f64,
        chapters: Vec<ChapterInfo>,
    }

    impl FakeMedia {
        fn plain(duration: f64) -> Self {
            Self {
                duration,
                chapters: Vec::new(),
            }
        }

        fn with_chapters(duration: f64, bounds: &[(&str, &str)]) -> Self {
            Self {
                duration,
                chapters: bounds
                    .iter()
                    .map(|(s, e)| ChapterInfo {
                        start_time: s.to_string(),
                        end_time: e.to_string(),
                    })
                    .collect(),
            }
        }
    }

    impl MediaSource for FakeMedia {
        fn duration(&self) -> Result<f64, ProbeError> {
            Ok(self.duration)
        }

        fn chapters(&self) -> Vec<ChapterInfo> {
            self.chapters.clone()
        }

        fn has_audio(&self) -> bool {
            true
        }

        fn has_video(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_fixed_width_exact_division() {
        let planner = ChunkPlanner::new("/media/film.mkv").chunk_duration(300);
        let chunks = planner.plan(&FakeMedia::plain(900.0)).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_time, 0.0);
        assert_eq!(chunks[0].end_time, 300.0);
        assert_eq!(chunks[2].start_time, 600.0);
        assert_eq!(chunks[2].end_time, 900.0);
    }

    #[test]
    fn test_fixed_width_final_chunk_clamped() {
        let planner = ChunkPlanner::new("/media/film.mkv").chunk_duration(300);
        let chunks = planner.plan(&FakeMedia::plain(750.5)).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].start_time, 600.0);
        assert!((chunks[2].end_time - 750.5).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_width_barely_over_boundary() {
        // 0.001 s past the boundary still yields the extra chunk, with a
        // tiny but non-zero final duration
        let planner = ChunkPlanner::new("/media/film.mkv").chunk_duration(300);
        let chunks = planner.plan(&FakeMedia::plain(600.001)).unwrap();

        assert_eq!(chunks.len(), 3);
        let last = chunks.last().unwrap();
        assert!(last.duration() > 0.0);
        assert!(last.duration() < 300.0);
        assert!((last.end_time - 600.001).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_width_shorter_than_one_chunk() {
        let planner = ChunkPlanner::new("/media/film.mkv").chunk_duration(600);
        let chunks = planner.plan(&FakeMedia::plain(42.5)).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, 1);
        assert!((chunks[0].end_time - 42.5).abs() < 1e-9);
    }

    #[test]
    fn test_chapters_preferred_when_present() {
        let media = FakeMedia::with_chapters(
            282.07,
            &[("0.000000", "141.640000"), ("141.640000", "282.070000")],
        );
        let planner = ChunkPlanner::new("/media/film.mkv").chunk_duration(60);
        let chunks = planner.plan(&media).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, 1);
        assert!((chunks[0].end_time - 141.64).abs() < 1e-9);
        assert_eq!(chunks[1].id, 2);
        assert!((chunks[1].end_time - 282.07).abs() < 1e-9);
    }

    #[test]
    fn test_chapters_ignored_when_not_preferred() {
        let media = FakeMedia::with_chapters(600.0, &[("0.0", "300.0"), ("300.0", "600.0")]);
        let planner = ChunkPlanner::new("/media/film.mkv")
            .chunk_duration(200)
            .prefer_chapters(false);
        let chunks = planner.plan(&media).unwrap();

        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_chapter_parse_failure_is_fatal() {
        let media =
            FakeMedia::with_chapters(600.0, &[("0.0", "300.0"), ("garbage", "600.0")]);
        let planner = ChunkPlanner::new("/media/film.mkv");

        let err = planner.plan(&media).unwrap_err();
        assert!(matches!(
            err,
            PlanError::ChapterParse {
                index: 2,
                field: "start_time",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_chapter_range_is_fatal() {
        let media = FakeMedia::with_chapters(600.0, &[("300.0", "100.0")]);
        let planner = ChunkPlanner::new("/media/film.mkv");

        let err = planner.plan(&media).unwrap_err();
        assert!(matches!(err, PlanError::InvalidChunk { index: 1, .. }));
    }

    #[test]
    fn test_empty_source_rejected() {
        let planner = ChunkPlanner::new("");
        assert!(matches!(
            planner.plan(&FakeMedia::plain(600.0)),
            Err(PlanError::EmptySourcePath)
        ));
    }

    #[test]
    fn test_chunk_duration_bounds() {
        let media = FakeMedia::plain(600.0);

        assert!(ChunkPlanner::new("/m.mkv")
            .chunk_duration(MIN_CHUNK_DURATION)
            .plan(&media)
            .is_ok());
        assert!(ChunkPlanner::new("/m.mkv")
            .chunk_duration(MAX_CHUNK_DURATION)
            .plan(&media)
            .is_ok());
        assert!(matches!(
            ChunkPlanner::new("/m.mkv")
                .chunk_duration(MIN_CHUNK_DURATION - 1)
                .plan(&media),
            Err(PlanError::ChunkDurationTooShort)
        ));
        assert!(matches!(
            ChunkPlanner::new("/m.mkv")
                .chunk_duration(MAX_CHUNK_DURATION + 1)
                .plan(&media),
            Err(PlanError::ChunkDurationTooLong)
        ));
    }

    #[test]
    fn test_non_positive_duration_rejected() {
        let planner = ChunkPlanner::new("/media/film.mkv");
        assert!(matches!(
            planner.plan(&FakeMedia::plain(0.0)),
            Err(PlanError::InvalidDuration(_))
        ));
        assert!(matches!(
            planner.plan(&FakeMedia::plain(-5.0)),
            Err(PlanError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_validate_accepts_good_plan() {
        let planner = ChunkPlanner::new("/media/film.mkv").chunk_duration(100);
        let chunks = planner.plan(&FakeMedia::plain(350.0)).unwrap();
        assert!(validate_chunks(&chunks).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_plan() {
        assert!(matches!(validate_chunks(&[]), Err(PlanError::EmptyPlan)));
    }

    #[test]
    fn test_validate_rejects_mixed_sources() {
        let chunks = vec![
            Chunk::new(1, 0.0, 10.0, "/a.mkv").unwrap(),
            Chunk::new(2, 10.0, 20.0, "/b.mkv").unwrap(),
        ];
        assert!(matches!(
            validate_chunks(&chunks),
            Err(PlanError::MixedSources { index: 2, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_sequential_ids() {
        let chunks = vec![
            Chunk::new(1, 0.0, 10.0, "/a.mkv").unwrap(),
            Chunk::new(3, 10.0, 20.0, "/a.mkv").unwrap(),
        ];
        assert!(matches!(
            validate_chunks(&chunks),
            Err(PlanError::NonSequentialIds {
                index: 2,
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let chunks = vec![
            Chunk::new(1, 0.0, 12.0, "/a.mkv").unwrap(),
            Chunk::new(2, 10.0, 20.0, "/a.mkv").unwrap(),
        ];
        assert!(matches!(
            validate_chunks(&chunks),
            Err(PlanError::Overlap { left: 1, right: 2, .. })
        ));
    }

    #[test]
    fn test_validate_tolerates_small_gap() {
        let chunks = vec![
            Chunk::new(1, 0.0, 10.0, "/a.mkv").unwrap(),
            Chunk::new(2, 10.9, 20.0, "/a.mkv").unwrap(),
        ];
        assert!(validate_chunks(&chunks).is_ok());
    }

    #[test]
    fn test_validate_rejects_large_gap() {
        let chunks = vec![
            Chunk::new(1, 0.0, 10.0, "/a.mkv").unwrap(),
            Chunk::new(2, 11.5, 20.0, "/a.mkv").unwrap(),
        ];
        assert!(matches!(
            validate_chunks(&chunks),
            Err(PlanError::Gap { left: 1, right: 2, .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        // Any fixed-width plan has ids 1..N, ⌈D/W⌉ chunks, seamless
        // boundaries, and ends exactly at the container duration.
        #[test]
        fn prop_fixed_width_plan_shape(
            duration in 0.5f64..50_000.0,
            width in 1u32..3600,
        ) {
            let planner = ChunkPlanner::new("/media/film.mkv").chunk_duration(width);
            let chunks = planner.plan(&FakeMedia::plain(duration)).unwrap();

            let expected = (duration / f64::from(width)).ceil().max(1.0) as usize;
            prop_assert_eq!(chunks.len(), expected);

            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.id, i as u32 + 1);
            }
            for pair in chunks.windows(2) {
                prop_assert!((pair[0].end_time - pair[1].start_time).abs() < 1e-9);
            }
            prop_assert!((chunks.last().unwrap().end_time - duration).abs() < 1e-9);
            prop_assert!(validate_chunks(&chunks).is_ok());
        }
    }
}
