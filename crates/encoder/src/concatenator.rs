//! Concatenation finalizer.
//!
//! Validates a set of encoded chunk results, detects missing chunks, and
//! joins the survivors with a stream-copy concat. In strict mode any
//! failure or gap aborts the join; otherwise the finalizer warns and
//! produces a shorter output.

use crate::command::{Command, CommandError, ConcatBuilder};
use crate::result::EncodedResult;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

/// Error type for the finalizer.
#[derive(Debug, Error)]
pub enum ConcatError {
    #[error("no results provided")]
    NoResults,

    /// Strict mode: some chunks failed encoding.
    #[error("strict mode: {failed} chunk(s) failed encoding")]
    IncompleteInput { failed: usize },

    /// Strict mode: the successful ids do not form a contiguous run.
    #[error("missing chunks: {missing:?}")]
    Gap { missing: Vec<u32> },

    #[error("no successful chunks to concatenate")]
    NoSuccessfulChunks,

    #[error("failed to create concat list file: {0}")]
    ListFile(#[from] std::io::Error),

    #[error("ffmpeg concat failed: {0}")]
    Join(#[from] CommandError),

    /// The join reported success but the output file is absent.
    #[error("output file not created: {0}")]
    OutputMissing(PathBuf),
}

/// Merges encoded chunks into one output file.
pub struct Concatenator {
    strict: bool,
}

impl Concatenator {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Joins the successful results, ordered by chunk id, into
    /// `final_output`.
    pub fn concatenate(
        &self,
        results: &[EncodedResult],
        final_output: &Path,
    ) -> Result<(), ConcatError> {
        let (successful, failed) = partition_results(results)?;

        if !failed.is_empty() {
            if self.strict {
                return Err(ConcatError::IncompleteInput {
                    failed: failed.len(),
                });
            }
            warn!(
                failed = failed.len(),
                successful = successful.len(),
                "some chunks failed, proceeding with the survivors"
            );
        }

        if successful.is_empty() {
            return Err(ConcatError::NoSuccessfulChunks);
        }

        let missing = find_gaps(&successful);
        if !missing.is_empty() {
            if self.strict {
                return Err(ConcatError::Gap { missing });
            }
            warn!(?missing, "chunk sequence has gaps, output will be shorter");
        }

        // The list file lives exactly as long as this call
        let list_file = write_list_file(&successful)?;

        ConcatBuilder::new(list_file.path(), final_output).run()?;

        if !final_output.exists() {
            return Err(ConcatError::OutputMissing(final_output.to_path_buf()));
        }

        Ok(())
    }
}

/// Splits results into successful (flagged successful and the output file
/// exists on disk) and failed, with the successful half sorted by chunk
/// id.
fn partition_results(
    results: &[EncodedResult],
) -> Result<(Vec<&EncodedResult>, Vec<&EncodedResult>), ConcatError> {
    if results.is_empty() {
        return Err(ConcatError::NoResults);
    }

    let mut successful = Vec::new();
    let mut failed = Vec::new();

    for result in results {
        if result.success
            && !result.output_path.as_os_str().is_empty()
            && result.output_path.exists()
        {
            successful.push(result);
        } else {
            failed.push(result);
        }
    }

    successful.sort_by_key(|r| r.chunk_id);
    Ok((successful, failed))
}

/// Ids missing from the contiguous `1..=max` run over the successful
/// chunks.
fn find_gaps(successful: &[&EncodedResult]) -> Vec<u32> {
    let Some(last) = successful.last() else {
        return Vec::new();
    };

    let present: std::collections::HashSet<u32> =
        successful.iter().map(|r| r.chunk_id).collect();
    (1..=last.chunk_id)
        .filter(|id| !present.contains(id))
        .collect()
}

/// Writes the concat demuxer list: one quote-escaped absolute path per
/// chunk, in id order. The returned handle deletes the file on drop.
fn write_list_file(successful: &[&EncodedResult]) -> Result<NamedTempFile, ConcatError> {
    let mut file = tempfile::Builder::new()
        .prefix("concat-")
        .suffix(".txt")
        .tempfile()?;

    for result in successful {
        let absolute = std::path::absolute(&result.output_path)?;
        let escaped = absolute.display().to_string().replace('\'', "'\\''");
        writeln!(file, "file '{}'", escaped)?;
    }
    file.flush()?;

    Ok(file)
}
