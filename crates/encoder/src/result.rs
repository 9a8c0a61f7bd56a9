//! Encoding outcome for a single chunk.
//!
//! Successful results carry the produced output path and no error; failed
//! results carry an error and no output path. `validate` enforces that
//! consistency so downstream consumers (the concat finalizer in
//! particular) can rely on it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Inconsistent result state.
#[derive(Debug, Error, PartialEq)]
pub enum ResultError {
    #[error("successful result must not carry an error")]
    SuccessWithError,

    #[error("failed result must have an error")]
    FailureWithoutError,

    #[error("output_path cannot be empty for successful result")]
    SuccessWithoutOutput,

    #[error("failed result should not have an output_path")]
    FailureWithOutput,
}

/// The outcome of encoding one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedResult {
    pub chunk_id: u32,
    /// Produced file; empty for failed results.
    pub output_path: PathBuf,
    pub success: bool,
    pub error: Option<String>,
}

impl EncodedResult {
    /// A successful result for `chunk_id` that produced `output_path`.
    pub fn success(chunk_id: u32, output_path: impl Into<PathBuf>) -> Self {
        Self {
            chunk_id,
            output_path: output_path.into(),
            success: true,
            error: None,
        }
    }

    /// A failed result for `chunk_id` with the captured error.
    pub fn failure(chunk_id: u32, error: impl Into<String>) -> Self {
        Self {
            chunk_id,
            output_path: PathBuf::new(),
            success: false,
            error: Some(error.into()),
        }
    }

    /// Checks the success/error/output consistency invariants.
    pub fn validate(&self) -> Result<(), ResultError> {
        if self.success && self.error.is_some() {
            return Err(ResultError::SuccessWithError);
        }
        if !self.success && self.error.is_none() {
            return Err(ResultError::FailureWithoutError);
        }
        if self.success && self.output_path.as_os_str().is_empty() {
            return Err(ResultError::SuccessWithoutOutput);
        }
        if !self.success && !self.output_path.as_os_str().is_empty() {
            return Err(ResultError::FailureWithOutput);
        }
        Ok(())
    }
}
