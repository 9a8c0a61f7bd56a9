//! Resumable manifest cache.
//!
//! Each phase persists a JSON sidecar describing the artifacts it
//! produced. On a later run, a manifest that still matches the source
//! file and the encoding knobs lets the driver skip already-produced
//! chunks. Validation is all-or-nothing: one stale entry invalidates the
//! whole manifest, so partial reuse can never introduce gaps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Error type for manifest persistence.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to write manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Which encoding phase a manifest belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingKind {
    Audio,
    Video,
}

impl EncodingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingKind::Audio => "audio",
            EncodingKind::Video => "video",
        }
    }
}

/// Kind-specific knobs that must match for a manifest to stay valid.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodingKnobs<'a> {
    Audio { bitrate: &'a str },
    Video { codec: &'a str, crf: u32 },
}

impl EncodingKnobs<'_> {
    fn kind(&self) -> EncodingKind {
        match self {
            EncodingKnobs::Audio { .. } => EncodingKind::Audio,
            EncodingKnobs::Video { .. } => EncodingKind::Video,
        }
    }
}

/// Sidecar describing cached chapter pre-split segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitManifest {
    pub input_path: PathBuf,
    pub input_size: u64,
    pub input_mod_time: i64,
    pub chapter_count: usize,
    pub segment_count: usize,
    pub created_at: i64,
    /// Segment index (0-based, as string) to produced segment path.
    pub segment_paths: BTreeMap<String, PathBuf>,
}

impl SplitManifest {
    pub fn path_in(work_dir: &Path) -> PathBuf {
        work_dir.join(".split_manifest.json")
    }

    /// Loads the sidecar from the working directory; absence or an
    /// unreadable file is non-fatal and yields `None`.
    pub fn load(work_dir: &Path) -> Option<Self> {
        load_json(&Self::path_in(work_dir))
    }

    /// Writes the sidecar, pretty-printed.
    pub fn save(&self, work_dir: &Path) -> Result<(), ManifestError> {
        save_json(&Self::path_in(work_dir), self)
    }

    /// True when every recorded fact still matches the current input and
    /// every referenced segment file still exists.
    pub fn is_valid(
        &self,
        input_path: &Path,
        expected_chapters: usize,
        expected_segments: usize,
    ) -> bool {
        let Some((size, mod_time)) = stat_input(input_path) else {
            return false;
        };

        if size != self.input_size {
            debug!(
                recorded = self.input_size,
                current = size,
                "split manifest invalid: input size changed"
            );
            return false;
        }
        if mod_time != self.input_mod_time {
            debug!("split manifest invalid: input modification time changed");
            return false;
        }
        if self.chapter_count != expected_chapters || self.segment_count != expected_segments {
            debug!("split manifest invalid: chapter/segment count mismatch");
            return false;
        }

        for (index, segment) in &self.segment_paths {
            if !segment.exists() {
                debug!(segment = %segment.display(), index = %index, "split manifest invalid: segment file missing");
                return false;
            }
        }

        true
    }
}

/// Sidecar describing cached encoded chunks for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingManifest {
    pub input_path: PathBuf,
    pub input_size: u64,
    pub input_mod_time: i64,
    pub chunk_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_crf: Option<u32>,
    pub created_at: i64,
    /// Chunk id (as string) to encoded output path.
    pub encoded_chunks: BTreeMap<String, PathBuf>,
}

impl EncodingManifest {
    pub fn path_in(work_dir: &Path, kind: EncodingKind) -> PathBuf {
        work_dir.join(format!(".{}_manifest.json", kind.as_str()))
    }

    /// Builds a fresh manifest from the current input file and the
    /// produced outputs. Returns `None` when the input cannot be
    /// stat'ed (the cache is then simply not written).
    pub fn build(
        input_path: &Path,
        chunk_count: usize,
        knobs: &EncodingKnobs<'_>,
        outputs: impl IntoIterator<Item = (u32, PathBuf)>,
    ) -> Option<Self> {
        let (input_size, input_mod_time) = stat_input(input_path)?;

        let mut manifest = Self {
            input_path: input_path.to_path_buf(),
            input_size,
            input_mod_time,
            chunk_count,
            audio_bitrate: None,
            video_codec: None,
            video_crf: None,
            created_at: unix_now(),
            encoded_chunks: outputs
                .into_iter()
                .map(|(id, path)| (id.to_string(), path))
                .collect(),
        };

        match knobs {
            EncodingKnobs::Audio { bitrate } => {
                manifest.audio_bitrate = Some((*bitrate).to_string());
            }
            EncodingKnobs::Video { codec, crf } => {
                manifest.video_codec = Some((*codec).to_string());
                manifest.video_crf = Some(*crf);
            }
        }

        Some(manifest)
    }

    /// Loads the sidecar for `kind`; absence is non-fatal.
    pub fn load(work_dir: &Path, kind: EncodingKind) -> Option<Self> {
        load_json(&Self::path_in(work_dir, kind))
    }

    pub fn save(&self, work_dir: &Path, kind: EncodingKind) -> Result<(), ManifestError> {
        save_json(&Self::path_in(work_dir, kind), self)
    }

    /// True when the recorded input identity, chunk count, and knobs all
    /// match the current run and every referenced file still exists.
    pub fn is_valid(
        &self,
        input_path: &Path,
        expected_chunk_count: usize,
        knobs: &EncodingKnobs<'_>,
    ) -> bool {
        let Some((size, mod_time)) = stat_input(input_path) else {
            return false;
        };

        if size != self.input_size {
            debug!("{} manifest invalid: input size changed", knobs.kind().as_str());
            return false;
        }
        if mod_time != self.input_mod_time {
            debug!(
                "{} manifest invalid: input modification time changed",
                knobs.kind().as_str()
            );
            return false;
        }
        if self.chunk_count != expected_chunk_count {
            debug!("{} manifest invalid: chunk count mismatch", knobs.kind().as_str());
            return false;
        }

        let knobs_match = match knobs {
            EncodingKnobs::Audio { bitrate } => {
                self.audio_bitrate.as_deref() == Some(*bitrate)
            }
            EncodingKnobs::Video { codec, crf } => {
                self.video_codec.as_deref() == Some(*codec) && self.video_crf == Some(*crf)
            }
        };
        if !knobs_match {
            debug!(
                "{} manifest invalid: encoding parameters changed",
                knobs.kind().as_str()
            );
            return false;
        }

        for (chunk_id, path) in &self.encoded_chunks {
            if !path.exists() {
                debug!(
                    chunk_id = %chunk_id,
                    path = %path.display(),
                    "{} manifest invalid: encoded file missing",
                    knobs.kind().as_str()
                );
                return false;
            }
        }

        true
    }

    /// The cached chunk-id to path mapping, keyed numerically.
    pub fn cached_chunks(&self) -> BTreeMap<u32, PathBuf> {
        self.encoded_chunks
            .iter()
            .filter_map(|(id, path)| id.parse::<u32>().ok().map(|id| (id, path.clone())))
            .collect()
    }
}

/// Size in bytes and mtime in whole seconds of the input file.
fn stat_input(path: &Path) -> Option<(u64, i64)> {
    let metadata = fs::metadata(path).ok()?;
    let mod_time = metadata
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;
    Some((metadata.len(), mod_time))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let data = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring unparsable manifest");
            None
        }
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ManifestError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}
