//! parenc: parallel chunked media transcoding.
//!
//! Splits a media file into independently encodable chunks, runs the
//! encodes through a resource-constrained DAG scheduler, and reassembles
//! the encoded chunks into a final container. Previously produced work
//! is reused across runs via JSON manifests.

pub mod chunk;
pub mod command;
pub mod concatenator;
pub mod manifest;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod result;
pub mod timeutil;

pub use parenc_config as config;
pub use parenc_config::Config;

pub use chunk::{Chunk, ChunkError};
pub use command::{
    AudioBuilder, Command, CommandError, ConcatBuilder, MuxBuilder, SplitBuilder, TaskType,
    VideoBuilder,
};
pub use concatenator::{ConcatError, Concatenator};
pub use manifest::{EncodingKind, EncodingKnobs, EncodingManifest, SplitManifest};
pub use orchestrator::{
    DagOrchestrator, OrchestratorError, OrchestratorStats, ResourceConstraint, ResourceTag,
    Task, TaskStatus,
};
pub use pipeline::{resource_constraints, Pipeline, PipelineError};
pub use planner::{validate_chunks, ChunkPlanner, PlanError};
pub use probe::{probe, ChapterInfo, MediaSource, ProbeError, ProbeResult};
pub use progress::{EncodingProgress, ProgressParser, ProgressSink, ProgressState};
pub use result::{EncodedResult, ResultError};
