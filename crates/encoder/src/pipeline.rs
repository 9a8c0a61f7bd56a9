//! Pipeline driver: orders the transcoding phases and wires the
//! orchestrator, manifest cache, and finalizer together.
//!
//! Phases run sequentially: probe, plan, optional chapter pre-split,
//! audio DAG, video DAG, concat audio, concat video, then mux (or a
//! plain copy when only one stream exists). Each encoding phase gets its
//! own orchestrator instance. Partial outputs stay on disk so an
//! interrupted run can resume from its manifests.

use crate::chunk::Chunk;
use crate::command::{AudioBuilder, Command, CommandError, MuxBuilder, SplitBuilder, VideoBuilder};
use crate::concatenator::{ConcatError, Concatenator};
use crate::manifest::{
    EncodingKind, EncodingKnobs, EncodingManifest, ManifestError, SplitManifest,
};
use crate::orchestrator::{
    DagOrchestrator, OrchestratorError, ResourceConstraint, ResourceTag, Task,
};
use crate::planner::{validate_chunks, ChunkPlanner, PlanError};
use crate::probe::{self, MediaSource, ProbeError, ProbeResult};
use crate::progress::{EncodingProgress, ProgressSink};
use crate::result::EncodedResult;
use parenc_config::{Config, Mode};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Error type for the whole pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("media analysis failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("chunking failed: {0}")]
    Plan(#[from] PlanError),

    #[error("orchestration failed: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("concatenation failed: {0}")]
    Concat(#[from] ConcatError),

    #[error("command failed: {0}")]
    Command(#[from] CommandError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no audio or video streams found in input file")]
    NoStreams,

    #[error("encoding cancelled")]
    Cancelled,
}

impl PipelineError {
    /// True when the run ended because the user cancelled it, which maps
    /// to a distinct exit code.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled
                | PipelineError::Orchestrator(OrchestratorError::Cancelled)
        )
    }
}

/// Working-tree layout under `<output_dir>/tmp/`.
struct WorkDirs {
    tmp: PathBuf,
    segments: PathBuf,
    audio: PathBuf,
    video: PathBuf,
}

impl WorkDirs {
    fn prepare(output: &Path) -> std::io::Result<Self> {
        let output_dir = output.parent().unwrap_or_else(|| Path::new("."));
        let tmp = output_dir.join("tmp");
        let dirs = Self {
            segments: tmp.join("segments"),
            audio: tmp.join("audio"),
            video: tmp.join("video"),
            tmp,
        };
        for dir in [&dirs.tmp, &dirs.segments, &dirs.audio, &dirs.video] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(dirs)
    }
}

/// Latest encoder readings from whichever chunk reported last; feeds the
/// periodic progress log lines.
#[derive(Debug, Clone, Default)]
struct LatestEncoderStats {
    speed: f64,
    frame: i64,
    time: String,
}

/// Builds the resource constraint preset for a mode.
pub fn resource_constraints(mode: Mode, workers: u32) -> Vec<ResourceConstraint> {
    let workers = workers as usize;
    match mode {
        Mode::CpuOnly => vec![
            ResourceConstraint::new(ResourceTag::Cpu, workers),
            ResourceConstraint::new(ResourceTag::Io, 4),
        ],
        Mode::GpuOnly => vec![
            ResourceConstraint::new(ResourceTag::GpuEncode, 1),
            ResourceConstraint::new(ResourceTag::GpuScale, workers),
            ResourceConstraint::new(ResourceTag::Io, 4),
        ],
        Mode::Mixed => vec![
            ResourceConstraint::new(ResourceTag::Cpu, workers),
            ResourceConstraint::new(ResourceTag::GpuEncode, 1),
            ResourceConstraint::new(ResourceTag::GpuScale, workers),
            ResourceConstraint::new(ResourceTag::Io, 4),
        ],
    }
}

/// File extension for encoded audio chunks of a codec.
fn audio_extension(codec: &str) -> &'static str {
    match codec {
        "libopus" | "opus" => "opus",
        "aac" => "m4a",
        "libmp3lame" | "mp3" => "mp3",
        "flac" => "flac",
        _ => "mka",
    }
}

/// Converts per-chunk output paths into encoded results by checking the
/// files on disk; a missing file marks the chunk failed.
fn results_from_outputs(chunks: &[Chunk], outputs: &[PathBuf]) -> Vec<EncodedResult> {
    chunks
        .iter()
        .zip(outputs)
        .map(|(chunk, path)| {
            if path.exists() {
                EncodedResult::success(chunk.id, path.clone())
            } else {
                EncodedResult::failure(chunk.id, "chunk output missing")
            }
        })
        .collect()
}

/// Runs the full transcoding workflow for one configuration.
pub struct Pipeline {
    config: Config,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The flag a signal handler sets to request cancellation.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn ensure_not_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Executes all phases and writes the final container.
    pub async fn run(&self) -> Result<(), PipelineError> {
        let started = Instant::now();
        let cfg = &self.config;

        println!("parenc pipeline starting");
        println!("  Input:  {}", cfg.input.display());
        println!("  Output: {}", cfg.output.display());
        println!("  Mode:   {}", cfg.mode);
        info!("pipeline start: {} -> {}", cfg.input.display(), cfg.output.display());

        let dirs = WorkDirs::prepare(&cfg.output)?;

        // Phase 1: media analysis
        println!("Phase 1: media analysis");
        let probe_result = probe::probe(&cfg.input)?;
        let duration = probe_result.duration()?;
        let has_audio = probe_result.has_audio();
        let has_video = probe_result.has_video();

        println!("  Duration:      {:.2} seconds", duration);
        println!("  Audio streams: {}", probe_result.audio_streams().len());
        println!("  Video streams: {}", probe_result.video_streams().len());
        if probe_result.chapter_count() > 0 {
            println!("  Chapters:      {}", probe_result.chapter_count());
        }

        if !has_audio && !has_video {
            return Err(PipelineError::NoStreams);
        }

        // Phase 2: chunk planning
        println!("Phase 2: chunking");
        let use_chapters = probe_result.has_chapters();
        if use_chapters {
            println!(
                "  Strategy: chapter-based ({} chapters)",
                probe_result.chapter_count()
            );
        } else {
            println!("  Strategy: fixed {}s chunks", cfg.chunk_duration);
        }

        let mut chunks = ChunkPlanner::new(&cfg.input)
            .chunk_duration(cfg.chunk_duration)
            .prefer_chapters(use_chapters)
            .plan(&probe_result)?;
        validate_chunks(&chunks)?;

        let avg = chunks.iter().map(Chunk::duration).sum::<f64>() / chunks.len() as f64;
        println!("  Created {} chunks (avg {:.1}s each)", chunks.len(), avg);
        info!("planned {} chunks, avg {:.1}s", chunks.len(), avg);

        // Phase 3: optional chapter pre-split
        if cfg.pre_split && use_chapters {
            self.ensure_not_cancelled()?;
            println!("Phase 3: pre-splitting segments");
            self.pre_split_segments(&probe_result, &mut chunks, &dirs.segments)?;
        }

        let constraints = resource_constraints(cfg.mode, cfg.workers);
        println!("  Mode: {} with {} workers", cfg.mode, cfg.workers);

        // Phases 4-5: parallel encoding DAGs
        let mut audio_files = Vec::new();
        if has_audio {
            self.ensure_not_cancelled()?;
            println!("Phase 4: audio encoding");
            audio_files = self.encode_audio(&chunks, &dirs.audio, &constraints).await?;
            println!("  Audio encoding complete");
        }

        let mut video_files = Vec::new();
        if has_video {
            self.ensure_not_cancelled()?;
            println!("Phase 5: video encoding");
            video_files = self.encode_video(&chunks, &dirs.video, &constraints).await?;
            println!("  Video encoding complete");
        }

        // Phases 6-7: concatenation
        self.ensure_not_cancelled()?;
        println!("Phase 6: concatenation");
        let concatenator = Concatenator::new(cfg.strict_mode);

        let mut final_audio = None;
        if !audio_files.is_empty() {
            let target = dirs
                .tmp
                .join(format!("final_audio.{}", audio_extension(&cfg.audio.codec)));
            let concat_started = Instant::now();
            info!("concat: joining {} audio chunks", audio_files.len());
            let results = results_from_outputs(&chunks, &audio_files);
            concatenator.concatenate(&results, &target)?;
            info!(
                "concat: audio joined in {:.2}s",
                concat_started.elapsed().as_secs_f64()
            );
            println!("  Audio concatenated");
            final_audio = Some(target);
        }

        let mut final_video = None;
        if !video_files.is_empty() {
            let target = dirs.tmp.join("final_video.mkv");
            let concat_started = Instant::now();
            info!("concat: joining {} video chunks", video_files.len());
            let results = results_from_outputs(&chunks, &video_files);
            concatenator.concatenate(&results, &target)?;
            info!(
                "concat: video joined in {:.2}s",
                concat_started.elapsed().as_secs_f64()
            );
            println!("  Video concatenated");
            final_video = Some(target);
        }

        // Phase 7: mux or single-stream copy
        self.ensure_not_cancelled()?;
        match (final_audio, final_video) {
            (Some(audio), Some(video)) => {
                println!("Phase 7: muxing audio + video");
                let mux_started = Instant::now();
                info!("mux: writing {}", cfg.output.display());
                self.mux(&audio, &video)?;
                info!("mux: complete in {:.2}s", mux_started.elapsed().as_secs_f64());
                println!("  Muxed output written");
            }
            (Some(single), None) | (None, Some(single)) => {
                info!("finalize: copying single stream to {}", cfg.output.display());
                copy_file(&single, &cfg.output)?;
                println!("  Output: {}", cfg.output.display());
            }
            (None, None) => return Err(PipelineError::NoStreams),
        }

        self.report(duration, chunks.len(), started);
        Ok(())
    }

    /// Splits the source at chapter boundaries with stream copy, reusing
    /// cached segments when the split manifest still validates.
    fn pre_split_segments(
        &self,
        probe_result: &ProbeResult,
        chunks: &mut [Chunk],
        segment_dir: &Path,
    ) -> Result<(), PipelineError> {
        let chapters = probe_result.chapters();

        if let Some(manifest) = SplitManifest::load(segment_dir) {
            if manifest.is_valid(&self.config.input, chapters.len(), chunks.len()) {
                println!("  Strategy: using cached segments");
                for (i, chunk) in chunks.iter_mut().enumerate() {
                    if let Some(path) = manifest.segment_paths.get(&i.to_string()) {
                        chunk.segment_path = Some(path.clone());
                    }
                }
                info!("split: reused {} cached segments", chunks.len());
                return Ok(());
            }
            info!("split: cache validation failed, re-splitting");
        }

        println!("  Strategy: fast stream copy");
        let split_started = Instant::now();
        let splitter = SplitBuilder::new(&self.config.input, segment_dir, chapters.clone());
        info!("split: {}", splitter.dry_run());

        splitter.run()?;

        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.segment_path = Some(splitter.segment_path(i));
        }

        if let Some((input_size, input_mod_time)) = stat_input(&self.config.input) {
            let manifest = SplitManifest {
                input_path: self.config.input.clone(),
                input_size,
                input_mod_time,
                chapter_count: chapters.len(),
                segment_count: chunks.len(),
                created_at: unix_now(),
                segment_paths: chunks
                    .iter()
                    .enumerate()
                    .map(|(i, c)| {
                        (i.to_string(), c.segment_path.clone().unwrap_or_default())
                    })
                    .collect(),
            };
            if let Err(e) = manifest.save(segment_dir) {
                warn!("split: failed to save manifest: {}", e);
            }
        }

        info!(
            "split: {} segments in {:.2}s",
            chunks.len(),
            split_started.elapsed().as_secs_f64()
        );
        println!(
            "  Split {} segments ({:.2}s)",
            chunks.len(),
            split_started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Encodes all audio chunks through the DAG, skipping chunks covered
    /// by a valid manifest. Returns the per-chunk output paths.
    async fn encode_audio(
        &self,
        chunks: &[Chunk],
        work_dir: &Path,
        constraints: &[ResourceConstraint],
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let cfg = &self.config;
        let started = Instant::now();
        let total_duration: f64 = chunks.iter().map(Chunk::duration).sum();
        let ext = audio_extension(&cfg.audio.codec);

        let knobs = EncodingKnobs::Audio {
            bitrate: &cfg.audio.bitrate,
        };
        let cached = EncodingManifest::load(work_dir, EncodingKind::Audio)
            .filter(|m| m.is_valid(&cfg.input, chunks.len(), &knobs))
            .map(|m| {
                info!("audio: valid manifest with {} cached chunks", m.encoded_chunks.len());
                m.cached_chunks()
            })
            .unwrap_or_default();

        let latest = Arc::new(Mutex::new(LatestEncoderStats::default()));
        let mut orch = DagOrchestrator::new(constraints);
        orch.set_cancel_flag(Arc::clone(&self.cancel));
        orch.set_progress_callback(phase_progress_logger(
            "audio",
            started,
            total_duration,
            chunks.len(),
            Arc::clone(&latest),
        ));

        let resource = encode_resource(cfg.mode);
        info!(
            "audio: encoding {} chunks ({:.2}s of media)",
            chunks.len(),
            total_duration
        );

        let mut outputs = Vec::with_capacity(chunks.len());
        let mut tasks_added = 0usize;

        for chunk in chunks {
            let output = work_dir.join(format!("audio_chunk_{:03}.{}", chunk.id, ext));

            if let Some(cached_path) = cached.get(&chunk.id).filter(|p| p.exists()) {
                info!("audio: chunk {} cached at {}", chunk.id, cached_path.display());
                outputs.push(cached_path.clone());
                continue;
            }

            let builder = AudioBuilder::new(chunk.clone(), &output)
                .codec(&cfg.audio.codec)
                .bitrate(&cfg.audio.bitrate)
                .sample_rate(cfg.audio.sample_rate)
                .channels(cfg.audio.channels)
                .progress_sink(stats_sink(Arc::clone(&latest)));

            orch.add_task(
                Task::new(format!("audio_{}", chunk.id), Box::new(builder), resource)
                    .for_chunk(chunk.id),
            )?;
            tasks_added += 1;
            outputs.push(output);
        }

        if tasks_added > 0 {
            orch.execute().await?;
        } else {
            info!("audio: all chunks cached, skipping execution");
        }

        let elapsed = started.elapsed().as_secs_f64();
        info!(
            "audio: {} chunks done in {:.2}s ({:.1} chunks/s)",
            chunks.len(),
            elapsed,
            chunks.len() as f64 / elapsed.max(1e-6)
        );

        if let Some(manifest) = EncodingManifest::build(
            &cfg.input,
            chunks.len(),
            &knobs,
            chunks.iter().map(|c| c.id).zip(outputs.iter().cloned()),
        ) {
            match manifest.save(work_dir, EncodingKind::Audio) {
                Ok(()) => info!("audio: saved manifest for {} chunks", chunks.len()),
                Err(e) => warn!("audio: failed to save manifest: {}", e),
            }
        }

        Ok(outputs)
    }

    /// Encodes all video chunks through the DAG, skipping chunks covered
    /// by a valid manifest. Returns the per-chunk output paths.
    async fn encode_video(
        &self,
        chunks: &[Chunk],
        work_dir: &Path,
        constraints: &[ResourceConstraint],
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let cfg = &self.config;
        let started = Instant::now();
        let total_duration: f64 = chunks.iter().map(Chunk::duration).sum();

        let knobs = EncodingKnobs::Video {
            codec: &cfg.video.codec,
            crf: cfg.video.crf,
        };
        let cached = EncodingManifest::load(work_dir, EncodingKind::Video)
            .filter(|m| m.is_valid(&cfg.input, chunks.len(), &knobs))
            .map(|m| {
                info!("video: valid manifest with {} cached chunks", m.encoded_chunks.len());
                m.cached_chunks()
            })
            .unwrap_or_default();

        let latest = Arc::new(Mutex::new(LatestEncoderStats::default()));
        let mut orch = DagOrchestrator::new(constraints);
        orch.set_cancel_flag(Arc::clone(&self.cancel));
        orch.set_progress_callback(phase_progress_logger(
            "video",
            started,
            total_duration,
            chunks.len(),
            Arc::clone(&latest),
        ));

        let resource = encode_resource(cfg.mode);
        info!(
            "video: encoding {} chunks ({:.2}s of media)",
            chunks.len(),
            total_duration
        );

        let mut outputs = Vec::with_capacity(chunks.len());
        let mut tasks_added = 0usize;

        for chunk in chunks {
            // Matroska intermediates for broad codec compatibility
            let output = work_dir.join(format!("video_chunk_{:03}.mkv", chunk.id));

            if let Some(cached_path) = cached.get(&chunk.id).filter(|p| p.exists()) {
                info!("video: chunk {} cached at {}", chunk.id, cached_path.display());
                outputs.push(cached_path.clone());
                continue;
            }

            let mut builder = VideoBuilder::new(chunk.clone(), &output)
                .codec(&cfg.video.codec)
                .crf(cfg.video.crf)
                .preset(&cfg.video.preset)
                .progress_sink(stats_sink(Arc::clone(&latest)));
            if !cfg.video.bitrate.is_empty() {
                builder = builder.bitrate(&cfg.video.bitrate);
            }
            if !cfg.video.resolution.is_empty() {
                builder = builder.resolution(&cfg.video.resolution);
            }
            if cfg.video.frame_rate > 0 {
                builder = builder.frame_rate(cfg.video.frame_rate);
            }
            if cfg.video.codec == "libsvtav1" {
                // lp=4 caps lookahead threads, pin=1 pins logical cores
                builder = builder.extra_args(["-svtav1-params", "lp=4:pin=1"]);
            }

            orch.add_task(
                Task::new(format!("video_{}", chunk.id), Box::new(builder), resource)
                    .for_chunk(chunk.id),
            )?;
            tasks_added += 1;
            outputs.push(output);
        }

        if tasks_added > 0 {
            orch.execute().await?;
        } else {
            info!("video: all chunks cached, skipping execution");
        }

        let elapsed = started.elapsed().as_secs_f64();
        info!(
            "video: {} chunks done in {:.2}s ({:.1} chunks/s)",
            chunks.len(),
            elapsed,
            chunks.len() as f64 / elapsed.max(1e-6)
        );

        if let Some(manifest) = EncodingManifest::build(
            &cfg.input,
            chunks.len(),
            &knobs,
            chunks.iter().map(|c| c.id).zip(outputs.iter().cloned()),
        ) {
            match manifest.save(work_dir, EncodingKind::Video) {
                Ok(()) => info!("video: saved manifest for {} chunks", chunks.len()),
                Err(e) => warn!("video: failed to save manifest: {}", e),
            }
        }

        Ok(outputs)
    }

    /// Muxes the concatenated audio and video into the final container.
    fn mux(&self, audio: &Path, video: &Path) -> Result<(), PipelineError> {
        let builder = MuxBuilder::new(video, &self.config.output)
            .audio_track(audio)
            .copy_video(self.config.mixing.copy_video)
            .copy_audio(self.config.mixing.copy_audio);
        builder.run()?;
        Ok(())
    }

    /// Writes the end-of-run summary to console and session log.
    fn report(&self, media_duration: f64, chunk_count: usize, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        let output_size = std::fs::metadata(&self.config.output)
            .map(|m| m.len())
            .unwrap_or(0);
        let bitrate_kbps = if media_duration > 0.0 {
            output_size as f64 * 8.0 / media_duration / 1000.0
        } else {
            0.0
        };
        let speed = media_duration / elapsed.max(1e-6);

        info!("pipeline complete: {}", self.config.output.display());
        info!(
            "size {:.2} MB, duration {:.2}s, bitrate {:.0} kbps, total {:.2}s, {:.2}x realtime, {} chunks",
            output_size as f64 / (1024.0 * 1024.0),
            media_duration,
            bitrate_kbps,
            elapsed,
            speed,
            chunk_count
        );

        println!("Success");
        println!("  Output:     {}", self.config.output.display());
        println!("  Size:       {:.2} MB", output_size as f64 / (1024.0 * 1024.0));
        println!("  Duration:   {:.2}s", media_duration);
        println!("  Total time: {:.2}s ({:.2}x realtime)", elapsed, speed);
        println!("  Chunks:     {}", chunk_count);
    }
}

/// The resource tag encode tasks run under for a mode.
fn encode_resource(mode: Mode) -> ResourceTag {
    match mode {
        Mode::GpuOnly => ResourceTag::GpuEncode,
        _ => ResourceTag::Cpu,
    }
}

/// A progress sink that mirrors the newest encoder readings into the
/// shared stats slot.
fn stats_sink(latest: Arc<Mutex<LatestEncoderStats>>) -> ProgressSink {
    Arc::new(move |p: &EncodingProgress| {
        let mut stats = latest.lock().unwrap();
        stats.speed = p.speed;
        stats.frame = p.frame;
        stats.time = p.current_time.clone();
    })
}

/// The orchestrator progress callback for one encoding phase: logs each
/// completion with throughput, overall speed, and an ETA.
fn phase_progress_logger(
    phase: &'static str,
    started: Instant,
    total_duration: f64,
    chunk_count: usize,
    latest: Arc<Mutex<LatestEncoderStats>>,
) -> impl FnMut(usize, usize, &Task) + Send + 'static {
    move |completed, total, task| {
        info!("{}: completed chunk {}/{} (task: {})", phase, completed, total, task.id());

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed < 0.1 {
            return;
        }

        let rate = completed as f64 / elapsed;
        let encoded = total_duration / chunk_count as f64 * completed as f64;
        let overall = encoded / elapsed;
        let remaining = (total - completed) as f64;
        let eta = if rate > 0.0 { remaining / rate } else { 0.0 };

        let stats = latest.lock().unwrap().clone();
        if stats.time.is_empty() {
            info!(
                "{}: chunk={}/{} rate={:.1}/s overall={:.2}x current={:.2}x eta={:.0}s",
                phase, completed, total, rate, overall, stats.speed, eta
            );
        } else {
            info!(
                "{}: chunk={}/{} rate={:.1}/s overall={:.2}x current={:.2}x time={} frame={} eta={:.0}s",
                phase, completed, total, rate, overall, stats.speed, stats.time, stats.frame, eta
            );
        }
    }
}

fn copy_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dst)?;
    Ok(())
}

fn stat_input(path: &Path) -> Option<(u64, i64)> {
    let metadata = std::fs::metadata(path).ok()?;
    let mod_time = metadata
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;
    Some((metadata.len(), mod_time))
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
