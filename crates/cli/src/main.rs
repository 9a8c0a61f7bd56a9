//! CLI entry point for the parenc transcoder.
//!
//! Assembles the effective configuration (CLI flags > settings file >
//! built-in defaults), initializes the session log, installs the
//! cancellation handler, and drives the pipeline. Exit codes: 0 on
//! success, 1 on any fatal error, 130 on user cancellation.

use clap::Parser;
use parenc::chunk::Chunk;
use parenc::command::{AudioBuilder, Command, VideoBuilder};
use parenc::Pipeline;
use parenc_config::{find_config_file, Config, Mode};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn, Level};

/// parenc - parallel media transcoding with chunked scheduling
#[derive(Parser, Debug)]
#[command(name = "parenc")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the source media file
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Path to the final output container
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to a YAML settings file (default: search standard locations)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Encoding mode: cpu-only, gpu-only, mixed
    #[arg(long, value_parser = parse_mode)]
    mode: Option<Mode>,

    /// Parallel workers (0 = logical CPU count)
    #[arg(short, long)]
    workers: Option<u32>,

    /// Seconds per chunk when the source has no chapters (1-86400)
    #[arg(long)]
    chunk_duration: Option<u32>,

    /// Audio codec, e.g. libopus, aac
    #[arg(long)]
    audio_codec: Option<String>,

    /// Audio bitrate, e.g. 128k
    #[arg(long)]
    audio_bitrate: Option<String>,

    /// Audio sample rate in Hz
    #[arg(long)]
    audio_sample_rate: Option<u32>,

    /// Audio channel count
    #[arg(long)]
    audio_channels: Option<u32>,

    /// Video codec, e.g. libx264, libsvtav1
    #[arg(long)]
    video_codec: Option<String>,

    /// Video CRF (0-51, lower is better quality)
    #[arg(long)]
    video_crf: Option<u32>,

    /// Video preset, e.g. ultrafast, medium, veryslow
    #[arg(long)]
    video_preset: Option<String>,

    /// Video bitrate, e.g. 5M (alternative to CRF)
    #[arg(long)]
    video_bitrate: Option<String>,

    /// Video resolution as WIDTHxHEIGHT (empty = keep original)
    #[arg(long)]
    video_resolution: Option<String>,

    /// Video frame rate (0 = keep original)
    #[arg(long)]
    video_frame_rate: Option<u32>,

    /// Fail on any chunk error or gap
    #[arg(long)]
    strict: bool,

    /// Continue past chunk errors, producing a shorter output
    #[arg(long, conflicts_with = "strict")]
    no_strict: bool,

    /// Pre-split the source at chapter boundaries before encoding
    #[arg(long)]
    pre_split: bool,

    /// Print the effective configuration and sample commands, then exit
    #[arg(long)]
    dry_run: bool,

    /// Debug-level session log
    #[arg(short, long)]
    verbose: bool,
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    s.parse()
}

impl Args {
    /// Applies flag overrides on top of file/default configuration.
    fn apply_to(&self, config: &mut Config) {
        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(chunk_duration) = self.chunk_duration {
            config.chunk_duration = chunk_duration;
        }

        if let Some(codec) = &self.audio_codec {
            config.audio.codec = codec.clone();
        }
        if let Some(bitrate) = &self.audio_bitrate {
            config.audio.bitrate = bitrate.clone();
        }
        if let Some(rate) = self.audio_sample_rate {
            config.audio.sample_rate = rate;
        }
        if let Some(channels) = self.audio_channels {
            config.audio.channels = channels;
        }

        if let Some(codec) = &self.video_codec {
            config.video.codec = codec.clone();
        }
        if let Some(crf) = self.video_crf {
            config.video.crf = crf;
        }
        if let Some(preset) = &self.video_preset {
            config.video.preset = preset.clone();
        }
        if let Some(bitrate) = &self.video_bitrate {
            config.video.bitrate = bitrate.clone();
        }
        if let Some(resolution) = &self.video_resolution {
            config.video.resolution = resolution.clone();
        }
        if let Some(frame_rate) = self.video_frame_rate {
            config.video.frame_rate = frame_rate;
        }

        if self.strict {
            config.strict_mode = true;
        }
        if self.no_strict {
            config.strict_mode = false;
        }
        if self.pre_split {
            config.pre_split = true;
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if self.verbose {
            config.verbose = true;
        }
    }
}

/// Builds the effective configuration from defaults, the settings file,
/// and flag overrides, then validates it.
fn load_config(args: &Args) -> Result<Config, String> {
    let config_path = args.config.clone().or_else(find_config_file);

    let mut config = match config_path {
        Some(path) => Config::load_file(&path)
            .map_err(|e| format!("failed to load config file {}: {}", path.display(), e))?,
        None => Config::default(),
    };

    args.apply_to(&mut config);
    config.resolve_workers();
    config.validate().map_err(|e| e.to_string())?;

    Ok(config)
}

/// Prints the effective configuration for dry runs.
fn print_config(config: &Config) {
    println!("Effective configuration");
    println!("  Input:          {}", config.input.display());
    println!("  Output:         {}", config.output.display());
    println!("  Mode:           {}", config.mode);
    println!("  Workers:        {}", config.workers);
    println!("  Chunk duration: {} seconds", config.chunk_duration);
    println!();
    println!("  Audio: codec={} bitrate={} sample_rate={} channels={}",
        config.audio.codec,
        config.audio.bitrate,
        config.audio.sample_rate,
        config.audio.channels,
    );
    print!("  Video: codec={} crf={} preset={}",
        config.video.codec, config.video.crf, config.video.preset,
    );
    if !config.video.bitrate.is_empty() {
        print!(" bitrate={}", config.video.bitrate);
    }
    if !config.video.resolution.is_empty() {
        print!(" resolution={}", config.video.resolution);
    }
    if config.video.frame_rate > 0 {
        print!(" frame_rate={}", config.video.frame_rate);
    }
    println!();
    println!();
    println!("  Strict mode: {}", config.strict_mode);
    println!("  Pre-split:   {}", config.pre_split);
}

/// Prints the commands a run would issue for a representative chunk.
fn print_sample_commands(config: &Config) {
    let sample = match Chunk::new(1, 0.0, 300.0, "tmp/segments/segment_000.mkv") {
        Ok(chunk) => chunk,
        Err(_) => return,
    };

    println!();
    println!("Sample commands that would be generated:");

    let audio = AudioBuilder::new(sample.clone(), "tmp/audio/audio_chunk_001.opus")
        .codec(&config.audio.codec)
        .bitrate(&config.audio.bitrate)
        .sample_rate(config.audio.sample_rate)
        .channels(config.audio.channels);
    println!("  audio: {}", audio.dry_run());

    let mut video = VideoBuilder::new(sample, "tmp/video/video_chunk_001.mkv")
        .codec(&config.video.codec)
        .crf(config.video.crf)
        .preset(&config.video.preset);
    if !config.video.bitrate.is_empty() {
        video = video.bitrate(&config.video.bitrate);
    }
    if config.video.frame_rate > 0 {
        video = video.frame_rate(config.video.frame_rate);
    }
    if config.video.codec == "libsvtav1" {
        video = video.extra_args(["-svtav1-params", "lp=4:pin=1"]);
    }
    println!("  video: {}", video.dry_run());
}

/// Opens the session log next to the output file and installs the
/// tracing subscriber writing to it.
fn init_session_log(config: &Config) -> Result<PathBuf, std::io::Error> {
    let log_path = PathBuf::from(format!("{}.log", config.output.display()));
    let log_file = std::fs::File::create(&log_path)?;

    let level = if config.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .with_max_level(level)
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Configuration error: {}", message);
            return ExitCode::FAILURE;
        }
    };

    if config.dry_run {
        println!("DRY RUN - no encoding will be performed");
        print_config(&config);
        print_sample_commands(&config);
        println!();
        println!("Configuration is valid.");
        return ExitCode::SUCCESS;
    }

    let log_path = match init_session_log(&config) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Logger initialization error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("Logging to: {}", log_path.display());
    info!("===== encoding session started =====");

    let pipeline = Pipeline::new(config);

    // First Ctrl-C stops admitting work; in-flight encodes drain
    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nInterrupt received, finishing in-flight work...");
            warn!("interrupt: user cancelled encoding");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    match pipeline.run().await {
        Ok(()) => {
            info!("===== encoding session ended =====");
            println!("Encoding completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) if e.is_cancellation() => {
            warn!("session cancelled by user");
            eprintln!("Encoding cancelled by user");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("pipeline error: {}", e);
            eprintln!("Pipeline error: {}", e);
            ExitCode::FAILURE
        }
    }
}
