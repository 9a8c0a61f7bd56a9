//! Configuration crate for the parenc transcoder
//!
//! Provides the validated settings record consumed by the pipeline,
//! YAML settings file loading, and configuration validation.

pub mod config;

pub use config::{
    find_config_file, AudioConfig, Config, ConfigError, MixingConfig, Mode, VideoConfig,
    DEFAULT_CHUNK_DURATION, MAX_CHUNK_DURATION, MIN_CHUNK_DURATION,
};
