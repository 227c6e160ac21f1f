//! Error types for the fabric model
//!
//! Only configuration and I/O can fail in a way a caller must handle.
//! Hardware-level conditions (underflow, dropped samples, zero fill) are
//! not errors; they are counted in the diagnostics of each component.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid bundle count: {0} (must be 1..=4)")]
    InvalidBundleCount(usize),

    #[error("Invalid channel count for {name}: {count}")]
    InvalidChannelCount { name: &'static str, count: usize },

    #[error("Invalid FIFO depth for {name}: {depth}")]
    InvalidFifoDepth { name: &'static str, depth: usize },

    #[error("Clock frequency for domain {0} must be non-zero")]
    ZeroClock(&'static str),

    #[error("Invalid feedback setting: {0}")]
    InvalidFeedback(String),

    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
