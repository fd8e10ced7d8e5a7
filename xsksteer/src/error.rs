use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the steering controller.
#[derive(Debug, Error)]
pub enum SteerError {
    #[error("Failed to load eBPF object: {0}")]
    Load(#[from] aya::EbpfError),

    #[error("XDP program error: {0}")]
    Program(#[from] aya::programs::ProgramError),

    #[error("Map error: {0}")]
    Map(#[from] aya::maps::MapError),

    #[error("Failed to pin map {name}: {source}")]
    Pin {
        name: &'static str,
        #[source]
        source: aya::pin::PinError,
    },

    #[error("Map not found: {0}")]
    MapNotFound(&'static str),

    #[error("Program not found: {0}")]
    ProgramNotFound(&'static str),

    #[error("Socket index {index} out of range (table has {max} slots)")]
    IndexOutOfRange { index: u32, max: u32 },

    #[error("bpf syscall on map {name} failed: {source}")]
    Syscall {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, SteerError>;
