//! FXL-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::PathBuf;

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, FauxloadError>;

/// Resource dimension tracked by the shared load state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Cpu,
    Memory,
    DiskIo,
    NetIo,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::DiskIo => "disk-io",
            Self::NetIo => "net-io",
        };
        f.write_str(label)
    }
}

impl ResourceKind {
    /// Unit suffix used in error messages and log rows.
    #[must_use]
    pub const fn unit(&self) -> &'static str {
        match self {
            Self::Cpu => "%",
            Self::Memory => " bytes",
            Self::DiskIo | Self::NetIo => " bytes/s",
        }
    }
}

/// Top-level error type for fauxload.
#[derive(Debug, Error)]
pub enum FauxloadError {
    #[error("[FXL-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[FXL-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[FXL-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[FXL-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[FXL-1201] invalid load step: {details}")]
    InvalidStep { details: String },

    #[error(
        "[FXL-2001] maximum {resource} load exceeded: current {current}{unit} + delta \
         {delta}{unit} > max {max}{unit}",
        unit = .resource.unit()
    )]
    MaximumLoadExceeded {
        resource: ResourceKind,
        current: u64,
        delta: u64,
        max: u64,
    },

    #[error("[FXL-2002] simulation infrastructure is not running")]
    InfrastructureNotRunning,

    #[error("[FXL-2003] simulation interrupted before the schedule completed")]
    SimulationInterrupted,

    #[error("[FXL-2101] platform probe failure for {path}: {details}")]
    PlatformProbe { path: PathBuf, details: String },

    #[error("[FXL-2102] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[FXL-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FXL-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[FXL-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl FauxloadError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "FXL-1001",
            Self::MissingConfig { .. } => "FXL-1002",
            Self::ConfigParse { .. } => "FXL-1003",
            Self::UnsupportedPlatform { .. } => "FXL-1101",
            Self::InvalidStep { .. } => "FXL-1201",
            Self::MaximumLoadExceeded { .. } => "FXL-2001",
            Self::InfrastructureNotRunning => "FXL-2002",
            Self::SimulationInterrupted => "FXL-2003",
            Self::PlatformProbe { .. } => "FXL-2101",
            Self::Serialization { .. } => "FXL-2102",
            Self::Io { .. } => "FXL-3002",
            Self::ChannelClosed { .. } => "FXL-3003",
            Self::Runtime { .. } => "FXL-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Capacity and lifecycle errors are deterministic and never retryable;
    /// probe and I/O failures may be transient.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::PlatformProbe { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for FauxloadError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for FauxloadError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
