//! AEH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, AehError>;

/// Top-level error type for the autoextend helper.
#[derive(Debug, Error)]
pub enum AehError {
    #[error("[AEH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[AEH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[AEH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[AEH-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[AEH-2001] filesystem stats failure for {path}: {details}")]
    FsStats { path: PathBuf, details: String },

    #[error("[AEH-2101] storage operation `{operation}` failed (exit {code})")]
    Executor { operation: String, code: i32 },

    #[error("[AEH-2102] storage operation `{operation}` timed out after {timeout_secs}s")]
    ExecutorTimeout {
        operation: String,
        timeout_secs: u64,
    },

    #[error("[AEH-2103] volume group query failed for {group}: {details}")]
    GroupQuery { group: String, details: String },

    #[error("[AEH-2201] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[AEH-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[AEH-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl AehError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "AEH-1001",
            Self::MissingConfig { .. } => "AEH-1002",
            Self::ConfigParse { .. } => "AEH-1003",
            Self::UnsupportedPlatform { .. } => "AEH-1101",
            Self::FsStats { .. } => "AEH-2001",
            Self::Executor { .. } => "AEH-2101",
            Self::ExecutorTimeout { .. } => "AEH-2102",
            Self::GroupQuery { .. } => "AEH-2103",
            Self::Serialization { .. } => "AEH-2201",
            Self::Io { .. } => "AEH-3002",
            Self::Runtime { .. } => "AEH-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for AehError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for AehError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for AehError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}
