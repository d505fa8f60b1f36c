//! Error types for the emulator-side bridge.
//!
//! Only [`LayoutError`] and [`ConfigError`] are allowed to stop the bridge,
//! and only during startup. Everything that can go wrong while frames are
//! running is logged and skipped by the driver.

use std::path::PathBuf;

use thiserror::Error;

use crate::layout::Field;

/// Problems with the memory layout map. Usually means the wrong ROM revision.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("layout field `{0}` is not mapped")]
    Unmapped(Field),

    #[error("unknown layout field `{0}`")]
    UnknownField(String),

    #[error("layout field `{field}` has invalid width {width} for {encoding} encoding")]
    InvalidWidth {
        field: Field,
        width: u16,
        encoding: &'static str,
    },

    #[error("party slot stride must be non-zero")]
    ZeroStride,
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration value: {0}")]
    Invalid(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Mailbox I/O errors. Missing or empty documents are not errors.
#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("mailbox {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mailbox document is not valid JSON: {0}")]
    Document(#[from] serde_json::Error),
}

/// Errors reported by an emulator backend
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmulatorError {
    #[error("save state slot {0} is empty")]
    EmptySlot(u8),

    #[error("save state slot {0} is out of range")]
    InvalidSlot(u8),

    #[error("emulator backend error: {0}")]
    Backend(String),
}
