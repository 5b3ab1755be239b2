//! Error types for kapsel operations.
//!
//! This module defines [`KapselError`], the primary error type used by the
//! loaders, the local state store and the CLI, and a [`Result`] alias.
//!
//! # Error Handling Strategy
//!
//! - Providers never return `KapselError`; their failures are collected as
//!   strings in a `ProvideResult` or `SimpleStatus`
//! - Use `KapselError` for failures the caller must handle (missing
//!   manifest, corrupt local state, unknown requirement kind)
//! - Use `anyhow::Error` (via `KapselError::Other`) for unexpected errors

use std::path::PathBuf;
use thiserror::Error;

use crate::secrets::CryptoError;

/// Core error type for kapsel operations.
#[derive(Debug, Error)]
pub enum KapselError {
    /// Project manifest not found at expected location.
    #[error("Configuration not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Failed to parse a manifest or local state file.
    #[error("Failed to parse config at {path}: {message}")]
    ConfigParseError { path: PathBuf, message: String },

    /// Invalid manifest structure or values.
    #[error("Invalid configuration: {message}")]
    ConfigValidationError { message: String },

    /// No provider is registered under this name.
    #[error("unknown requirement kind: {kind}")]
    UnknownRequirementKind { kind: String },

    /// The local state document could not be read or written.
    #[error("Local state error at {path}: {message}")]
    LocalStateError { path: PathBuf, message: String },

    /// A subprocess failed.
    #[error("Command failed with exit code {code:?}: {command}")]
    CommandFailed { command: String, code: Option<i32> },

    /// Secret codec failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for kapsel operations.
pub type Result<T> = std::result::Result<T, KapselError>;
