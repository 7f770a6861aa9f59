//! Error types for snc-meister.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading configuration, reading traces, or
/// running the admission server.
///
/// Admission-level failures (bad client configs, name collisions, infeasible
/// batches) are not errors; they are reported through [`crate::rpc::Status`]
/// codes on the RPC surface.
#[derive(Debug, Error)]
pub enum MeisterError {
    /// Error reading a trace file.
    #[error("failed to read trace file {path}: {source}")]
    TraceIo {
        /// Path of the trace file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An arrival model failed structural validation.
    #[error("invalid arrival model: {0}")]
    InvalidModel(String),

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Error binding or serving the RPC listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for snc-meister operations.
pub type Result<T> = std::result::Result<T, MeisterError>;
