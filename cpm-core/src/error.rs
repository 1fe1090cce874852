//! Error types for CP/M emulator.

use thiserror::Error;

/// Errors that can occur during CP/M emulation.
#[derive(Error, Debug)]
pub enum CpmError {
    #[error("file already open: {0}")]
    FileAlreadyOpen(String),

    #[error("file not open: {0}")]
    FileNotOpen(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CP/M operations.
pub type CpmResult<T> = Result<T, CpmError>;
