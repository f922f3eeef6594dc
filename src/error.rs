//! Error types for the stream player

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output device errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Start time {start} is before device time {now}")]
    StartInPast { start: u64, now: u64 },

    #[error("Block of {got} samples does not match device block length {expected}")]
    BlockLength { expected: usize, got: usize },

    #[error("Output device closed")]
    DeviceClosed,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Sample block validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    #[error("Expected {expected} samples, got {got}")]
    WrongLength { expected: usize, got: usize },

    #[error("Non-finite sample at index {0}")]
    NonFinite(usize),
}

/// Feed wire-format errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Binary frame length {0} is not a multiple of 4")]
    BinaryLength(usize),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
