//! Error types for the playback controller
//!
//! Decode failures get their own enum so callers can tell a bad payload apart
//! from a missing device or an out-of-range parameter.

use thiserror::Error;

/// Why an encoded clip could not be turned into a play-ready buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload text is not valid base64
    #[error("Clip payload is not valid base64: {0}")]
    InvalidBase64(String),

    /// No demuxer recognised the container
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// The container holds no decodable audio track
    #[error("No audio track found")]
    NoAudioTrack,

    /// The stream broke part-way through
    #[error("Corrupt audio stream: {0}")]
    Corrupt(String),

    /// Decoding succeeded but produced no frames
    #[error("Clip contains no audio frames")]
    Empty,
}

/// Main error type for the player
#[derive(Error, Debug)]
pub enum PlayerError {
    /// Payload could not be decoded
    #[error("Audio decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Play requested with no clip loaded
    #[error("No clip loaded")]
    NotReady,

    /// Output device could not be created or resumed
    #[error("Audio backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Speed, pitch or volume out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Settings file could not be read, parsed or validated
    #[error("Settings error: {0}")]
    Settings(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the player error
pub type Result<T> = std::result::Result<T, PlayerError>;
