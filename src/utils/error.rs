//! Error types for codec-pump
//!
//! This module defines the error type shared by the pump, the session layer
//! and the collaborator traits. We use thiserror for the library error type
//! and anyhow only at the binary level.

use thiserror::Error;

use crate::player::SessionId;

/// Main error type for codec-pump
#[derive(Error, Debug)]
pub enum PumpError {
    /// The backing stream could not be opened
    #[error("Stream open error: {0}")]
    StreamOpen(String),

    /// No track in the stream matches the decodable type
    #[error("No decodable track found")]
    NoDecodableTrack,

    /// The decoder could not be created or configured
    #[error("Decoder configuration error: {0}")]
    DecoderConfig(String),

    /// Runtime decoder errors
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Demuxer errors
    #[error("Demuxer error: {0}")]
    Demuxer(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// No session registered under this id
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    /// The worker thread could not be spawned
    #[error("Scheduler error: {0}")]
    Scheduler(String),

}

impl PumpError {
    /// Create a decoder error from string
    pub fn decoder_error<S: Into<String>>(msg: S) -> Self {
        PumpError::Decoder(msg.into())
    }

    /// Integer code reported across the binding boundary.
    ///
    /// Creation failures are distinguished; everything else collapses
    /// into a generic failure code.
    pub fn code(&self) -> i32 {
        match self {
            PumpError::StreamOpen(_) | PumpError::FileIO(_) => -1,
            PumpError::NoDecodableTrack => -2,
            PumpError::DecoderConfig(_) => -3,
            _ => -4,
        }
    }
}

/// Convenience type alias for Results in codec-pump
pub type Result<T> = std::result::Result<T, PumpError>;

/// Extension trait for converting other errors to PumpError
pub trait IntoPumpError<T> {
    /// Convert this error into a configuration error with the given context
    fn config_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoPumpError<T> for std::result::Result<T, E> {
    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PumpError::Config(format!("{}: {}", context, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PumpError::StreamOpen("clip.mp4 (No such file)".to_string());
        assert_eq!(err.to_string(), "Stream open error: clip.mp4 (No such file)");

        let err = PumpError::NoDecodableTrack;
        assert_eq!(err.to_string(), "No decodable track found");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(PumpError::StreamOpen("x".into()).code(), -1);
        assert_eq!(PumpError::NoDecodableTrack.code(), -2);
        assert_eq!(PumpError::DecoderConfig("x".into()).code(), -3);
        assert_eq!(PumpError::decoder_error("x").code(), -4);
        assert_eq!(PumpError::Scheduler("x".into()).code(), -4);
        assert_eq!(PumpError::UnknownSession(SessionId(7)).code(), -4);
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let pump_err: PumpError = io_err.into();
        assert!(matches!(pump_err, PumpError::FileIO(_)));
        assert_eq!(pump_err.code(), -1);
    }

    #[test]
    fn test_into_pump_error_trait() {
        let result: std::result::Result<(), &str> = Err("expected `=`");
        let converted = result.config_err("Failed to parse config file");

        match converted {
            Err(PumpError::Config(msg)) => {
                assert_eq!(msg, "Failed to parse config file: expected `=`");
            }
            _ => panic!("Expected Config error"),
        }
    }
}
