//! Error types for the analysis engine

use thiserror::Error;

/// Unrecoverable conditions that abort an analysis run.
///
/// Recoverable conditions (uncertain tempo, too few hits, no harmony) are
/// reported as [`crate::analysis::AnalysisWarning`] on the result instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranscribeError {
    /// E001: Buffer empty, too short for one analysis window, or under 3 s
    #[error("E001: Insufficient audio - {0}")]
    InsufficientAudio(String),
    /// E002: Sample rate outside the accepted set
    #[error("E002: Unsupported sample rate {0} Hz")]
    UnsupportedSampleRate(u32),
    /// E003: A configuration value is outside its allowed range
    #[error("E003: Invalid configuration - {0}")]
    InvalidConfiguration(String),
    /// E004: The cancellation token was triggered
    #[error("E004: Analysis cancelled")]
    Cancelled,
    /// E005: Unreadable or malformed audio container
    #[error("E005: Invalid audio format - {0}")]
    InvalidAudioFormat(String),
    /// E006: File system error while reading input
    #[error("E006: Audio file I/O error - {0}")]
    AudioFileError(String),
    /// E007: MIDI serialization failed
    #[error("E007: MIDI export error - {0}")]
    MidiExportError(String),
    /// E008: JSON serialization or output write failed
    #[error("E008: Analysis export error - {0}")]
    AnalysisExportError(String),
}

impl From<std::io::Error> for TranscribeError {
    fn from(err: std::io::Error) -> Self {
        TranscribeError::AudioFileError(format!("File I/O error: {}", err))
    }
}

impl From<serde_json::Error> for TranscribeError {
    fn from(err: serde_json::Error) -> Self {
        TranscribeError::AnalysisExportError(format!("JSON serialization error: {}", err))
    }
}

impl From<hound::Error> for TranscribeError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => TranscribeError::from(e),
            other => TranscribeError::InvalidAudioFormat(other.to_string()),
        }
    }
}

/// Result type alias for analysis operations
pub type Result<T> = std::result::Result<T, TranscribeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_in_messages() {
        assert!(TranscribeError::UnsupportedSampleRate(8000)
            .to_string()
            .starts_with("E002"));
        assert_eq!(TranscribeError::Cancelled.to_string(), "E004: Analysis cancelled");
        let err = TranscribeError::InsufficientAudio("2.0 s".into());
        assert_eq!(err.to_string(), "E001: Insufficient audio - 2.0 s");
    }

    #[test]
    fn test_io_error_maps_to_file_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(
            TranscribeError::from(io),
            TranscribeError::AudioFileError(_)
        ));
    }
}
