//! Error types for the playback engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Backend-reported failure codes. The integer values are what subscribers see in
/// `on_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The container or codec is not supported by the active backend.
    Unsupported,
    SourceMissing,
    PermissionDenied,
    Io,
    Decode,
    Device,
    Other(i32),
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            Self::Unsupported => -38,
            Self::SourceMissing => -2,
            Self::PermissionDenied => -13,
            Self::Io => -5,
            Self::Decode => -1004,
            Self::Device => -19,
            Self::Other(code) => code,
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::SourceMissing,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Unsupported => "unsupported format",
            Self::SourceMissing => "source not found",
            Self::PermissionDenied => "permission denied",
            Self::Io => "i/o failure",
            Self::Decode => "decode failure",
            Self::Device => "output device failure",
            Self::Other(_) => "backend error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareFailure {
    Missing,
    PermissionDenied,
    Unsupported,
    Unreadable,
}

impl From<ErrorCode> for PrepareFailure {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::SourceMissing => Self::Missing,
            ErrorCode::PermissionDenied => Self::PermissionDenied,
            ErrorCode::Unsupported => Self::Unsupported,
            _ => Self::Unreadable,
        }
    }
}

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("playback engine could not be initialized: {0}")]
    EngineInit(String),

    #[error("failed to prepare {}: {reason:?}", path.display())]
    Prepare {
        path: PathBuf,
        reason: PrepareFailure,
    },

    #[error("playback error {} ({})", .0.code(), .0.description())]
    Playback(ErrorCode),

    #[error("seek rejected: {0}")]
    Seek(String),

    #[error("audio focus was denied")]
    FocusDenied,

    #[error("playlist is empty")]
    EmptyPlaylist,

    #[error("playlist index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("player has shut down")]
    Closed,
}

impl PlayerError {
    pub fn code(&self) -> i32 {
        match self {
            Self::EngineInit(_) => ErrorCode::Device.code(),
            Self::Prepare { reason, .. } => match reason {
                PrepareFailure::Missing => ErrorCode::SourceMissing.code(),
                PrepareFailure::PermissionDenied => ErrorCode::PermissionDenied.code(),
                PrepareFailure::Unsupported => ErrorCode::Unsupported.code(),
                PrepareFailure::Unreadable => ErrorCode::Io.code(),
            },
            Self::Playback(code) => code.code(),
            Self::Seek(_) => -1010,
            Self::FocusDenied => -1020,
            Self::EmptyPlaylist | Self::IndexOutOfRange { .. } => -1030,
            Self::Closed => -1040,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_prepare_sub_cases() {
        let missing = io::Error::from(io::ErrorKind::NotFound);
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(
            PrepareFailure::from(ErrorCode::from_io(&missing)),
            PrepareFailure::Missing
        );
        assert_eq!(
            PrepareFailure::from(ErrorCode::from_io(&denied)),
            PrepareFailure::PermissionDenied
        );
    }

    #[test]
    fn unsupported_code_is_stable() {
        assert_eq!(ErrorCode::Unsupported.code(), -38);
        assert_eq!(ErrorCode::Other(7).code(), 7);
    }

    #[test]
    fn prepare_error_message_names_source() {
        let err = PlayerError::Prepare {
            path: PathBuf::from("a.mp3"),
            reason: PrepareFailure::Missing,
        };
        assert!(err.to_string().contains("a.mp3"));
        assert_eq!(err.code(), ErrorCode::SourceMissing.code());
    }
}
