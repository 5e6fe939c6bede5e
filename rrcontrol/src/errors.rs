use rrspotify::SpotifyError;
use rryoutube::YoutubeError;
use thiserror::Error;

use crate::feedback::Cue;

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure of a backend operation, classified for the controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Permission denied: {0}")]
    Permission(String),
    #[error("Unknown source type '{0}'")]
    UnknownSourceType(String),
    #[error("Player process error: {0}")]
    Process(String),
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Audible cue reported for this failure.
    pub fn cue(&self) -> Cue {
        match self {
            BackendError::Auth(_) => Cue::AuthError,
            BackendError::NotFound(_) => Cue::NotFound,
            BackendError::Network(_) => Cue::NetworkError,
            BackendError::Permission(_) => Cue::AuthError,
            BackendError::UnknownSourceType(_) => Cue::DeviceError,
            BackendError::Process(_) | BackendError::Other(_) => Cue::DeviceError,
        }
    }

    /// Whether another attempt of the same operation can succeed.
    ///
    /// Permission and configuration errors are final for the attempt.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            BackendError::Permission(_) | BackendError::UnknownSourceType(_)
        )
    }

    pub fn category(&self) -> &'static str {
        match self {
            BackendError::Auth(_) => "auth",
            BackendError::NotFound(_) => "not_found",
            BackendError::Network(_) => "network",
            BackendError::Permission(_) => "permission",
            BackendError::UnknownSourceType(_) => "unknown_source_type",
            BackendError::Process(_) => "process",
            BackendError::Other(_) => "other",
        }
    }
}

impl From<SpotifyError> for BackendError {
    fn from(err: SpotifyError) -> Self {
        let message = err.to_string();
        if err.is_auth_error() {
            BackendError::Auth(message)
        } else if err.is_permission() {
            BackendError::Permission(message)
        } else if err.is_not_found() {
            BackendError::NotFound(message)
        } else if err.is_network() {
            BackendError::Network(message)
        } else {
            BackendError::Other(message)
        }
    }
}

impl From<YoutubeError> for BackendError {
    fn from(err: YoutubeError) -> Self {
        let message = err.to_string();
        if err.is_not_found() {
            BackendError::NotFound(message)
        } else if err.is_network() {
            BackendError::Network(message)
        } else {
            BackendError::Other(message)
        }
    }
}
