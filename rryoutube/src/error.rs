use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, YoutubeError>;

#[derive(Error, Debug)]
pub enum YoutubeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] ureq::Error),

    #[error("Failed to read response: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Missing {0} in feed entry")]
    MissingField(&'static str),

    #[error("No videos found for {0}")]
    Empty(String),

    #[error("Content unavailable: {0}")]
    Unavailable(String),

    #[error("{program} failed: {message}")]
    Resolver { program: String, message: String },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

impl YoutubeError {
    /// True for failures a later attempt may not hit (connectivity, timeouts).
    pub fn is_network(&self) -> bool {
        match self {
            YoutubeError::Http(ureq::Error::StatusCode(code)) => *code >= 500 || *code == 429,
            YoutubeError::Http(_) | YoutubeError::Io(_) | YoutubeError::Timeout { .. } => true,
            YoutubeError::Resolver { message, .. } => looks_like_network(message),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            YoutubeError::Http(ureq::Error::StatusCode(404))
                | YoutubeError::Empty(_)
                | YoutubeError::Unavailable(_)
        )
    }
}

pub(crate) fn looks_like_network(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "timed out",
        "name resolution",
        "network is unreachable",
        "connection reset",
        "connection refused",
        "unable to download",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}
