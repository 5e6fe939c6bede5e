//! Audible feedback and spoken announcements.
//!
//! Both are fire-and-forget: implementations must return quickly and never
//! fail the caller. Sound synthesis and speech are provided by the host.

use std::fmt;

use tracing::info;

/// Named feedback signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    Startup,
    NetworkError,
    AuthError,
    NotFound,
    DeviceError,
    Retry,
    NoSources,
    Fetching,
}

impl Cue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cue::Startup => "startup",
            Cue::NetworkError => "network_error",
            Cue::AuthError => "auth_error",
            Cue::NotFound => "not_found",
            Cue::DeviceError => "device_error",
            Cue::Retry => "retry",
            Cue::NoSources => "no_sources",
            Cue::Fetching => "fetching",
        }
    }
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait SoundFeedback: Send + Sync {
    fn cue(&self, cue: Cue);
}

pub trait Announcer: Send + Sync {
    fn announce(&self, text: &str);
}

/// Logs cues instead of playing them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl SoundFeedback for LogFeedback {
    fn cue(&self, cue: Cue) {
        info!(cue = cue.as_str(), "Sound cue");
    }
}

/// Logs announcements instead of speaking them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAnnouncer;

impl Announcer for LogAnnouncer {
    fn announce(&self, text: &str) {
        info!(text, "Announcement");
    }
}
