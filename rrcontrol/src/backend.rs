//! Uniform playback contract over media families.

use std::fmt;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use rrsources::{Source, SourceType};
use tracing::debug;

use crate::errors::BackendResult;

/// Backend implementation serving a [`SourceType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Youtube,
    Spotify,
}

impl BackendKind {
    pub fn for_source_type(source_type: SourceType) -> Self {
        match source_type {
            SourceType::YoutubeChannel | SourceType::YoutubePlaylist => BackendKind::Youtube,
            SourceType::SpotifyPlaylist => BackendKind::Spotify,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Youtube => "youtube",
            BackendKind::Spotify => "spotify",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Playback flags owned by a backend.
///
/// | is_playing | is_paused | meaning            |
/// |------------|-----------|--------------------|
/// | false      | false     | stopped            |
/// | true       | true      | paused, still loaded |
/// | true       | false     | playing            |
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_paused: bool,
    pub current_item: Option<String>,
}

impl PlaybackState {
    pub fn playing(current_item: Option<String>) -> Self {
        Self {
            is_playing: true,
            is_paused: false,
            current_item,
        }
    }

    pub fn is_stopped(&self) -> bool {
        !self.is_playing && !self.is_paused
    }

    pub fn is_active(&self) -> bool {
        self.is_playing && !self.is_paused
    }
}

/// Content of a natural end-of-playback signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEnded {
    pub kind: BackendKind,
    pub source_id: String,
}

/// Sending half of the single-slot "content ended" channel.
///
/// A signal that finds the slot occupied is dropped: the receiver only
/// needs to know that playback ended, not how many times it was reported.
#[derive(Debug, Clone)]
pub struct PlaybackEndedSender {
    sender: Sender<PlaybackEnded>,
}

impl PlaybackEndedSender {
    pub fn notify(&self, event: PlaybackEnded) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(kind = %event.kind, "Playback-ended slot already full");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Playback-ended receiver gone");
            }
        }
    }
}

pub fn playback_ended_channel() -> (PlaybackEndedSender, Receiver<PlaybackEnded>) {
    let (sender, receiver) = bounded(1);
    (PlaybackEndedSender { sender }, receiver)
}

/// Operations every media backend provides.
///
/// Transport methods report success as a boolean and never panic on
/// ambiguous state; `play` reports a classified error.
pub trait PlaybackBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Starts `source`. On success the backend is playing and its monitor
    /// (if any) is running.
    fn play(&self, source: &Source) -> BackendResult<()>;

    /// Keeps `is_playing` set.
    fn pause(&self) -> bool;

    fn resume(&self) -> bool;

    /// Reaches the stopped state, tears down the monitor and clears the
    /// current item.
    fn stop(&self) -> bool;

    /// May be unsupported (returns `false`).
    fn next(&self) -> bool;

    /// May be unsupported (returns `false`).
    fn previous(&self) -> bool;

    /// Authoritative query; falls back to the last known state when the
    /// external player cannot be reached.
    fn is_playing(&self) -> bool;

    fn state(&self) -> PlaybackState;

    fn current_item(&self) -> Option<String> {
        self.state().current_item
    }

    /// Id of the source the backend last started, until it is stopped.
    fn loaded_source_id(&self) -> Option<String>;

    /// Stops only if `source_id` is still the loaded source. Backends are
    /// shared per kind, so a stale attempt must not stop a newer session.
    ///
    /// The default compares and stops in two steps; backends whose `play`
    /// can overlap this call override it with an atomic version.
    fn stop_if_current(&self, source_id: &str) -> bool {
        if self.loaded_source_id().as_deref() == Some(source_id) {
            self.stop()
        } else {
            false
        }
    }

    /// Channel signalled once per playback session on natural end.
    /// `None` detaches it.
    fn set_playback_ended_notifier(&self, notifier: Option<PlaybackEndedSender>);

    /// Releases long-lived resources at shutdown.
    fn close(&self) {}
}
