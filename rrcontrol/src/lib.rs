pub mod backend;
pub mod cancel;
pub mod controller;
pub mod errors;
pub mod factory;
pub mod feedback;
pub mod history;
pub mod input;
pub mod monitor;
pub mod network;
pub mod player;
pub mod spotify_backend;
pub mod youtube_backend;

pub use backend::{
    BackendKind, PlaybackBackend, PlaybackEnded, PlaybackEndedSender, PlaybackState,
    playback_ended_channel,
};
pub use cancel::CancellationToken;
pub use controller::{ControllerDeps, ControllerSettings, ControllerStatus, PlayerController};
pub use errors::{BackendError, BackendResult};
pub use factory::{BackendFactory, BackendProvider, DefaultBackendFactory};
pub use feedback::{Announcer, Cue, LogAnnouncer, LogFeedback, SoundFeedback};
pub use history::{HistoryEvent, HistorySink, JsonlHistory, NullHistory};
pub use input::{Control, InputDriver};
pub use monitor::{DEFAULT_END_THRESHOLD, EndOfPlaybackDetector, Observation, PlaybackMonitor};
pub use network::{DnsCheck, ReachabilityCheck, wait_for_network};
pub use player::{PlayerCommand, PlayerProcess};
pub use spotify_backend::{SpotifyApi, SpotifyBackend, SpotifySettings};
pub use youtube_backend::{VideoQueue, YoutubeBackend, YoutubeSettings};
