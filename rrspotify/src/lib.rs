//! # rrspotify - Client synchrone pour la Web API Spotify
//!
//! Provides what the playback backend needs from Spotify Connect:
//!
//! - access tokens refreshed from a stored refresh token
//! - device listing and playback transfer
//! - transport commands (play, pause, next, previous, shuffle)
//! - current playback and playlist sizes
//!
//! Expired credentials are handled transparently: a 401 triggers one token
//! refresh and one retry before the error surfaces.

pub mod client;
pub mod config_ext;
pub mod error;
pub mod models;

pub use client::{SpotifyClient, SpotifyCredentials};
pub use config_ext::SpotifyConfigExt;
pub use error::{Result, SpotifyError};
pub use models::{
    Artist, CurrentPlayback, Device, PlaybackContext, Track, normalize_uri, select_device,
    split_uri, DEVICE_KEYWORDS,
};
