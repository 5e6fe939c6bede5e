//! YouTube metadata and stream resolution.
//!
//! Channels are read from their public Atom feed; playable audio URLs come
//! from `yt-dlp`. Nothing here plays audio: the player process lives in the
//! control crate.

pub mod error;
pub mod feed;
pub mod resolver;

pub use error::{Result, YoutubeError};
pub use feed::{ChannelFeedClient, FeedSource, VideoEntry, parse_feed};
pub use resolver::{StreamResolver, YtDlpResolver};

/// Watch URL of a video.
pub fn video_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Public URL of a playlist.
pub fn playlist_url(playlist_id: &str) -> String {
    format!("https://www.youtube.com/playlist?list={}", playlist_id)
}
