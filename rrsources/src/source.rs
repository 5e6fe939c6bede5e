use std::{fmt, fs, io::ErrorKind, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SourceError};

/// Media family of a source. Closed set: every variant maps to exactly one
/// playback backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    YoutubeChannel,
    YoutubePlaylist,
    SpotifyPlaylist,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::YoutubeChannel => "youtube_channel",
            SourceType::YoutubePlaylist => "youtube_playlist",
            SourceType::SpotifyPlaylist => "spotify_playlist",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured playable origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
}

impl Source {
    pub fn new(id: impl Into<String>, label: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            source_type,
            channel_id: None,
            playlist_id: None,
        }
    }

    pub fn with_channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_playlist_id(mut self, playlist_id: impl Into<String>) -> Self {
        self.playlist_id = Some(playlist_id.into());
        self
    }

    /// Two sources designate the same content when both id and type match.
    pub fn same_as(&self, other: &Source) -> bool {
        self.id == other.id && self.source_type == other.source_type
    }

    /// Identifier handed to the backend: the channel or playlist id when
    /// present, the source id otherwise.
    pub fn play_target(&self) -> &str {
        let specific = match self.source_type {
            SourceType::YoutubeChannel => self.channel_id.as_deref(),
            SourceType::YoutubePlaylist | SourceType::SpotifyPlaylist => {
                self.playlist_id.as_deref()
            }
        };
        specific.filter(|s| !s.is_empty()).unwrap_or(&self.id)
    }
}

/// Reads the ordered source list.
///
/// A missing file is an empty configuration, not an error: the appliance
/// starts and signals "no sources" until the file appears. Entries that do
/// not describe a valid source are logged and skipped; only a file that is
/// not a JSON array fails.
pub fn load_sources(path: &Path) -> Result<Vec<Source>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "Sources file not found");
            return Ok(Vec::new());
        }
        Err(e) => return Err(SourceError::io(path, e)),
    };

    let entries: Vec<serde_json::Value> =
        serde_json::from_str(&data).map_err(|e| SourceError::json(path, e))?;
    let total = entries.len();
    let sources: Vec<Source> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<Source>(entry) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(path = %path.display(), index, error = %e, "Skipping invalid source entry");
                None
            }
        })
        .collect();
    debug!(
        path = %path.display(),
        count = sources.len(),
        skipped = total - sources.len(),
        "Loaded sources"
    );
    Ok(sources)
}
