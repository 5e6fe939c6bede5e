//! Modèles de données de la Web API Spotify

use serde::Deserialize;

/// Mots-clés reconnus dans le nom d'un device Raspberry Pi
pub const DEVICE_KEYWORDS: [&str; 4] = ["raspotify", "raspberry", "librespot", "pi"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Device {
    /// Absent for restricted devices
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_restricted: bool,
    pub volume_percent: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DevicesResponse {
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Artist {
    pub name: String,
}

/// Track or episode currently loaded
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Track {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    pub uri: Option<String>,
}

impl Track {
    /// `"Artist1, Artist2 - Title"`
    pub fn display_name(&self) -> String {
        let title = if self.name.is_empty() { "Unknown" } else { &self.name };
        let artists = self
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        if artists.is_empty() {
            format!("Unknown - {}", title)
        } else {
            format!("{} - {}", artists, title)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaybackContext {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurrentPlayback {
    #[serde(default)]
    pub is_playing: bool,
    pub device: Option<Device>,
    pub item: Option<Track>,
    pub context: Option<PlaybackContext>,
    pub shuffle_state: Option<bool>,
    pub progress_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    pub refresh_token: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
pub(crate) struct TracksTotal {
    pub total: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaylistTracks {
    pub tracks: TracksTotal,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AlbumTracks {
    pub total_tracks: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ApiErrorDetail {
    Object { message: String },
    Code(String),
}

impl ApiErrorDetail {
    pub fn message(&self) -> &str {
        match self {
            ApiErrorDetail::Object { message } => message,
            ApiErrorDetail::Code(code) => code,
        }
    }
}

/// Normalise un identifiant de source en URI Spotify complète.
///
/// `spotify:...` est conservé, `type:ID` devient `spotify:type:ID` et un
/// identifiant nu est considéré comme une playlist.
pub fn normalize_uri(source_id: &str) -> String {
    if source_id.starts_with("spotify:") {
        source_id.to_string()
    } else if source_id.contains(':') {
        format!("spotify:{}", source_id)
    } else {
        format!("spotify:playlist:{}", source_id)
    }
}

/// Découpe `spotify:type:ID` en `(type, ID)`.
pub fn split_uri(uri: &str) -> Option<(&str, &str)> {
    let mut parts = uri.strip_prefix("spotify:")?.splitn(2, ':');
    let kind = parts.next()?;
    let id = parts.next()?;
    if kind.is_empty() || id.is_empty() {
        return None;
    }
    Some((kind, id))
}

/// Choisit le device de lecture.
///
/// Ordre de priorité : id configuré, nom configuré (insensible à la casse),
/// puis premier device dont le nom contient un des [`DEVICE_KEYWORDS`].
pub fn select_device<'a>(
    devices: &'a [Device],
    device_id: Option<&str>,
    device_name: Option<&str>,
) -> Option<&'a Device> {
    let usable = || devices.iter().filter(|d| d.id.is_some() && !d.is_restricted);

    if let Some(wanted) = device_id {
        if let Some(device) = usable().find(|d| d.id.as_deref() == Some(wanted)) {
            return Some(device);
        }
    }

    if let Some(wanted) = device_name {
        let wanted = wanted.to_lowercase();
        if let Some(device) = usable().find(|d| d.name.to_lowercase() == wanted) {
            return Some(device);
        }
    }

    usable().find(|d| {
        let name = d.name.to_lowercase();
        DEVICE_KEYWORDS.iter().any(|k| name.contains(k))
    })
}
