//! Client HTTP synchrone pour la Web API Spotify

use std::time::{Duration, Instant};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use ureq::Agent;

use crate::{
    error::{Result, SpotifyError},
    models::{
        AlbumTracks, ApiErrorBody, CurrentPlayback, Device, DevicesResponse, PlaylistTracks,
        TokenResponse, split_uri,
    },
};

const API_BASE_URL: &str = "https://api.spotify.com/v1";
const ACCOUNTS_URL: &str = "https://accounts.spotify.com/api/token";

/// Marge avant expiration à partir de laquelle le token est renouvelé
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for SpotifyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Put,
    Post,
}

/// Client Spotify
///
/// Le token d'accès est mis en cache et renouvelé à partir du refresh token.
/// Toutes les méthodes sont bloquantes.
pub struct SpotifyClient {
    agent: Agent,
    credentials: Mutex<SpotifyCredentials>,
    token: Mutex<Option<AccessToken>>,
    api_base: String,
    accounts_url: String,
}

impl SpotifyClient {
    pub fn new(credentials: SpotifyCredentials, timeout: Duration) -> Self {
        Self::with_endpoints(credentials, timeout, API_BASE_URL, ACCOUNTS_URL)
    }

    pub fn with_endpoints(
        credentials: SpotifyCredentials,
        timeout: Duration,
        api_base: impl Into<String>,
        accounts_url: impl Into<String>,
    ) -> Self {
        // 4xx/5xx are mapped by status, not returned as transport errors
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            credentials: Mutex::new(credentials),
            token: Mutex::new(None),
            api_base: api_base.into(),
            accounts_url: accounts_url.into(),
        }
    }

    /// Refresh token currently in use (Spotify may rotate it).
    pub fn refresh_token(&self) -> String {
        self.credentials.lock().refresh_token.clone()
    }

    /// Forces a new access token.
    pub fn authenticate(&self) -> Result<()> {
        let credentials = self.credentials.lock().clone();
        if credentials.refresh_token.is_empty() {
            return Err(SpotifyError::MissingCredential("refresh_token"));
        }

        let basic = BASE64.encode(format!(
            "{}:{}",
            credentials.client_id, credentials.client_secret
        ));
        let mut response = self
            .agent
            .post(&self.accounts_url)
            .header("Authorization", &format!("Basic {}", basic))
            .send_form([
                ("grant_type", "refresh_token"),
                ("refresh_token", credentials.refresh_token.as_str()),
            ])?;

        let status = response.status().as_u16();
        let body = response.body_mut().read_to_string()?;
        if status != 200 {
            let message = error_message(&body);
            warn!(status, message = %message, "Spotify token refresh rejected");
            // The accounts service answers 400 invalid_grant for revoked tokens
            return Err(match status {
                400 | 401 => SpotifyError::Unauthorized(message),
                code => SpotifyError::from_status_code(code, message),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        if let Some(rotated) = token.refresh_token {
            if rotated != credentials.refresh_token {
                info!("Spotify rotated the refresh token");
                self.credentials.lock().refresh_token = rotated;
            }
        }

        *self.token.lock() = Some(AccessToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        debug!(expires_in = token.expires_in, "Spotify access token refreshed");
        Ok(())
    }

    fn access_token(&self) -> Result<String> {
        if let Some(token) = self.token.lock().as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.value.clone());
            }
        }
        self.authenticate()?;
        self.token
            .lock()
            .as_ref()
            .map(|t| t.value.clone())
            .ok_or_else(|| SpotifyError::Unauthorized("no access token".into()))
    }

    /// Sends one API call; on 401 re-authenticates once and retries.
    fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<String>> {
        match self.send(method, path, body) {
            Err(SpotifyError::Unauthorized(message)) => {
                info!(path, message = %message, "Spotify token rejected, re-authenticating");
                *self.token.lock() = None;
                self.authenticate()?;
                self.send(method, path, body)
            }
            other => other,
        }
    }

    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<String>> {
        let url = format!("{}{}", self.api_base, path);
        let auth = format!("Bearer {}", self.access_token()?);

        let result = match method {
            Method::Get => self.agent.get(&url).header("Authorization", &auth).call(),
            Method::Put | Method::Post => {
                let request = if method == Method::Put {
                    self.agent.put(&url)
                } else {
                    self.agent.post(&url)
                };
                let request = request.header("Authorization", &auth);
                match body {
                    Some(json) => request
                        .header("Content-Type", "application/json")
                        .send(json.to_string()),
                    None => request.send_empty(),
                }
            }
        };

        let mut response = result?;
        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string()?;
        debug!(?method, path, status, "Spotify API call");

        match status {
            200..=299 if text.trim().is_empty() => Ok(None),
            200..=299 => Ok(Some(text)),
            code => Err(SpotifyError::from_status_code(code, error_message(&text))),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.request(Method::Get, path, None)? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn devices(&self) -> Result<Vec<Device>> {
        Ok(self
            .get_json::<DevicesResponse>("/me/player/devices")?
            .map(|r| r.devices)
            .unwrap_or_default())
    }

    /// Makes `device_id` the active device without starting playback
    /// unless `play` is set.
    pub fn transfer_playback(&self, device_id: &str, play: bool) -> Result<()> {
        let body = json!({ "device_ids": [device_id], "play": play });
        self.request(Method::Put, "/me/player", Some(&body))?;
        Ok(())
    }

    /// Starts a context (playlist, album) at an optional track offset.
    pub fn start_playback(&self, device_id: &str, context_uri: &str, offset: Option<u32>) -> Result<()> {
        let mut body = json!({ "context_uri": context_uri });
        if let Some(position) = offset {
            body["offset"] = json!({ "position": position });
        }
        let path = format!("/me/player/play?device_id={}", device_id);
        self.request(Method::Put, &path, Some(&body))?;
        Ok(())
    }

    /// Resumes whatever is loaded on the device.
    pub fn resume(&self, device_id: Option<&str>) -> Result<()> {
        self.request(Method::Put, &with_device("/me/player/play", device_id), None)?;
        Ok(())
    }

    pub fn pause(&self, device_id: Option<&str>) -> Result<()> {
        self.request(Method::Put, &with_device("/me/player/pause", device_id), None)?;
        Ok(())
    }

    pub fn next(&self, device_id: Option<&str>) -> Result<()> {
        self.request(Method::Post, &with_device("/me/player/next", device_id), None)?;
        Ok(())
    }

    pub fn previous(&self, device_id: Option<&str>) -> Result<()> {
        self.request(Method::Post, &with_device("/me/player/previous", device_id), None)?;
        Ok(())
    }

    pub fn set_shuffle(&self, state: bool, device_id: Option<&str>) -> Result<()> {
        let path = format!("/me/player/shuffle?state={}", state);
        let path = match device_id {
            Some(id) => format!("{}&device_id={}", path, id),
            None => path,
        };
        self.request(Method::Put, &path, None)?;
        Ok(())
    }

    /// `None` when nothing is loaded (204).
    pub fn current_playback(&self) -> Result<Option<CurrentPlayback>> {
        self.get_json("/me/player")
    }

    /// Number of tracks in a playlist or album URI, `None` for other kinds.
    pub fn context_track_count(&self, uri: &str) -> Result<Option<u32>> {
        match split_uri(uri) {
            Some(("playlist", id)) => Ok(self
                .get_json::<PlaylistTracks>(&format!("/playlists/{}?fields=tracks.total", id))?
                .map(|p| p.tracks.total)),
            Some(("album", id)) => Ok(self
                .get_json::<AlbumTracks>(&format!("/albums/{}", id))?
                .map(|a| a.total_tracks)),
            _ => Ok(None),
        }
    }
}

fn with_device(path: &str, device_id: Option<&str>) -> String {
    match device_id {
        Some(id) => format!("{}?device_id={}", path, id),
        None => path.to_string(),
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => parsed.error.message().to_string(),
        Err(_) if body.trim().is_empty() => "empty response".to_string(),
        Err(_) => body.trim().chars().take(200).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_device() {
        assert_eq!(with_device("/me/player/pause", None), "/me/player/pause");
        assert_eq!(
            with_device("/me/player/pause", Some("abc")),
            "/me/player/pause?device_id=abc"
        );
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(r#"{"error": {"status": 403, "message": "Player command failed: Premium required"}}"#),
            "Player command failed: Premium required"
        );
        assert_eq!(error_message(""), "empty response");
        assert_eq!(error_message("oops"), "oops");
    }

    #[test]
    fn test_token_freshness_margin() {
        let now = Instant::now();
        let token = AccessToken {
            value: "t".into(),
            expires_at: now + Duration::from_secs(3600),
        };
        assert!(token.is_fresh(now));

        let expiring = AccessToken {
            value: "t".into(),
            expires_at: now + Duration::from_secs(30),
        };
        assert!(!expiring.is_fresh(now));
    }

    #[test]
    fn test_missing_refresh_token() {
        let client = SpotifyClient::new(
            SpotifyCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
                refresh_token: String::new(),
            },
            Duration::from_secs(1),
        );
        assert!(matches!(
            client.authenticate(),
            Err(SpotifyError::MissingCredential("refresh_token"))
        ));
    }
}
