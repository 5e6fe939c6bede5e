//! Construction and caching of playback backends.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use rrsources::SourceType;
use rrspotify::{SpotifyClient, SpotifyCredentials};
use rryoutube::{ChannelFeedClient, YtDlpResolver};
use tracing::{debug, info};

use crate::{
    backend::{BackendKind, PlaybackBackend, PlaybackEndedSender},
    errors::{BackendError, BackendResult},
    spotify_backend::{SpotifyBackend, SpotifySettings},
    youtube_backend::{YoutubeBackend, YoutubeSettings},
};

/// Builds the backend serving a [`BackendKind`].
pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: BackendKind) -> BackendResult<Arc<dyn PlaybackBackend>>;
}

/// Production backends: feed client and `yt-dlp` for YouTube, the Web API
/// client for Spotify.
#[derive(Debug, Clone)]
pub struct DefaultBackendFactory {
    pub youtube: YoutubeSettings,
    pub resolver_program: String,
    pub resolver_timeout: Duration,
    pub http_timeout: Duration,
    pub spotify: SpotifySettings,
    pub spotify_credentials: Option<SpotifyCredentials>,
}

impl Default for DefaultBackendFactory {
    fn default() -> Self {
        Self {
            youtube: YoutubeSettings::default(),
            resolver_program: "yt-dlp".to_string(),
            resolver_timeout: Duration::from_secs(15),
            http_timeout: Duration::from_secs(10),
            spotify: SpotifySettings::default(),
            spotify_credentials: None,
        }
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create(&self, kind: BackendKind) -> BackendResult<Arc<dyn PlaybackBackend>> {
        match kind {
            BackendKind::Youtube => {
                let feed = Arc::new(ChannelFeedClient::new(self.http_timeout));
                let resolver = Arc::new(YtDlpResolver::new(
                    self.resolver_program.clone(),
                    self.resolver_timeout,
                ));
                Ok(Arc::new(YoutubeBackend::new(
                    feed,
                    resolver,
                    self.youtube.clone(),
                )))
            }
            BackendKind::Spotify => {
                let credentials = self.spotify_credentials.clone().ok_or_else(|| {
                    BackendError::Auth("Spotify credentials are not configured".to_string())
                })?;
                let client = SpotifyClient::new(credentials, self.http_timeout);
                Ok(Arc::new(SpotifyBackend::new(
                    Arc::new(client),
                    self.spotify.clone(),
                )))
            }
        }
    }
}

/// Lazily builds one backend per kind and reuses it for the process
/// lifetime.
pub struct BackendProvider {
    factory: Arc<dyn BackendFactory>,
    notifier: PlaybackEndedSender,
    backends: Mutex<HashMap<BackendKind, Arc<dyn PlaybackBackend>>>,
}

impl BackendProvider {
    pub fn new(factory: Arc<dyn BackendFactory>, notifier: PlaybackEndedSender) -> Self {
        Self {
            factory,
            notifier,
            backends: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, kind: BackendKind) -> BackendResult<Arc<dyn PlaybackBackend>> {
        let mut backends = self.backends.lock();
        if let Some(backend) = backends.get(&kind) {
            return Ok(Arc::clone(backend));
        }

        let backend = self.factory.create(kind)?;
        backend.set_playback_ended_notifier(Some(self.notifier.clone()));
        info!(kind = %kind, "Backend created");
        backends.insert(kind, Arc::clone(&backend));
        Ok(backend)
    }

    pub fn for_source_type(&self, source_type: SourceType) -> BackendResult<Arc<dyn PlaybackBackend>> {
        self.get(BackendKind::for_source_type(source_type))
    }

    pub fn is_created(&self, kind: BackendKind) -> bool {
        self.backends.lock().contains_key(&kind)
    }

    /// Detaches and closes every backend built so far.
    pub fn close_all(&self) {
        let backends: Vec<_> = self.backends.lock().drain().collect();
        for (kind, backend) in backends {
            debug!(kind = %kind, "Closing backend");
            backend.set_playback_ended_notifier(None);
            backend.close();
        }
    }
}
