//! Spotify playlists played on a Spotify Connect device.
//!
//! Playback runs on a remote-controlled receiver (raspotify/librespot on
//! the same host). Transport goes through the Web API, with MPRIS on the
//! session bus as a fallback when the API is unreachable.

pub mod mpris;
pub mod raspotify;

use std::{
    sync::{Arc, Weak},
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use rand::Rng;
use rrsources::{Source, SourceType};
use rrspotify::{
    CurrentPlayback, Device, SpotifyClient, SpotifyError, normalize_uri, select_device,
};
use tracing::{debug, info, warn};

use crate::{
    backend::{BackendKind, PlaybackBackend, PlaybackEnded, PlaybackEndedSender, PlaybackState},
    errors::{BackendError, BackendResult},
    monitor::{DEFAULT_END_THRESHOLD, Observation, PlaybackMonitor},
};

use self::mpris::{MprisClient, MprisCommand};

/// Web API calls used by the backend.
pub trait SpotifyApi: Send + Sync {
    fn devices(&self) -> rrspotify::Result<Vec<Device>>;
    fn transfer_playback(&self, device_id: &str, play: bool) -> rrspotify::Result<()>;
    fn start_playback(&self, device_id: &str, uri: &str, offset: Option<u32>) -> rrspotify::Result<()>;
    fn resume(&self, device_id: Option<&str>) -> rrspotify::Result<()>;
    fn pause(&self, device_id: Option<&str>) -> rrspotify::Result<()>;
    fn next(&self, device_id: Option<&str>) -> rrspotify::Result<()>;
    fn previous(&self, device_id: Option<&str>) -> rrspotify::Result<()>;
    fn set_shuffle(&self, state: bool, device_id: Option<&str>) -> rrspotify::Result<()>;
    fn current_playback(&self) -> rrspotify::Result<Option<CurrentPlayback>>;
    fn context_track_count(&self, uri: &str) -> rrspotify::Result<Option<u32>>;
}

impl SpotifyApi for SpotifyClient {
    fn devices(&self) -> rrspotify::Result<Vec<Device>> {
        SpotifyClient::devices(self)
    }

    fn transfer_playback(&self, device_id: &str, play: bool) -> rrspotify::Result<()> {
        SpotifyClient::transfer_playback(self, device_id, play)
    }

    fn start_playback(&self, device_id: &str, uri: &str, offset: Option<u32>) -> rrspotify::Result<()> {
        SpotifyClient::start_playback(self, device_id, uri, offset)
    }

    fn resume(&self, device_id: Option<&str>) -> rrspotify::Result<()> {
        SpotifyClient::resume(self, device_id)
    }

    fn pause(&self, device_id: Option<&str>) -> rrspotify::Result<()> {
        SpotifyClient::pause(self, device_id)
    }

    fn next(&self, device_id: Option<&str>) -> rrspotify::Result<()> {
        SpotifyClient::next(self, device_id)
    }

    fn previous(&self, device_id: Option<&str>) -> rrspotify::Result<()> {
        SpotifyClient::previous(self, device_id)
    }

    fn set_shuffle(&self, state: bool, device_id: Option<&str>) -> rrspotify::Result<()> {
        SpotifyClient::set_shuffle(self, state, device_id)
    }

    fn current_playback(&self) -> rrspotify::Result<Option<CurrentPlayback>> {
        SpotifyClient::current_playback(self)
    }

    fn context_track_count(&self, uri: &str) -> rrspotify::Result<Option<u32>> {
        SpotifyClient::context_track_count(self, uri)
    }
}

#[derive(Debug, Clone)]
pub struct SpotifySettings {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub manage_raspotify: bool,
    pub use_mpris: bool,
    pub discovery_attempts: u32,
    pub discovery_base_delay: Duration,
    pub monitor_interval: Duration,
    pub end_threshold: u32,
}

impl Default for SpotifySettings {
    fn default() -> Self {
        Self {
            device_id: None,
            device_name: Some("raspotify".to_string()),
            manage_raspotify: true,
            use_mpris: true,
            discovery_attempts: 5,
            discovery_base_delay: Duration::from_secs(2),
            monitor_interval: Duration::from_secs(2),
            end_threshold: DEFAULT_END_THRESHOLD,
        }
    }
}

#[derive(Default)]
struct Session {
    generation: u64,
    source: Option<Source>,
    device_id: Option<String>,
    state: PlaybackState,
}

impl Session {
    /// Unloads the source. Returns the device to pause when something was
    /// actually playing.
    fn clear(&mut self) -> Option<Option<String>> {
        self.generation += 1;
        let loaded = self.source.take().is_some();
        let was_active = self.state.is_active();
        self.state = PlaybackState::default();
        (loaded && was_active).then(|| self.device_id.clone())
    }
}

struct Inner {
    api: Arc<dyn SpotifyApi>,
    settings: SpotifySettings,
    session: Mutex<Session>,
    /// Serializes `play` and `stop_if_current`, so a late play cannot
    /// overwrite a newer session and a stale stop cannot pause it.
    play_lock: Mutex<()>,
    monitor: PlaybackMonitor,
    notifier: Mutex<Option<PlaybackEndedSender>>,
    mpris: Mutex<Option<MprisClient>>,
}

/// Backend for `spotify_playlist` sources.
#[derive(Clone)]
pub struct SpotifyBackend {
    inner: Arc<Inner>,
}

impl SpotifyBackend {
    pub fn new(api: Arc<dyn SpotifyApi>, settings: SpotifySettings) -> Self {
        let monitor = PlaybackMonitor::new(
            "spotify",
            settings.monitor_interval,
            settings.end_threshold,
        );
        Self {
            inner: Arc::new(Inner {
                api,
                settings,
                session: Mutex::new(Session::default()),
                play_lock: Mutex::new(()),
                monitor,
                notifier: Mutex::new(None),
                mpris: Mutex::new(None),
            }),
        }
    }

    /// Device used by the current session.
    pub fn device_id(&self) -> Option<String> {
        self.inner.session.lock().device_id.clone()
    }
}

impl Inner {
    /// Finds the playback device, retrying with exponential backoff while
    /// the receiver registers. Activates it if needed.
    fn find_device(&self) -> BackendResult<String> {
        let attempts = self.settings.discovery_attempts.max(1);
        let mut delay = self.settings.discovery_base_delay;

        for attempt in 1..=attempts {
            if let Some(id) = self.try_select_device()? {
                return Ok(id);
            }
            if attempt < attempts {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "No Spotify device yet");
                thread::sleep(delay);
                delay *= 2;
            }
        }

        if self.settings.manage_raspotify && raspotify::ensure_running() {
            if let Some(id) = self.try_select_device()? {
                return Ok(id);
            }
        }

        let wanted = self
            .settings
            .device_name
            .clone()
            .unwrap_or_else(|| "raspotify".to_string());
        Err(BackendError::from(SpotifyError::NoDevice(wanted)))
    }

    /// `Ok(None)` when no device matches or the listing failed transiently.
    fn try_select_device(&self) -> BackendResult<Option<String>> {
        let devices = match self.api.devices() {
            Ok(devices) => devices,
            Err(e) if e.is_network() => {
                warn!(error = %e, "Listing Spotify devices failed");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(device) = select_device(
            &devices,
            self.settings.device_id.as_deref(),
            self.settings.device_name.as_deref(),
        ) else {
            return Ok(None);
        };
        let Some(id) = device.id.clone() else {
            return Ok(None);
        };

        if !device.is_active {
            info!(device = %device.name, "Activating Spotify device");
            if let Err(e) = self.api.transfer_playback(&id, false) {
                warn!(device = %device.name, error = %e, "Transfer of playback failed");
            }
        }
        Ok(Some(id))
    }

    fn random_offset(&self, uri: &str) -> Option<u32> {
        match self.api.context_track_count(uri) {
            Ok(Some(total)) if total > 0 => Some(rand::rng().random_range(0..total)),
            Ok(_) => None,
            Err(e) => {
                debug!(uri, error = %e, "Track count unavailable");
                None
            }
        }
    }

    fn fetch_current_item(&self) -> Option<String> {
        match self.api.current_playback() {
            Ok(Some(playback)) => playback.item.map(|track| track.display_name()),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "Current playback unavailable");
                None
            }
        }
    }

    fn with_mpris<T>(&self, f: impl FnOnce(&MprisClient) -> T) -> Option<T> {
        if !self.settings.use_mpris {
            return None;
        }
        let mut mpris = self.mpris.lock();
        if mpris.is_none() {
            match MprisClient::connect() {
                Ok(client) => *mpris = Some(client),
                Err(e) => {
                    debug!(error = %e, "Session bus unavailable");
                    return None;
                }
            }
        }
        mpris.as_ref().map(f)
    }

    /// Runs a Web API transport call, falling back to MPRIS on network
    /// failures.
    fn transport(
        &self,
        name: &str,
        command: MprisCommand,
        call: impl FnOnce(&dyn SpotifyApi, Option<&str>) -> rrspotify::Result<()>,
    ) -> bool {
        let device_id = self.session.lock().device_id.clone();
        match call(self.api.as_ref(), device_id.as_deref()) {
            Ok(()) => true,
            Err(e) if e.is_network() => {
                warn!(command = name, error = %e, "Web API unreachable, trying MPRIS");
                self.with_mpris(|m| m.send(command)).unwrap_or(false)
            }
            Err(e) => {
                warn!(command = name, error = %e, "Spotify command failed");
                false
            }
        }
    }

    /// Pauses the receiver after the session was cleared.
    fn pause_device(&self, device_id: Option<&str>) -> bool {
        match self.api.pause(device_id) {
            Ok(()) => true,
            Err(e) if e.is_network() => self
                .with_mpris(|m| m.send(MprisCommand::Pause))
                .unwrap_or(false),
            // Already paused or no active device: nothing is playing
            Err(e) => {
                debug!(error = %e, "Pause on stop refused");
                true
            }
        }
    }

    fn start_monitor(self: &Arc<Self>, generation: u64) {
        let session = self.session.lock();
        if session.generation != generation {
            return;
        }
        let poll_inner = Arc::downgrade(self);
        let end_inner = Arc::downgrade(self);
        self.monitor.start(
            move || observe(&poll_inner, generation),
            move || {
                if let Some(inner) = end_inner.upgrade() {
                    inner.on_natural_end(generation);
                }
            },
        );
        drop(session);
    }

    fn on_natural_end(&self, generation: u64) {
        let source_id = {
            let mut session = self.session.lock();
            if session.generation != generation {
                return;
            }
            session.state = PlaybackState::default();
            session.source.as_ref().map(|s| s.id.clone())
        };

        if let (Some(source_id), Some(notifier)) = (source_id, self.notifier.lock().clone()) {
            notifier.notify(PlaybackEnded {
                kind: BackendKind::Spotify,
                source_id,
            });
        }
    }
}

fn observe(inner: &Weak<Inner>, generation: u64) -> Observation {
    let Some(inner) = inner.upgrade() else {
        return Observation::Stopped;
    };
    {
        let session = inner.session.lock();
        if session.generation != generation {
            return Observation::Stopped;
        }
        if session.state.is_paused {
            return Observation::Paused;
        }
    }

    match inner.api.current_playback() {
        Ok(Some(playback)) if playback.is_playing => {
            let item = playback.item.map(|track| track.display_name());
            let mut session = inner.session.lock();
            if session.generation == generation && item.is_some() {
                session.state.current_item = item;
            }
            Observation::Playing
        }
        Ok(_) => Observation::Stopped,
        Err(e) => {
            debug!(error = %e, "Playback status unavailable");
            match inner.with_mpris(|m| m.is_playing()).flatten() {
                Some(true) => Observation::Playing,
                Some(false) => Observation::Stopped,
                // Unknown status never counts towards the end
                None => Observation::Playing,
            }
        }
    }
}

impl PlaybackBackend for SpotifyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Spotify
    }

    fn play(&self, source: &Source) -> BackendResult<()> {
        if source.source_type != SourceType::SpotifyPlaylist {
            return Err(BackendError::UnknownSourceType(source.source_type.to_string()));
        }
        let inner = &self.inner;
        let _serial = inner.play_lock.lock();
        inner.monitor.cancel();

        let uri = normalize_uri(source.play_target());
        let device_id = inner.find_device()?;
        let offset = inner.random_offset(&uri);

        info!(uri = %uri, device = %device_id, offset = ?offset, "Starting Spotify playback");
        inner.api.start_playback(&device_id, &uri, offset)?;
        if let Err(e) = inner.api.set_shuffle(true, Some(&device_id)) {
            warn!(error = %e, "Enabling shuffle failed");
        }
        let item = inner.fetch_current_item();

        let generation = {
            let mut session = inner.session.lock();
            session.generation += 1;
            session.source = Some(source.clone());
            session.device_id = Some(device_id);
            session.state = PlaybackState::playing(item);
            session.generation
        };
        inner.start_monitor(generation);
        Ok(())
    }

    fn pause(&self) -> bool {
        if self.inner.session.lock().source.is_none() {
            return false;
        }
        let paused = self
            .inner
            .transport("pause", MprisCommand::Pause, |api, device| api.pause(device));
        if paused {
            self.inner.session.lock().state.is_paused = true;
        }
        paused
    }

    fn resume(&self) -> bool {
        if self.inner.session.lock().source.is_none() {
            return false;
        }
        let resumed = self
            .inner
            .transport("resume", MprisCommand::Play, |api, device| api.resume(device));
        if resumed {
            let mut session = self.inner.session.lock();
            session.state.is_playing = true;
            session.state.is_paused = false;
        }
        resumed
    }

    fn stop(&self) -> bool {
        let inner = &self.inner;
        let playing_on = {
            let mut session = inner.session.lock();
            inner.monitor.cancel();
            session.clear()
        };
        match playing_on {
            Some(device_id) => inner.pause_device(device_id.as_deref()),
            None => true,
        }
    }

    fn stop_if_current(&self, source_id: &str) -> bool {
        let inner = &self.inner;
        let _serial = inner.play_lock.lock();
        let playing_on = {
            let mut session = inner.session.lock();
            if session.source.as_ref().map(|s| s.id.as_str()) != Some(source_id) {
                return false;
            }
            inner.monitor.cancel();
            session.clear()
        };
        debug!(source = source_id, "Spotify playback stopped");
        match playing_on {
            Some(device_id) => inner.pause_device(device_id.as_deref()),
            None => true,
        }
    }

    fn next(&self) -> bool {
        if self.inner.session.lock().source.is_none() {
            return false;
        }
        let ok = self
            .inner
            .transport("next", MprisCommand::Next, |api, device| api.next(device));
        if ok {
            let item = self.inner.fetch_current_item();
            self.inner.session.lock().state.current_item = item;
        }
        ok
    }

    fn previous(&self) -> bool {
        if self.inner.session.lock().source.is_none() {
            return false;
        }
        let ok = self
            .inner
            .transport("previous", MprisCommand::Previous, |api, device| {
                api.previous(device)
            });
        if ok {
            let item = self.inner.fetch_current_item();
            self.inner.session.lock().state.current_item = item;
        }
        ok
    }

    fn is_playing(&self) -> bool {
        let inner = &self.inner;
        let known = inner.session.lock().state.clone();
        if known.is_stopped() {
            return false;
        }
        match inner.api.current_playback() {
            Ok(Some(playback)) => playback.is_playing && !known.is_paused,
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "Falling back to last known state");
                known.is_active()
            }
        }
    }

    fn state(&self) -> PlaybackState {
        self.inner.session.lock().state.clone()
    }

    fn loaded_source_id(&self) -> Option<String> {
        self.inner.session.lock().source.as_ref().map(|s| s.id.clone())
    }

    fn set_playback_ended_notifier(&self, notifier: Option<PlaybackEndedSender>) {
        *self.inner.notifier.lock() = notifier;
    }

    fn close(&self) {
        self.inner.monitor.stop();
        self.inner.mpris.lock().take();
    }
}
