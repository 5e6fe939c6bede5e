//! Player controller: source switching, retries and input dispatch.
//!
//! The controller owns the installed backend and the source it plays.
//! Switching to a source runs on a background `switch-retry` thread so the
//! input thread never blocks on a backend. Each switch request gets its own
//! [`CancellationToken`]; a request cancels the previous one, and an
//! attempt re-checks that it is still the target after every blocking call
//! before installing its backend.
//!
//! A source that fails every attempt is not replaced by another one: the
//! controller reports the failure and waits for the user.

use std::{
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, select};
use parking_lot::Mutex;
use rrsources::{ReloadOutcome, Source, SourceRegistry};
use rrvolume::VolumeLimiter;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::{
    backend::{PlaybackBackend, PlaybackEnded, playback_ended_channel},
    cancel::CancellationToken,
    errors::BackendError,
    factory::{BackendFactory, BackendProvider},
    feedback::{Announcer, Cue, SoundFeedback},
    history::{HistoryEvent, HistorySink},
    input::Control,
    network::{ReachabilityCheck, wait_for_network},
};

const CANCEL_CHECK_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Attempts per switch request.
    pub max_retries: u32,
    pub retry_sleep: Duration,
    pub network_timeout: Duration,
    pub network_interval: Duration,
    pub fetching_cue_delay: Duration,
    /// Volume percent per encoder detent.
    pub volume_step: i32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_sleep: Duration::from_secs(2),
            network_timeout: Duration::from_secs(30),
            network_interval: Duration::from_secs(1),
            fetching_cue_delay: Duration::from_millis(1000),
            volume_step: 5,
        }
    }
}

/// Snapshot returned by [`PlayerController::status`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub playing: bool,
    pub source: Option<Source>,
    pub current_item: Option<String>,
    pub target: Option<Source>,
    pub ceiling_db: Option<f64>,
}

/// Collaborators handed to the controller.
pub struct ControllerDeps {
    pub registry: SourceRegistry,
    pub factory: Arc<dyn BackendFactory>,
    pub limiter: Option<Arc<VolumeLimiter>>,
    pub history: Arc<dyn HistorySink>,
    pub feedback: Arc<dyn SoundFeedback>,
    pub announcer: Arc<dyn Announcer>,
    pub network: Arc<dyn ReachabilityCheck>,
}

#[derive(Default)]
struct ActiveState {
    current_backend: Option<Arc<dyn PlaybackBackend>>,
    current_source: Option<Source>,
    target_source: Option<Source>,
    cancel: CancellationToken,
}

struct Inner {
    registry: Mutex<SourceRegistry>,
    backends: BackendProvider,
    limiter: Option<Arc<VolumeLimiter>>,
    history: Arc<dyn HistorySink>,
    feedback: Arc<dyn SoundFeedback>,
    announcer: Arc<dyn Announcer>,
    network: Arc<dyn ReachabilityCheck>,
    settings: ControllerSettings,
    /// Held only to swap the fields, never across a backend call.
    state: Mutex<ActiveState>,
    retry_handle: Mutex<Option<JoinHandle<()>>>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
    listener_shutdown: Mutex<Option<Sender<()>>>,
}

pub struct PlayerController {
    inner: Arc<Inner>,
}

impl PlayerController {
    pub fn new(deps: ControllerDeps, settings: ControllerSettings) -> Self {
        let (ended_sender, ended_receiver) = playback_ended_channel();
        let (shutdown_sender, shutdown_receiver) = bounded::<()>(0);

        let inner = Arc::new(Inner {
            registry: Mutex::new(deps.registry),
            backends: BackendProvider::new(deps.factory, ended_sender),
            limiter: deps.limiter,
            history: deps.history,
            feedback: deps.feedback,
            announcer: deps.announcer,
            network: deps.network,
            settings,
            state: Mutex::new(ActiveState::default()),
            retry_handle: Mutex::new(None),
            listener_handle: Mutex::new(None),
            listener_shutdown: Mutex::new(Some(shutdown_sender)),
        });

        let weak = Arc::downgrade(&inner);
        match thread::Builder::new()
            .name("ended-listener".into())
            .spawn(move || ended_listener(weak, ended_receiver, shutdown_receiver))
        {
            Ok(handle) => *inner.listener_handle.lock() = Some(handle),
            Err(e) => error!(error = %e, "Failed to spawn ended-listener thread"),
        }

        Self { inner }
    }

    /// Requests playback of `source`. Returns immediately; the attempts run
    /// on a background thread.
    pub fn switch_source(&self, source: Source) {
        self.inner.switch_source(source);
    }

    /// Moves to the next configured source and switches to it, unless it
    /// is the one already playing.
    pub fn cycle_source(&self) -> Option<Source> {
        let next = {
            let mut registry = self.inner.registry.lock();
            registry.cycle()
        };
        let Some(next) = next else {
            warn!("Cycle requested with no configured source");
            self.inner.feedback.cue(Cue::NoSources);
            return None;
        };

        info!(source = %next.id, label = %next.label, "Cycling source");
        self.inner.announcer.announce(&next.label);
        self.inner.history.user_action("cycle_source", Some(&next));

        let current_source = self.inner.state.lock().current_source.clone();
        if current_source.as_ref().is_some_and(|c| c.same_as(&next)) {
            debug!(source = %next.id, "Already on this source");
            return Some(next);
        }

        self.inner.stop_current();
        self.inner.switch_source(next.clone());
        Some(next)
    }

    /// Pauses or resumes the installed backend, or starts the configured
    /// source when nothing is installed.
    pub fn play_pause(&self) -> bool {
        let inner = &self.inner;
        let (backend, source, switching) = {
            let state = inner.state.lock();
            (
                state.current_backend.clone(),
                state.current_source.clone(),
                state.target_source.is_some(),
            )
        };

        let Some(backend) = backend else {
            if switching {
                debug!("Play requested while a switch is in progress");
                return false;
            }
            let current = inner.registry.lock().current();
            return match current {
                Some(source) => {
                    inner.history.user_action("play", Some(&source));
                    inner.switch_source(source);
                    true
                }
                None => {
                    inner.feedback.cue(Cue::NoSources);
                    false
                }
            };
        };

        if backend.is_playing() {
            let ok = backend.pause();
            inner.history.user_action("pause", source.as_ref());
            info!(ok, "Playback paused");
            return ok;
        }

        inner.history.user_action("resume", source.as_ref());
        if backend.resume() {
            info!("Playback resumed");
            return true;
        }

        // Dead backend: restart the same source
        warn!("Resume failed, restarting source");
        match source {
            Some(source) => {
                inner.switch_source(source);
                true
            }
            None => false,
        }
    }

    /// Skips forward on a background thread. Returns `false` when no
    /// backend is installed.
    pub fn next(&self) -> bool {
        self.inner.skip("next", |backend| backend.next())
    }

    pub fn previous(&self) -> bool {
        self.inner.skip("previous", |backend| backend.previous())
    }

    /// Changes the volume by `steps` encoder detents. Returns the new
    /// percentage.
    pub fn volume_change(&self, steps: i32) -> Option<u8> {
        let limiter = self.inner.limiter.as_ref()?;
        match limiter.adjust_volume(steps * self.inner.settings.volume_step) {
            Ok(percent) => {
                self.inner
                    .history
                    .audio_event("volume_change", Some(f64::from(percent)));
                Some(percent)
            }
            Err(e) => {
                warn!(error = %e, "Volume change failed");
                self.inner.feedback.cue(Cue::DeviceError);
                None
            }
        }
    }

    /// Returns the new mute state.
    pub fn mute_toggle(&self) -> Option<bool> {
        let limiter = self.inner.limiter.as_ref()?;
        match limiter.toggle_mute() {
            Ok(muted) => {
                let action = if muted { "mute" } else { "unmute" };
                self.inner.history.audio_event(action, None);
                Some(muted)
            }
            Err(e) => {
                warn!(error = %e, "Mute toggle failed");
                self.inner.feedback.cue(Cue::DeviceError);
                None
            }
        }
    }

    pub fn status(&self) -> ControllerStatus {
        let (backend, source, target) = {
            let state = self.inner.state.lock();
            (
                state.current_backend.clone(),
                state.current_source.clone(),
                state.target_source.clone(),
            )
        };
        let (playing, current_item) = match backend {
            Some(backend) => (backend.is_playing(), backend.current_item()),
            None => (false, None),
        };
        ControllerStatus {
            playing,
            source,
            current_item,
            target,
            ceiling_db: self.inner.limiter.as_ref().map(|l| l.ceiling_db()),
        }
    }

    /// Re-reads the sources file. Never interrupts playback.
    pub fn reload_sources(&self) -> Option<ReloadOutcome> {
        let result = self.inner.registry.lock().reload();
        self.inner.after_reload(result.map(Some))
    }

    /// Reloads the sources file only if it was modified.
    pub fn reload_sources_if_changed(&self) -> Option<ReloadOutcome> {
        let result = self.inner.registry.lock().reload_if_changed();
        self.inner.after_reload(result)
    }

    pub fn sources(&self) -> Vec<Source> {
        self.inner.registry.lock().sources().to_vec()
    }

    /// Startup playback, gated on network reachability.
    pub fn auto_start(&self) -> bool {
        let inner = &self.inner;
        inner.feedback.cue(Cue::Startup);

        if !wait_for_network(
            inner.network.as_ref(),
            inner.settings.network_timeout,
            inner.settings.network_interval,
        ) {
            warn!("Network unreachable, skipping auto-start");
            inner.feedback.cue(Cue::NetworkError);
            inner.history.network_event("startup_connectivity", "failure");
            return false;
        }
        inner.history.network_event("startup_connectivity", "success");

        let current = inner.registry.lock().current();
        match current {
            Some(source) => {
                info!(source = %source.id, "Auto-starting");
                inner.switch_source(source);
                true
            }
            None => {
                warn!("No source to auto-start");
                inner.feedback.cue(Cue::NoSources);
                false
            }
        }
    }

    /// Dispatches one input event. Returns `false` on [`Control::Quit`].
    pub fn handle_control(&self, control: Control) -> bool {
        debug!(control = control.as_str(), "Control received");
        match control {
            Control::PlayPause => {
                self.play_pause();
            }
            Control::Next => {
                self.next();
            }
            Control::Previous => {
                self.previous();
            }
            Control::CycleSource => {
                self.cycle_source();
            }
            Control::VolumeChange(steps) => {
                self.volume_change(steps);
            }
            Control::MuteToggle => {
                self.mute_toggle();
            }
            Control::Status => {
                let status = self.status();
                info!(
                    playing = status.playing,
                    source = ?status.source.as_ref().map(|s| s.id.as_str()),
                    item = ?status.current_item,
                    target = ?status.target.as_ref().map(|s| s.id.as_str()),
                    ceiling_db = ?status.ceiling_db,
                    "Status"
                );
            }
            Control::ReloadSources => {
                self.reload_sources();
            }
            Control::Quit => return false,
        }
        true
    }

    /// Cancels pending switches, stops playback and releases the backends.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        info!("Controller shutting down");
        {
            let mut state = inner.state.lock();
            state.cancel.cancel();
            state.target_source = None;
        }
        inner.stop_current();

        inner.listener_shutdown.lock().take();
        if let Some(handle) = inner.listener_handle.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = inner.retry_handle.lock().take() {
            let _ = handle.join();
        }
        inner.backends.close_all();
    }
}

impl Drop for PlayerController {
    fn drop(&mut self) {
        self.inner.listener_shutdown.lock().take();
    }
}

impl Inner {
    fn switch_source(self: &Arc<Self>, source: Source) {
        let (token, previous) = {
            let mut state = self.state.lock();
            state.cancel.cancel();
            (CancellationToken::new(), state.current_backend.clone())
        };

        // Release the device or stream before the next attempt claims it
        if let Some(backend) = previous {
            if backend.stop() {
                let mut state = self.state.lock();
                if state
                    .current_backend
                    .as_ref()
                    .is_some_and(|b| b.kind() == backend.kind())
                {
                    state.current_backend = None;
                    state.current_source = None;
                }
            }
        }

        {
            let mut state = self.state.lock();
            state.target_source = Some(source.clone());
            state.cancel = token.clone();
        }
        info!(source = %source.id, label = %source.label, "Switch requested");

        let inner = Arc::clone(self);
        let attempt_source = source.clone();
        match thread::Builder::new()
            .name("switch-retry".into())
            .spawn(move || inner.run_attempts(attempt_source, token))
        {
            Ok(handle) => {
                // Older attempts are cancelled and exit on their own
                *self.retry_handle.lock() = Some(handle);
            }
            Err(e) => {
                error!(source = %source.id, error = %e, "Failed to spawn switch thread");
                self.feedback.cue(Cue::DeviceError);
            }
        }
    }

    fn is_stale(&self, source: &Source, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return true;
        }
        let state = self.state.lock();
        !state
            .target_source
            .as_ref()
            .is_some_and(|target| target.same_as(source))
    }

    fn run_attempts(&self, source: Source, token: CancellationToken) {
        let max_retries = self.settings.max_retries.max(1);
        let started = Instant::now();

        for attempt in 1..=max_retries {
            if self.is_stale(&source, &token) {
                debug!(source = %source.id, attempt, "Switch attempt superseded");
                return;
            }
            if attempt > 1 {
                self.feedback.cue(Cue::Retry);
            }

            let result = self
                .backends
                .for_source_type(source.source_type)
                .and_then(|backend| {
                    self.play_with_fetching_cue(backend.as_ref(), &source, &token)
                        .map(|()| backend)
                });

            let error = match result {
                Ok(backend) => {
                    self.install(backend, &source, &token, started);
                    return;
                }
                Err(e) => e,
            };

            if self.is_stale(&source, &token) {
                debug!(source = %source.id, error = %error, "Superseded attempt failed");
                return;
            }
            self.report_failure(&source, &error, attempt, max_retries);
            if !error.is_retriable() {
                break;
            }
            if attempt < max_retries && !sleep_unless_cancelled(&token, self.settings.retry_sleep) {
                return;
            }
        }

        error!(source = %source.id, attempts = max_retries, "Giving up on source");
        self.history.record({
            let mut event = HistoryEvent::new("system", "source_failed").with_source(&source);
            event.level = "ERROR";
            event.status = "failure".to_string();
            event
        });
        let mut state = self.state.lock();
        if !token.is_cancelled()
            && state
                .target_source
                .as_ref()
                .is_some_and(|t| t.same_as(&source))
        {
            state.target_source = None;
        }
    }

    fn play_with_fetching_cue(
        &self,
        backend: &dyn PlaybackBackend,
        source: &Source,
        token: &CancellationToken,
    ) -> Result<(), BackendError> {
        let (done, waiting) = bounded::<()>(0);
        let feedback = Arc::clone(&self.feedback);
        let delay = self.settings.fetching_cue_delay;
        let cue_token = token.clone();
        let timer = thread::Builder::new()
            .name("fetching-cue".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = waiting.recv_timeout(delay) {
                    if !cue_token.is_cancelled() {
                        feedback.cue(Cue::Fetching);
                    }
                }
            });
        if let Err(e) = &timer {
            debug!(error = %e, "Fetching cue timer not started");
        }

        info!(source = %source.id, kind = %backend.kind(), "Starting playback");
        let result = backend.play(source);
        drop(done);
        if let Ok(handle) = timer {
            let _ = handle.join();
        }
        result
    }

    fn install(
        &self,
        backend: Arc<dyn PlaybackBackend>,
        source: &Source,
        token: &CancellationToken,
        started: Instant,
    ) {
        let (previous, reclaimed) = {
            let mut state = self.state.lock();
            let current_target = state
                .target_source
                .as_ref()
                .is_some_and(|t| t.same_as(source));
            if token.is_cancelled() || !current_target {
                // A newer request for the same source owns the backend session
                let reclaimed = !state.cancel.is_cancelled()
                    && (current_target
                        || state
                            .current_source
                            .as_ref()
                            .is_some_and(|c| c.same_as(source)));
                (None, reclaimed)
            } else {
                let previous = state.current_backend.replace(Arc::clone(&backend));
                state.current_source = Some(source.clone());
                state.target_source = None;
                (Some(previous), false)
            }
        };

        let Some(previous) = previous else {
            // A newer request arrived while play() was running
            info!(source = %source.id, reclaimed, "Discarding superseded playback");
            if !reclaimed {
                backend.stop_if_current(&source.id);
            }
            return;
        };

        if let Some(previous) = previous {
            if previous.kind() != backend.kind() {
                debug!(kind = %previous.kind(), "Stopping previous backend");
                previous.stop();
            }
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let item = backend.current_item();
        info!(
            source = %source.id,
            item = ?item,
            elapsed_ms = elapsed_ms as u64,
            "Source installed"
        );
        self.history.source_change(source);
        self.history.playback_start(source, item.as_deref());
        self.history.performance("source_load_time", elapsed_ms);
    }

    fn report_failure(&self, source: &Source, error: &BackendError, attempt: u32, max: u32) {
        warn!(
            source = %source.id,
            attempt,
            max,
            category = error.category(),
            error = %error,
            "Switch attempt failed"
        );
        self.feedback.cue(error.cue());
        if matches!(error, BackendError::Network(_)) {
            let status = if attempt < max { "retry" } else { "failure" };
            self.history.network_event("connection_failure", status);
        }
    }

    /// Stops and uninstalls the current backend right away.
    fn stop_current(&self) {
        let backend = {
            let mut state = self.state.lock();
            state.current_source = None;
            state.current_backend.take()
        };
        if let Some(backend) = backend {
            debug!(kind = %backend.kind(), "Stopping current backend");
            backend.stop();
        }
    }

    fn skip(
        self: &Arc<Self>,
        action: &'static str,
        call: fn(&dyn PlaybackBackend) -> bool,
    ) -> bool {
        let (backend, source) = {
            let state = self.state.lock();
            (state.current_backend.clone(), state.current_source.clone())
        };
        let Some(backend) = backend else {
            debug!(action, "No backend installed");
            return false;
        };

        self.history.user_action(action, source.as_ref());
        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("skip-{}", action))
            .spawn(move || inner.run_skip(action, backend, source, call));
        if let Err(e) = spawned {
            warn!(action, error = %e, "Failed to spawn skip thread");
            return false;
        }
        true
    }

    fn run_skip(
        &self,
        action: &str,
        backend: Arc<dyn PlaybackBackend>,
        source: Option<Source>,
        call: fn(&dyn PlaybackBackend) -> bool,
    ) {
        if !call(backend.as_ref()) {
            debug!(action, kind = %backend.kind(), "Not supported or failed");
            return;
        }

        let still_installed = self
            .state
            .lock()
            .current_backend
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &backend));
        if !still_installed {
            debug!(action, "Backend replaced during skip");
            return;
        }

        let item = backend.current_item();
        info!(action, item = ?item, "Skipped");
        if let Some(source) = &source {
            self.history.playback_start(source, item.as_deref());
        }
        if !backend.is_playing() {
            backend.resume();
        }
    }

    fn after_reload(
        &self,
        result: rrsources::Result<Option<ReloadOutcome>>,
    ) -> Option<ReloadOutcome> {
        match result {
            Ok(Some(outcome)) => {
                let count = self.registry.lock().len();
                info!(sources = count, outcome = ?outcome, "Sources reloaded");
                self.history.config_event(
                    "sources_reloaded",
                    Some(json!({ "count": count, "outcome": format!("{:?}", outcome) })),
                );
                Some(outcome)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Sources reload failed, keeping previous list");
                None
            }
        }
    }

    fn on_playback_ended(&self, event: PlaybackEnded) {
        let source = {
            let state = self.state.lock();
            match (&state.current_backend, &state.current_source) {
                (Some(backend), Some(source))
                    if backend.kind() == event.kind && source.id == event.source_id =>
                {
                    Some(source.clone())
                }
                _ => None,
            }
        };

        match source {
            Some(source) => {
                info!(source = %source.id, kind = %event.kind, "Content ended, waiting for input");
                self.history
                    .record(HistoryEvent::new("system", "playback_ended").with_source(&source));
            }
            None => debug!(
                source = %event.source_id,
                kind = %event.kind,
                "Ignoring end of a source that is no longer current"
            ),
        }
    }
}

fn ended_listener(inner: Weak<Inner>, ended: Receiver<PlaybackEnded>, shutdown: Receiver<()>) {
    debug!("Ended listener started");
    loop {
        select! {
            recv(ended) -> event => {
                let Ok(event) = event else { break };
                match inner.upgrade() {
                    Some(inner) => inner.on_playback_ended(event),
                    None => break,
                }
            }
            recv(shutdown) -> _ => break,
        }
    }
    debug!("Ended listener stopped");
}

/// Returns `false` if the token was cancelled during the sleep.
fn sleep_unless_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(CANCEL_CHECK_TICK.min(deadline - now));
    }
}
