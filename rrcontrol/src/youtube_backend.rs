//! YouTube channels and playlists played through an external player.
//!
//! A channel is played as a queue of its latest uploads, newest first,
//! auto-advancing on natural end. A playlist is handed to the player as a
//! single stream and signals the controller when it ends.

use std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rrsources::{Source, SourceType};
use rryoutube::{FeedSource, StreamResolver, VideoEntry};
use tracing::{debug, info, warn};

use crate::{
    backend::{BackendKind, PlaybackBackend, PlaybackEnded, PlaybackEndedSender, PlaybackState},
    errors::{BackendError, BackendResult},
    monitor::{DEFAULT_END_THRESHOLD, Observation, PlaybackMonitor},
    player::{PlayerCommand, PlayerProcess},
};

#[derive(Debug, Clone)]
pub struct YoutubeSettings {
    pub feed_limit: usize,
    pub refresh_interval: Duration,
    pub monitor_interval: Duration,
    pub end_threshold: u32,
    pub stop_grace: Duration,
    pub player: PlayerCommand,
}

impl Default for YoutubeSettings {
    fn default() -> Self {
        Self {
            feed_limit: 20,
            refresh_interval: Duration::from_secs(300),
            monitor_interval: Duration::from_millis(1500),
            end_threshold: DEFAULT_END_THRESHOLD,
            stop_grace: Duration::from_secs(5),
            player: PlayerCommand::default(),
        }
    }
}

/// Upcoming videos of a channel with a play cursor.
#[derive(Debug, Default, Clone)]
pub struct VideoQueue {
    items: Vec<VideoEntry>,
    cursor: Option<usize>,
    fetched_at: Option<Instant>,
}

impl VideoQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&VideoEntry> {
        self.cursor.and_then(|i| self.items.get(i))
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.fetched_at {
            Some(at) => self.items.is_empty() || at.elapsed() >= max_age,
            None => true,
        }
    }

    /// Replaces the items, keeping the cursor on the current video when it
    /// is still listed. Otherwise the cursor moves to the first item.
    pub fn sync(&mut self, items: Vec<VideoEntry>) {
        let current_id = self.current().map(|v| v.video_id.clone());
        self.cursor = match current_id {
            Some(id) => items
                .iter()
                .position(|v| v.video_id == id)
                .or(if items.is_empty() { None } else { Some(0) }),
            None if items.is_empty() => None,
            None => Some(0),
        };
        debug!(
            items = items.len(),
            cursor = ?self.cursor,
            "Video queue synchronized"
        );
        self.items = items;
        self.fetched_at = Some(Instant::now());
    }

    /// Moves to the next video, if any.
    pub fn advance(&mut self) -> Option<&VideoEntry> {
        let next = match self.cursor {
            Some(i) if i + 1 < self.items.len() => i + 1,
            Some(_) => return None,
            None if self.items.is_empty() => return None,
            None => 0,
        };
        self.cursor = Some(next);
        self.items.get(next)
    }

    /// Moves to the previous video, if any.
    pub fn step_back(&mut self) -> Option<&VideoEntry> {
        match self.cursor {
            Some(i) if i > 0 => {
                self.cursor = Some(i - 1);
                self.items.get(i - 1)
            }
            _ => None,
        }
    }

    /// Moves back to the first (newest) video.
    pub fn wrap(&mut self) -> Option<&VideoEntry> {
        if self.items.is_empty() {
            self.cursor = None;
            return None;
        }
        self.cursor = Some(0);
        self.items.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Channel(String),
    Playlist(String),
}

#[derive(Default)]
struct Session {
    /// Bumped by every play, skip and stop. Work started under an older
    /// generation is discarded when it comes back.
    generation: u64,
    source: Option<Source>,
    target: Option<Target>,
    queue: VideoQueue,
    player: Option<PlayerProcess>,
    state: PlaybackState,
}

impl Session {
    /// Invalidates in-flight work and unloads the source. The returned
    /// player must be terminated once the lock is released.
    fn clear(&mut self) -> Option<PlayerProcess> {
        self.generation += 1;
        self.state = PlaybackState::default();
        self.source = None;
        self.player.take()
    }
}

/// Outcome of moving to another video of a channel.
enum Advance {
    Started,
    Exhausted,
    Superseded,
}

struct Inner {
    feed: Arc<dyn FeedSource>,
    resolver: Arc<dyn StreamResolver>,
    settings: YoutubeSettings,
    /// Held only for bookkeeping, never across feed requests, stream
    /// resolution or player startup.
    session: Mutex<Session>,
    play_lock: Mutex<()>,
    monitor: PlaybackMonitor,
    notifier: Mutex<Option<PlaybackEndedSender>>,
}

/// Backend for `youtube_channel` and `youtube_playlist` sources.
#[derive(Clone)]
pub struct YoutubeBackend {
    inner: Arc<Inner>,
}

impl YoutubeBackend {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        resolver: Arc<dyn StreamResolver>,
        settings: YoutubeSettings,
    ) -> Self {
        let monitor = PlaybackMonitor::new(
            "youtube",
            settings.monitor_interval,
            settings.end_threshold,
        );
        Self {
            inner: Arc::new(Inner {
                feed,
                resolver,
                settings,
                session: Mutex::new(Session::default()),
                play_lock: Mutex::new(()),
                monitor,
                notifier: Mutex::new(None),
            }),
        }
    }

    /// Videos currently queued for the loaded channel.
    pub fn queued_videos(&self) -> Vec<VideoEntry> {
        self.inner.session.lock().queue.items.clone()
    }
}

impl Inner {
    fn fetch_videos(&self, channel_id: &str) -> BackendResult<Vec<VideoEntry>> {
        let started = Instant::now();
        let videos = self
            .feed
            .fetch_channel(channel_id, self.settings.feed_limit)?;
        info!(
            channel = channel_id,
            videos = videos.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Channel feed refreshed"
        );
        Ok(videos)
    }

    fn terminate(&self, player: Option<PlayerProcess>) {
        if let Some(mut player) = player {
            player.terminate(self.settings.stop_grace);
        }
    }

    /// Replaces the running player with one playing `url`. Returns
    /// `Ok(false)` when `generation` went stale before the new player could
    /// be installed.
    fn start_player(
        &self,
        generation: u64,
        url: &str,
        item: Option<String>,
    ) -> BackendResult<bool> {
        let previous = {
            let mut session = self.session.lock();
            if session.generation != generation {
                return Ok(false);
            }
            session.state = PlaybackState::default();
            session.player.take()
        };
        self.terminate(previous);

        let player = PlayerProcess::spawn(&self.settings.player, url)?;
        let mut session = self.session.lock();
        if session.generation != generation {
            drop(session);
            debug!("Session changed while the player was starting");
            self.terminate(Some(player));
            return Ok(false);
        }
        session.player = Some(player);
        session.state = PlaybackState::playing(item);
        Ok(true)
    }

    fn start_video(&self, generation: u64, video: &VideoEntry) -> BackendResult<bool> {
        let url = self.resolver.resolve_video(&video.video_id)?;
        info!(video = %video.video_id, title = %video.title, "Playing video");
        self.start_player(generation, &url, Some(video.title.clone()))
    }

    fn start_channel(
        &self,
        generation: u64,
        channel_id: &str,
        refresh: bool,
    ) -> BackendResult<bool> {
        let fetched = if refresh {
            Some(self.fetch_videos(channel_id)?)
        } else {
            None
        };
        let video = {
            let mut session = self.session.lock();
            if session.generation != generation {
                return Ok(false);
            }
            if let Some(videos) = fetched {
                session.queue.sync(videos);
            }
            session.queue.wrap().cloned()
        };
        let video = video
            .ok_or_else(|| BackendError::NotFound(format!("no videos in channel {}", channel_id)))?;
        self.start_video(generation, &video)
    }

    /// Plays the queued video after the current one, refreshing the queue
    /// when it is exhausted and wrapping to the newest video when the
    /// refresh brings nothing new. Unplayable videos are skipped.
    fn play_following(&self, generation: u64, channel_id: &str) -> Advance {
        let mut failures = 0;
        loop {
            let (next, mut queued) = {
                let mut session = self.session.lock();
                if session.generation != generation {
                    return Advance::Superseded;
                }
                let next = session.queue.advance().cloned();
                (next, session.queue.len())
            };

            let video = match next {
                Some(video) => video,
                None => {
                    let fetched = self.fetch_videos(channel_id);
                    let mut session = self.session.lock();
                    if session.generation != generation {
                        return Advance::Superseded;
                    }
                    match fetched {
                        Ok(videos) => session.queue.sync(videos),
                        Err(e) => {
                            warn!(channel = channel_id, error = %e, "Feed refresh failed, wrapping")
                        }
                    }
                    queued = session.queue.len();
                    let next = match session.queue.advance() {
                        Some(video) => Some(video.clone()),
                        None => session.queue.wrap().cloned(),
                    };
                    match next {
                        Some(video) => video,
                        None => return Advance::Exhausted,
                    }
                }
            };

            match self.start_video(generation, &video) {
                Ok(true) => return Advance::Started,
                Ok(false) => return Advance::Superseded,
                Err(e) => {
                    warn!(video = %video.video_id, error = %e, "Skipping unplayable video");
                    failures += 1;
                    if failures >= queued.max(1) {
                        return Advance::Exhausted;
                    }
                }
            }
        }
    }

    /// Starts watching `generation`, unless it is already stale.
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

    fn on_natural_end(self: &Arc<Self>, generation: u64) {
        let (generation, finished, target) = {
            let mut session = self.session.lock();
            if session.generation != generation {
                return;
            }
            session.generation += 1;
            session.state = PlaybackState::default();
            (session.generation, session.player.take(), session.target.clone())
        };
        self.terminate(finished);

        if let Some(Target::Channel(channel_id)) = target {
            match self.play_following(generation, &channel_id) {
                Advance::Started => {
                    self.start_monitor(generation);
                    return;
                }
                Advance::Superseded => return,
                Advance::Exhausted => warn!(channel = %channel_id, "No playable video left in channel"),
            }
        }

        let source_id = {
            let session = self.session.lock();
            if session.generation != generation {
                return;
            }
            session.source.as_ref().map(|s| s.id.clone())
        };
        if let (Some(source_id), Some(notifier)) = (source_id, self.notifier.lock().clone()) {
            notifier.notify(PlaybackEnded {
                kind: BackendKind::Youtube,
                source_id,
            });
        }
    }
}

fn observe(inner: &Weak<Inner>, generation: u64) -> Observation {
    let Some(inner) = inner.upgrade() else {
        return Observation::Stopped;
    };
    let mut session = inner.session.lock();
    if session.generation != generation {
        return Observation::Stopped;
    }
    if session.state.is_paused {
        return Observation::Paused;
    }
    match session.player.as_mut().map(|player| player.is_running()) {
        Some(true) => Observation::Playing,
        _ => Observation::Stopped,
    }
}

fn target_for(source: &Source) -> BackendResult<Target> {
    match source.source_type {
        SourceType::YoutubeChannel => Ok(Target::Channel(source.play_target().to_string())),
        SourceType::YoutubePlaylist => Ok(Target::Playlist(source.play_target().to_string())),
        other => Err(BackendError::UnknownSourceType(other.to_string())),
    }
}

impl PlaybackBackend for YoutubeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Youtube
    }

    fn play(&self, source: &Source) -> BackendResult<()> {
        let target = target_for(source)?;
        let inner = &self.inner;
        let _serial = inner.play_lock.lock();
        inner.monitor.cancel();

        let (generation, previous, refresh) = {
            let mut session = inner.session.lock();
            let previous = session.clear();
            if session.target.as_ref() != Some(&target) {
                session.queue = VideoQueue::new();
            }
            session.source = Some(source.clone());
            session.target = Some(target.clone());
            let refresh = session.queue.is_stale(inner.settings.refresh_interval);
            (session.generation, previous, refresh)
        };
        inner.terminate(previous);

        let started = match &target {
            Target::Channel(channel_id) => inner.start_channel(generation, channel_id, refresh),
            Target::Playlist(playlist_id) => inner
                .resolver
                .resolve_playlist(playlist_id)
                .map_err(BackendError::from)
                .and_then(|url| {
                    info!(playlist = %playlist_id, "Playing playlist");
                    inner.start_player(generation, &url, Some(source.label.clone()))
                }),
        };

        match started {
            Ok(true) => {
                inner.start_monitor(generation);
                Ok(())
            }
            Ok(false) => Err(BackendError::Other(format!(
                "playback of {} was stopped while starting",
                source.id
            ))),
            Err(e) => {
                let mut session = inner.session.lock();
                if session.generation == generation {
                    session.source = None;
                }
                Err(e)
            }
        }
    }

    fn pause(&self) -> bool {
        let mut session = self.inner.session.lock();
        let paused = session.player.as_mut().is_some_and(|p| p.pause());
        if paused {
            session.state.is_paused = true;
        }
        paused
    }

    fn resume(&self) -> bool {
        let mut session = self.inner.session.lock();
        let resumed = session.player.as_mut().is_some_and(|p| p.resume());
        if resumed {
            session.state.is_playing = true;
            session.state.is_paused = false;
        }
        resumed
    }

    fn stop(&self) -> bool {
        let inner = &self.inner;
        let player = {
            let mut session = inner.session.lock();
            inner.monitor.cancel();
            session.clear()
        };
        inner.terminate(player);
        debug!("YouTube playback stopped");
        true
    }

    fn stop_if_current(&self, source_id: &str) -> bool {
        let inner = &self.inner;
        let player = {
            let mut session = inner.session.lock();
            if session.source.as_ref().map(|s| s.id.as_str()) != Some(source_id) {
                return false;
            }
            inner.monitor.cancel();
            session.clear()
        };
        inner.terminate(player);
        debug!(source = source_id, "YouTube playback stopped");
        true
    }

    fn next(&self) -> bool {
        let inner = &self.inner;
        let (generation, channel_id) = {
            let mut session = inner.session.lock();
            let channel_id = match (&session.target, &session.source) {
                (Some(Target::Channel(channel_id)), Some(_)) => channel_id.clone(),
                _ => return false,
            };
            session.generation += 1;
            (session.generation, channel_id)
        };
        inner.monitor.cancel();

        let ok = matches!(inner.play_following(generation, &channel_id), Advance::Started);
        inner.start_monitor(generation);
        ok
    }

    fn previous(&self) -> bool {
        let inner = &self.inner;
        let (generation, video) = {
            let mut session = inner.session.lock();
            if !matches!(session.target, Some(Target::Channel(_))) || session.source.is_none() {
                return false;
            }
            let video = match session.queue.step_back() {
                Some(video) => video.clone(),
                None => return false,
            };
            session.generation += 1;
            (session.generation, video)
        };
        inner.monitor.cancel();

        let ok = match inner.start_video(generation, &video) {
            Ok(started) => started,
            Err(e) => {
                warn!(video = %video.video_id, error = %e, "Previous video failed");
                false
            }
        };
        inner.start_monitor(generation);
        ok
    }

    fn is_playing(&self) -> bool {
        let mut session = self.inner.session.lock();
        let paused = session.state.is_paused;
        match session.player.as_mut() {
            Some(player) => player.is_running() && !paused,
            None => false,
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
        self.stop();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backend::playback_ended_channel;
    use rryoutube::YoutubeError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn video(id: &str) -> VideoEntry {
        VideoEntry {
            video_id: id.to_string(),
            title: format!("Title {}", id),
            published: None,
            url: rryoutube::video_url(id),
        }
    }

    struct StaticFeed {
        videos: Vec<VideoEntry>,
        calls: AtomicU32,
    }

    impl FeedSource for StaticFeed {
        fn fetch_channel(&self, _channel_id: &str, limit: usize) -> rryoutube::Result<Vec<VideoEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.videos.iter().take(limit).cloned().collect())
        }
    }

    struct EchoResolver;

    impl StreamResolver for EchoResolver {
        fn resolve_video(&self, video_id: &str) -> rryoutube::Result<String> {
            match video_id {
                "broken" => return Err(YoutubeError::Unavailable(video_id.to_string())),
                "slow" => std::thread::sleep(Duration::from_secs(2)),
                _ => {}
            }
            Ok(format!("http://stream/{}", video_id))
        }

        fn resolve_playlist(&self, playlist_id: &str) -> rryoutube::Result<String> {
            Ok(format!("http://stream/list/{}", playlist_id))
        }
    }

    fn settings(script: &str) -> YoutubeSettings {
        YoutubeSettings {
            feed_limit: 20,
            refresh_interval: Duration::from_secs(300),
            monitor_interval: Duration::from_millis(50),
            end_threshold: 2,
            stop_grace: Duration::from_secs(1),
            player: PlayerCommand::new("sh", ["-c", script]),
        }
    }

    fn backend(videos: &[&str], script: &str) -> (YoutubeBackend, Arc<StaticFeed>) {
        let feed = Arc::new(StaticFeed {
            videos: videos.iter().map(|id| video(id)).collect(),
            calls: AtomicU32::new(0),
        });
        let backend = YoutubeBackend::new(feed.clone(), Arc::new(EchoResolver), settings(script));
        (backend, feed)
    }

    fn channel(id: &str) -> Source {
        Source::new(id, "Channel", SourceType::YoutubeChannel).with_channel_id("UC123")
    }

    #[test]
    fn test_queue_sync_keeps_current_video() {
        let mut queue = VideoQueue::new();
        queue.sync(vec![video("a"), video("b"), video("c")]);
        queue.advance();
        assert_eq!(queue.current().unwrap().video_id, "b");

        queue.sync(vec![video("new"), video("a"), video("b"), video("c")]);
        assert_eq!(queue.cursor(), Some(2));
        assert_eq!(queue.current().unwrap().video_id, "b");

        queue.sync(vec![video("x"), video("y")]);
        assert_eq!(queue.cursor(), Some(0));
    }

    #[test]
    fn test_queue_cursor_moves() {
        let mut queue = VideoQueue::new();
        assert!(queue.advance().is_none());
        assert!(queue.is_stale(Duration::from_secs(300)));

        queue.sync(vec![video("a"), video("b")]);
        assert!(!queue.is_stale(Duration::from_secs(300)));
        assert_eq!(queue.advance().unwrap().video_id, "b");
        assert!(queue.advance().is_none());
        assert_eq!(queue.step_back().unwrap().video_id, "a");
        assert!(queue.step_back().is_none());
        queue.advance();
        assert_eq!(queue.wrap().unwrap().video_id, "a");
    }

    #[test]
    fn test_rejects_spotify_source() {
        let (backend, _) = backend(&["a"], "sleep 30");
        let source = Source::new("sp", "Spotify", SourceType::SpotifyPlaylist);
        assert!(matches!(
            backend.play(&source),
            Err(BackendError::UnknownSourceType(_))
        ));
    }

    #[test]
    fn test_empty_channel_is_not_found() {
        let (backend, _) = backend(&[], "sleep 30");
        assert!(matches!(
            backend.play(&channel("yt")),
            Err(BackendError::NotFound(_))
        ));
        assert!(!backend.is_playing());
    }

    #[test]
    fn test_channel_lifecycle() {
        let (backend, feed) = backend(&["a", "b", "c"], "sleep 30");
        backend.play(&channel("yt")).unwrap();

        assert!(backend.is_playing());
        assert_eq!(backend.current_item().as_deref(), Some("Title a"));
        assert_eq!(backend.loaded_source_id().as_deref(), Some("yt"));

        assert!(backend.pause());
        let state = backend.state();
        assert!(state.is_playing && state.is_paused);
        assert!(!backend.is_playing());

        assert!(backend.resume());
        assert!(backend.is_playing());

        assert!(backend.next());
        assert_eq!(backend.current_item().as_deref(), Some("Title b"));
        assert!(backend.previous());
        assert_eq!(backend.current_item().as_deref(), Some("Title a"));
        assert!(!backend.previous());

        assert!(backend.stop());
        assert!(backend.state().is_stopped());
        assert!(backend.current_item().is_none());
        assert!(backend.loaded_source_id().is_none());
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_if_current_ignores_other_source() {
        let (backend, _) = backend(&["a"], "sleep 30");
        backend.play(&channel("yt")).unwrap();
        assert!(!backend.stop_if_current("other"));
        assert!(backend.is_playing());
        assert!(backend.stop_if_current("yt"));
        assert!(!backend.is_playing());
    }

    #[test]
    fn test_playlist_has_no_next() {
        let (backend, _) = backend(&[], "sleep 30");
        let source = Source::new("pl", "Mix", SourceType::YoutubePlaylist).with_playlist_id("PL1");
        backend.play(&source).unwrap();
        assert_eq!(backend.current_item().as_deref(), Some("Mix"));
        assert!(!backend.next());
        assert!(!backend.previous());
        backend.stop();
    }

    #[test]
    fn test_channel_auto_advances_on_natural_end() {
        // Only the last video keeps playing
        let script = r#"case "$0" in *c) sleep 30 ;; *) sleep 1 ;; esac"#;
        let (backend, _) = backend(&["a", "broken", "c"], script);
        let (sender, receiver) = playback_ended_channel();
        backend.set_playback_ended_notifier(Some(sender));

        backend.play(&channel("yt")).unwrap();
        assert_eq!(backend.current_item().as_deref(), Some("Title a"));

        // "a" ends, "broken" is skipped, "c" starts
        std::thread::sleep(Duration::from_millis(2200));
        assert_eq!(backend.current_item().as_deref(), Some("Title c"));
        assert!(receiver.try_recv().is_err());
        backend.stop();
    }

    #[test]
    fn test_queries_answer_while_next_video_resolves() {
        let script = r#"case "$0" in *slow) sleep 30 ;; *) sleep 1 ;; esac"#;
        let (backend, _) = backend(&["a", "slow"], script);
        backend.play(&channel("yt")).unwrap();

        // "a" ends after about a second, then "slow" takes two seconds to resolve
        std::thread::sleep(Duration::from_millis(1500));
        let started = Instant::now();
        assert!(!backend.is_playing());
        let _ = backend.state();
        assert!(started.elapsed() < Duration::from_millis(200));

        let started = Instant::now();
        assert!(backend.stop());
        assert!(started.elapsed() < Duration::from_millis(200));

        // The resolved video is dropped instead of starting after the stop
        std::thread::sleep(Duration::from_millis(2500));
        assert!(!backend.is_playing());
        assert!(backend.current_item().is_none());
    }

    #[test]
    fn test_stop_during_play_discards_the_new_player() {
        let (backend, _) = backend(&["slow"], "sleep 30");
        let worker = {
            let backend = backend.clone();
            std::thread::spawn(move || backend.play(&channel("yt")))
        };

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(backend.loaded_source_id().as_deref(), Some("yt"));
        assert!(backend.stop());

        assert!(worker.join().unwrap().is_err());
        assert!(!backend.is_playing());
        assert!(backend.loaded_source_id().is_none());
    }

    #[test]
    fn test_playlist_end_notifies_controller() {
        let (backend, _) = backend(&[], "sleep 1");
        let (sender, receiver) = playback_ended_channel();
        backend.set_playback_ended_notifier(Some(sender));

        let source = Source::new("pl", "Mix", SourceType::YoutubePlaylist).with_playlist_id("PL1");
        backend.play(&source).unwrap();

        let ended = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(ended.kind, BackendKind::Youtube);
        assert_eq!(ended.source_id, "pl");
        assert!(backend.state().is_stopped());
    }

    #[test]
    fn test_explicit_stop_does_not_notify() {
        let (backend, _) = backend(&["a"], "sleep 30");
        let (sender, receiver) = playback_ended_channel();
        backend.set_playback_ended_notifier(Some(sender));

        backend.play(&channel("yt")).unwrap();
        backend.stop();
        std::thread::sleep(Duration::from_millis(300));
        assert!(receiver.try_recv().is_err());
    }
}
