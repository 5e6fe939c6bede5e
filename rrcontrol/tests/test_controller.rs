use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rrcontrol::{
    Announcer, BackendError, BackendFactory, BackendKind, BackendResult, ControllerDeps,
    ControllerSettings, Cue, HistoryEvent, HistorySink, ReachabilityCheck, PlaybackBackend,
    PlaybackEnded, PlaybackEndedSender, PlaybackState, PlayerController, SoundFeedback,
};
use rrsources::{Source, SourceRegistry, SourceType};
use tempfile::TempDir;

struct MockBackend {
    kind: BackendKind,
    play_delay: Mutex<Duration>,
    skip_delay: Mutex<Duration>,
    failure: Mutex<Option<BackendError>>,
    resume_ok: AtomicBool,
    plays: AtomicU32,
    stops: AtomicU32,
    play_times: Mutex<Vec<Instant>>,
    state: Mutex<PlaybackState>,
    loaded: Mutex<Option<String>>,
    notifier: Mutex<Option<PlaybackEndedSender>>,
}

impl MockBackend {
    fn new(kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            play_delay: Mutex::new(Duration::ZERO),
            skip_delay: Mutex::new(Duration::ZERO),
            failure: Mutex::new(None),
            resume_ok: AtomicBool::new(true),
            plays: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            play_times: Mutex::new(Vec::new()),
            state: Mutex::new(PlaybackState::default()),
            loaded: Mutex::new(None),
            notifier: Mutex::new(None),
        })
    }

    fn plays(&self) -> u32 {
        self.plays.load(Ordering::SeqCst)
    }

    fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    fn fail_with(&self, error: BackendError) {
        *self.failure.lock() = Some(error);
    }

    fn delay_play(&self, delay: Duration) {
        *self.play_delay.lock() = delay;
    }
}

impl PlaybackBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn play(&self, source: &Source) -> BackendResult<()> {
        let delay = *self.play_delay.lock();
        thread::sleep(delay);
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.play_times.lock().push(Instant::now());

        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        *self.loaded.lock() = Some(source.id.clone());
        *self.state.lock() = PlaybackState::playing(Some(format!("item of {}", source.id)));
        Ok(())
    }

    fn pause(&self) -> bool {
        self.state.lock().is_paused = true;
        true
    }

    fn resume(&self) -> bool {
        if !self.resume_ok.load(Ordering::SeqCst) {
            return false;
        }
        let mut state = self.state.lock();
        state.is_playing = true;
        state.is_paused = false;
        true
    }

    fn stop(&self) -> bool {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = PlaybackState::default();
        *self.loaded.lock() = None;
        true
    }

    fn next(&self) -> bool {
        let delay = *self.skip_delay.lock();
        thread::sleep(delay);
        self.state.lock().current_item = Some("next item".to_string());
        true
    }

    fn previous(&self) -> bool {
        false
    }

    fn is_playing(&self) -> bool {
        self.state.lock().is_active()
    }

    fn state(&self) -> PlaybackState {
        self.state.lock().clone()
    }

    fn loaded_source_id(&self) -> Option<String> {
        self.loaded.lock().clone()
    }

    fn set_playback_ended_notifier(&self, notifier: Option<PlaybackEndedSender>) {
        *self.notifier.lock() = notifier;
    }
}

struct MockFactory {
    youtube: Arc<MockBackend>,
    spotify: Arc<MockBackend>,
    created: AtomicU32,
}

impl BackendFactory for MockFactory {
    fn create(&self, kind: BackendKind) -> BackendResult<Arc<dyn PlaybackBackend>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let backend: Arc<dyn PlaybackBackend> = match kind {
            BackendKind::Youtube => self.youtube.clone(),
            BackendKind::Spotify => self.spotify.clone(),
        };
        Ok(backend)
    }
}

#[derive(Default)]
struct Recorder {
    cues: Mutex<Vec<Cue>>,
    announcements: Mutex<Vec<String>>,
    events: Mutex<Vec<HistoryEvent>>,
}

impl Recorder {
    fn cues(&self) -> Vec<Cue> {
        self.cues.lock().clone()
    }

    fn actions(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.action.clone()).collect()
    }

    fn changed_to(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == "source_change")
            .filter_map(|e| e.source_id.clone())
            .collect()
    }
}

impl SoundFeedback for Recorder {
    fn cue(&self, cue: Cue) {
        self.cues.lock().push(cue);
    }
}

impl Announcer for Recorder {
    fn announce(&self, text: &str) {
        self.announcements.lock().push(text.to_string());
    }
}

impl HistorySink for Recorder {
    fn record(&self, event: HistoryEvent) {
        self.events.lock().push(event);
    }
}

struct FixedCheck(bool);

impl ReachabilityCheck for FixedCheck {
    fn is_reachable(&self) -> bool {
        self.0
    }
}

struct Fixture {
    controller: PlayerController,
    youtube: Arc<MockBackend>,
    spotify: Arc<MockBackend>,
    factory: Arc<MockFactory>,
    recorder: Arc<Recorder>,
    _dir: TempDir,
}

fn youtube(id: &str) -> Source {
    Source::new(id, format!("Label {}", id), SourceType::YoutubeChannel).with_channel_id("UC1")
}

fn spotify(id: &str) -> Source {
    Source::new(id, format!("Label {}", id), SourceType::SpotifyPlaylist).with_playlist_id("PL1")
}

fn write_sources(path: &Path, sources: &[Source]) {
    std::fs::write(path, serde_json::to_string_pretty(sources).unwrap()).unwrap();
}

fn test_settings() -> ControllerSettings {
    ControllerSettings {
        max_retries: 2,
        retry_sleep: Duration::from_millis(200),
        network_timeout: Duration::from_millis(100),
        network_interval: Duration::from_millis(20),
        fetching_cue_delay: Duration::from_millis(1000),
        volume_step: 5,
    }
}

fn fixture_with(sources: &[Source], settings: ControllerSettings, online: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let sources_path = dir.path().join("sources.json");
    if !sources.is_empty() {
        write_sources(&sources_path, sources);
    }
    let registry = SourceRegistry::open(&sources_path, dir.path().join("state.json"));

    let youtube = MockBackend::new(BackendKind::Youtube);
    let spotify = MockBackend::new(BackendKind::Spotify);
    let factory = Arc::new(MockFactory {
        youtube: youtube.clone(),
        spotify: spotify.clone(),
        created: AtomicU32::new(0),
    });
    let recorder = Arc::new(Recorder::default());

    let controller = PlayerController::new(
        ControllerDeps {
            registry,
            factory: factory.clone(),
            limiter: None,
            history: recorder.clone(),
            feedback: recorder.clone(),
            announcer: recorder.clone(),
            network: Arc::new(FixedCheck(online)),
        },
        settings,
    );

    Fixture {
        controller,
        youtube,
        spotify,
        factory,
        recorder,
        _dir: dir,
    }
}

fn fixture(sources: &[Source]) -> Fixture {
    fixture_with(sources, test_settings(), true)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn wait_installed(f: &Fixture, id: &str) -> bool {
    wait_until(Duration::from_secs(3), || {
        f.controller
            .status()
            .source
            .is_some_and(|s| s.id == id)
    })
}

fn wait_settled(f: &Fixture) -> bool {
    wait_until(Duration::from_secs(3), || f.controller.status().target.is_none())
}

#[test]
fn test_switch_installs_backend() {
    let f = fixture(&[youtube("yt1")]);
    f.controller.switch_source(youtube("yt1"));

    assert!(wait_installed(&f, "yt1"));
    let status = f.controller.status();
    assert!(status.playing);
    assert!(status.target.is_none());
    assert_eq!(status.current_item.as_deref(), Some("item of yt1"));
    assert!(status.ceiling_db.is_none());
    assert_eq!(f.youtube.plays(), 1);
    assert_eq!(f.recorder.changed_to(), vec!["yt1".to_string()]);
    assert!(f.recorder.actions().contains(&"playback_start".to_string()));
    f.controller.shutdown();
}

#[test]
fn test_backends_are_created_once_per_kind() {
    let f = fixture(&[youtube("a"), youtube("b")]);
    f.controller.switch_source(youtube("a"));
    assert!(wait_installed(&f, "a"));
    f.controller.switch_source(youtube("b"));
    assert!(wait_installed(&f, "b"));

    assert_eq!(f.factory.created.load(Ordering::SeqCst), 1);
    assert_eq!(f.youtube.plays(), 2);
    f.controller.shutdown();
}

#[test]
fn test_superseded_attempt_never_becomes_current() {
    let f = fixture(&[youtube("slow"), spotify("fast")]);
    f.youtube.delay_play(Duration::from_millis(300));

    f.controller.switch_source(youtube("slow"));
    thread::sleep(Duration::from_millis(50));
    f.controller.switch_source(spotify("fast"));

    assert!(wait_installed(&f, "fast"));
    // The slow play() still completes, then gets stopped
    assert!(wait_until(Duration::from_secs(2), || f.youtube.stops() >= 1));
    assert_eq!(f.youtube.plays(), 1);
    assert!(f.youtube.loaded_source_id().is_none());

    thread::sleep(Duration::from_millis(100));
    assert_eq!(f.controller.status().source.unwrap().id, "fast");
    assert_eq!(f.recorder.changed_to(), vec!["fast".to_string()]);
    f.controller.shutdown();
}

#[test]
fn test_at_most_one_active_backend() {
    let f = fixture(&[youtube("a"), spotify("b")]);
    f.youtube.delay_play(Duration::from_millis(50));

    for _ in 0..3 {
        f.controller.switch_source(youtube("a"));
        thread::sleep(Duration::from_millis(20));
        f.controller.switch_source(spotify("b"));
        thread::sleep(Duration::from_millis(20));
    }

    assert!(wait_installed(&f, "b"));
    assert!(wait_settled(&f));
    thread::sleep(Duration::from_millis(200));

    assert_eq!(f.controller.status().source.unwrap().id, "b");
    assert_eq!(f.spotify.loaded_source_id().as_deref(), Some("b"));
    assert!(f.youtube.loaded_source_id().is_none());
    f.controller.shutdown();
}

#[test]
fn test_retry_cap_and_timing() {
    let f = fixture(&[spotify("down")]);
    f.spotify.fail_with(BackendError::Network("timeout".into()));

    f.controller.switch_source(spotify("down"));
    assert!(wait_until(Duration::from_secs(3), || f.spotify.plays() == 2));
    assert!(wait_settled(&f));
    thread::sleep(Duration::from_millis(300));

    assert_eq!(f.spotify.plays(), 2);
    let times = f.spotify.play_times.lock().clone();
    let gap = times[1] - times[0];
    assert!(gap >= Duration::from_millis(200), "gap {:?}", gap);
    assert!(gap < Duration::from_millis(400), "gap {:?}", gap);

    let cues = f.recorder.cues();
    assert_eq!(cues.iter().filter(|c| **c == Cue::NetworkError).count(), 2);
    assert_eq!(cues.iter().filter(|c| **c == Cue::Retry).count(), 1);

    let status = f.controller.status();
    assert!(status.source.is_none());
    assert!(status.target.is_none());
    assert!(f.recorder.actions().contains(&"source_failed".to_string()));
    f.controller.shutdown();
}

#[test]
fn test_permission_error_is_not_retried() {
    let f = fixture(&[spotify("premium")]);
    f.spotify.fail_with(BackendError::Permission("premium required".into()));

    f.controller.switch_source(spotify("premium"));
    assert!(wait_settled(&f));
    thread::sleep(Duration::from_millis(300));

    assert_eq!(f.spotify.plays(), 1);
    assert_eq!(f.recorder.cues(), vec![Cue::AuthError]);
    f.controller.shutdown();
}

#[test]
fn test_failed_source_does_not_cascade() {
    let f = fixture(&[spotify("broken"), youtube("fine")]);
    f.spotify.fail_with(BackendError::NotFound("no device".into()));

    f.controller.switch_source(spotify("broken"));
    assert!(wait_until(Duration::from_secs(3), || f.spotify.plays() == 2));
    assert!(wait_settled(&f));
    thread::sleep(Duration::from_millis(300));

    assert_eq!(f.youtube.plays(), 0);
    assert!(f.controller.status().source.is_none());
    f.controller.shutdown();
}

#[test]
fn test_cycle_to_same_source_keeps_playing() {
    let f = fixture(&[youtube("only")]);
    f.controller.switch_source(youtube("only"));
    assert!(wait_installed(&f, "only"));

    let next = f.controller.cycle_source().unwrap();
    assert_eq!(next.id, "only");
    thread::sleep(Duration::from_millis(200));

    assert_eq!(f.youtube.plays(), 1);
    assert_eq!(f.youtube.stops(), 0);
    assert!(f.controller.status().playing);
    f.controller.shutdown();
}

#[test]
fn test_cycle_announces_and_replaces_source() {
    let f = fixture(&[youtube("a"), spotify("b")]);
    f.controller.switch_source(youtube("a"));
    assert!(wait_installed(&f, "a"));

    let next = f.controller.cycle_source().unwrap();
    assert_eq!(next.id, "b");
    assert!(wait_installed(&f, "b"));

    assert!(f.youtube.stops() >= 1);
    assert_eq!(f.recorder.announcements.lock().clone(), vec!["Label b".to_string()]);
    assert_eq!(f.controller.sources().len(), 2);
    f.controller.shutdown();
}

#[test]
fn test_play_pause_toggles_and_self_heals() {
    let f = fixture(&[youtube("a")]);
    f.controller.switch_source(youtube("a"));
    assert!(wait_installed(&f, "a"));

    assert!(f.controller.play_pause());
    let state = f.youtube.state();
    assert!(state.is_playing && state.is_paused);

    assert!(f.controller.play_pause());
    assert!(f.youtube.is_playing());

    // A dead backend cannot resume: the source is restarted
    f.controller.play_pause();
    f.youtube.resume_ok.store(false, Ordering::SeqCst);
    assert!(f.controller.play_pause());
    assert!(wait_until(Duration::from_secs(3), || f.youtube.plays() == 2));
    assert!(wait_installed(&f, "a"));
    f.controller.shutdown();
}

#[test]
fn test_play_without_backend_starts_current_source() {
    let f = fixture(&[spotify("first"), youtube("second")]);
    assert!(f.controller.play_pause());
    assert!(wait_installed(&f, "first"));
    f.controller.shutdown();
}

#[test]
fn test_empty_registry_signals_no_sources() {
    let f = fixture(&[]);
    assert!(!f.controller.play_pause());
    assert!(f.controller.cycle_source().is_none());
    assert_eq!(f.recorder.cues(), vec![Cue::NoSources, Cue::NoSources]);
    f.controller.shutdown();
}

#[test]
fn test_next_without_backend_is_noop() {
    let f = fixture(&[youtube("a")]);
    assert!(!f.controller.next());
    assert!(!f.controller.previous());
    f.controller.shutdown();
}

#[test]
fn test_next_resumes_paused_backend() {
    let f = fixture(&[youtube("a")]);
    f.controller.switch_source(youtube("a"));
    assert!(wait_installed(&f, "a"));

    f.controller.play_pause();
    assert!(!f.youtube.is_playing());
    assert!(f.controller.next());
    assert!(wait_until(Duration::from_secs(1), || f.youtube.is_playing()));
    f.controller.shutdown();
}

#[test]
fn test_failed_previous_leaves_pause_alone() {
    let f = fixture(&[youtube("a")]);
    f.controller.switch_source(youtube("a"));
    assert!(wait_installed(&f, "a"));

    f.controller.play_pause();
    assert!(f.controller.previous());
    thread::sleep(Duration::from_millis(200));
    assert!(f.youtube.state().is_paused);
    assert!(!f.youtube.is_playing());
    f.controller.shutdown();
}

#[test]
fn test_slow_next_does_not_block_input() {
    let f = fixture(&[youtube("a")]);
    f.controller.switch_source(youtube("a"));
    assert!(wait_installed(&f, "a"));
    *f.youtube.skip_delay.lock() = Duration::from_secs(1);

    let started = Instant::now();
    assert!(f.controller.next());
    let _ = f.controller.status();
    assert!(started.elapsed() < Duration::from_millis(200));

    // The new item is recorded once the skip lands
    assert!(wait_until(Duration::from_secs(3), || {
        f.recorder.events.lock().iter().any(|e| {
            e.action == "playback_start" && e.item_name.as_deref() == Some("next item")
        })
    }));
    f.controller.shutdown();
}

#[test]
fn test_auto_start_skips_when_offline() {
    let f = fixture_with(&[youtube("a")], test_settings(), false);
    assert!(!f.controller.auto_start());
    thread::sleep(Duration::from_millis(100));

    assert_eq!(f.recorder.cues(), vec![Cue::Startup, Cue::NetworkError]);
    assert_eq!(f.youtube.plays(), 0);
    f.controller.shutdown();
}

#[test]
fn test_auto_start_plays_current_source() {
    let f = fixture(&[youtube("a")]);
    assert!(f.controller.auto_start());
    assert!(wait_installed(&f, "a"));
    assert_eq!(f.recorder.cues()[0], Cue::Startup);
    f.controller.shutdown();
}

#[test]
fn test_slow_play_emits_fetching_cue() {
    let settings = ControllerSettings {
        fetching_cue_delay: Duration::from_millis(100),
        ..test_settings()
    };
    let f = fixture_with(&[youtube("a")], settings, true);
    f.youtube.delay_play(Duration::from_millis(300));

    f.controller.switch_source(youtube("a"));
    assert!(wait_installed(&f, "a"));
    assert_eq!(f.recorder.cues(), vec![Cue::Fetching]);
    f.controller.shutdown();
}

#[test]
fn test_natural_end_of_current_source_is_recorded() {
    let f = fixture(&[spotify("sp")]);
    f.controller.switch_source(spotify("sp"));
    assert!(wait_installed(&f, "sp"));

    let notifier = f.spotify.notifier.lock().clone().unwrap();
    notifier.notify(PlaybackEnded {
        kind: BackendKind::Spotify,
        source_id: "sp".into(),
    });

    assert!(wait_until(Duration::from_secs(2), || {
        f.recorder.actions().contains(&"playback_ended".to_string())
    }));
    // No other source is started
    assert_eq!(f.youtube.plays(), 0);
    assert_eq!(f.spotify.plays(), 1);
    f.controller.shutdown();
}

#[test]
fn test_shutdown_stops_current_backend() {
    let f = fixture(&[youtube("a")]);
    f.controller.switch_source(youtube("a"));
    assert!(wait_installed(&f, "a"));

    f.controller.shutdown();
    assert!(f.youtube.stops() >= 1);
    assert!(f.controller.status().source.is_none());
    assert!(f.youtube.notifier.lock().is_none());
}
