//! Natural end-of-playback detection.
//!
//! A backend with sequenced content owns one [`PlaybackMonitor`]. Its thread
//! polls the playback status at a fixed interval and declares the end of
//! content only after several consecutive "stopped" observations, which
//! absorbs transient staleness of remote status APIs. A paused backend never
//! counts as stopped.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Consecutive stopped observations required before declaring the end.
pub const DEFAULT_END_THRESHOLD: u32 = 3;

const STOP_CHECK_TICK: Duration = Duration::from_millis(100);

/// What the monitor saw on one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Playing,
    Paused,
    Stopped,
}

/// Debounce counter for one playback session. Fires at most once.
#[derive(Debug, Clone)]
pub struct EndOfPlaybackDetector {
    threshold: u32,
    consecutive_stopped: u32,
    fired: bool,
}

impl EndOfPlaybackDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_stopped: 0,
            fired: false,
        }
    }

    /// Returns `true` exactly once, on the observation that reaches the
    /// threshold.
    pub fn observe(&mut self, observation: Observation) -> bool {
        if self.fired {
            return false;
        }
        match observation {
            Observation::Stopped => {
                self.consecutive_stopped += 1;
                if self.consecutive_stopped >= self.threshold {
                    self.fired = true;
                    return true;
                }
            }
            Observation::Playing | Observation::Paused => self.consecutive_stopped = 0,
        }
        false
    }

    pub fn consecutive_stopped(&self) -> u32 {
        self.consecutive_stopped
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

/// Polling thread bound to one backend.
///
/// Each [`start`](Self::start) opens a new session with its own active
/// flag, so a thread left over from a previous session can only exit.
pub struct PlaybackMonitor {
    name: String,
    interval: Duration,
    threshold: u32,
    active_flag: Mutex<Arc<AtomicBool>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackMonitor {
    pub fn new(name: impl Into<String>, interval: Duration, threshold: u32) -> Self {
        Self {
            name: name.into(),
            interval,
            threshold,
            active_flag: Mutex::new(Arc::new(AtomicBool::new(false))),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.active_flag.lock().load(Ordering::SeqCst)
    }

    /// Starts a monitoring session, cancelling the previous one first.
    ///
    /// `poll` is called once per interval; `on_end` runs on the monitor
    /// thread after the session has been marked inactive.
    pub fn start<P, E>(&self, poll: P, on_end: E)
    where
        P: FnMut() -> Observation + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        self.cancel();

        let active = Arc::new(AtomicBool::new(true));
        *self.active_flag.lock() = Arc::clone(&active);

        let interval = self.interval;
        let threshold = self.threshold;
        let name = self.name.clone();

        let spawned = thread::Builder::new()
            .name(format!("monitor-{}", self.name))
            .spawn(move || monitor_loop(name, active, interval, threshold, poll, on_end));

        match spawned {
            Ok(handle) => *self.handle.lock() = Some(handle),
            Err(e) => {
                warn!(monitor = %self.name, error = %e, "Failed to spawn monitor thread");
                self.active_flag.lock().store(false, Ordering::SeqCst);
            }
        }
    }

    /// Ends the current session without waiting for its thread.
    ///
    /// A poll already in flight finishes on its own; the thread exits
    /// before calling `on_end`.
    pub fn cancel(&self) {
        self.active_flag.lock().store(false, Ordering::SeqCst);
        drop(self.handle.lock().take());
    }

    /// Ends the current session and waits for its thread, unless called
    /// from that thread.
    pub fn stop(&self) {
        self.active_flag.lock().store(false, Ordering::SeqCst);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(monitor = %self.name, "Monitor thread panicked");
            }
        }
    }
}

impl Drop for PlaybackMonitor {
    fn drop(&mut self) {
        self.active_flag.lock().store(false, Ordering::SeqCst);
    }
}

fn monitor_loop<P, E>(
    name: String,
    active: Arc<AtomicBool>,
    interval: Duration,
    threshold: u32,
    mut poll: P,
    on_end: E,
) where
    P: FnMut() -> Observation,
    E: FnOnce(),
{
    debug!(monitor = %name, interval_ms = interval.as_millis() as u64, "Monitor started");
    let mut detector = EndOfPlaybackDetector::new(threshold);

    while active.load(Ordering::SeqCst) {
        if !sleep_while_active(&active, interval) {
            break;
        }

        let observation = poll();
        if !active.load(Ordering::SeqCst) {
            break;
        }

        if detector.observe(observation) {
            active.store(false, Ordering::SeqCst);
            info!(monitor = %name, "Playback ended naturally");
            if panic::catch_unwind(AssertUnwindSafe(on_end)).is_err() {
                warn!(monitor = %name, "End-of-playback handler panicked");
            }
            return;
        }
        if observation == Observation::Stopped {
            debug!(
                monitor = %name,
                consecutive = detector.consecutive_stopped(),
                threshold,
                "Stopped observation"
            );
        }
    }
    debug!(monitor = %name, "Monitor stopped");
}

/// Sleeps `duration` in short ticks. Returns `false` if the session ended
/// meanwhile.
fn sleep_while_active(active: &AtomicBool, duration: Duration) -> bool {
    let mut slept = Duration::ZERO;
    while slept < duration {
        if !active.load(Ordering::SeqCst) {
            return false;
        }
        let tick = STOP_CHECK_TICK.min(duration - slept);
        thread::sleep(tick);
        slept += tick;
    }
    active.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::atomic::AtomicU32, time::Instant};

    #[test]
    fn test_detector_needs_consecutive_stops() {
        let mut detector = EndOfPlaybackDetector::new(3);
        assert!(!detector.observe(Observation::Stopped));
        assert!(!detector.observe(Observation::Stopped));
        // A playing observation resets the count
        assert!(!detector.observe(Observation::Playing));
        assert!(!detector.observe(Observation::Stopped));
        assert!(!detector.observe(Observation::Stopped));
        assert!(detector.observe(Observation::Stopped));
        assert!(detector.has_fired());
    }

    #[test]
    fn test_detector_fires_once() {
        let mut detector = EndOfPlaybackDetector::new(2);
        assert!(!detector.observe(Observation::Stopped));
        assert!(detector.observe(Observation::Stopped));
        for _ in 0..10 {
            assert!(!detector.observe(Observation::Stopped));
        }
    }

    #[test]
    fn test_paused_never_counts() {
        let mut detector = EndOfPlaybackDetector::new(3);
        for _ in 0..20 {
            assert!(!detector.observe(Observation::Paused));
        }
        assert_eq!(detector.consecutive_stopped(), 0);
    }

    #[test]
    fn test_monitor_fires_callback_once() {
        let monitor = PlaybackMonitor::new("test", Duration::from_millis(5), 3);
        let fired = Arc::new(AtomicU32::new(0));
        let polls = Arc::new(AtomicU32::new(0));

        let fired_cb = Arc::clone(&fired);
        let polls_seen = Arc::clone(&polls);
        monitor.start(
            move || {
                polls_seen.fetch_add(1, Ordering::SeqCst);
                Observation::Stopped
            },
            move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            },
        );

        thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert!(!monitor.is_running());
        monitor.stop();
    }

    #[test]
    fn test_monitor_below_threshold_does_not_fire() {
        let monitor = PlaybackMonitor::new("test", Duration::from_millis(5), 3);
        let fired = Arc::new(AtomicU32::new(0));
        let polls = Arc::new(AtomicU32::new(0));

        let fired_cb = Arc::clone(&fired);
        let polls_seen = Arc::clone(&polls);
        monitor.start(
            move || {
                // Two stops, then playing again, forever
                let n = polls_seen.fetch_add(1, Ordering::SeqCst);
                if n % 3 == 2 {
                    Observation::Playing
                } else {
                    Observation::Stopped
                }
            },
            move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            },
        );

        thread::sleep(Duration::from_millis(150));
        monitor.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(polls.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_stop_prevents_callback() {
        let monitor = PlaybackMonitor::new("test", Duration::from_millis(50), 1);
        let fired = Arc::new(AtomicU32::new(0));
        let fired_cb = Arc::clone(&fired);

        monitor.start(
            || Observation::Stopped,
            move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            },
        );
        monitor.stop();
        thread::sleep(Duration::from_millis(120));

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_cancel_returns_during_slow_poll() {
        let monitor = PlaybackMonitor::new("test", Duration::from_millis(5), 1);
        let fired = Arc::new(AtomicU32::new(0));
        let fired_cb = Arc::clone(&fired);

        monitor.start(
            || {
                thread::sleep(Duration::from_millis(400));
                Observation::Stopped
            },
            move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            },
        );
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        monitor.cancel();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!monitor.is_running());

        // The poll completes after the cancel and is discarded
        thread::sleep(Duration::from_millis(500));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restart_from_callback_does_not_deadlock() {
        let monitor = Arc::new(PlaybackMonitor::new("test", Duration::from_millis(5), 1));
        let sessions = Arc::new(AtomicU32::new(0));

        let monitor_cb = Arc::clone(&monitor);
        let sessions_cb = Arc::clone(&sessions);
        monitor.start(
            || Observation::Stopped,
            move || {
                sessions_cb.fetch_add(1, Ordering::SeqCst);
                // Chain a second session from the monitor thread
                monitor_cb.start(|| Observation::Playing, || {});
            },
        );

        thread::sleep(Duration::from_millis(100));
        assert_eq!(sessions.load(Ordering::SeqCst), 1);
        assert!(monitor.is_running());
        monitor.stop();
        assert!(!monitor.is_running());
    }
}
