//! Ceiling computation, clamped volume changes and background enforcement.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    mixer::{DEFAULT_MIN_DB, Mixer},
    schedule::{Clock, LocalClock, TimeOffsets, VolumeSchedule},
};

const ENFORCER_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSettings {
    /// Ceiling before the time-of-day offset.
    pub base_max_db: f64,
    pub offsets: TimeOffsets,
    /// Period of the enforcement thread.
    pub update_interval: Duration,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            base_max_db: -1.0,
            offsets: TimeOffsets::default(),
            update_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    ceiling_db: f64,
    min_db: Option<f64>,
}

/// Keeps the mixer under `base_max_db + offset(now)`.
pub struct VolumeLimiter {
    mixer: Arc<dyn Mixer>,
    clock: Arc<dyn Clock>,
    schedule: VolumeSchedule,
    settings: VolumeSettings,
    state: Mutex<LimiterState>,
    enforcer_stop_flag: Arc<AtomicBool>,
    enforcer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl VolumeLimiter {
    pub fn new(mixer: Arc<dyn Mixer>, settings: VolumeSettings) -> Self {
        Self::with_clock(mixer, settings, Arc::new(LocalClock))
    }

    pub fn with_clock(mixer: Arc<dyn Mixer>, settings: VolumeSettings, clock: Arc<dyn Clock>) -> Self {
        let schedule = VolumeSchedule::new(settings.offsets);
        let ceiling_db = settings.base_max_db + schedule.offset_at(clock.now());
        info!(
            base_max_db = settings.base_max_db,
            day = settings.offsets.day,
            evening = settings.offsets.evening,
            night = settings.offsets.night,
            ceiling_db,
            "Volume limiter initialized"
        );
        Self {
            mixer,
            clock,
            schedule,
            settings,
            state: Mutex::new(LimiterState {
                ceiling_db,
                min_db: None,
            }),
            enforcer_stop_flag: Arc::new(AtomicBool::new(false)),
            enforcer_handle: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> VolumeSettings {
        self.settings
    }

    /// Ceiling last computed.
    pub fn ceiling_db(&self) -> f64 {
        self.state.lock().ceiling_db
    }

    /// Recomputes the ceiling for the current time.
    pub fn refresh_ceiling(&self) -> f64 {
        let offset = self.schedule.offset_at(self.clock.now());
        let ceiling = self.settings.base_max_db + offset;
        let mut state = self.state.lock();
        if state.ceiling_db != ceiling {
            info!(from = state.ceiling_db, to = ceiling, offset, "Volume ceiling changed");
        }
        state.ceiling_db = ceiling;
        ceiling
    }

    fn min_db(&self) -> f64 {
        if let Some(min) = self.state.lock().min_db {
            return min;
        }
        let min = match self.mixer.db_range() {
            Ok((min, _)) => min,
            Err(e) => {
                warn!(error = %e, "Mixer range unavailable, using default floor");
                DEFAULT_MIN_DB
            }
        };
        self.state.lock().min_db = Some(min);
        min
    }

    /// Linear mapping of `[0, 100]` onto `[min_db, ceiling]`; 0 is the floor.
    pub fn percent_to_db(&self, percent: i32) -> f64 {
        let min = self.min_db();
        let ceiling = self.ceiling_db();
        let percent = percent.clamp(0, 100);
        if percent == 0 || ceiling <= min {
            return if percent == 0 { min } else { ceiling };
        }
        min + (percent as f64 / 100.0) * (ceiling - min)
    }

    /// Inverse of [`percent_to_db`](Self::percent_to_db), clamping the dB
    /// value to the effective range first.
    pub fn db_to_percent(&self, db: f64) -> u8 {
        let min = self.min_db();
        let ceiling = self.ceiling_db();
        if ceiling <= min {
            return 100;
        }
        let db = db.clamp(min, ceiling);
        let percent = ((db - min) / (ceiling - min) * 100.0).round();
        percent.clamp(0.0, 100.0) as u8
    }

    pub fn get_volume(&self) -> Result<u8> {
        self.refresh_ceiling();
        let db = self.mixer.get_db()?;
        Ok(self.db_to_percent(db))
    }

    /// Sets the volume, never above the ceiling for the current time.
    pub fn set_volume(&self, percent: i32) -> Result<u8> {
        let ceiling = self.refresh_ceiling();
        let db = self.percent_to_db(percent).min(ceiling);
        self.mixer.set_db(db)?;
        let percent = percent.clamp(0, 100) as u8;
        info!(percent, db = %format!("{:.2}", db), ceiling_db = ceiling, "Volume set");
        Ok(percent)
    }

    pub fn adjust_volume(&self, delta: i32) -> Result<u8> {
        let current = self.get_volume()? as i32;
        self.set_volume(current + delta)
    }

    pub fn mute(&self) -> Result<()> {
        self.mixer.set_muted(true)?;
        info!("Audio muted");
        Ok(())
    }

    pub fn unmute(&self) -> Result<()> {
        self.mixer.set_muted(false)?;
        info!("Audio unmuted");
        Ok(())
    }

    /// Returns the new mute state.
    pub fn toggle_mute(&self) -> Result<bool> {
        if self.mixer.is_muted()? {
            self.unmute()?;
            Ok(false)
        } else {
            self.mute()?;
            Ok(true)
        }
    }

    /// Recomputes the ceiling and lowers the mixer if it sits above it.
    ///
    /// Never raises the level. Returns the new level when a reduction
    /// happened.
    pub fn enforce(&self) -> Result<Option<f64>> {
        let ceiling = self.refresh_ceiling();
        let current = self.mixer.get_db()?;
        if current > ceiling {
            info!(
                from = %format!("{:.2}", current),
                to = %format!("{:.2}", ceiling),
                "Reducing volume to the time-based ceiling"
            );
            self.mixer.set_db(ceiling)?;
            Ok(Some(ceiling))
        } else {
            debug!(current_db = current, ceiling_db = ceiling, "Volume within ceiling");
            Ok(None)
        }
    }

    /// Starts the periodic enforcement thread. Idempotent.
    pub fn start_enforcer(self: &Arc<Self>) {
        let mut handle = self.enforcer_handle.lock();
        if handle.is_some() {
            return;
        }
        self.enforcer_stop_flag.store(false, Ordering::SeqCst);

        let limiter = Arc::clone(self);
        let stop_flag = Arc::clone(&self.enforcer_stop_flag);
        let interval = self.settings.update_interval;

        match thread::Builder::new()
            .name("volume-enforcer".into())
            .spawn(move || enforcer_loop(limiter, stop_flag, interval))
        {
            Ok(h) => *handle = Some(h),
            Err(e) => warn!(error = %e, "Failed to spawn volume enforcer thread"),
        }
    }

    pub fn stop_enforcer(&self) {
        self.enforcer_stop_flag.store(true, Ordering::SeqCst);
        let handle = self.enforcer_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
            info!("Volume enforcer stopped");
        }
    }
}

impl Drop for VolumeLimiter {
    fn drop(&mut self) {
        self.enforcer_stop_flag.store(true, Ordering::SeqCst);
    }
}

fn enforcer_loop(limiter: Arc<VolumeLimiter>, stop_flag: Arc<AtomicBool>, interval: Duration) {
    debug!(interval_secs = interval.as_secs(), "Volume enforcer started");
    while !stop_flag.load(Ordering::SeqCst) {
        if let Err(e) = limiter.enforce() {
            warn!(error = %e, "Volume enforcement failed");
        }

        let mut waited = Duration::ZERO;
        while waited < interval && !stop_flag.load(Ordering::SeqCst) {
            let tick = ENFORCER_TICK.min(interval - waited);
            thread::sleep(tick);
            waited += tick;
        }
    }
}
