//! Time-of-day volume limiting on top of the ALSA mixer.
//!
//! The effective ceiling is `base_max_db + offset(now)` where the offset
//! depends on the local hour (day, evening, night with one-hour transition
//! bands). Every manual change is clamped to it and a background enforcer
//! lowers the mixer whenever the ceiling drops below the live level.

pub mod error;
pub mod limiter;
pub mod mixer;
pub mod schedule;

pub use error::{Result, VolumeError};
pub use limiter::{VolumeLimiter, VolumeSettings};
pub use mixer::{AmixerMixer, DEFAULT_MIN_DB, Mixer};
pub use schedule::{Clock, FixedClock, LocalClock, TimeOffsets, TimePeriod, VolumeSchedule};
