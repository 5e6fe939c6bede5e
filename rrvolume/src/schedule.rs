//! Time windows of the volume ceiling.

use chrono::{Local, NaiveTime, Timelike};

/// Level band applied during a window of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePeriod {
    Day,
    Evening,
    Night,
}

impl TimePeriod {
    /// Band for a local hour (0..24).
    ///
    /// | hours       | band    |
    /// |-------------|---------|
    /// | 19:00-07:00 | night   |
    /// | 07:00-08:00 | night   |
    /// | 08:00-09:00 | evening |
    /// | 09:00-17:00 | day     |
    /// | 17:00-18:00 | day     |
    /// | 18:00-19:00 | evening |
    pub fn for_hour(hour: u32) -> Self {
        match hour {
            19..=23 | 0..=6 => TimePeriod::Night,
            7 => TimePeriod::Night,
            8 => TimePeriod::Evening,
            9..=16 => TimePeriod::Day,
            17 => TimePeriod::Day,
            18 => TimePeriod::Evening,
            _ => TimePeriod::Day,
        }
    }
}

/// dB offsets added to the base ceiling for each band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeOffsets {
    pub day: f64,
    pub evening: f64,
    pub night: f64,
}

impl Default for TimeOffsets {
    fn default() -> Self {
        Self {
            day: 0.0,
            evening: -6.0,
            night: -14.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VolumeSchedule {
    offsets: TimeOffsets,
}

impl VolumeSchedule {
    pub fn new(offsets: TimeOffsets) -> Self {
        Self { offsets }
    }

    pub fn offsets(&self) -> TimeOffsets {
        self.offsets
    }

    pub fn offset_for(&self, period: TimePeriod) -> f64 {
        match period {
            TimePeriod::Day => self.offsets.day,
            TimePeriod::Evening => self.offsets.evening,
            TimePeriod::Night => self.offsets.night,
        }
    }

    pub fn offset_at(&self, time: NaiveTime) -> f64 {
        self.offset_for(TimePeriod::for_hour(time.hour()))
    }
}

/// Source of the local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveTime;
}

/// System local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Frozen time, for simulations and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveTime);

impl FixedClock {
    pub fn at(hour: u32, minute: u32) -> Self {
        Self(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveTime {
        self.0
    }
}
