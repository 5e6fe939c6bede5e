//! OS mixer access through the `amixer` command line tool.

use std::{process::Command, sync::LazyLock};

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{Result, VolumeError};

/// Hardware floor used when `amixer` does not report limits.
pub const DEFAULT_MIN_DB: f64 = -102.39;
const DEFAULT_MAX_DB: f64 = 4.0;
const FALLBACK_NUMID: u32 = 1;

static LIMITS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Limits:\s*Playback\s+(-?\d+)\s+-\s+(-?\d+)").expect("static regex")
});
static DB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(-?\d+\.?\d*)dB\]").expect("static regex"));
static NUMID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"numid=(\d+)").expect("static regex"));

/// Volume control surface of the sound card.
///
/// Levels are expressed in dB; the hardware range is queried once.
pub trait Mixer: Send + Sync {
    /// Hardware `(min_db, max_db)`.
    fn db_range(&self) -> Result<(f64, f64)>;
    fn get_db(&self) -> Result<f64>;
    fn set_db(&self, db: f64) -> Result<()>;
    fn is_muted(&self) -> Result<bool>;
    fn set_muted(&self, muted: bool) -> Result<()>;
}

/// `amixer` scoped to one card and one simple control.
pub struct AmixerMixer {
    program: String,
    card: String,
    control: String,
    limits: Mutex<Option<(f64, f64)>>,
    numid: Mutex<Option<u32>>,
}

impl AmixerMixer {
    pub fn new(card: impl Into<String>, control: impl Into<String>) -> Self {
        Self {
            program: "amixer".to_string(),
            card: card.into(),
            control: control.into(),
            limits: Mutex::new(None),
            numid: Mutex::new(None),
        }
    }

    pub fn card(&self) -> &str {
        &self.card
    }

    pub fn control(&self) -> &str {
        &self.control
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| VolumeError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(VolumeError::Command {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn sget(&self) -> Result<String> {
        self.run(&["-c", &self.card, "sget", &self.control])
    }

    /// Control numid for raw `cset` writes, cached after the first lookup.
    fn control_numid(&self) -> u32 {
        let mut cached = self.numid.lock();
        if let Some(numid) = *cached {
            return numid;
        }

        let numid = match self.run(&["-c", &self.card, "controls"]) {
            Ok(listing) => parse_numid(&listing, &self.control),
            Err(e) => {
                debug!(error = %e, "Cannot list mixer controls");
                None
            }
        }
        .unwrap_or_else(|| {
            debug!(control = %self.control, "No numid found, using numid={}", FALLBACK_NUMID);
            FALLBACK_NUMID
        });

        debug!(control = %self.control, numid, "Mixer control numid");
        *cached = Some(numid);
        numid
    }

    fn set_percent(&self, percent: u8) -> Result<()> {
        let value = format!("{}%", percent);
        self.run(&["-q", "-c", &self.card, "set", &self.control, &value])
            .map(|_| ())
    }
}

impl Mixer for AmixerMixer {
    fn db_range(&self) -> Result<(f64, f64)> {
        let mut limits = self.limits.lock();
        if let Some(range) = *limits {
            return Ok(range);
        }

        let range = match self.sget() {
            Ok(output) => parse_limits(&output).unwrap_or_else(|| {
                warn!(control = %self.control, "No Limits line in amixer output, using defaults");
                (DEFAULT_MIN_DB, DEFAULT_MAX_DB)
            }),
            Err(e) => {
                warn!(error = %e, "Cannot query mixer limits, using defaults");
                (DEFAULT_MIN_DB, DEFAULT_MAX_DB)
            }
        };

        info!(min_db = range.0, max_db = range.1, "Mixer limits");
        *limits = Some(range);
        Ok(range)
    }

    fn get_db(&self) -> Result<f64> {
        let output = self.sget()?;
        parse_db(&output).ok_or_else(|| VolumeError::Parse(format!("no dB value for {}", self.control)))
    }

    fn set_db(&self, db: f64) -> Result<()> {
        // Raw value in hundredths of a dB, rounded down so the written
        // level never exceeds the requested one.
        let raw = (db * 100.0).floor() as i64;
        let numid = format!("numid={}", self.control_numid());
        let raw = raw.to_string();

        match self.run(&["-q", "-c", &self.card, "cset", &numid, "--", &raw]) {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "cset failed, falling back to percentage");
                let (min_db, max_db) = self.db_range()?;
                let span = max_db - min_db;
                let percent = if span <= 0.0 {
                    0.0
                } else {
                    ((db.clamp(min_db, max_db) - min_db) / span * 100.0).floor()
                };
                self.set_percent(percent as u8)
            }
        }
    }

    fn is_muted(&self) -> Result<bool> {
        Ok(parse_muted(&self.sget()?))
    }

    fn set_muted(&self, muted: bool) -> Result<()> {
        let action = if muted { "mute" } else { "unmute" };
        self.run(&["-c", &self.card, "set", &self.control, action])
            .map(|_| ())
    }
}

/// Parses `Limits: Playback -10239 - 400` (hundredths of dB).
pub(crate) fn parse_limits(output: &str) -> Option<(f64, f64)> {
    let caps = LIMITS_RE.captures(output)?;
    let min: i64 = caps[1].parse().ok()?;
    let max: i64 = caps[2].parse().ok()?;
    Some((min as f64 / 100.0, max as f64 / 100.0))
}

/// First `[x.xxdB]` field of an `sget` output.
pub(crate) fn parse_db(output: &str) -> Option<f64> {
    DB_RE.captures(output)?[1].parse().ok()
}

pub(crate) fn parse_muted(output: &str) -> bool {
    output.contains("[off]")
}

/// Finds the numid of `<control> Playback Volume` in an `amixer controls`
/// listing, or of the first line naming the control.
pub(crate) fn parse_numid(listing: &str, control: &str) -> Option<u32> {
    let exact = format!("name='{} Playback Volume'", control);
    let loose = format!("name='{}", control);

    let line = listing
        .lines()
        .find(|l| l.contains(&exact))
        .or_else(|| listing.lines().find(|l| l.contains(&loose)))?;
    NUMID_RE.captures(line)?[1].parse().ok()
}
