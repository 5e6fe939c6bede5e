//! The `raspotify` systemd service hosting the local Connect receiver.

use std::{
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use tracing::{debug, info, warn};

const SERVICE: &str = "raspotify";
const STARTUP_WAIT: Duration = Duration::from_secs(3);

fn succeeds(program: &str, args: &[&str]) -> bool {
    match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(e) => {
            debug!(program, error = %e, "Command could not be run");
            false
        }
    }
}

pub fn is_service_active() -> bool {
    succeeds("systemctl", &["is-active", "--quiet", SERVICE])
}

pub fn is_librespot_running() -> bool {
    succeeds("pgrep", &["-f", "librespot"])
}

pub fn is_running() -> bool {
    is_service_active() || is_librespot_running()
}

/// Starts the service when neither it nor a librespot process is running.
/// Returns whether the receiver is (now) up.
pub fn ensure_running() -> bool {
    if is_running() {
        return true;
    }

    info!(service = SERVICE, "Starting Spotify Connect service");
    let started = succeeds("systemctl", &["start", SERVICE])
        || succeeds("sudo", &["-n", "systemctl", "start", SERVICE]);
    if !started {
        warn!(service = SERVICE, "Could not start service");
        return false;
    }

    // Give the receiver time to register with Spotify
    thread::sleep(STARTUP_WAIT);
    is_running()
}
