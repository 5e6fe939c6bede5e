//! External audio player process (mpv).

use std::{
    io::ErrorKind,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::errors::{BackendError, BackendResult};

/// Delay after spawn before checking the player did not die on startup.
const STARTUP_CHECK_DELAY: Duration = Duration::from_millis(500);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Program and arguments; the stream URL is appended last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl PlayerCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Audio-only mpv on ALSA with a network read timeout.
    pub fn mpv(program: impl Into<String>) -> Self {
        Self::new(
            program,
            [
                "--no-video",
                "--no-terminal",
                "--quiet",
                "--ao=alsa",
                "--stream-lavf-o=timeout=10000000",
                "--cache=yes",
            ],
        )
    }
}

impl Default for PlayerCommand {
    fn default() -> Self {
        Self::mpv("mpv")
    }
}

/// One running player.
#[derive(Debug)]
pub struct PlayerProcess {
    child: Child,
    paused: bool,
}

impl PlayerProcess {
    /// Spawns the player on `url` and checks it survives its startup.
    pub fn spawn(command: &PlayerCommand, url: &str) -> BackendResult<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    BackendError::Process(format!("{} is not installed", command.program))
                }
                _ => BackendError::Process(format!("cannot start {}: {}", command.program, e)),
            })?;

        thread::sleep(STARTUP_CHECK_DELAY);
        match child.try_wait() {
            Ok(Some(status)) => Err(BackendError::Process(format!(
                "{} exited immediately ({})",
                command.program, status
            ))),
            Ok(None) => {
                info!(pid = child.id(), program = %command.program, "Player started");
                Ok(Self {
                    child,
                    paused: false,
                })
            }
            Err(e) => Err(BackendError::Process(e.to_string())),
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// True while the process has not exited.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Suspends the process (SIGSTOP).
    pub fn pause(&mut self) -> bool {
        if self.paused {
            return true;
        }
        if signal(self.pid(), Signal::Stop) {
            self.paused = true;
            debug!(pid = self.pid(), "Player paused");
            true
        } else {
            false
        }
    }

    /// Continues a suspended process (SIGCONT).
    pub fn resume(&mut self) -> bool {
        if !self.paused {
            return self.is_running();
        }
        if signal(self.pid(), Signal::Continue) {
            self.paused = false;
            debug!(pid = self.pid(), "Player resumed");
            true
        } else {
            false
        }
    }

    /// SIGTERM, then SIGKILL after `grace`. Always reaps the child.
    pub fn terminate(&mut self, grace: Duration) {
        if !self.is_running() {
            return;
        }
        let pid = self.pid();
        // A stopped process only handles SIGTERM once continued
        if self.paused {
            signal(pid, Signal::Continue);
            self.paused = false;
        }
        signal(pid, Signal::Terminate);

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !self.is_running() {
                debug!(pid, "Player terminated");
                return;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        warn!(pid, "Player ignored SIGTERM, killing");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for PlayerProcess {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Stop,
    Continue,
    Terminate,
}

#[cfg(unix)]
fn signal(pid: u32, sig: Signal) -> bool {
    let signum = match sig {
        Signal::Stop => libc::SIGSTOP,
        Signal::Continue => libc::SIGCONT,
        Signal::Terminate => libc::SIGTERM,
    };
    // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet
    let rc = unsafe { libc::kill(pid as libc::pid_t, signum) };
    if rc != 0 {
        debug!(pid, ?sig, "kill() failed");
    }
    rc == 0
}

#[cfg(not(unix))]
fn signal(_pid: u32, _sig: Signal) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn long_running() -> PlayerCommand {
        // The URL lands in $0 of the shell
        PlayerCommand::new("sh", ["-c", "sleep 30"])
    }

    #[test]
    fn test_default_is_mpv_audio_only() {
        let command = PlayerCommand::default();
        assert_eq!(command.program, "mpv");
        assert!(command.args.contains(&"--no-video".to_string()));
        assert!(command.args.contains(&"--ao=alsa".to_string()));
    }

    #[test]
    fn test_missing_program() {
        let command = PlayerCommand::new("no-such-player-binary", Vec::<String>::new());
        let err = PlayerProcess::spawn(&command, "http://x").unwrap_err();
        assert!(matches!(err, BackendError::Process(m) if m.contains("not installed")));
    }

    #[test]
    fn test_immediate_exit_is_an_error() {
        let command = PlayerCommand::new("sh", ["-c", "exit 3"]);
        assert!(PlayerProcess::spawn(&command, "http://x").is_err());
    }

    #[test]
    fn test_pause_resume_terminate() {
        let mut player = PlayerProcess::spawn(&long_running(), "http://x").unwrap();
        assert!(player.is_running());

        assert!(player.pause());
        assert!(player.is_paused());
        assert!(player.is_running());

        assert!(player.resume());
        assert!(!player.is_paused());

        player.pause();
        player.terminate(Duration::from_secs(2));
        assert!(!player.is_running());
    }
}
