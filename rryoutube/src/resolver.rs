//! Playable stream URLs through `yt-dlp`.

use std::{
    io::Read,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    error::{Result, YoutubeError},
    playlist_url, video_url,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait StreamResolver: Send + Sync {
    /// Best audio stream of a single video.
    fn resolve_video(&self, video_id: &str) -> Result<String>;

    /// Best audio stream of the first playlist item.
    fn resolve_playlist(&self, playlist_id: &str) -> Result<String>;
}

pub struct YtDlpResolver {
    program: String,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn get_url(&self, extra: &[&str], target: &str) -> Result<String> {
        let mut args = vec!["--get-url", "--format", "bestaudio", "--no-warnings"];
        args.extend_from_slice(extra);
        args.push(target);

        let stdout = run_with_timeout(&self.program, &args, self.timeout)?;
        stdout
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("http"))
            .map(str::to_string)
            .ok_or_else(|| YoutubeError::Unavailable(format!("no stream URL for {}", target)))
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new("yt-dlp", Duration::from_secs(15))
    }
}

impl StreamResolver for YtDlpResolver {
    fn resolve_video(&self, video_id: &str) -> Result<String> {
        debug!(video = video_id, "Resolving video stream");
        self.get_url(&[], &video_url(video_id))
    }

    fn resolve_playlist(&self, playlist_id: &str) -> Result<String> {
        debug!(playlist = playlist_id, "Resolving playlist stream");
        self.get_url(
            &["--playlist-start", "1", "--playlist-end", "1"],
            &playlist_url(playlist_id),
        )
    }
}

/// Runs a command, killing it once `timeout` elapses. Returns stdout.
pub(crate) fn run_with_timeout(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            warn!(program, ?timeout, "Killing resolver after timeout");
            let _ = child.kill();
            let _ = child.wait();
            return Err(YoutubeError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_string(&mut stdout)?;
    }

    if !status.success() {
        let mut stderr = String::new();
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr);
        }
        return Err(classify_failure(program, stderr.trim()));
    }
    Ok(stdout)
}

fn classify_failure(program: &str, stderr: &str) -> YoutubeError {
    let lower = stderr.to_lowercase();
    if lower.contains("video unavailable")
        || lower.contains("does not exist")
        || lower.contains("private video")
        || lower.contains("http error 404")
    {
        YoutubeError::Unavailable(stderr.to_string())
    } else {
        YoutubeError::Resolver {
            program: program.to_string(),
            message: stderr.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::looks_like_network;

    #[test]
    fn test_classify_failure() {
        assert!(classify_failure("yt-dlp", "ERROR: [youtube] x: Video unavailable").is_not_found());
        assert!(classify_failure("yt-dlp", "ERROR: The playlist does not exist.").is_not_found());

        let network = classify_failure("yt-dlp", "ERROR: Unable to download webpage: timed out");
        assert!(network.is_network());
        assert!(!network.is_not_found());
        assert!(looks_like_network("Temporary failure in name resolution"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_timeout_returns_stdout() {
        let out = run_with_timeout("sh", &["-c", "echo https://stream"], Duration::from_secs(5)).unwrap();
        assert_eq!(out.trim(), "https://stream");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_timeout_kills_slow_process() {
        let started = Instant::now();
        let err = run_with_timeout("sleep", &["5"], Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, YoutubeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_program_is_io_error() {
        let err = run_with_timeout("definitely-not-a-real-binary", &[], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, YoutubeError::Io(_)));
    }
}
