//! Network reachability gate for auto-start.

use std::{
    net::ToSocketAddrs,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

pub trait ReachabilityCheck: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// Resolves a `host:port` through the system resolver.
#[derive(Debug, Clone)]
pub struct DnsCheck {
    host: String,
}

impl DnsCheck {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Default for DnsCheck {
    fn default() -> Self {
        Self::new("google.com:443")
    }
}

impl ReachabilityCheck for DnsCheck {
    fn is_reachable(&self) -> bool {
        match self.host.as_str().to_socket_addrs() {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                debug!(host = %self.host, error = %e, "DNS lookup failed");
                false
            }
        }
    }
}

/// Polls `check` every `interval` until it succeeds or `timeout` elapses.
pub fn wait_for_network(
    check: &dyn ReachabilityCheck,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let started = Instant::now();
    loop {
        if check.is_reachable() {
            info!(waited_ms = started.elapsed().as_millis() as u64, "Network reachable");
            return true;
        }
        if started.elapsed() + interval > timeout {
            warn!(timeout_secs = timeout.as_secs(), "Network unreachable, giving up");
            return false;
        }
        thread::sleep(interval);
    }
}
