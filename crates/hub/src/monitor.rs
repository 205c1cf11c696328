//! Online monitor: liveness and relay state derived from the last
//! successful status poll of each pump.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// A pump is online if its last successful status query is at most this old.
pub const DEFAULT_ONLINE_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Switched {
    On,
    Off,
    Unknown,
}

/// Last status-query outcome recorded for one pump.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub last_seen_online: Instant,
    pub last_known_on: bool,
}

impl Observation {
    pub fn new(now: Instant) -> Self {
        Self {
            last_seen_online: now,
            last_known_on: false,
        }
    }

    /// Record a successful status query.
    pub fn seen(&mut self, now: Instant, on: bool) {
        self.last_seen_online = now;
        self.last_known_on = on;
    }
}

/// Liveness of an optional observation; `None` means the pump id does not
/// exist (yet).
pub fn liveness(obs: Option<&Observation>, now: Instant, timeout: Duration) -> Liveness {
    match obs {
        None => Liveness::Unknown,
        Some(o) if now.saturating_duration_since(o.last_seen_online) <= timeout => {
            Liveness::Online
        }
        Some(_) => Liveness::Offline,
    }
}

pub fn switched(obs: Option<&Observation>) -> Switched {
    match obs {
        None => Switched::Unknown,
        Some(o) if o.last_known_on => Switched::On,
        Some(_) => Switched::Off,
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        })
    }
}

impl fmt::Display for Switched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Unknown => "unknown",
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
