//! Device drivers: relay control and status queries for pump devices.
//!
//! Each supported device type implements [`DeviceDriver`]. The device type of
//! a pump is resolved to a [`DeviceKind`] when the configuration is loaded, so
//! an unsupported type is a configuration error instead of a silent no-op.

mod shelly;

pub use shelly::ShellyDriver;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Device kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceKind {
    #[serde(rename = "shelly1")]
    Shelly1,
}

impl DeviceKind {
    pub const ALL: &'static [DeviceKind] = &[DeviceKind::Shelly1];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shelly1 => "shelly1",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown device type '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Results and errors
// ---------------------------------------------------------------------------

/// Acknowledgement of a relay command. Devices may omit the resulting state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayAck {
    pub on: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatus {
    pub on: bool,
}

/// Coarse classification of a failed device call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetErrorKind {
    Timeout,
    TooManyRedirects,
    Other,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("request to {ip} timed out")]
    Timeout { ip: String },

    #[error("too many redirects from {ip}")]
    TooManyRedirects { ip: String },

    #[error("request to {ip} failed: {message}")]
    Other { ip: String, message: String },
}

impl DeviceError {
    pub fn kind(&self) -> NetErrorKind {
        match self {
            Self::Timeout { .. } => NetErrorKind::Timeout,
            Self::TooManyRedirects { .. } => NetErrorKind::TooManyRedirects,
            Self::Other { .. } => NetErrorKind::Other,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver trait + registry
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Switch the pump relay on or off.
    async fn set_relay(&self, ip: &str, on: bool) -> Result<RelayAck, DeviceError>;

    /// Query whether the pump relay is currently on.
    async fn status(&self, ip: &str) -> Result<RelayStatus, DeviceError>;
}

/// One driver per supported [`DeviceKind`].
#[derive(Clone)]
pub struct Drivers {
    shelly1: Arc<dyn DeviceDriver>,
}

impl Drivers {
    /// HTTP drivers with a bounded per-call timeout.
    pub fn http(timeout: Duration) -> Result<Self> {
        Ok(Self {
            shelly1: Arc::new(ShellyDriver::new(timeout)?),
        })
    }

    /// Use the same driver for every device kind.
    #[cfg(test)]
    pub fn uniform(driver: Arc<dyn DeviceDriver>) -> Self {
        Self { shelly1: driver }
    }

    pub fn get(&self, kind: DeviceKind) -> &dyn DeviceDriver {
        match kind {
            DeviceKind::Shelly1 => self.shelly1.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
