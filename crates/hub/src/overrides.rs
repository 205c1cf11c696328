//! Manual override modes set by the operator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Operator-selected mode for a pump. `Auto` follows the valve rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideMode {
    #[default]
    Auto,
    #[serde(rename = "on")]
    ForcedOn,
    #[serde(rename = "off")]
    ForcedOff,
}

impl OverrideMode {
    /// The mode the UI offers after this one: auto → on → off → auto.
    pub fn next(self) -> Self {
        match self {
            Self::Auto => Self::ForcedOn,
            Self::ForcedOn => Self::ForcedOff,
            Self::ForcedOff => Self::Auto,
        }
    }

    pub fn is_override(self) -> bool {
        self != Self::Auto
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::ForcedOn => "on",
            Self::ForcedOff => "off",
        }
    }
}

impl fmt::Display for OverrideMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverrideMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "on" => Ok(Self::ForcedOn),
            "off" => Ok(Self::ForcedOff),
            other => Err(format!("unknown mode '{other}' (use auto/on/off)")),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
