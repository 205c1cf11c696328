//! Pump configuration: JSON file loading, validation, and persistence.
//!
//! On disk the configuration is a set of index-aligned arrays (one entry per
//! pump in each array). In memory it is a `Vec<Pump>`, so the arrays can never
//! drift apart once loaded.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::driver::DeviceKind;
use crate::eventlog::table_name;
use crate::rules::PumpRules;

// ---------------------------------------------------------------------------
// In-memory model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Pump {
    pub name: String,
    pub device: DeviceKind,
    pub ip: String,
    pub rules: PumpRules,
    pub keep_state: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PumpConfig {
    pub pumps: Vec<Pump>,
    pub db_log: bool,
}

/// Operator input for creating or editing a pump.
#[derive(Debug, Clone, Deserialize)]
pub struct PumpSpec {
    pub name: String,
    pub device_type: String,
    pub ip: String,
    #[serde(default)]
    pub need_valves: Vec<i64>,
    #[serde(default)]
    pub need_valves_on: Vec<i64>,
    #[serde(default)]
    pub need_valves_off: Vec<i64>,
    #[serde(default)]
    pub keep_state: bool,
}

impl PumpSpec {
    pub fn into_pump(self) -> Result<Pump> {
        let device = match self.device_type.parse::<DeviceKind>() {
            Ok(d) => d,
            Err(e) => bail!("pump '{}': {e}", self.name),
        };
        Ok(Pump {
            name: self.name.trim().to_string(),
            device,
            ip: self.ip.trim().to_string(),
            rules: PumpRules {
                need_valves: self.need_valves,
                need_valves_on: self.need_valves_on,
                need_valves_off: self.need_valves_off,
            },
            keep_state: self.keep_state,
        })
    }
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PumpConfigFile {
    #[serde(rename = "PumpName")]
    pub names: Vec<String>,
    #[serde(rename = "PumpDeviceType")]
    pub device_types: Vec<String>,
    #[serde(rename = "PumpIP")]
    pub ips: Vec<String>,
    #[serde(rename = "PumpNeedValves")]
    pub need_valves: Vec<Vec<i64>>,
    #[serde(rename = "PumpNeedValvesOn")]
    pub need_valves_on: Vec<Vec<i64>>,
    #[serde(rename = "PumpNeedValvesOff")]
    pub need_valves_off: Vec<Vec<i64>>,
    #[serde(rename = "PumpKeepState")]
    pub keep_state: Vec<bool>,
    #[serde(rename = "PumpDBLog")]
    pub db_log: bool,
}

impl PumpConfigFile {
    /// Check array alignment and device types, then build the in-memory
    /// config. Every violation is reported, not just the first one.
    pub fn into_config(self) -> Result<PumpConfig> {
        let n = self.names.len();
        let mut errors: Vec<String> = Vec::new();

        let lengths = [
            ("PumpDeviceType", self.device_types.len()),
            ("PumpIP", self.ips.len()),
            ("PumpNeedValves", self.need_valves.len()),
            ("PumpNeedValvesOn", self.need_valves_on.len()),
            ("PumpNeedValvesOff", self.need_valves_off.len()),
            ("PumpKeepState", self.keep_state.len()),
        ];
        for (key, len) in lengths {
            if len != n {
                errors.push(format!("{key} has {len} entries, PumpName has {n}"));
            }
        }
        if !errors.is_empty() {
            return Err(validation_error(errors));
        }

        let mut pumps = Vec::with_capacity(n);
        for i in 0..n {
            match self.device_types[i].parse::<DeviceKind>() {
                Ok(device) => pumps.push(Pump {
                    name: self.names[i].clone(),
                    device,
                    ip: self.ips[i].clone(),
                    rules: PumpRules {
                        need_valves: self.need_valves[i].clone(),
                        need_valves_on: self.need_valves_on[i].clone(),
                        need_valves_off: self.need_valves_off[i].clone(),
                    },
                    keep_state: self.keep_state[i],
                }),
                Err(e) => errors.push(format!("pumps[{i}]: {e}")),
            }
        }
        if !errors.is_empty() {
            return Err(validation_error(errors));
        }

        let config = PumpConfig {
            pumps,
            db_log: self.db_log,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<&PumpConfig> for PumpConfigFile {
    fn from(config: &PumpConfig) -> Self {
        let p = &config.pumps;
        Self {
            names: p.iter().map(|p| p.name.clone()).collect(),
            device_types: p.iter().map(|p| p.device.to_string()).collect(),
            ips: p.iter().map(|p| p.ip.clone()).collect(),
            need_valves: p.iter().map(|p| p.rules.need_valves.clone()).collect(),
            need_valves_on: p.iter().map(|p| p.rules.need_valves_on.clone()).collect(),
            need_valves_off: p.iter().map(|p| p.rules.need_valves_off.clone()).collect(),
            keep_state: p.iter().map(|p| p.keep_state).collect(),
            db_log: config.db_log,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validation_error(errors: Vec<String>) -> anyhow::Error {
    anyhow::anyhow!(
        "pump config validation failed ({} error{}):\n  - {}",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" },
        errors.join("\n  - ")
    )
}

impl PumpConfig {
    /// Log-table names only have to be unique while run logging is on.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        let mut seen_tables: HashSet<String> = HashSet::new();

        for (i, p) in self.pumps.iter().enumerate() {
            let ctx = || {
                if p.name.trim().is_empty() {
                    format!("pumps[{i}]")
                } else {
                    format!("pump '{}'", p.name)
                }
            };

            if p.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            } else if self.db_log && !seen_tables.insert(table_name(&p.name)) {
                errors.push(format!(
                    "{}: name collides with another pump's log table",
                    ctx()
                ));
            }

            if p.ip.trim().is_empty() {
                errors.push(format!("{}: ip is empty", ctx()));
            } else if p.ip.contains(['/', ' ', '?', '#']) {
                errors.push(format!("{}: ip '{}' is not a host address", ctx(), p.ip));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(validation_error(errors))
        }
    }
}

// ---------------------------------------------------------------------------
// Load + save
// ---------------------------------------------------------------------------

/// Owns the location of the pump configuration file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the config; a missing file is replaced by the empty
    /// default, which is written back immediately.
    pub fn load_or_init(&self) -> Result<PumpConfig> {
        let path = &self.path;
        if !path.exists() {
            tracing::warn!(path = %path.display(), "pump config missing, writing defaults");
            let config = PumpConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read pump config: {}", path.display()))?;
        let file: PumpConfigFile = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse pump config: {}", path.display()))?;
        let config = file
            .into_config()
            .with_context(|| format!("invalid pump config: {}", path.display()))?;

        tracing::info!(pumps = config.pumps.len(), db_log = config.db_log, "pump config loaded");
        Ok(config)
    }

    /// Rewrite the whole document (temp file + rename).
    pub fn save(&self, config: &PumpConfig) -> Result<()> {
        let path = &self.path;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create config dir: {}", dir.display()))?;
        }

        let json = serde_json::to_string_pretty(&PumpConfigFile::from(config))
            .context("failed to serialize pump config")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("failed to write pump config: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace pump config: {}", path.display()))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
