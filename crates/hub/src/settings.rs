//! Hub settings: where things live and how often the loop runs.
//!
//! Read from an optional TOML file, then overridden from the environment.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const SETTINGS_ENV: &str = "HUB_SETTINGS";
pub const DEFAULT_SETTINGS_PATH: &str = "pump-hub.toml";

// ---------------------------------------------------------------------------
// Settings file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub config_path: PathBuf,
    pub web_port: u16,
    pub engine: EngineSettings,
    pub mqtt: MqttSettings,
    pub eventlog: EventLogSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub tick_ms: u64,
    pub refresh_secs: u64,
    pub online_timeout_secs: u64,
    pub device_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventLogSettings {
    pub db_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("data/advance_pump.json"),
            web_port: 8080,
            engine: EngineSettings::default(),
            mqtt: MqttSettings::default(),
            eventlog: EventLogSettings::default(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            refresh_secs: 30,
            online_timeout_secs: 45,
            device_timeout_ms: 5000,
        }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 1883,
        }
    }
}

impl Default for EventLogSettings {
    fn default() -> Self {
        Self {
            db_url: "sqlite:pump-events.db?mode=rwc".to_string(),
        }
    }
}

impl EngineSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn online_timeout(&self) -> Duration {
        Duration::from_secs(self.online_timeout_secs)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Settings {
    /// Returns `Ok(())` or an error listing every violation.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        let e = &self.engine;

        for (key, value) in [
            ("engine.tick_ms", e.tick_ms),
            ("engine.refresh_secs", e.refresh_secs),
            ("engine.online_timeout_secs", e.online_timeout_secs),
            ("engine.device_timeout_ms", e.device_timeout_ms),
        ] {
            if value == 0 {
                errors.push(format!("{key} must be positive"));
            }
        }

        if e.refresh() < e.tick() {
            errors.push(format!(
                "engine.refresh_secs ({}s) must not be shorter than engine.tick_ms ({}ms)",
                e.refresh_secs, e.tick_ms
            ));
        }
        if e.online_timeout_secs <= e.refresh_secs {
            errors.push(format!(
                "engine.online_timeout_secs ({}) must be greater than engine.refresh_secs ({})",
                e.online_timeout_secs, e.refresh_secs
            ));
        }

        if self.config_path.as_os_str().is_empty() {
            errors.push("config_path is empty".to_string());
        }
        if self.mqtt.enabled && self.mqtt.host.trim().is_empty() {
            errors.push("mqtt.host is empty".to_string());
        }
        if self.eventlog.db_url.trim().is_empty() {
            errors.push("eventlog.db_url is empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "settings validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    /// Apply environment overrides. `lookup` is `env::var` in production.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PUMP_CONFIG_PATH") {
            self.config_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("WEB_PORT") {
            self.web_port = v.parse().with_context(|| format!("WEB_PORT: bad port '{v}'"))?;
        }
        if let Some(v) = lookup("MQTT_HOST") {
            self.mqtt.host = v;
        }
        if let Some(v) = lookup("MQTT_PORT") {
            self.mqtt.port = v.parse().with_context(|| format!("MQTT_PORT: bad port '{v}'"))?;
        }
        if let Some(v) = lookup("MQTT_ENABLED") {
            self.mqtt.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("DB_URL") {
            self.eventlog.db_url = v;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parse a settings file. A missing file yields the defaults.
pub fn load_file(path: &Path) -> Result<Settings> {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("failed to parse settings: {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => {
            Err(e).with_context(|| format!("failed to read settings: {}", path.display()))
        }
    }
}

/// Load settings from `$HUB_SETTINGS` (or `pump-hub.toml`) plus the
/// environment, and validate the result.
pub fn load() -> Result<Settings> {
    let path = env::var(SETTINGS_ENV).unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
    let mut settings = load_file(Path::new(&path))?;
    settings.apply_overrides(|key| env::var(key).ok())?;
    settings
        .validate()
        .with_context(|| format!("invalid settings: {path}"))?;
    Ok(settings)
}

// ===========================================================================
// Tests
// ===========================================================================
