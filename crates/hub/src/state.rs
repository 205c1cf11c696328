//! The hub context: pump configuration, per-pump runtime state, and the
//! collaborators (drivers, valve input, config store, run log) that the
//! reconciliation loop and the operator surface share.
//!
//! Two locks, always taken in this order when both are needed:
//!
//! 1. `config` - operator-edited pump list (rarely written)
//! 2. `runtime` - desired/previous vectors, overrides, observations
//!
//! Adding or deleting a pump holds both write locks for the whole resize,
//! so readers never see the two lists with different lengths. No device call
//! is ever made while either lock is held.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigStore, Pump, PumpConfig, PumpSpec};
use crate::driver::{DeviceKind, Drivers};
use crate::eventlog::PumpLog;
use crate::monitor::{self, Liveness, Observation, Switched};
use crate::overrides::OverrideMode;
use crate::rules;
use crate::valves::ValveSource;

pub type SharedHub = Arc<PumpHub>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HubError {
    #[error("pump {0} does not exist")]
    IndexOutOfRange(usize),

    #[error("{0:#}")]
    Validation(anyhow::Error),

    #[error("{0:#}")]
    Persist(anyhow::Error),
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// Runtime state of one pump, index-aligned with the configured pump list.
#[derive(Debug, Clone)]
pub struct PumpRuntime {
    /// Output of the valve rules.
    pub desired: bool,
    /// `desired` as seen by the last reconciliation tick.
    pub previous: bool,
    pub observation: Observation,
    pub mode: OverrideMode,
    /// `mode` as seen by the last reconciliation tick.
    pub last_mode: OverrideMode,
}

impl PumpRuntime {
    fn new(now: Instant) -> Self {
        Self {
            desired: false,
            previous: false,
            observation: Observation::new(now),
            mode: OverrideMode::Auto,
            last_mode: OverrideMode::Auto,
        }
    }
}

#[derive(Debug, Default)]
pub struct RuntimeState {
    /// Bumped on every resize of the pump list.
    pub generation: u64,
    pub pumps: Vec<PumpRuntime>,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Everything a reconciliation tick needs about one pump.
#[derive(Debug, Clone)]
pub struct PumpSnapshot {
    pub name: String,
    pub device: DeviceKind,
    pub ip: String,
    pub keep_state: bool,
    pub desired: bool,
    pub previous: bool,
    pub mode: OverrideMode,
    pub last_mode: OverrideMode,
}

#[derive(Debug, Clone)]
pub struct TickSnapshot {
    pub generation: u64,
    pub db_log: bool,
    pub pumps: Vec<PumpSnapshot>,
}

/// Pump as reported to the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct PumpView {
    pub id: usize,
    pub name: String,
    pub device_type: DeviceKind,
    pub ip: String,
    pub need_valves: Vec<i64>,
    pub need_valves_on: Vec<i64>,
    pub need_valves_off: Vec<i64>,
    pub keep_state: bool,
    pub desired: bool,
    pub mode: OverrideMode,
    pub online: Liveness,
    pub switched: Switched,
    pub last_seen_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeOutcome {
    pub mode: OverrideMode,
    /// Mode the UI should offer next.
    pub next: OverrideMode,
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

pub struct PumpHub {
    config: RwLock<PumpConfig>,
    runtime: RwLock<RuntimeState>,
    store: ConfigStore,
    drivers: Drivers,
    valves: Arc<dyn ValveSource>,
    log: Option<PumpLog>,
    online_timeout: Duration,
}

impl PumpHub {
    pub fn new(
        config: PumpConfig,
        store: ConfigStore,
        drivers: Drivers,
        valves: Arc<dyn ValveSource>,
        log: Option<PumpLog>,
        online_timeout: Duration,
    ) -> Self {
        let now = Instant::now();
        let active = valves.snapshot();
        let pumps = config
            .pumps
            .iter()
            .map(|p| PumpRuntime {
                desired: rules::compute(&active, &p.rules),
                ..PumpRuntime::new(now)
            })
            .collect();

        Self {
            config: RwLock::new(config),
            runtime: RwLock::new(RuntimeState {
                generation: 0,
                pumps,
            }),
            store,
            drivers,
            valves,
            log,
            online_timeout,
        }
    }

    pub fn drivers(&self) -> &Drivers {
        &self.drivers
    }

    pub fn log(&self) -> Option<&PumpLog> {
        self.log.as_ref()
    }

    // -- Reconciliation support ------------------------------------------------

    /// Copy everything a tick needs; both locks are released on return.
    pub async fn snapshot(&self) -> TickSnapshot {
        let config = self.config.read().await;
        let rt = self.runtime.read().await;

        let pumps = config
            .pumps
            .iter()
            .zip(rt.pumps.iter())
            .map(|(p, r)| PumpSnapshot {
                name: p.name.clone(),
                device: p.device,
                ip: p.ip.clone(),
                keep_state: p.keep_state,
                desired: r.desired,
                previous: r.previous,
                mode: r.mode,
                last_mode: r.last_mode,
            })
            .collect();

        TickSnapshot {
            generation: rt.generation,
            db_log: config.db_log,
            pumps,
        }
    }

    /// Store the desired vector and modes a tick acted on, for the next
    /// tick's edge detection. Dropped if the pump list was resized since the
    /// snapshot was taken.
    pub async fn commit_tick(&self, snap: &TickSnapshot) -> bool {
        let mut rt = self.runtime.write().await;
        if rt.generation != snap.generation {
            debug!(
                snapshot = snap.generation,
                current = rt.generation,
                "pump list changed during tick, dropping tick state"
            );
            return false;
        }
        for (r, s) in rt.pumps.iter_mut().zip(snap.pumps.iter()) {
            r.previous = s.desired;
            r.last_mode = s.mode;
        }
        true
    }

    /// Record a successful status query.
    pub async fn record_status(&self, generation: u64, index: usize, on: bool) {
        let mut rt = self.runtime.write().await;
        if rt.generation != generation {
            return;
        }
        if let Some(r) = rt.pumps.get_mut(index) {
            r.observation.seen(Instant::now(), on);
        }
    }

    /// Re-run the valve rules for every pump.
    pub async fn recompute_desired(&self) {
        let active = self.valves.snapshot();
        let config = self.config.read().await;
        let mut rt = self.runtime.write().await;

        let desired = rules::compute_all(&active, config.pumps.iter().map(|p| &p.rules));
        for (i, (r, d)) in rt.pumps.iter_mut().zip(desired).enumerate() {
            if r.desired != d {
                debug!(pump = i, desired = d, "desired state changed");
            }
            r.desired = d;
        }
    }

    /// Recompute desired state whenever the valve source reports a change.
    pub fn watch_valves(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let notify = Arc::new(Notify::new());
        let waker = Arc::clone(&notify);
        self.valves.subscribe(Box::new(move || waker.notify_one()));

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = notify.notified() => hub.recompute_desired().await,
                }
            }
        })
    }

    // -- Status queries --------------------------------------------------------

    pub async fn liveness(&self, index: usize) -> Liveness {
        let rt = self.runtime.read().await;
        monitor::liveness(
            rt.pumps.get(index).map(|r| &r.observation),
            Instant::now(),
            self.online_timeout,
        )
    }

    pub async fn switched(&self, index: usize) -> Switched {
        let rt = self.runtime.read().await;
        monitor::switched(rt.pumps.get(index).map(|r| &r.observation))
    }

    pub async fn pump_count(&self) -> usize {
        self.config.read().await.pumps.len()
    }

    pub async fn db_log(&self) -> bool {
        self.config.read().await.db_log
    }

    pub async fn pump_views(&self) -> Vec<PumpView> {
        let config = self.config.read().await;
        let rt = self.runtime.read().await;
        let now = Instant::now();

        config
            .pumps
            .iter()
            .zip(rt.pumps.iter())
            .enumerate()
            .map(|(id, (p, r))| PumpView {
                id,
                name: p.name.clone(),
                device_type: p.device,
                ip: p.ip.clone(),
                need_valves: p.rules.need_valves.clone(),
                need_valves_on: p.rules.need_valves_on.clone(),
                need_valves_off: p.rules.need_valves_off.clone(),
                keep_state: p.keep_state,
                desired: r.desired,
                mode: r.mode,
                online: monitor::liveness(Some(&r.observation), now, self.online_timeout),
                switched: monitor::switched(Some(&r.observation)),
                last_seen_secs: now
                    .saturating_duration_since(r.observation.last_seen_online)
                    .as_secs(),
            })
            .collect()
    }

    // -- Operator edits --------------------------------------------------------

    /// Validate and write `candidate`. The file is written on the blocking
    /// pool, but callers hold the config write lock, so readers (including
    /// the next tick's snapshot) wait for the disk.
    async fn persist(&self, candidate: &PumpConfig) -> Result<(), HubError> {
        candidate.validate().map_err(HubError::Validation)?;
        let store = self.store.clone();
        let candidate = candidate.clone();
        tokio::task::spawn_blocking(move || store.save(&candidate))
            .await
            .map_err(|e| {
                HubError::Persist(anyhow::Error::new(e).context("config save task failed"))
            })?
            .map_err(HubError::Persist)
    }

    /// Append a pump; returns its index.
    pub async fn add_pump(&self, spec: PumpSpec) -> Result<usize, HubError> {
        let pump = spec.into_pump().map_err(HubError::Validation)?;
        let index = {
            let mut config = self.config.write().await;
            let mut candidate = config.clone();
            candidate.pumps.push(pump);
            self.persist(&candidate).await?;

            let mut rt = self.runtime.write().await;
            rt.pumps.push(PumpRuntime::new(Instant::now()));
            rt.generation += 1;
            *config = candidate;
            config.pumps.len() - 1
        };

        info!(pump = index, "pump added");
        self.recompute_desired().await;
        Ok(index)
    }

    /// Replace the configuration of an existing pump.
    pub async fn update_pump(&self, index: usize, spec: PumpSpec) -> Result<(), HubError> {
        let pump = spec.into_pump().map_err(HubError::Validation)?;
        let (old_name, new_name, db_log) = {
            let mut config = self.config.write().await;
            let mut candidate = config.clone();
            let slot = candidate
                .pumps
                .get_mut(index)
                .ok_or(HubError::IndexOutOfRange(index))?;
            let old: Pump = std::mem::replace(slot, pump);
            let new_name = slot.name.clone();
            self.persist(&candidate).await?;
            *config = candidate;
            (old.name, new_name, config.db_log)
        };

        info!(pump = index, name = %new_name, "pump updated");
        if db_log && old_name != new_name {
            if let Some(log) = &self.log {
                log.pump_renamed(&old_name, &new_name).await;
            }
        }
        self.recompute_desired().await;
        Ok(())
    }

    /// Remove a pump; every later pump moves down one index.
    pub async fn delete_pump(&self, index: usize) -> Result<(), HubError> {
        {
            let mut config = self.config.write().await;
            if index >= config.pumps.len() {
                return Err(HubError::IndexOutOfRange(index));
            }
            let mut candidate = config.clone();
            candidate.pumps.remove(index);
            self.persist(&candidate).await?;

            let mut rt = self.runtime.write().await;
            if index < rt.pumps.len() {
                rt.pumps.remove(index);
            }
            rt.generation += 1;
            *config = candidate;
        }

        info!(pump = index, "pump deleted");
        Ok(())
    }

    pub async fn set_db_log(&self, enabled: bool) -> Result<(), HubError> {
        let mut config = self.config.write().await;
        let mut candidate = config.clone();
        candidate.db_log = enabled;
        self.persist(&candidate).await?;
        *config = candidate;
        info!(enabled, "pump run logging toggled");
        Ok(())
    }

    // -- Manual mode -----------------------------------------------------------

    /// Store an override, switch the relay right away, then re-poll the
    /// device. Device failures are logged; the override stays in effect and
    /// the loop keeps asserting it.
    pub async fn set_mode(&self, index: usize, mode: OverrideMode) -> Result<ModeOutcome, HubError> {
        let (device, ip, target, generation) = {
            let config = self.config.read().await;
            let mut rt = self.runtime.write().await;
            let pump = config.pumps.get(index).ok_or(HubError::IndexOutOfRange(index))?;
            let generation = rt.generation;
            let r = rt
                .pumps
                .get_mut(index)
                .ok_or(HubError::IndexOutOfRange(index))?;
            r.mode = mode;
            let target = match mode {
                OverrideMode::ForcedOn => true,
                OverrideMode::ForcedOff => false,
                OverrideMode::Auto => r.desired,
            };
            (pump.device, pump.ip.clone(), target, generation)
        };

        info!(pump = index, %mode, "manual mode set");
        let driver = self.drivers.get(device);
        if let Err(e) = driver.set_relay(&ip, target).await {
            warn!(pump = index, ip = %ip, kind = ?e.kind(), "manual switch failed: {e}");
        }
        match driver.status(&ip).await {
            Ok(status) => self.record_status(generation, index, status.on).await,
            Err(e) => warn!(pump = index, ip = %ip, kind = ?e.kind(), "status poll failed: {e}"),
        }

        Ok(ModeOutcome {
            mode,
            next: mode.next(),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
