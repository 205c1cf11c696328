mod config;
mod driver;
mod eventlog;
mod monitor;
mod mqtt;
mod overrides;
mod reconcile;
mod rules;
mod settings;
mod state;
mod valves;
mod web;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::ConfigStore;
use driver::Drivers;
use eventlog::{PumpLog, SqliteEventLog};
use reconcile::{ReconcileOptions, Reconciler};
use state::PumpHub;
use valves::ValveBoard;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Settings ────────────────────────────────────────────────────
    let settings = settings::load()?;

    // ── Pump config ─────────────────────────────────────────────────
    let store = ConfigStore::new(&settings.config_path);
    let pump_config = store.load_or_init()?;
    if pump_config.pumps.is_empty() {
        warn!("no pumps configured in {}", store.path().display());
    }

    // ── Collaborators ───────────────────────────────────────────────
    let drivers = Drivers::http(settings.engine.device_timeout())?;
    let valves = Arc::new(ValveBoard::new());

    // The run log is optional: pumps keep running without it.
    let log = match SqliteEventLog::connect(&settings.eventlog.db_url).await {
        Ok(sink) => Some(PumpLog::new(Arc::new(sink))),
        Err(e) => {
            warn!("event log unavailable, pump runs will not be recorded: {e:#}");
            None
        }
    };

    let hub = Arc::new(PumpHub::new(
        pump_config,
        store,
        drivers,
        valves.clone(),
        log,
        settings.engine.online_timeout(),
    ));

    info!(pumps = hub.pump_count().await, "pump hub ready");

    // ── Tasks ───────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let updater = hub.watch_valves(cancel.clone());

    let reconciler = Reconciler::new(
        hub.clone(),
        ReconcileOptions {
            tick: settings.engine.tick(),
            refresh: settings.engine.refresh(),
        },
    );
    let loop_task = tokio::spawn(reconciler.run(cancel.clone()));

    let feed = if settings.mqtt.enabled {
        let mqtt_settings = settings.mqtt.clone();
        let feed_valves = valves.clone();
        let feed_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = mqtt::run_valve_feed(mqtt_settings, feed_valves, feed_cancel).await {
                error!("mqtt feed failed: {e:#}");
            }
        }))
    } else {
        info!("mqtt disabled, valves only change through the api");
        None
    };

    let web_state = web::AppState {
        hub: hub.clone(),
        valves,
    };
    let web_cancel = cancel.clone();
    let web_port = settings.web_port;
    let mut web_task =
        tokio::spawn(async move { web::serve(web_state, web_port, web_cancel).await });

    // ── Shutdown ────────────────────────────────────────────────────
    let finished = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("failed to listen for ctrl-c: {e}");
            }
            info!("shutting down");
            None
        }
        res = &mut web_task => Some(res),
    };
    cancel.cancel();
    let web_result = match finished {
        Some(res) => res,
        None => web_task.await,
    };

    let _ = updater.await;
    let _ = loop_task.await;
    if let Some(feed) = feed {
        let _ = feed.await;
    }
    info!("pump hub stopped");
    web_result?
}
