//! Valve feed over MQTT.
//!
//! Irrigation controllers publish valve activity on two topics:
//!
//! - `valve/<n>/state` with `ON`/`OFF` (or `1`/`0`) for a single valve
//! - `valves/state` with a JSON array replacing the whole vector
//!
//! Everything lands in the shared [`ValveBoard`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::settings::MqttSettings;
use crate::valves::ValveBoard;

const CLIENT_ID: &str = "pump-hub";
const SINGLE_TOPIC: &str = "valve/+/state";
const VECTOR_TOPIC: &str = "valves/state";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Extract the valve index from "valve/<n>/state".
pub(crate) fn extract_valve_index(topic: &str) -> Option<usize> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "valve" && parts[2] == "state" {
        parts[1].parse().ok()
    } else {
        None
    }
}

/// Parse an "ON"/"OFF"/"1"/"0" payload (case-insensitive, trims whitespace).
pub(crate) fn parse_valve_state(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "ON" | "1" => Ok(true),
        "OFF" | "0" => Ok(false),
        _ => Err(format!("unknown valve state '{s}'")),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(u8),
}

/// Parse a JSON array of booleans or 0/1 integers.
pub(crate) fn parse_valve_vector(payload: &[u8]) -> Result<Vec<bool>, String> {
    let flags: Vec<Flag> =
        serde_json::from_slice(payload).map_err(|e| format!("bad valve vector: {e}"))?;
    flags
        .into_iter()
        .enumerate()
        .map(|(i, f)| match f {
            Flag::Bool(b) => Ok(b),
            Flag::Int(0) => Ok(false),
            Flag::Int(1) => Ok(true),
            Flag::Int(n) => Err(format!("bad valve vector: entry {i} is {n}")),
        })
        .collect()
}

/// Route one publish into the board. Returns false if it was ignored.
fn handle_publish(valves: &ValveBoard, topic: &str, payload: &[u8]) -> bool {
    if topic == VECTOR_TOPIC {
        match parse_valve_vector(payload) {
            Ok(active) => {
                debug!(valves = active.len(), "valve vector received");
                valves.replace(active)
            }
            Err(msg) => {
                warn!(topic, "{msg}");
                false
            }
        }
    } else if let Some(valve) = extract_valve_index(topic) {
        match parse_valve_state(payload) {
            Ok(on) => {
                debug!(valve, on, "valve state received");
                valves.set(valve, on)
            }
            Err(msg) => {
                warn!(topic, "{msg} (use ON/OFF)");
                false
            }
        }
    } else {
        debug!(topic, "unhandled topic");
        false
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Subscribe and forward valve messages until `cancel` fires.
pub async fn run_valve_feed(
    settings: MqttSettings,
    valves: Arc<ValveBoard>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut options = MqttOptions::new(CLIENT_ID, settings.host.clone(), settings.port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(options, 20);
    client.subscribe(SINGLE_TOPIC, QoS::AtLeastOnce).await?;
    client.subscribe(VECTOR_TOPIC, QoS::AtLeastOnce).await?;
    info!(
        host = %settings.host,
        port = settings.port,
        "subscribed to {SINGLE_TOPIC} and {VECTOR_TOPIC}"
    );

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                handle_publish(&valves, &p.topic, &p.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt connected"),
            Ok(Event::Incoming(Packet::Disconnect)) => warn!("mqtt disconnected"),
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                // No feed means no known-open valves.
                valves.clear();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    let _ = client.disconnect().await;
    info!("mqtt feed stopped");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
