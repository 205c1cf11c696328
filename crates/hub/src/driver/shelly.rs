//! Shelly 1 relay over its local HTTP API.
//!
//! - `GET http://<ip>/relay/0?turn=on|off` switches the relay.
//! - `GET http://<ip>/status` reports `relays[0].ison`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use serde::Deserialize;

use super::{DeviceDriver, DeviceError, RelayAck, RelayStatus};

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Deserialize)]
struct RelayBody {
    ison: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    relays: Vec<RelayBody>,
}

pub struct ShellyDriver {
    client: reqwest::Client,
}

impl ShellyDriver {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("pump-hub/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, ip: &str, path: &str) -> Result<T, DeviceError> {
        let url = format!("http://{ip}{path}");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| classify(ip, &e))?;
        resp.json::<T>().await.map_err(|e| classify(ip, &e))
    }
}

/// Map a transport error onto the device error taxonomy.
fn classify(ip: &str, e: &reqwest::Error) -> DeviceError {
    let ip = ip.to_string();
    if e.is_timeout() {
        DeviceError::Timeout { ip }
    } else if e.is_redirect() {
        DeviceError::TooManyRedirects { ip }
    } else {
        DeviceError::Other {
            ip,
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl DeviceDriver for ShellyDriver {
    async fn set_relay(&self, ip: &str, on: bool) -> Result<RelayAck, DeviceError> {
        let turn = if on { "on" } else { "off" };
        let body: RelayBody = self.get(ip, &format!("/relay/0?turn={turn}")).await?;
        Ok(RelayAck { on: body.ison })
    }

    async fn status(&self, ip: &str) -> Result<RelayStatus, DeviceError> {
        let body: StatusBody = self.get(ip, "/status").await?;
        match body.relays.first().and_then(|r| r.ison) {
            Some(on) => Ok(RelayStatus { on }),
            None => Err(DeviceError::Other {
                ip: ip.to_string(),
                message: "status response has no relays[0].ison".into(),
            }),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NetErrorKind;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(timeout: Duration) -> (MockServer, ShellyDriver, String) {
        let server = MockServer::start().await;
        let driver = ShellyDriver::new(timeout).unwrap();
        // The device address is host:port, without scheme.
        let ip = server.address().to_string();
        (server, driver, ip)
    }

    // -- set_relay ------------------------------------------------------------

    #[tokio::test]
    async fn set_relay_on_sends_turn_on() {
        let (server, driver, ip) = setup(Duration::from_secs(2)).await;
        Mock::given(method("GET"))
            .and(path("/relay/0"))
            .and(query_param("turn", "on"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ison": true, "has_timer": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = driver.set_relay(&ip, true).await.unwrap();
        assert_eq!(ack.on, Some(true));
    }

    #[tokio::test]
    async fn set_relay_off_sends_turn_off() {
        let (server, driver, ip) = setup(Duration::from_secs(2)).await;
        Mock::given(method("GET"))
            .and(path("/relay/0"))
            .and(query_param("turn", "off"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ison": false })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = driver.set_relay(&ip, false).await.unwrap();
        assert_eq!(ack.on, Some(false));
    }

    #[tokio::test]
    async fn set_relay_ack_without_state_is_accepted() {
        let (server, driver, ip) = setup(Duration::from_secs(2)).await;
        Mock::given(method("GET"))
            .and(path("/relay/0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let ack = driver.set_relay(&ip, true).await.unwrap();
        assert_eq!(ack.on, None);
    }

    // -- status ---------------------------------------------------------------

    #[tokio::test]
    async fn status_reads_first_relay() {
        let (server, driver, ip) = setup(Duration::from_secs(2)).await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "wifi_sta": { "connected": true },
                "relays": [ { "ison": true, "source": "http" } ],
                "uptime": 1234
            })))
            .mount(&server)
            .await;

        assert_eq!(driver.status(&ip).await.unwrap(), RelayStatus { on: true });
    }

    #[tokio::test]
    async fn status_without_relays_is_other_error() {
        let (server, driver, ip) = setup(Duration::from_secs(2)).await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "relays": [] })))
            .mount(&server)
            .await;

        let err = driver.status(&ip).await.unwrap_err();
        assert_eq!(err.kind(), NetErrorKind::Other);
    }

    // -- error mapping --------------------------------------------------------

    #[tokio::test]
    async fn server_error_maps_to_other() {
        let (server, driver, ip) = setup(Duration::from_secs(2)).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = driver.set_relay(&ip, true).await.unwrap_err();
        assert_eq!(err.kind(), NetErrorKind::Other);
    }

    #[tokio::test]
    async fn garbage_body_maps_to_other() {
        let (server, driver, ip) = setup(Duration::from_secs(2)).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = driver.status(&ip).await.unwrap_err();
        assert_eq!(err.kind(), NetErrorKind::Other);
    }

    #[tokio::test]
    async fn slow_device_maps_to_timeout() {
        let (server, driver, ip) = setup(Duration::from_millis(100)).await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ison": true }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = driver.set_relay(&ip, true).await.unwrap_err();
        assert_eq!(err.kind(), NetErrorKind::Timeout);
    }

    #[tokio::test]
    async fn redirect_loop_maps_to_too_many_redirects() {
        let (server, driver, ip) = setup(Duration::from_secs(2)).await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/status"))
            .mount(&server)
            .await;

        let err = driver.status(&ip).await.unwrap_err();
        assert_eq!(err.kind(), NetErrorKind::TooManyRedirects);
    }

    #[tokio::test]
    async fn unreachable_device_is_an_error_not_a_panic() {
        let driver = ShellyDriver::new(Duration::from_millis(200)).unwrap();
        // Port 9 (discard) on localhost is almost never listening.
        let err = driver.status("127.0.0.1:9").await.unwrap_err();
        assert!(matches!(
            err.kind(),
            NetErrorKind::Other | NetErrorKind::Timeout
        ));
    }
}
