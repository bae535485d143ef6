pub mod models;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::SenseBoxConfig;

use self::models::DevicePayload;

/// Read access to the remote sensor API.
#[async_trait]
pub trait SensorApi: Send + Sync {
    /// Fetch and decode the payload for one device.
    ///
    /// Transport errors, non-2xx statuses and malformed JSON all surface as
    /// `Err`; callers decide whether that is fatal.
    async fn fetch_device(&self, device_id: &str) -> Result<DevicePayload>;

    /// Reachability check. Any successful fetch counts, whether
    /// or not the payload carries a usable measurement.
    async fn is_accessible(&self, device_id: &str) -> bool {
        self.fetch_device(device_id).await.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct SenseBoxClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: String,
}

impl SenseBoxClient {
    pub fn new(config: &SenseBoxConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .context("Failed to build senseBox HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: config.api_base.trim_end_matches('/').to_owned(),
            }),
        })
    }

    fn device_url(&self, device_id: &str) -> String {
        format!("{}/devices/{}", self.inner.base_url, device_id)
    }
}

#[async_trait]
impl SensorApi for SenseBoxClient {
    async fn fetch_device(&self, device_id: &str) -> Result<DevicePayload> {
        let url = self.device_url(device_id);
        debug!(device_id = %device_id, url = %url, "Fetching senseBox device");

        let response = self
            .inner
            .http
            .get(&url)
            .send()
            .await
            .context("senseBox request failed")?
            .error_for_status()
            .context("senseBox endpoint returned error status")?;

        debug!(
            device_id = %device_id,
            status = %response.status(),
            content_length = ?response.content_length(),
            "Received senseBox response"
        );

        let bytes = response
            .bytes()
            .await
            .context("Failed to read senseBox response body")?;

        serde_json::from_slice::<DevicePayload>(&bytes)
            .context("Failed to deserialize senseBox device payload")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{extract::Path, http::StatusCode, response::IntoResponse, routing::get, Router};
    use tokio::net::TcpListener;

    use super::*;

    /// Serves `/devices/{id}` on an ephemeral loopback port and returns its base URL.
    ///
    /// `broken` answers 500, `garbled` answers 200 with a non-JSON body, `slow`
    /// stalls for 5s before answering, and any other id gets a valid payload.
    async fn spawn_device_server() -> String {
        async fn device(Path(id): Path<String>) -> impl IntoResponse {
            match id.as_str() {
                "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "upstream failure".to_owned()),
                "garbled" => (StatusCode::OK, "<html>maintenance</html>".to_owned()),
                other => {
                    if other == "slow" {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    let body = serde_json::json!({
                        "sensors": [{
                            "title": "Temperatur",
                            "lastMeasurement": { "value": "21.5", "createdAt": "2024-05-01T12:00:00.000Z" }
                        }]
                    });
                    (StatusCode::OK, body.to_string())
                }
            }
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/devices/{id}", get(device));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn local_client() -> SenseBoxClient {
        let config = SenseBoxConfig {
            api_base: spawn_device_server().await,
            connect_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(200),
            ..SenseBoxConfig::default()
        };
        SenseBoxClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn valid_payload_yields_measurement() {
        let client = local_client().await;

        let payload = client.fetch_device("good").await.unwrap();
        let m = payload.measurement("Temperatur").unwrap();
        assert_eq!(m.value, 21.5);
        assert!(client.is_accessible("good").await);
    }

    #[tokio::test]
    async fn server_error_status_is_an_error() {
        let client = local_client().await;

        let err = client.fetch_device("broken").await.unwrap_err();
        assert!(format!("{err:#}").contains("error status"));
        assert!(!client.is_accessible("broken").await);
    }

    #[tokio::test]
    async fn non_json_body_is_an_error() {
        let client = local_client().await;

        let err = client.fetch_device("garbled").await.unwrap_err();
        assert!(format!("{err:#}").contains("deserialize"));
        assert!(!client.is_accessible("garbled").await);
    }

    #[tokio::test]
    async fn stalled_response_hits_read_timeout() {
        let client = local_client().await;

        let started = std::time::Instant::now();
        assert!(client.fetch_device("slow").await.is_err());
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!client.is_accessible("slow").await);
    }

    #[test]
    fn device_url_strips_trailing_slash() {
        let config = SenseBoxConfig {
            api_base: "http://sensors.local/".into(),
            ..SenseBoxConfig::default()
        };
        let client = SenseBoxClient::new(&config).unwrap();
        assert_eq!(client.device_url("abc"), "http://sensors.local/devices/abc");
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error_not_a_panic() {
        let config = SenseBoxConfig {
            // Port 9 (discard) on loopback is refused immediately.
            api_base: "http://127.0.0.1:9".into(),
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(200),
            ..SenseBoxConfig::default()
        };
        let client = SenseBoxClient::new(&config).unwrap();

        assert!(client.fetch_device("abc").await.is_err());
        assert!(!client.is_accessible("abc").await);
    }
}
