//! Client for the Python backend service.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::handle::HttpStream;
use crate::Result;

/// Ports the backend listens on, in probe order.
pub const BACKEND_PORTS: [u16; 2] = [5337, 5437];

/// URL used when no backend answers the probe.
pub const FALLBACK_URL: &str = "http://127.0.0.1:5437";

/// Path of the one-shot action endpoint.
pub const ACTION_PATH: &str = "/api/studio/action";

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Resolve the backend base URL.
///
/// A configured URL wins. Otherwise the local ports are probed in order
/// and the first one accepting a TCP connection is used.
pub async fn resolve_url(configured: Option<&str>) -> String {
    if let Some(url) = configured {
        return url.trim_end_matches('/').to_string();
    }
    for port in BACKEND_PORTS {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        if let Ok(Ok(_)) = tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await {
            debug!(port, "backend detected");
            return format!("http://127.0.0.1:{}", port);
        }
    }
    warn!("no backend answered on {:?}, using {}", BACKEND_PORTS, FALLBACK_URL);
    FALLBACK_URL.to_string()
}

/// HTTP client bound to one backend base URL.
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        let base_url: String = base_url.into();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            request_timeout,
        })
    }

    /// Resolve the URL with [`resolve_url`] and build a client for it.
    pub async fn detect(configured: Option<&str>, request_timeout: Duration) -> Result<Self> {
        let url = resolve_url(configured).await;
        info!(backend = %url, "using backend");
        Self::new(url, request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body and return the JSON reply.
    ///
    /// Failures are folded into `{success: false, error}` so callers can
    /// hand the value straight back to the renderer.
    pub async fn post_json(&self, path: &str, body: &Value) -> Value {
        let response = self
            .client
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                debug!(%path, "backend request failed: {}", e);
                return json!({ "success": false, "error": format!("Connection error: {}", e) });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return json!({
                "success": false,
                "error": format!("HTTP {}: {}", status.as_u16(), text),
            });
        }

        match response.json::<Value>().await {
            Ok(value) => value,
            Err(e) => json!({ "success": false, "error": format!("Invalid response: {}", e) }),
        }
    }

    /// Run a one-shot studio action.
    pub async fn action(&self, action: &str, args: &Value, window_id: Option<&str>) -> Value {
        let mut body = json!({ "action": action, "args": args });
        if let Some(window_id) = window_id {
            body["window_id"] = Value::String(window_id.to_string());
        }
        self.post_json(ACTION_PATH, &body).await
    }

    /// POST a JSON body and stream the response.
    pub async fn open_stream(&self, path: &str, body: &Value) -> Result<HttpStream> {
        HttpStream::open(self.client.post(self.url(path)).json(body)).await
    }
}
