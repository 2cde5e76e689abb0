use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use matchday_core::config::ApiConfig;
use thiserror::Error;
use tracing::{debug, warn};

/// Transport-level faults: the call went out (or tried to) but no usable
/// HTTP response came back.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Raw HTTP response. Interpreting the body is the executor's job.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound access to the sports-data API.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// `GET {base}/{endpoint}?{params}`.
    async fn get(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ApiResponse, TransportError>;

    /// Whether a credential is configured. Without one no call can succeed.
    fn has_credential(&self) -> bool;

    /// Upper bound for a single call.
    fn timeout(&self) -> Duration;
}

/// reqwest-backed transport with the API key sent as a header.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    key_header: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_header: config.key_header.clone(),
            api_key: config.resolved_api_key(),
            timeout,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn get(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ApiResponse, TransportError> {
        debug!(%endpoint, ?params, "calling sports API");

        let mut req = self.client.get(self.url(endpoint)).query(params);
        if let Some(key) = &self.api_key {
            req = req.header(self.key_header.as_str(), key.as_str());
        }

        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Body(e.to_string())
            }
        })?;

        if !(200..300).contains(&status) {
            warn!(%endpoint, status, "sports API returned an error status");
        }
        Ok(ApiResponse { status, body })
    }

    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String, timeout_secs: u64) -> ApiConfig {
        ApiConfig {
            base_url,
            api_key: Some("test-key".into()),
            key_header: "x-apisports-key".into(),
            timeout_secs,
        }
    }

    #[tokio::test]
    async fn sends_key_header_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fixtures"))
            .and(header("x-apisports-key", "test-key"))
            .and(query_param("league", "39"))
            .and(query_param("season", "2025"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"response":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&config(format!("{}/", server.uri()), 5)).unwrap();
        let mut params = BTreeMap::new();
        params.insert("league".to_string(), "39".to_string());
        params.insert("season".to_string(), "2025".to_string());

        let resp = transport.get("fixtures", &params).await.unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.body, r#"{"response":[]}"#);
        assert!(transport.has_credential());
    }

    #[tokio::test]
    async fn error_status_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&config(server.uri(), 5)).unwrap();
        let resp = transport.get("teams", &BTreeMap::new()).await.unwrap();
        assert_eq!(resp.status, 429);
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/standings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{}")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&config(server.uri(), 1)).unwrap();
        let err = transport.get("standings", &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "{err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_fault() {
        // Port 9 (discard) is essentially never listening on test machines.
        let transport = HttpTransport::new(&config("http://127.0.0.1:9".into(), 2)).unwrap();
        let err = transport.get("leagues", &BTreeMap::new()).await.unwrap_err();
        assert!(
            matches!(
                err,
                TransportError::Connect(_) | TransportError::Http(_) | TransportError::Timeout(_)
            ),
            "{err:?}"
        );
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let mut cfg = config("http://localhost".into(), 5);
        cfg.api_key = Some("   ".into());
        assert!(!HttpTransport::new(&cfg).unwrap().has_credential());
    }
}
