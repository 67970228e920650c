//! HTTP client module for posting sample batches to the collector.
//!
//! The client issues exactly one request per call; retry policy lives in
//! the delivery engine. Connection pooling comes from reqwest's internal
//! pool, and every request carries explicit connect and read timeouts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use crate::config::Config;
use crate::sample::Batch;

/// Content type of the ingest request body.
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Most bytes of an error response body kept for the error message.
const ERROR_BODY_LIMIT: usize = 512;

/// Errors that can occur during HTTP client operations.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed before a response arrived
    Request(reqwest::Error),

    /// Collector returned something other than 200
    Status { code: StatusCode, message: String },

    /// Connect or read timeout elapsed
    Timeout,

    /// Batch could not be encoded as JSON
    Encode(String),

    /// Client configuration error
    Config(String),
}

impl ClientError {
    /// Whether the failure looks like a network problem rather than a
    /// collector-side rejection.
    pub fn is_connectivity(&self) -> bool {
        match self {
            ClientError::Request(e) => e.is_connect() || e.is_timeout(),
            ClientError::Timeout => true,
            ClientError::Status { .. } | ClientError::Encode(_) | ClientError::Config(_) => false,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Collector error ({}): {}", code, message)
            }
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Encode(e) => write!(f, "Failed to encode batch: {}", e),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// Build a reqwest client with the collector's connect and read timeouts.
///
/// `read_timeout` resets on every received chunk, so the whole request,
/// body included, is additionally capped at `connect_timeout + read_timeout`.
pub(crate) fn build_http_client(
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, ClientError> {
    Client::builder()
        .timeout(connect_timeout + read_timeout)
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .pool_max_idle_per_host(2)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| ClientError::Config(e.to_string()))
}

/// Destination for sample batches.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Deliver one batch in a single attempt. `Ok` means HTTP 200.
    async fn post_batch(&self, batch: &Batch) -> Result<(), ClientError>;
}

/// reqwest-backed collector posting to `{base}/api/cellinfo`.
///
/// # Example
///
/// ```no_run
/// use cell_uplink::client::{Collector, HttpCollector};
/// use cell_uplink::config::Config;
/// use cell_uplink::sample::Batch;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::default();
///     let collector = HttpCollector::new(&config).expect("Failed to create client");
///
///     let batch = Batch::new(Vec::new());
///     if let Err(e) = collector.post_batch(&batch).await {
///         eprintln!("Failed to send: {}", e);
///     }
/// }
/// ```
pub struct HttpCollector {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// URL for the ingest endpoint
    ingest_url: String,
}

impl HttpCollector {
    /// Create a collector client from the service configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(
            config.ingest_url.clone(),
            config.connect_timeout,
            config.read_timeout,
        )
    }

    /// Create a collector client with custom settings.
    pub fn with_settings(
        ingest_url: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(connect_timeout, read_timeout)?,
            ingest_url: ingest_url.into(),
        })
    }

    /// Get the configured ingest URL.
    pub fn ingest_url(&self) -> &str {
        &self.ingest_url
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn post_batch(&self, batch: &Batch) -> Result<(), ClientError> {
        let body = batch.to_json().map_err(|e| ClientError::Encode(e.to_string()))?;

        debug!(
            batch_id = %batch.batch_id,
            batch_size = batch.len(),
            url = %self.ingest_url,
            "Posting sample batch"
        );

        let response = self
            .client
            .post(&self.ingest_url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        Err(ClientError::Status {
            code: status,
            message: read_error_body(response).await,
        })
    }
}

/// Read at most [`ERROR_BODY_LIMIT`] bytes of an error response.
async fn read_error_body(mut response: Response) -> String {
    let mut body = Vec::new();
    while body.len() < ERROR_BODY_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Gave up reading error body");
                break;
            }
        }
    }
    body.truncate(ERROR_BODY_LIMIT);

    if body.is_empty() {
        return "Unknown error".to_string();
    }
    String::from_utf8_lossy(&body).into_owned()
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Throwaway axum collector for exercising the reqwest paths.

    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::body::{Body, Bytes};
    use axum::extract::State;
    use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
    use axum::response::Response;
    use axum::Router;
    use futures::stream::{self, StreamExt};
    use tokio::net::TcpListener;

    /// A request captured by the test server.
    #[derive(Debug, Clone)]
    pub struct Captured {
        pub method: Method,
        pub path: String,
        pub content_type: Option<String>,
        pub body: Bytes,
    }

    #[derive(Clone)]
    struct Recorder {
        status: StatusCode,
        captured: Arc<Mutex<Vec<Captured>>>,
    }

    async fn record(
        State(recorder): State<Recorder>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        recorder.captured.lock().unwrap().push(Captured {
            method,
            path: uri.path().to_string(),
            content_type,
            body,
        });
        recorder.status
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Answer every request with `status`, recording what was sent.
    pub async fn spawn(status: u16) -> (String, Arc<Mutex<Vec<Captured>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            status: StatusCode::from_u16(status).unwrap(),
            captured: captured.clone(),
        };
        let app = Router::new().fallback(record).with_state(recorder);
        (serve(app).await, captured)
    }

    /// Answer with `status` and a `body_len` byte body that trickles out
    /// one byte every `byte_interval`.
    pub async fn spawn_slow(status: u16, body_len: usize, byte_interval: Duration) -> String {
        let status = StatusCode::from_u16(status).unwrap();
        let app = Router::new().fallback(move || async move {
            let trickle = stream::iter(0..body_len).then(move |_| async move {
                tokio::time::sleep(byte_interval).await;
                Ok::<_, std::io::Error>(Bytes::from_static(b"x"))
            });
            Response::builder()
                .status(status)
                .header(header::CONTENT_LENGTH, body_len)
                .body(Body::from_stream(trickle))
                .unwrap()
        });
        serve(app).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::fixtures::lte_samples;
    use crate::sample::Sample;

    fn settings(url: String) -> HttpCollector {
        HttpCollector::with_settings(url, Duration::from_secs(2), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Timeout;
        assert_eq!(format!("{}", err), "Request timed out");

        let err = ClientError::Status {
            code: StatusCode::SERVICE_UNAVAILABLE,
            message: "maintenance".to_string(),
        };
        assert!(format!("{}", err).contains("503"));
        assert!(format!("{}", err).contains("maintenance"));
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(ClientError::Timeout.is_connectivity());
        assert!(!ClientError::Status {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            message: String::new(),
        }
        .is_connectivity());
        assert!(!ClientError::Encode("bad".to_string()).is_connectivity());
    }

    #[test]
    fn test_client_creation() {
        let config = Config::default();
        let collector = HttpCollector::new(&config).unwrap();
        assert_eq!(collector.ingest_url(), "http://localhost:8080/api/cellinfo");
    }

    #[tokio::test]
    async fn test_post_batch_sends_json_array() {
        let (base, captured) = test_server::spawn(200).await;
        let collector = settings(format!("{}/api/cellinfo", base));
        let batch = Batch::new(lte_samples(3));

        collector.post_batch(&batch).await.expect("200 should succeed");

        let requests = captured.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, axum::http::Method::POST);
        assert_eq!(requests[0].path, "/api/cellinfo");
        assert_eq!(requests[0].content_type.as_deref(), Some(JSON_CONTENT_TYPE));

        let decoded: Vec<Sample> = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(decoded, batch.samples);
    }

    #[tokio::test]
    async fn test_non_200_is_status_error() {
        let (base, _captured) = test_server::spawn(503).await;
        let collector = settings(format!("{}/api/cellinfo", base));

        let err = collector
            .post_batch(&Batch::new(lte_samples(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { code, .. } if code == StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_other_success_codes_are_failures() {
        let (base, _captured) = test_server::spawn(202).await;
        let collector = settings(format!("{}/api/cellinfo", base));

        let result = collector.post_batch(&Batch::new(lte_samples(1))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_slow_error_body_cannot_stall_post() {
        let base = test_server::spawn_slow(503, 1_000, Duration::from_millis(150)).await;
        let collector = HttpCollector::with_settings(
            format!("{}/api/cellinfo", base),
            Duration::from_millis(300),
            Duration::from_millis(300),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            collector.post_batch(&Batch::new(lte_samples(1))),
        )
        .await
        .expect("post_batch should finish within the overall request timeout");

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_error_body_is_truncated() {
        let base = test_server::spawn_slow(500, 4 * ERROR_BODY_LIMIT, Duration::ZERO).await;
        let collector = settings(format!("{}/api/cellinfo", base));

        match collector.post_batch(&Batch::new(lte_samples(1))).await {
            Err(ClientError::Status { code, message }) => {
                assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
                assert!(message.len() <= ERROR_BODY_LIMIT);
                assert!(!message.is_empty());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_connectivity_error() {
        // Bind then drop to obtain a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let collector = settings(format!("http://{}/api/cellinfo", addr));
        let err = collector
            .post_batch(&Batch::new(lte_samples(1)))
            .await
            .unwrap_err();
        assert!(err.is_connectivity(), "unexpected error: {}", err);
    }
}
