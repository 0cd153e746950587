//! Network access used by the fetch strategies and the precache installer.

use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use reqwest::Client;
use tracing::{debug, trace};

use crate::request::{FetchRequest, FetchResponse, ResponseSource};
use crate::{SwError, SwResult};

/// Performs network fetches on behalf of the worker.
///
/// Any HTTP status is a successful fetch; only transport failures
/// (DNS, connect, TLS, reset, timeout) are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> SwResult<FetchResponse>;
}

/// HTTP fetcher configuration.
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// User agent string.
    pub user_agent: String,
    /// Request timeout. `None` leaves it to the OS/connection defaults.
    pub timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("PWAKit-SW/{}", env!("CARGO_PKG_VERSION")),
            timeout: None,
            max_redirects: 10,
        }
    }
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with default configuration.
    pub fn new() -> SwResult<Self> {
        Self::with_config(HttpFetcherConfig::default())
    }

    /// Create a fetcher with custom configuration.
    pub fn with_config(config: HttpFetcherConfig) -> SwResult<Self> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| SwError::Network(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> SwResult<FetchResponse> {
        debug!(url = %request.url, method = %request.method, "Network fetch");

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| SwError::Network(e.to_string()))?;

        let status = response.status();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SwError::Network(e.to_string()))?;

        trace!(url = %request.url, status = %status, body_len = body.len(), "Response received");

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
            source: ResponseSource::Network,
        })
    }
}

/// Fetcher with no connectivity: every fetch fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

#[async_trait]
impl Fetcher for OfflineFetcher {
    async fn fetch(&self, request: &FetchRequest) -> SwResult<FetchResponse> {
        Err(SwError::Network(format!("offline: {}", request.url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_fetcher_returns_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"name":"app"}"#, "application/manifest+json"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse(&format!("{}/manifest.json", server.uri())).unwrap();
        let response = fetcher.fetch(&FetchRequest::get(url)).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.header("content-type"), Some("application/manifest+json"));
        assert_eq!(response.text(), r#"{"name":"app"}"#);
        assert_eq!(response.source, ResponseSource::Network);
    }

    #[tokio::test]
    async fn test_http_fetcher_error_status_is_ok_result() {
        let server = MockServer::start().await;
        Mock::given(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse(&format!("{}/missing.png", server.uri())).unwrap();
        let response = fetcher.fetch(&FetchRequest::get(url)).await.unwrap();

        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_http_fetcher_forwards_request_headers() {
        let server = MockServer::start().await;
        Mock::given(path("/api/cases"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse(&format!("{}/api/cases", server.uri())).unwrap();
        let request = FetchRequest::get(url).header(
            http::header::ACCEPT,
            http::HeaderValue::from_static("application/json"),
        );

        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_http_fetcher_connection_refused_is_network_error() {
        // Grab a free port, then release it so nothing is listening.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();
        let result = fetcher.fetch(&FetchRequest::get(url)).await;

        assert!(matches!(result, Err(SwError::Network(_))));
    }

    #[tokio::test]
    async fn test_offline_fetcher_always_fails() {
        let url = Url::parse("https://app.example/").unwrap();
        let result = OfflineFetcher.fetch(&FetchRequest::get(url)).await;
        assert!(matches!(result, Err(SwError::Network(_))));
    }
}
