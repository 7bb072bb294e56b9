//! HTTP client for job sources given as URLs

use reqwest::{Client, Proxy, StatusCode};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Response larger than {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<DownloadError> },

    #[error("Failed to write download: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Whether another attempt could succeed
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::RequestFailed(_) | DownloadError::Timeout => true,
            DownloadError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            DownloadError::InvalidUrl(_)
            | DownloadError::TooLarge { .. }
            | DownloadError::Exhausted { .. }
            | DownloadError::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    /// First retry delay; doubles on each further attempt
    pub base_backoff: Duration,
    pub max_bytes: usize,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_bytes: 2 * 1024 * 1024 * 1024,
            user_agent: concat!("mediajobs/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Source fetcher with bounded retry
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig, proxy_url: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10));

        // Proxy settings come from [tools] proxy only, never from the environment
        builder = match proxy_url {
            Some(url) => {
                let proxy = Proxy::all(url)
                    .map_err(|e| DownloadError::InvalidUrl(format!("Invalid proxy: {}", e)))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|e| DownloadError::RequestFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Stream a URL into `dest`, retrying transient failures with exponential backoff
    ///
    /// Each attempt truncates `dest`; returns the number of bytes written.
    pub async fn download_to(&self, url: &str, dest: &Path) -> Result<u64> {
        let parsed =
            reqwest::Url::parse(url).map_err(|e| DownloadError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidUrl(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.download_once(url, dest).await {
                Ok(written) => {
                    if attempts > 1 {
                        debug!(url, attempts, "Fetch succeeded after retry");
                    }
                    return Ok(written);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempts >= self.config.max_retries.max(1) {
                        warn!(url, attempts, error = %e, "Fetch failed after retries");
                        return Err(DownloadError::Exhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }

                    warn!(url, attempts, error = %e, "Fetch failed, retrying");
                    let backoff = self.config.base_backoff * 2u32.pow(attempts - 1);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<u64> {
        debug!(url, "Starting fetch");

        let mut response = self.client.get(url).send().await.map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let limit = self.config.max_bytes as u64;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(DownloadError::TooLarge {
                limit: self.config.max_bytes,
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            written += chunk.len() as u64;
            if written > limit {
                return Err(DownloadError::TooLarge {
                    limit: self.config.max_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(url, size = written, file = %dest.display(), "Fetch completed");

        Ok(written)
    }
}

fn request_error(e: reqwest::Error) -> DownloadError {
    if e.is_timeout() {
        DownloadError::Timeout
    } else {
        DownloadError::RequestFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode as AxumStatus, routing::get};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn fast_config() -> HttpConfig {
        HttpConfig {
            base_backoff: Duration::ZERO,
            ..HttpConfig::default()
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert!(config.user_agent.starts_with("mediajobs/"));
    }

    #[tokio::test]
    async fn test_download_streams_to_file() {
        let base = serve(Router::new().route("/clip.mp4", get(|| async { "video-bytes" }))).await;
        let client = HttpClient::new(fast_config(), None).unwrap();
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("clip.mp4");

        let written = client
            .download_to(&format!("{}/clip.mp4", base), &dest)
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"video-bytes");
    }

    #[tokio::test]
    async fn test_retry_truncates_previous_attempt() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/second-time",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (AxumStatus::BAD_GATEWAY, "partial-garbage")
                    } else {
                        (AxumStatus::OK, "ok")
                    }
                }
            }),
        );
        let base = serve(router).await;
        let client = HttpClient::new(fast_config(), None).unwrap();
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.bin");
        std::fs::write(&dest, b"stale contents from an earlier run").unwrap();

        client
            .download_to(&format!("{}/second-time", base), &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/missing",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AxumStatus::NOT_FOUND
                }
            }),
        );
        let base = serve(router).await;
        let client = HttpClient::new(fast_config(), None).unwrap();

        let dir = TempDir::new().unwrap();
        let err = client
            .download_to(&format!("{}/missing", base), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Status { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_errors_retried_until_exhausted() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/flaky",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AxumStatus::SERVICE_UNAVAILABLE
                }
            }),
        );
        let base = serve(router).await;
        let client = HttpClient::new(fast_config(), None).unwrap();

        let dir = TempDir::new().unwrap();
        let err = client
            .download_to(&format!("{}/flaky", base), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Exhausted { attempts: 3, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_size_limit() {
        let base = serve(Router::new().route("/big", get(|| async { "0123456789" }))).await;
        let client = HttpClient::new(
            HttpConfig {
                max_bytes: 4,
                ..fast_config()
            },
            None,
        )
        .unwrap();

        let dir = TempDir::new().unwrap();
        let err = client
            .download_to(&format!("{}/big", base), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::TooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let client = HttpClient::new(fast_config(), None).unwrap();
        let dir = TempDir::new().unwrap();
        let err = client
            .download_to("file:///etc/passwd", &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
    }
}
