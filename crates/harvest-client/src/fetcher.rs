use std::time::Duration;

use harvest_core::error::{AppError, FetchError};
use harvest_core::traits::PageFetcher;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue};
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANG: &str = "es-CL,es;q=0.9,en;q=0.8";

/// HTTP fetcher using reqwest.
///
/// Sends browser-like headers (the catalogue rejects obvious bots) and maps
/// every failure onto a classified [`FetchError`].
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(180))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(default_headers())
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpClientError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    fn map_send_error(&self, e: &reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout_secs)
        } else if e.is_builder() {
            FetchError::Permanent(format!("Invalid request: {e}"))
        } else if e.is_connect() {
            FetchError::NetworkError(format!("Connection failed: {e}"))
        } else {
            FetchError::NetworkError(e.to_string())
        }
    }
}

impl PageFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::Permanent(format!("Invalid URL: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(FetchError::Permanent(format!(
                    "URL scheme '{scheme}' is not allowed (only http/https)"
                )));
            }
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status().as_u16();
        if let Some(err) = classify_status(status) {
            tracing::debug!(url, status, "Non-success response");
            return Err(err);
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout_secs)
            } else {
                FetchError::NetworkError(format!("Failed to read response body: {e}"))
            }
        })
    }
}

/// Map a response status onto a fetch failure; `None` means success.
pub fn classify_status(status: u16) -> Option<FetchError> {
    match status {
        200..=299 => None,
        503 | 504 => Some(FetchError::ServerOverload(status)),
        _ => Some(FetchError::HttpStatus(status)),
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANG));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert(
        "Upgrade-Insecure-Requests",
        HeaderValue::from_static("1"),
    );
    headers
}
