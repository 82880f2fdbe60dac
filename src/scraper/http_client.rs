use crate::config::ScraperConfig;
use crate::utils::jitter_between;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::{debug, warn};
use url::Url;

// ── Fetch outcome ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    RateLimited,
    Timeout,
    HttpError(u16),
    NetworkError,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::RateLimited => f.write_str("rate limited (429)"),
            Self::Timeout => f.write_str("timeout"),
            Self::HttpError(code) => write!(f, "HTTP {code}"),
            Self::NetworkError => f.write_str("network error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Binary(Vec<u8>),
}

/// One proxied fetch, retries included. Never an error: callers inspect
/// `status` and decide whether the source is skipped.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: FetchStatus,
    pub body: Option<Body>,
    pub attempt_count: u32,
}

impl FetchResult {
    fn failed(status: FetchStatus, attempt_count: u32) -> Self {
        Self {
            status,
            body: None,
            attempt_count,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }

    pub fn into_text(self) -> Option<String> {
        match self.body? {
            Body::Text(s) => Some(s),
            Body::Binary(b) => Some(String::from_utf8_lossy(&b).into_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub timeout: Duration,
    /// Ask the proxy to bypass its cache.
    pub no_cache: bool,
    /// Ask the proxy for plain text instead of markdown.
    pub prefer_text: bool,
}

impl FetchOptions {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            timeout: config.timeout(),
            no_cache: config.no_cache,
            prefer_text: false,
        }
    }

    pub fn text(mut self) -> Self {
        self.prefer_text = true;
        self
    }
}

// ── Transport seam ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Network(String),
}

/// One HTTP GET; retry policy lives in `ProxyFetcher`, not here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        timeout: Duration,
    ) -> Result<RawResponse, TransportError>;
}

pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .gzip(true)
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { inner })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        let mut req = self.inner.get(url).timeout(timeout);
        for (name, value) in headers {
            req = req.header(*name, value.as_str());
        }

        let resp = req.send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await.map_err(classify)?.to_vec();

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

// ── Retry policy ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_base: Duration,
    pub rate_limit_jitter_ms: (u64, u64),
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            rate_limit_base: Duration::from_millis(config.rate_limit_base_ms),
            rate_limit_jitter_ms: (config.rate_limit_jitter_min_ms, config.rate_limit_jitter_max_ms),
            backoff_unit: Duration::from_millis(config.backoff_unit_ms),
        }
    }

    /// After a 429: `base + uniform(min, max)`.
    fn rate_limit_wait(&self) -> Duration {
        let (min, max) = self.rate_limit_jitter_ms;
        self.rate_limit_base + jitter_between(min, max)
    }

    /// After a timeout: `2^attempt` units plus up to one unit of jitter.
    fn timeout_wait(&self, attempt: u32) -> Duration {
        let unit_ms = self.backoff_unit.as_millis() as u64;
        let exp = ExponentialBackoff::from_millis(2)
            .factor(unit_ms / 2)
            .nth(attempt as usize)
            .unwrap_or_default();
        exp + jitter(self.backoff_unit)
    }

    /// After any other failure: `1 + attempt/2` units plus up to half a unit.
    fn error_wait(&self, attempt: u32) -> Duration {
        let unit_ms = self.backoff_unit.as_millis() as u64;
        let base = unit_ms + u64::from(attempt) * unit_ms / 2;
        Duration::from_millis(base) + jitter_between(0, unit_ms / 2)
    }
}

// ── Proxy fetcher ─────────────────────────────────────────────────────────────

pub struct ProxyFetcher {
    transport: Arc<dyn Transport>,
    proxy_prefix: String,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl ProxyFetcher {
    pub fn new(config: &ScraperConfig, concurrency: usize) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config)?);
        Ok(Self::with_transport(
            transport,
            &config.proxy_prefix,
            RetryPolicy::from_config(config),
            concurrency,
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        proxy_prefix: &str,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            transport,
            proxy_prefix: proxy_prefix.to_string(),
            policy,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn proxied_url(&self, target_url: &str) -> String {
        format!("{}{}", self.proxy_prefix, target_url)
    }

    fn headers(options: &FetchOptions) -> Vec<(&'static str, String)> {
        let mut headers = vec![("accept", "text/markdown,text/plain,*/*".to_string())];
        if options.no_cache {
            headers.push(("x-no-cache", "true".to_string()));
            headers.push(("x-cache-tolerance", "0".to_string()));
        }
        if options.prefer_text {
            headers.push(("x-respond-with", "text".to_string()));
        }
        headers
    }

    /// Fetch `target_url` through the proxy, retrying transient failures.
    ///
    /// A concurrency permit is held only while a request is in flight, never
    /// across a backoff sleep.
    pub async fn fetch(&self, target_url: &str, options: FetchOptions) -> FetchResult {
        if let Err(e) = Url::parse(target_url) {
            warn!("Refusing to fetch invalid URL {:?}: {}", target_url, e);
            return FetchResult::failed(FetchStatus::NetworkError, 0);
        }

        let url = self.proxied_url(target_url);
        let headers = Self::headers(&options);
        let max_attempts = self.policy.max_attempts;
        let mut status = FetchStatus::NetworkError;

        for attempt in 0..max_attempts {
            debug!("GET {} (attempt {})", url, attempt + 1);

            let outcome = {
                let _permit = self.permits.acquire().await.ok();
                match tokio::time::timeout(
                    options.timeout,
                    self.transport.get(&url, &headers, options.timeout),
                )
                .await
                {
                    Ok(res) => res,
                    Err(_) => Err(TransportError::Timeout),
                }
            };

            let wait = match outcome {
                Ok(resp) if (200..300).contains(&resp.status) => {
                    return FetchResult {
                        status: FetchStatus::Success,
                        body: Some(into_body(resp)),
                        attempt_count: attempt + 1,
                    };
                }
                Ok(resp) if resp.status == 429 => {
                    status = FetchStatus::RateLimited;
                    self.policy.rate_limit_wait()
                }
                Ok(resp) if (400..500).contains(&resp.status) => {
                    warn!("HTTP {} for {}, not retrying", resp.status, target_url);
                    return FetchResult::failed(FetchStatus::HttpError(resp.status), attempt + 1);
                }
                Ok(resp) => {
                    status = FetchStatus::HttpError(resp.status);
                    self.policy.error_wait(attempt)
                }
                Err(TransportError::Timeout) => {
                    status = FetchStatus::Timeout;
                    self.policy.timeout_wait(attempt)
                }
                Err(TransportError::Network(msg)) => {
                    debug!("Network error for {}: {}", target_url, msg);
                    status = FetchStatus::NetworkError;
                    self.policy.error_wait(attempt)
                }
            };

            if attempt + 1 == max_attempts {
                break;
            }
            warn!(
                "{} on attempt {} for {}, retrying in {:.1?}",
                status,
                attempt + 1,
                target_url,
                wait
            );
            sleep(wait).await;
        }

        warn!(
            "Giving up on {} after {} attempt(s): {}",
            target_url, max_attempts, status
        );
        FetchResult::failed(status, max_attempts)
    }
}

fn into_body(resp: RawResponse) -> Body {
    let binary = resp.content_type.as_deref().is_some_and(|ct| {
        let ct = ct.to_ascii_lowercase();
        ct.contains("spreadsheet") || ct.contains("octet-stream") || ct.contains("zip")
    });
    if binary {
        Body::Binary(resp.body)
    } else {
        Body::Text(String::from_utf8_lossy(&resp.body).into_owned())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
