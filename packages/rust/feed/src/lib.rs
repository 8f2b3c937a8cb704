//! Feed source: fetch a syndication feed and parse it into a [`ParsedFeed`].
//!
//! The pipeline only depends on the [`FeedSource`] trait. [`HttpFeedSource`]
//! is the production implementation: a plain HTTP GET bounded by a hard
//! timeout, followed by format detection and parsing via `feed-rs`.

mod parser;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use feedgraph_shared::{FeedGraphError, ParsedFeed, Result};
use futures::{Stream, StreamExt};
use reqwest::Client;
use tracing::{debug, info, instrument};

pub use parser::{FeedParseError, parse_feed_bytes};

/// Default timeout for fetching and parsing a feed (seconds).
pub const DEFAULT_FEED_TIMEOUT_SECS: u64 = 60;

/// Maximum number of redirects to follow when fetching a feed.
const MAX_REDIRECTS: usize = 5;

/// Maximum feed payload size we accept (32 MB).
const MAX_FEED_SIZE: u64 = 32 * 1024 * 1024;

/// User-Agent string for feed requests.
const USER_AGENT: &str = concat!("feedgraph/", env!("CARGO_PKG_VERSION"));

/// Anything that can turn a feed URL into a parsed feed.
///
/// Implementations must fail within `timeout` rather than hang.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_feed(&self, url: &str, timeout: Duration) -> Result<ParsedFeed>;
}

/// Fetches feeds over HTTP and parses them with `feed-rs`.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: Client,
    max_bytes: u64,
}

impl HttpFeedSource {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| FeedGraphError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_bytes: MAX_FEED_SIZE,
        })
    }

    /// Override the largest payload accepted (default 32 MB).
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    #[instrument(skip(self), fields(timeout_secs = timeout.as_secs()))]
    async fn fetch_feed(&self, url: &str, timeout: Duration) -> Result<ParsedFeed> {
        info!("fetching feed");

        let body = tokio::time::timeout(timeout, fetch_body(&self.client, url, timeout, self.max_bytes))
            .await
            .map_err(|_| {
                FeedGraphError::parse(url, format!("timed out after {}s", timeout.as_secs()))
            })??;

        let parsed =
            parse_feed_bytes(&body, url).map_err(|e| FeedGraphError::parse(url, e.to_string()))?;

        info!(
            title = %parsed.meta.title,
            feed_type = %parsed.meta.feed_type,
            entries = parsed.entries.len(),
            "feed parsed"
        );
        Ok(parsed)
    }
}

/// GET the feed payload, rejecting non-2xx and oversized responses.
///
/// The size limit is enforced while reading, so a response without a
/// `Content-Length` cannot grow past it either.
async fn fetch_body(
    client: &Client,
    url: &str,
    timeout: Duration,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| FeedGraphError::parse(url, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FeedGraphError::parse(url, format!("HTTP {status}")));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(FeedGraphError::parse(
                url,
                format!("response too large ({len} bytes, max {max_bytes})"),
            ));
        }
    }

    let body = collect_capped(response.bytes_stream(), max_bytes)
        .await
        .map_err(|message| FeedGraphError::parse(url, message))?;
    debug!(bytes = body.len(), "feed body received");

    Ok(body)
}

/// Read `body` to the end, giving up once it grows past `max_bytes`.
async fn collect_capped<S, E>(body: S, max_bytes: u64) -> std::result::Result<Vec<u8>, String>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut collected = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| format!("failed to read body: {e}"))?;
        if (collected.len() + chunk.len()) as u64 > max_bytes {
            return Err(format!("response exceeded {max_bytes} bytes"));
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(collected)
}
