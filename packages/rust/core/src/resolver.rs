//! Enclosure resolution: fetch a remote resource and store it as a blob.
//!
//! One [`EnclosureResolver`] lives for exactly one ingestion run. It owns the
//! run's worker pool (a semaphore bounding in-flight fetches), the run
//! deadline, and the URL → content id cache that guarantees each distinct URL
//! is fetched and stored at most once per run.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use feedgraph_shared::{ContentId, Enclosure, FeedGraphError, FetchError, IngestConfig, Result};
use feedgraph_store::{BlobStream, ContentStore};
use futures::{Stream, StreamExt};
use reqwest::Client;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

/// Outcome of resolving a single enclosure.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// User-Agent string for enclosure requests.
const USER_AGENT: &str = concat!("feedgraph/", env!("CARGO_PKG_VERSION"));

/// Longest run budget honoured (30 years); anything larger means "no deadline".
const MAX_RUN_BUDGET: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Deadline for a run that started at `start`.
///
/// Oversized budgets from the config file are clamped instead of overflowing
/// the clock.
pub fn run_deadline(start: Instant, budget: Duration) -> Instant {
    start + budget.min(MAX_RUN_BUDGET)
}

/// Fetches enclosures, stores them, and remembers what it stored.
pub struct EnclosureResolver {
    store: Arc<dyn ContentStore>,
    client: Client,
    permits: Arc<Semaphore>,
    /// Only successful resolutions populate a cell; a failed URL may be retried.
    cache: Mutex<HashMap<String, Arc<OnceCell<ContentId>>>>,
    deadline: Instant,
    fetch_timeout: Duration,
    max_bytes: u64,
    allow_private_hosts: bool,
}

impl EnclosureResolver {
    /// Create a resolver whose run deadline starts now.
    pub fn new(store: Arc<dyn ContentStore>, config: &IngestConfig) -> Result<Self> {
        Self::with_deadline(store, config, run_deadline(Instant::now(), config.run_deadline))
    }

    /// Create a resolver that abandons every fetch still running at `deadline`.
    pub fn with_deadline(
        store: Arc<dyn ContentStore>,
        config: &IngestConfig,
        deadline: Instant,
    ) -> Result<Self> {
        let allow_private_hosts = config.allow_private_hosts;
        let max_redirects = config.max_redirects;

        // Every redirect hop goes through the same host check as the first request.
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                attempt.error("too many redirects")
            } else if !allow_private_hosts && is_ssrf_target(attempt.url()) {
                attempt.error("redirect to a private or non-HTTP target")
            } else {
                attempt.follow()
            }
        });

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect)
            .build()
            .map_err(|e| FeedGraphError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            store,
            client,
            permits: Arc::new(Semaphore::new(config.concurrency.max(1) as usize)),
            cache: Mutex::new(HashMap::new()),
            deadline,
            fetch_timeout: config.fetch_timeout,
            max_bytes: config.max_enclosure_bytes,
            allow_private_hosts,
        })
    }

    /// Fetch `url`, store its body, and return a heavy enclosure.
    pub async fn resolve(&self, url: &str, declared_type: &str) -> FetchResult<Enclosure> {
        let id = self.content_id_for(url).await?;
        Ok(Enclosure::light(url, declared_type).into_heavy(id))
    }

    /// Record metadata only. No network, no store writes.
    pub fn resolve_light(url: &str, declared_type: &str) -> Enclosure {
        Enclosure::light(url, declared_type)
    }

    /// Turn a light enclosure into a heavy one. Already-heavy input is returned unchanged.
    pub async fn promote(&self, enclosure: Enclosure) -> FetchResult<Enclosure> {
        if enclosure.is_resolved() {
            return Ok(enclosure);
        }
        let id = self.content_id_for(enclosure.url()).await?;
        Ok(enclosure.into_heavy(id))
    }

    /// Look up `url` in the run cache, fetching and storing it on a miss.
    ///
    /// Concurrent lookups of the same URL wait on a single in-flight fetch.
    async fn content_id_for(&self, url: &str) -> FetchResult<ContentId> {
        let cell = {
            let mut cache = self.cache.lock().await;
            cache.entry(url.to_string()).or_default().clone()
        };

        if let Some(id) = cell.get() {
            debug!(url, cid = %id, "enclosure cache hit");
            return Ok(id.clone());
        }

        cell.get_or_try_init(|| self.fetch_and_store(url))
            .await
            .cloned()
    }

    #[instrument(skip(self), fields(elapsed_ms = tracing::field::Empty))]
    async fn fetch_and_store(&self, url: &str) -> FetchResult<ContentId> {
        let started = Instant::now();

        let work = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| FetchError::new(url, "worker pool closed"))?;
            let body = self.download(url).await?;
            let id = self.store.put_blob(body).await.map_err(|e| match e {
                FeedGraphError::Fetch(error) => error,
                other => FetchError::new(url, other.to_string()),
            })?;
            debug!(cid = %id, "enclosure stored");
            Ok::<_, FetchError>(id)
        };

        let outcome = match tokio::time::timeout_at(self.deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::new(url, "run deadline exceeded")),
        };

        tracing::Span::current().record("elapsed_ms", started.elapsed().as_millis() as u64);
        outcome
    }

    /// GET `url` and hand back its body as a size-capped stream.
    ///
    /// Blocked hosts, non-2xx statuses and a declared length over the cap fail
    /// here; a body that grows past the cap fails the stream mid-transfer.
    async fn download(&self, url: &str) -> FetchResult<BlobStream> {
        let target =
            Url::parse(url).map_err(|e| FetchError::new(url, format!("invalid URL: {e}")))?;
        if !self.allow_private_hosts && is_ssrf_target(&target) {
            return Err(FetchError::new(url, "blocked: private or non-HTTP target"));
        }

        let response = self
            .client
            .get(target)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| FetchError::new(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(url, format!("HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(FetchError::new(
                    url,
                    format!("response too large ({len} bytes, max {})", self.max_bytes),
                ));
            }
        }

        Ok(capped(response.bytes_stream(), url, self.max_bytes))
    }
}

/// Pass `body` through, failing as soon as more than `max_bytes` have gone by.
fn capped<S, E>(body: S, url: &str, max_bytes: u64) -> BlobStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display,
{
    let url = url.to_string();
    let mut received: u64 = 0;
    body.map(move |chunk| -> Result<Bytes> {
        let chunk =
            chunk.map_err(|e| FetchError::new(&url, format!("failed to read body: {e}")))?;
        received += chunk.len() as u64;
        if received > max_bytes {
            return Err(FetchError::new(&url, format!("response exceeded {max_bytes} bytes")).into());
        }
        Ok(chunk)
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// Host filtering
// ---------------------------------------------------------------------------

/// Enclosure URLs come from the feed, so anything pointing back into the
/// local network or away from HTTP is refused.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            let host = host.to_ascii_lowercase();
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedgraph_store::MemoryStore;
    use futures::stream;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn local_config() -> IngestConfig {
        IngestConfig {
            allow_private_hosts: true,
            fetch_timeout: Duration::from_secs(5),
            ..IngestConfig::default()
        }
    }

    async fn serve(server: &MockServer, at: &str, body: &'static [u8]) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn resolve_stores_body_as_blob() {
        let server = MockServer::start().await;
        serve(&server, "/ep1.mp3", b"episode one").await;

        let store = Arc::new(MemoryStore::new());
        let resolver = EnclosureResolver::new(store.clone(), &local_config()).unwrap();

        let url = format!("{}/ep1.mp3", server.uri());
        let enclosure = resolver.resolve(&url, "audio/mpeg").await.unwrap();

        assert!(enclosure.is_resolved());
        assert_eq!(enclosure.url(), url);
        assert_eq!(enclosure.file_type(), "audio/mpeg");
        let id = enclosure.content_id().unwrap();
        assert_eq!(store.blob(id).unwrap(), Bytes::from_static(b"episode one"));
    }

    #[tokio::test]
    async fn duplicate_url_is_fetched_and_stored_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cover.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"jpeg".to_vec())
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let resolver = EnclosureResolver::new(store.clone(), &local_config()).unwrap();
        let url = format!("{}/cover.jpg", server.uri());

        let (a, b) = tokio::join!(
            resolver.resolve(&url, "image"),
            resolver.resolve(&url, "image/jpeg"),
        );
        let c = resolver.resolve(&url, "image").await.unwrap();
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.content_id(), b.content_id());
        assert_eq!(a.content_id(), c.content_id());
        assert_eq!(b.file_type(), "image/jpeg");
        assert_eq!(store.blob_writes(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.mp3"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        serve(&server, "/flaky.mp3", b"ok now").await;

        let store = Arc::new(MemoryStore::new());
        let resolver = EnclosureResolver::new(store.clone(), &local_config()).unwrap();
        let url = format!("{}/flaky.mp3", server.uri());

        let err = resolver.resolve(&url, "audio/mpeg").await.unwrap_err();
        assert_eq!(err.url, url);
        assert!(err.cause.contains("503"));

        let retried = resolver.resolve(&url, "audio/mpeg").await.unwrap();
        assert!(retried.is_resolved());
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start().await;
        serve(&server, "/big.bin", b"0123456789").await;

        let config = IngestConfig {
            max_enclosure_bytes: 4,
            ..local_config()
        };
        let store = Arc::new(MemoryStore::new());
        let resolver = EnclosureResolver::new(store.clone(), &config).unwrap();

        let err = resolver
            .resolve(&format!("{}/big.bin", server.uri()), "")
            .await
            .unwrap_err();
        assert!(err.cause.contains("too large") || err.cause.contains("exceeded"));
        assert_eq!(store.blob_writes(), 0);
    }

    #[tokio::test]
    async fn body_growing_past_cap_fails_mid_stream() {
        let body = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"0123")),
            Ok(Bytes::from_static(b"4567")),
        ]);

        let store = MemoryStore::new();
        let err = store
            .put_blob(capped(body, "http://x/big.bin", 6))
            .await
            .unwrap_err();

        match err {
            FeedGraphError::Fetch(error) => {
                assert_eq!(error.url, "http://x/big.bin");
                assert!(error.cause.contains("exceeded 6 bytes"));
            }
            other => panic!("expected Fetch, got {other:?}"),
        }
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn body_within_cap_is_stored_whole() {
        let body = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"0123")),
            Ok(Bytes::from_static(b"45")),
        ]);

        let store = MemoryStore::new();
        let id = store
            .put_blob(capped(body, "http://x/ok.bin", 6))
            .await
            .unwrap();
        assert_eq!(store.blob(&id).unwrap(), Bytes::from_static(b"012345"));
    }

    /// Records when each request reaches the server.
    struct ArrivalLog {
        arrivals: Arc<std::sync::Mutex<Vec<std::time::Instant>>>,
        delay: Duration,
    }

    impl Respond for ArrivalLog {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            self.arrivals
                .lock()
                .unwrap()
                .push(std::time::Instant::now());
            ResponseTemplate::new(200)
                .set_body_bytes(b"chunk".to_vec())
                .set_delay(self.delay)
        }
    }

    #[tokio::test]
    async fn in_flight_fetches_never_exceed_concurrency() {
        let delay = Duration::from_millis(150);
        let arrivals = Arc::new(std::sync::Mutex::new(Vec::new()));

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ArrivalLog {
                arrivals: Arc::clone(&arrivals),
                delay,
            })
            .mount(&server)
            .await;

        let config = IngestConfig {
            concurrency: 2,
            ..local_config()
        };
        let store = Arc::new(MemoryStore::new());
        let resolver = EnclosureResolver::new(store.clone(), &config).unwrap();

        let urls: Vec<String> = (0..6)
            .map(|i| format!("{}/ep{i}.mp3", server.uri()))
            .collect();
        let outcomes =
            futures::future::join_all(urls.iter().map(|url| resolver.resolve(url, "audio/mpeg")))
                .await;
        assert!(outcomes.iter().all(|outcome| outcome.is_ok()));

        let mut arrivals = arrivals.lock().unwrap().clone();
        arrivals.sort();
        assert_eq!(arrivals.len(), 6);
        // A third request can only start once one of the two before it has
        // been answered, which takes at least `delay`.
        for i in 2..arrivals.len() {
            let gap = arrivals[i] - arrivals[i - 2];
            assert!(gap >= delay, "requests {} and {i} overlapped: {gap:?}", i - 2);
        }
        assert_eq!(store.blob_writes(), 6);
    }

    #[test]
    fn huge_run_budget_is_clamped() {
        let start = Instant::now();
        let deadline = run_deadline(start, Duration::from_secs(i64::MAX as u64));
        assert_eq!(deadline, start + MAX_RUN_BUDGET);
        assert_eq!(
            run_deadline(start, Duration::from_secs(60)),
            start + Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn huge_run_deadline_config_builds_resolver() {
        let config = IngestConfig {
            run_deadline: Duration::from_secs(i64::MAX as u64),
            ..local_config()
        };
        let store = Arc::new(MemoryStore::new());
        assert!(EnclosureResolver::new(store, &config).is_ok());
    }

    #[tokio::test]
    async fn private_hosts_are_blocked_by_default() {
        let store = Arc::new(MemoryStore::new());
        let resolver = EnclosureResolver::new(store.clone(), &IngestConfig::default()).unwrap();

        for url in [
            "http://127.0.0.1:9/secret",
            "http://localhost/admin",
            "file:///etc/passwd",
            "not a url",
        ] {
            let err = resolver.resolve(url, "").await.unwrap_err();
            assert_eq!(err.url, url);
        }
        assert_eq!(store.blob_writes(), 0);
    }

    #[tokio::test]
    async fn run_deadline_cancels_slow_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.mp3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let resolver = EnclosureResolver::with_deadline(
            store.clone(),
            &local_config(),
            Instant::now() + Duration::from_millis(200),
        )
        .unwrap();

        let err = resolver
            .resolve(&format!("{}/slow.mp3", server.uri()), "audio/mpeg")
            .await
            .unwrap_err();
        assert!(err.cause.contains("deadline"));
    }

    #[tokio::test]
    async fn store_failure_is_fetch_error() {
        let server = MockServer::start().await;
        serve(&server, "/ep1.mp3", b"episode one").await;

        let store = Arc::new(MemoryStore::rejecting());
        let resolver = EnclosureResolver::new(store, &local_config()).unwrap();

        let url = format!("{}/ep1.mp3", server.uri());
        let err = resolver.resolve(&url, "audio/mpeg").await.unwrap_err();
        assert_eq!(err.url, url);
        assert!(err.cause.contains("store"));
    }

    #[tokio::test]
    async fn promote_keeps_metadata() {
        let server = MockServer::start().await;
        serve(&server, "/cover.png", b"png").await;

        let store = Arc::new(MemoryStore::new());
        let resolver = EnclosureResolver::new(store.clone(), &local_config()).unwrap();
        let url = format!("{}/cover.png", server.uri());

        let light = EnclosureResolver::resolve_light(&url, "image")
            .with_title(Some("Cover".into()));
        assert!(!light.is_resolved());
        assert_eq!(store.blob_writes(), 0);

        let heavy = resolver.promote(light).await.unwrap();
        assert!(heavy.is_resolved());
        assert_eq!(heavy.title(), Some("Cover"));

        let again = resolver.promote(heavy.clone()).await.unwrap();
        assert_eq!(again, heavy);
        assert_eq!(store.blob_writes(), 1);
    }

    #[test]
    fn ssrf_blocks_private_targets() {
        for url in [
            "http://127.0.0.1/",
            "http://10.0.0.1/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://100.64.0.1/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://localhost:8080/",
            "http://printer.local/",
            "http://metadata.google.internal/",
            "ftp://example.com/file",
        ] {
            let url = Url::parse(url).unwrap();
            assert!(is_ssrf_target(&url), "{url} should be blocked");
        }
    }

    #[test]
    fn ssrf_allows_public_targets() {
        for url in [
            "https://example.com/ep1.mp3",
            "http://93.184.216.34/cover.jpg",
            "https://[2606:4700::1111]/",
        ] {
            let url = Url::parse(url).unwrap();
            assert!(!is_ssrf_target(&url), "{url} should be allowed");
        }
    }
}
