// src/core/pipeline/mod.rs

//! The request pipeline: classify, rewrite, consult the cache, orchestrate
//! the miss path, and inject cache policy into outbound responses.
//!
//! The pipeline is stateless per request; all shared state lives in the
//! registry, the mirror bindings behind the rewriter, and the cache engine.

pub mod rewrite;
pub mod transport;

pub use rewrite::Rewriter;
pub use transport::RetryingClient;

use crate::core::cache::engine::copy_stream_into;
use crate::core::cache::freshness::{self, Freshness};
use crate::core::cache::{CacheControl, CacheEngine, CacheHit, CacheKey, HeaderRecord};
use crate::core::errors::ProxyError;
use crate::core::metrics;
use crate::core::registry::{CacheRule, Distribution, DistroKind, Registry};
use axum::body::Body;
use axum::extract::Request;
use axum::http::{self, HeaderMap, Method, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use std::io;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use url::Url;

/// The shorter policy applied when caching a 404 (hot during mirror sync
/// windows, but wrong to keep for long).
const NEGATIVE_CACHE_POLICY: &str = "max-age=300";

/// Bounded tee buffer between the upstream body and the client/cache pair.
const TEE_CHANNEL_CAPACITY: usize = 32;

/// Headers that must not be forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// The outcome of a conditional revalidation request.
enum Revalidation {
    /// 304: the merged header set to write back into the record.
    NotModified(Vec<(String, String)>),
    /// A full response replacing the entry.
    Modified(reqwest::Response),
}

/// Ties the registry, rewriter, cache engine, and retrying transport into
/// the single `serve` entry point the listener dispatches every request to.
pub struct Pipeline {
    registry: Arc<Registry>,
    rewriter: Rewriter,
    cache: Arc<CacheEngine>,
    transport: RetryingClient,
    /// Per-key miss locks: the holder fetches response headers and registers
    /// the in-flight entry; everyone else re-checks and joins as a reader.
    fetch_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<Registry>,
        rewriter: Rewriter,
        cache: Arc<CacheEngine>,
        transport: RetryingClient,
    ) -> Self {
        Self {
            registry,
            rewriter,
            cache,
            transport,
            fetch_locks: DashMap::new(),
        }
    }

    pub fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }

    /// Serves one proxied request.
    pub async fn serve(self: Arc<Self>, req: Request) -> Response {
        let timer = metrics::REQUEST_LATENCY_SECONDS.start_timer();
        let result = self.serve_inner(req).await;
        timer.observe_duration();
        result.unwrap_or_else(error_response)
    }

    async fn serve_inner(self: &Arc<Self>, req: Request) -> Result<Response, ProxyError> {
        let (parts, body) = req.into_parts();
        let original = original_url(&parts)?;
        let path = original.path().to_string();

        let Some((dist, rule)) = self.registry.classify(&path) else {
            metrics::REQUESTS_TOTAL
                .with_label_values(&["none", "unmatched"])
                .inc();
            return Ok(status_response(
                StatusCode::NOT_FOUND,
                "no distribution matches this path",
            ));
        };

        let request_cc = CacheControl::parse(
            parts
                .headers
                .get(header::CACHE_CONTROL)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default(),
        );

        // Only GET responses are stored; `no-store` on the request disables
        // both lookup and storage.
        if parts.method != Method::GET || request_cc.no_store() {
            debug!(
                "{} ({} {original}); serving straight-through.",
                ProxyError::NotCacheable,
                parts.method
            );
            metrics::REQUESTS_TOTAL
                .with_label_values(&[dist.ident, "skip"])
                .inc();
            return self
                .proxy_straight(parts.method.clone(), &parts.headers, body, dist, rule, &original)
                .await;
        }

        let key = CacheKey::new(parts.method.as_str(), &original, &[]);

        match self.cache.get(&key).await {
            Ok(hit) => {
                self.serve_existing(hit, dist, rule, &key, &original, request_cc.no_cache())
                    .await
            }
            Err(ProxyError::CacheMiss) | Err(ProxyError::CacheCorrupt(_)) => {
                self.fetch_and_store(dist, rule, &key, &original, &parts.headers)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Decides what to do with an entry the cache returned: serve it, serve
    /// it while refreshing, revalidate it, or replace it.
    async fn serve_existing(
        self: &Arc<Self>,
        hit: CacheHit,
        dist: &Distribution,
        rule: &CacheRule,
        key: &CacheKey,
        original: &Url,
        force_revalidate: bool,
    ) -> Result<Response, ProxyError> {
        // A streaming entry is being written right now; it is as fresh as
        // the upstream response producing it.
        if hit.is_streaming() {
            metrics::REQUESTS_TOTAL
                .with_label_values(&[dist.ident, "hit"])
                .inc();
            return Ok(cached_response(hit.record.clone(), hit.into_stream(), original));
        }

        let now = Utc::now();
        let verdict = freshness::evaluate(&hit.record, now);
        if verdict == Freshness::Fresh && !force_revalidate {
            metrics::REQUESTS_TOTAL
                .with_label_values(&[dist.ident, "hit"])
                .inc();
            return Ok(cached_response(hit.record.clone(), hit.into_stream(), original));
        }

        let has_validators =
            hit.record.header("etag").is_some() || hit.record.header("last-modified").is_some();

        if has_validators {
            match self.revalidate(dist, rule, original, &hit.record).await {
                Ok(Revalidation::NotModified(headers)) => {
                    self.cache.refresh(key, headers.clone(), Utc::now()).await?;
                    let mut record = hit.record.clone();
                    record.headers = headers;
                    metrics::REQUESTS_TOTAL
                        .with_label_values(&[dist.ident, "hit"])
                        .inc();
                    Ok(cached_response(record, hit.into_stream(), original))
                }
                Ok(Revalidation::Modified(response)) => {
                    drop(hit);
                    self.store_response(response, dist, rule, key, original).await
                }
                Err(e) => {
                    if freshness::stale_if_error_allows(&hit.record, now) {
                        debug!("Serving stale entry for '{original}' after upstream failure: {e}");
                        metrics::REQUESTS_TOTAL
                            .with_label_values(&[dist.ident, "hit"])
                            .inc();
                        Ok(cached_response(hit.record.clone(), hit.into_stream(), original))
                    } else {
                        Err(e)
                    }
                }
            }
        } else if verdict == Freshness::Stale && freshness::swr_allows(&hit.record, now) {
            // Inside the stale-while-revalidate window: serve the stale
            // bytes and refresh in the background.
            self.spawn_background_refresh(dist.kind, key.clone(), original.clone());
            metrics::REQUESTS_TOTAL
                .with_label_values(&[dist.ident, "hit"])
                .inc();
            Ok(cached_response(hit.record.clone(), hit.into_stream(), original))
        } else {
            drop(hit);
            self.fetch_and_store(dist, rule, key, original, &HeaderMap::new())
                .await
        }
    }

    /// The miss path. The per-key lock serializes the window between cache
    /// check and in-flight registration so that exactly one upstream fetch
    /// happens per key; latecomers re-check and attach as readers.
    async fn fetch_and_store(
        self: &Arc<Self>,
        dist: &Distribution,
        rule: &CacheRule,
        key: &CacheKey,
        original: &Url,
        client_headers: &HeaderMap,
    ) -> Result<Response, ProxyError> {
        let lock = self
            .fetch_locks
            .entry(key.fingerprint().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        // Double-check: another task may have registered the entry while we
        // waited on the lock.
        if let Ok(hit) = self.cache.get(key).await {
            drop(guard);
            self.release_fetch_lock(key);
            metrics::REQUESTS_TOTAL
                .with_label_values(&[dist.ident, "hit"])
                .inc();
            return Ok(cached_response(hit.record.clone(), hit.into_stream(), original));
        }

        let upstream_url = self.upstream_url(dist, rule, original)?;
        let request = self
            .transport
            .client()
            .get(upstream_url)
            .headers(forwardable_headers(client_headers))
            .build()?;
        let response = self.transport.execute(request).await?;

        let result = self.store_response(response, dist, rule, key, original).await;
        drop(guard);
        self.release_fetch_lock(key);
        result
    }

    /// Stores a cacheable upstream response while streaming it to the
    /// client; non-cacheable statuses pass through untouched.
    async fn store_response(
        self: &Arc<Self>,
        response: reqwest::Response,
        dist: &Distribution,
        rule: &CacheRule,
        key: &CacheKey,
        original: &Url,
    ) -> Result<Response, ProxyError> {
        let status = response.status();
        metrics::REQUESTS_TOTAL
            .with_label_values(&[dist.ident, "miss"])
            .inc();

        // Only 200 and 404 are cacheable in this pipeline.
        if !matches!(status.as_u16(), 200 | 404) {
            return Ok(passthrough_response(response, "MISS"));
        }

        let response_time = Utc::now();
        let mut stored_headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        // Inject the rule's policy in place of whatever upstream sent; 404s
        // get the shorter negative policy.
        let policy = if status.as_u16() == 404 {
            NEGATIVE_CACHE_POLICY
        } else {
            rule.cache_control.as_str()
        };
        if !policy.is_empty() {
            stored_headers.retain(|(n, _)| !n.eq_ignore_ascii_case("cache-control"));
            stored_headers.push(("Cache-Control".to_string(), policy.to_string()));
        }

        let record = HeaderRecord {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers: stored_headers,
            request_time: response_time,
            response_time,
            access_time: response_time,
            body_size: 0,
        };

        match self.cache.store(key, record.clone()).await {
            Ok(writer) => Ok(tee_response(response, writer, record, original)),
            Err(ProxyError::InFlightJoin) => {
                // Lost a race with another writer; serve their stream.
                let hit = self.cache.get(key).await?;
                Ok(cached_response(hit.record.clone(), hit.into_stream(), original))
            }
            Err(ProxyError::StoreFailure(e)) => {
                // Fail open: the client still gets the upstream bytes.
                warn!("Cache store failed for '{original}'; serving uncached: {e}");
                Ok(passthrough_response(response, "MISS"))
            }
            Err(e) => Err(e),
        }
    }

    /// Sends a conditional request for a stale entry with validators.
    async fn revalidate(
        &self,
        dist: &Distribution,
        rule: &CacheRule,
        original: &Url,
        record: &HeaderRecord,
    ) -> Result<Revalidation, ProxyError> {
        let upstream_url = self.upstream_url(dist, rule, original)?;
        let mut builder = self.transport.client().get(upstream_url);
        if let Some(etag) = record.header("etag") {
            builder = builder.header(header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = record.header("last-modified") {
            builder = builder.header(header::IF_MODIFIED_SINCE, last_modified);
        }
        let request = builder.build()?;
        let response = self.transport.execute(request).await?;

        match response.status().as_u16() {
            304 => {
                // Merge: start from the stored headers, overwrite with
                // whatever the 304 carried (Date, Age, Cache-Control, ...).
                // The body is unchanged, so its length metadata stays.
                let mut merged = record.headers.clone();
                for (name, value) in response.headers() {
                    if is_hop_by_hop(name.as_str())
                        || name.as_str().eq_ignore_ascii_case("content-length")
                    {
                        continue;
                    }
                    let Ok(value) = value.to_str() else { continue };
                    merged.retain(|(n, _)| !n.eq_ignore_ascii_case(name.as_str()));
                    merged.push((name.as_str().to_string(), value.to_string()));
                }
                Ok(Revalidation::NotModified(merged))
            }
            200 | 404 => Ok(Revalidation::Modified(response)),
            status => Err(ProxyError::UpstreamFatal(status)),
        }
    }

    /// Proxies a request straight through, bypassing the cache entirely.
    async fn proxy_straight(
        &self,
        method: Method,
        headers: &HeaderMap,
        body: Body,
        dist: &Distribution,
        rule: &CacheRule,
        original: &Url,
    ) -> Result<Response, ProxyError> {
        let upstream_url = self.upstream_url(dist, rule, original)?;
        let request = self
            .transport
            .client()
            .request(method, upstream_url)
            .headers(forwardable_headers(headers))
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .build()?;
        let response = self.transport.execute(request).await?;
        Ok(passthrough_response(response, "SKIP"))
    }

    /// The upstream URL for a rule: the bound mirror when the rule rewrites,
    /// the original URL otherwise.
    fn upstream_url(
        &self,
        dist: &Distribution,
        rule: &CacheRule,
        original: &Url,
    ) -> Result<Url, ProxyError> {
        if rule.rewrite {
            self.rewriter.rewrite(dist, original)
        } else {
            Ok(original.clone())
        }
    }

    /// Refetches an entry in the background (stale-while-revalidate). The
    /// single-writer guarantee makes a concurrent refresh a no-op.
    fn spawn_background_refresh(self: &Arc<Self>, kind: DistroKind, key: CacheKey, original: Url) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = pipeline.refresh_entry(kind, &key, &original).await {
                debug!("Background refresh for '{original}' failed: {e}");
            }
        });
    }

    async fn refresh_entry(
        self: &Arc<Self>,
        kind: DistroKind,
        key: &CacheKey,
        original: &Url,
    ) -> Result<(), ProxyError> {
        let dist = self
            .registry
            .get(kind)
            .ok_or_else(|| ProxyError::Internal("distribution vanished".to_string()))?;
        let rule = dist
            .match_rule(original.path())
            .ok_or(ProxyError::NoRuleMatch)?;

        let upstream_url = self.upstream_url(dist, rule, original)?;
        let request = self.transport.client().get(upstream_url).build()?;
        let response = self.transport.execute(request).await?;
        let status = response.status();
        if !matches!(status.as_u16(), 200 | 404) {
            return Err(ProxyError::UpstreamFatal(status.as_u16()));
        }

        let response_time = Utc::now();
        let mut stored_headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let policy = if status.as_u16() == 404 {
            NEGATIVE_CACHE_POLICY
        } else {
            rule.cache_control.as_str()
        };
        if !policy.is_empty() {
            stored_headers.retain(|(n, _)| !n.eq_ignore_ascii_case("cache-control"));
            stored_headers.push(("Cache-Control".to_string(), policy.to_string()));
        }
        let record = HeaderRecord {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers: stored_headers,
            request_time: response_time,
            response_time,
            access_time: response_time,
            body_size: 0,
        };

        let writer = match self.cache.store(key, record).await {
            Ok(w) => w,
            // Someone else is already refreshing this key.
            Err(ProxyError::InFlightJoin) => return Ok(()),
            Err(e) => return Err(e),
        };
        copy_stream_into(writer, response.bytes_stream()).await
    }

    /// Drops the per-key fetch lock once nothing else holds it.
    fn release_fetch_lock(&self, key: &CacheKey) {
        self.fetch_locks
            .remove_if(key.fingerprint(), |_, lock| Arc::strong_count(lock) <= 2);
    }
}

/// Reconstructs the absolute request URL from absolute-form or origin-form.
fn original_url(parts: &http::request::Parts) -> Result<Url, ProxyError> {
    let uri = &parts.uri;
    if uri.scheme_str().is_some() {
        return Url::parse(&uri.to_string())
            .map_err(|e| ProxyError::Internal(format!("unparseable request URI: {e}")));
    }
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Url::parse(&format!("http://{host}{path_and_query}"))
        .map_err(|e| ProxyError::Internal(format!("unparseable request URI: {e}")))
}

/// Whether a client request header is forwarded upstream. Client
/// `Cache-Control` never is: the proxy's storage decisions ignore it.
fn forward_request_header(name: &str) -> bool {
    !is_hop_by_hop(name)
        && !name.eq_ignore_ascii_case("host")
        && !name.eq_ignore_ascii_case("cache-control")
        && !name.eq_ignore_ascii_case("pragma")
}

/// The subset of client headers forwarded to the upstream mirror.
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forward = HeaderMap::new();
    for (name, value) in headers {
        if forward_request_header(name.as_str()) {
            forward.append(name.clone(), value.clone());
        }
    }
    forward
}

/// Builds the response for a cache hit: stored status and headers,
/// `X-Cache: HIT`, and `Content-Location` pointing at the pre-rewrite URL.
fn cached_response(
    record: HeaderRecord,
    stream: futures::stream::BoxStream<'static, Result<Bytes, io::Error>>,
    original: &Url,
) -> Response {
    let mut builder = Response::builder().status(record.status);
    for (name, value) in &record.headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder = builder
        .header("X-Cache", "HIT")
        .header(header::CONTENT_LOCATION, original.as_str());
    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR, "bad cached entry"))
}

/// Streams an upstream response to the client while teeing every chunk into
/// the cache writer. Upstream EOF commits the entry; an upstream error or a
/// client disconnect aborts it and unlinks the partial file.
fn tee_response(
    response: reqwest::Response,
    writer: crate::core::cache::CacheWriter,
    record: HeaderRecord,
    original: &Url,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(TEE_CHANNEL_CAPACITY);
    let mut upstream = response.bytes_stream();

    tokio::spawn(async move {
        let mut writer = Some(writer);
        loop {
            match upstream.next().await {
                Some(Ok(chunk)) => {
                    if let Some(w) = writer.as_mut()
                        && let Err(e) = w.write_chunk(&chunk).await
                    {
                        // Fail open: stop caching, keep serving.
                        warn!("Cache write failed mid-body; continuing uncached: {e}");
                        if let Some(w) = writer.take() {
                            w.abort(&e.to_string()).await;
                        }
                    }
                    if tx.send(Ok(chunk)).await.is_err() {
                        if let Some(w) = writer.take() {
                            w.abort("client disconnected").await;
                        }
                        return;
                    }
                }
                Some(Err(e)) => {
                    if let Some(w) = writer.take() {
                        w.abort(&e.to_string()).await;
                    }
                    let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
                    return;
                }
                None => {
                    if let Some(w) = writer.take()
                        && let Err(e) = w.commit().await
                    {
                        warn!("Cache commit failed: {e}");
                    }
                    return;
                }
            }
        }
    });

    let mut builder = Response::builder().status(record.status);
    for (name, value) in &record.headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder = builder
        .header("X-Cache", "MISS")
        .header(header::CONTENT_LOCATION, original.as_str());
    builder
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR, "bad upstream entry"))
}

/// Forwards an upstream response without touching the cache.
fn passthrough_response(response: reqwest::Response, x_cache: &str) -> Response {
    let mut builder = Response::builder().status(response.status());
    for (name, value) in response.headers() {
        if !is_hop_by_hop(name.as_str()) {
            builder = builder.header(name.as_str(), value.clone());
        }
    }
    builder = builder.header("X-Cache", x_cache);
    builder
        .body(Body::from_stream(response.bytes_stream()))
        .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR, "bad upstream response"))
}

fn status_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message.to_string()))
        .expect("static response")
}

/// Maps pipeline errors onto client-facing statuses.
fn error_response(error: ProxyError) -> Response {
    let (status, message) = match &error {
        ProxyError::NoRuleMatch => (StatusCode::NOT_FOUND, error.to_string()),
        ProxyError::UpstreamFatal(code) => (
            StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY),
            error.to_string(),
        ),
        ProxyError::UpstreamTransient(_) | ProxyError::HttpClientError(_) => {
            (StatusCode::BAD_GATEWAY, error.to_string())
        }
        ProxyError::StoreFailure(_) => (StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
        ProxyError::MirrorInvalid(_) => (StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };
    warn!("Request failed: {error}");
    status_response(status, &message)
}
