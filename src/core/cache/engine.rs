// src/core/cache/engine.rs

//! The disk-backed cache engine.
//!
//! Layout under the cache root:
//!   `body/<fingerprint>`      - the response body blob
//!   `header/v1/<fingerprint>` - the serialized header record
//!
//! Both files are written atomically (write-to-temp, rename). The in-memory
//! index maps fingerprints to access/size metadata and is the authority for
//! eviction; it is rebuilt at startup by scanning `header/v1/*`. Unknown
//! `header/<version>` directories are ignored, so future formats can
//! coexist.

use crate::config::CacheConfig;
use crate::core::cache::inflight::{InFlight, WriteProgress};
use crate::core::cache::key::CacheKey;
use crate::core::cache::record::HeaderRecord;
use crate::core::errors::ProxyError;
use crate::core::metrics;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::Stream;
use futures::stream::BoxStream;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Per-entry metadata held in the in-memory index.
#[derive(Debug, Clone)]
struct IndexEntry {
    /// Last served. Approximated by file mtime at startup, updated on hits.
    access_time: SystemTime,
    /// When the response was stored (its `ResponseTime`).
    stored_at: SystemTime,
    /// Body bytes on disk.
    size: u64,
}

/// A point-in-time snapshot of cache counters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub total_size: u64,
    pub item_count: u64,
    pub stale_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
}

impl CacheStats {
    /// Hits over total lookups, in [0, 1].
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// The outcome of one cleanup cycle.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CleanupResult {
    /// Entries and dangling files removed in total.
    pub removed: u64,
    pub bytes_freed: u64,
    /// The subset of `removed` that was TTL-expired.
    pub stale_removed: u64,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

/// The body half of a successful lookup.
#[derive(Debug)]
pub enum CacheBody {
    /// A fully written entry, streamed from its final file.
    Final { file: File, size: u64 },
    /// An entry still being written; the stream chases the writer.
    Streaming(Arc<InFlight>),
}

/// A successful cache lookup: the stored metadata plus a streamable body.
#[derive(Debug)]
pub struct CacheHit {
    pub record: HeaderRecord,
    pub body: CacheBody,
}

impl CacheHit {
    /// Whether this hit attached to a still-writing entry.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, CacheBody::Streaming(_))
    }

    /// Consumes the hit into a byte stream.
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, io::Error>> {
        match self.body {
            CacheBody::Final { file, .. } => Box::pin(ReaderStream::new(file)),
            CacheBody::Streaming(inflight) => Box::pin(inflight.body_stream()),
        }
    }
}

/// The disk-backed, content-addressed cache engine.
#[derive(Debug)]
pub struct CacheEngine {
    body_dir: PathBuf,
    header_dir: PathBuf,
    max_size: u64,
    ttl: Duration,
    index: DashMap<String, IndexEntry>,
    inflight: DashMap<String, Arc<InFlight>>,
    total_size: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    store_failures: AtomicU64,
    generation: AtomicU64,
}

impl CacheEngine {
    /// Opens (or creates) the cache tree and rebuilds the index from disk.
    pub async fn open(config: &CacheConfig) -> Result<Arc<Self>, ProxyError> {
        let body_dir = config.dir.join("body");
        let header_dir = config.dir.join("header").join("v1");
        fs::create_dir_all(&body_dir).await?;
        fs::create_dir_all(&header_dir).await?;

        let engine = Arc::new(Self {
            body_dir,
            header_dir,
            max_size: config.max_size_bytes,
            ttl: config.ttl,
            index: DashMap::new(),
            inflight: DashMap::new(),
            total_size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        });
        engine.rebuild_index().await?;
        info!(
            "Cache engine opened at '{}' with {} entries ({} bytes).",
            config.dir.display(),
            engine.index.len(),
            engine.total_size.load(Ordering::Relaxed)
        );
        Ok(engine)
    }

    /// Scans `header/v1/*`, validating each record against its body file.
    /// Header files that fail to parse and records whose body is missing or
    /// mismatched are deleted on the spot.
    async fn rebuild_index(&self) -> Result<(), ProxyError> {
        let mut entries = fs::read_dir(&self.header_dir).await?;
        let mut total: u64 = 0;
        while let Some(dirent) = entries.next_entry().await? {
            let name = dirent.file_name();
            let Some(fingerprint) = name.to_str() else {
                continue;
            };
            if fingerprint.contains(".tmp") {
                let _ = fs::remove_file(dirent.path()).await;
                continue;
            }
            let text = match fs::read_to_string(dirent.path()).await {
                Ok(t) => t,
                Err(_) => continue,
            };
            let record = match HeaderRecord::parse(&text) {
                Ok(r) => r,
                Err(_) => {
                    warn!("Deleting unparseable header record '{fingerprint}'.");
                    let _ = fs::remove_file(dirent.path()).await;
                    continue;
                }
            };
            let body_path = self.body_path(fingerprint);
            let ok = match fs::metadata(&body_path).await {
                Ok(meta) => meta.len() == record.body_size,
                Err(_) => false,
            };
            if !ok {
                warn!("Deleting header record '{fingerprint}' with missing or mismatched body.");
                let _ = fs::remove_file(dirent.path()).await;
                let _ = fs::remove_file(&body_path).await;
                continue;
            }
            // mtime approximates last access until the first runtime hit.
            let access_time = dirent
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or_else(|_| SystemTime::now());
            total += record.body_size;
            self.index.insert(
                fingerprint.to_string(),
                IndexEntry {
                    access_time,
                    stored_at: SystemTime::from(record.response_time),
                    size: record.body_size,
                },
            );
        }
        self.total_size.store(total, Ordering::Relaxed);
        self.publish_gauges();
        Ok(())
    }

    fn body_path(&self, fingerprint: &str) -> PathBuf {
        self.body_dir.join(fingerprint)
    }

    fn header_path(&self, fingerprint: &str) -> PathBuf {
        self.header_dir.join(fingerprint)
    }

    fn tmp_body_path(&self, fingerprint: &str) -> PathBuf {
        self.body_dir.join(format!("{fingerprint}.tmp"))
    }

    fn publish_gauges(&self) {
        metrics::CACHE_SIZE_BYTES.set(self.total_size.load(Ordering::Relaxed) as f64);
        metrics::CACHE_ITEMS.set(self.index.len() as f64);
    }

    /// Whether a writer currently holds the key.
    pub fn is_streaming(&self, key: &CacheKey) -> bool {
        self.inflight.contains_key(key.fingerprint())
    }

    /// Looks up an entry. Joins a still-writing entry as a reader when one
    /// exists; otherwise validates the on-disk record/body pair. A corrupt
    /// pair is deleted and reported so the caller treats the key as absent.
    pub async fn get(&self, key: &CacheKey) -> Result<CacheHit, ProxyError> {
        let fingerprint = key.fingerprint();

        if let Some(entry) = self.inflight.get(fingerprint) {
            let inflight = Arc::clone(entry.value());
            drop(entry);
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::CACHE_HITS_TOTAL.inc();
            debug!("Joining in-flight entry for key '{key}'.");
            return Ok(CacheHit {
                record: inflight.record.clone(),
                body: CacheBody::Streaming(inflight),
            });
        }

        let text = match fs::read_to_string(self.header_path(fingerprint)).await {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_MISSES_TOTAL.inc();
                return Err(ProxyError::CacheMiss);
            }
            Err(e) => return Err(e.into()),
        };

        let record = match HeaderRecord::parse(&text) {
            Ok(r) => r,
            Err(e) => {
                self.remove_entry(fingerprint).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_MISSES_TOTAL.inc();
                return Err(e);
            }
        };

        let body_path = self.body_path(fingerprint);
        let size = match fs::metadata(&body_path).await {
            Ok(meta) if meta.len() == record.body_size => meta.len(),
            Ok(meta) => {
                self.remove_entry(fingerprint).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_MISSES_TOTAL.inc();
                return Err(ProxyError::CacheCorrupt(format!(
                    "body size {} does not match record {}",
                    meta.len(),
                    record.body_size
                )));
            }
            Err(_) => {
                self.remove_entry(fingerprint).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_MISSES_TOTAL.inc();
                return Err(ProxyError::CacheCorrupt("body file missing".to_string()));
            }
        };

        let file = File::open(&body_path).await?;

        let now = SystemTime::now();
        let stored_at = SystemTime::from(record.response_time);
        self.index
            .entry(fingerprint.to_string())
            .and_modify(|e| e.access_time = now)
            .or_insert(IndexEntry {
                access_time: now,
                stored_at,
                size,
            });

        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::CACHE_HITS_TOTAL.inc();
        Ok(CacheHit {
            record,
            body: CacheBody::Final { file, size },
        })
    }

    /// Begins storing an entry. Exactly one writer may hold a key: a second
    /// `store` while the first is in flight returns `InFlightJoin`, telling
    /// the caller to `get` and attach as a reader instead. Opening the temp
    /// file can fail (e.g. disk full); the in-flight slot is released and the
    /// caller falls open to serving without caching.
    pub async fn store(
        self: &Arc<Self>,
        key: &CacheKey,
        record: HeaderRecord,
    ) -> Result<CacheWriter, ProxyError> {
        let fingerprint = key.fingerprint().to_string();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = watch::channel(WriteProgress::Writing(0));
        let tmp_path = self.tmp_body_path(&fingerprint);
        let inflight = Arc::new(InFlight::new(
            fingerprint.clone(),
            record.clone(),
            generation,
            rx,
            tmp_path.clone(),
            self.body_path(&fingerprint),
        ));

        match self.inflight.entry(fingerprint.clone()) {
            Entry::Occupied(_) => return Err(ProxyError::InFlightJoin),
            Entry::Vacant(slot) => {
                slot.insert(inflight);
            }
        }

        let file = match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                self.inflight.remove(&fingerprint);
                let _ = tx.send(WriteProgress::Failed(e.to_string()));
                self.store_failures.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_STORE_FAILURES_TOTAL.inc();
                return Err(ProxyError::StoreFailure(e.to_string()));
            }
        };

        Ok(CacheWriter {
            engine: Arc::clone(self),
            fingerprint,
            record,
            tmp_path,
            file: Some(file),
            written: 0,
            tx,
            finished: false,
        })
    }

    /// Applies a 304 revalidation: rewrites the stored headers and
    /// `ResponseTime`, keeping the body intact.
    pub async fn refresh(
        &self,
        key: &CacheKey,
        headers: Vec<(String, String)>,
        response_time: DateTime<Utc>,
    ) -> Result<(), ProxyError> {
        let fingerprint = key.fingerprint();
        let text = match fs::read_to_string(self.header_path(fingerprint)).await {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ProxyError::CacheMiss),
            Err(e) => return Err(e.into()),
        };
        let mut record = HeaderRecord::parse(&text)?;
        record.headers = headers;
        record.response_time = response_time;
        record.access_time = Utc::now();
        self.write_record(fingerprint, &record).await?;

        if let Some(mut entry) = self.index.get_mut(fingerprint) {
            entry.stored_at = SystemTime::from(response_time);
            entry.access_time = SystemTime::now();
        }
        metrics::REVALIDATIONS_TOTAL.inc();
        Ok(())
    }

    /// Atomically writes a header record (write-to-temp, rename).
    async fn write_record(
        &self,
        fingerprint: &str,
        record: &HeaderRecord,
    ) -> Result<(), ProxyError> {
        let final_path = self.header_path(fingerprint);
        let tmp_path = self.header_dir.join(format!("{fingerprint}.tmp"));
        fs::write(&tmp_path, record.encode()).await?;
        fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    /// Deletes an entry's files and index slot. Missing files are ignored.
    async fn remove_entry(&self, fingerprint: &str) -> u64 {
        let _ = fs::remove_file(self.header_path(fingerprint)).await;
        let _ = fs::remove_file(self.body_path(fingerprint)).await;
        if let Some((_, entry)) = self.index.remove(fingerprint) {
            self.total_size.fetch_sub(entry.size, Ordering::Relaxed);
            self.publish_gauges();
            entry.size
        } else {
            0
        }
    }

    /// Deletes every stored body and header file and clears the index.
    /// Readers holding open handles keep streaming; new lookups miss.
    /// In-flight writers are untouched and re-insert their entry on commit.
    pub async fn purge(&self) -> Result<(), ProxyError> {
        info!("Purging cache.");
        self.index.clear();
        self.total_size.store(0, Ordering::Relaxed);

        let mut entries = fs::read_dir(&self.header_dir).await?;
        while let Some(dirent) = entries.next_entry().await? {
            let _ = fs::remove_file(dirent.path()).await;
        }
        let mut entries = fs::read_dir(&self.body_dir).await?;
        while let Some(dirent) = entries.next_entry().await? {
            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };
            // Leave temp bodies of live writers alone.
            if let Some(fingerprint) = name.strip_suffix(".tmp")
                && self.inflight.contains_key(fingerprint)
            {
                continue;
            }
            let _ = fs::remove_file(dirent.path()).await;
        }
        self.publish_gauges();
        Ok(())
    }

    /// One cleanup cycle: TTL expiry, dangling-file repair, then size-LRU
    /// eviction down to `max_size`. Streaming entries are never touched.
    pub async fn cleanup(&self) -> Result<CleanupResult, ProxyError> {
        let start = Instant::now();
        let now = SystemTime::now();
        let mut result = CleanupResult::default();

        // TTL pass over an index snapshot; file deletion happens outside
        // any index shard lock.
        if !self.ttl.is_zero() {
            let expired: Vec<(String, u64)> = self
                .index
                .iter()
                .filter(|e| {
                    now.duration_since(e.value().stored_at)
                        .map(|age| age > self.ttl)
                        .unwrap_or(false)
                })
                .map(|e| (e.key().clone(), e.value().size))
                .collect();
            for (fingerprint, _) in expired {
                if self.inflight.contains_key(&fingerprint) {
                    continue;
                }
                let freed = self.remove_entry(&fingerprint).await;
                result.removed += 1;
                result.stale_removed += 1;
                result.bytes_freed += freed;
            }
        }

        // Dangling pass: header without body, body without header.
        let mut entries = fs::read_dir(&self.header_dir).await?;
        while let Some(dirent) = entries.next_entry().await? {
            let name = dirent.file_name();
            let Some(fingerprint) = name.to_str() else {
                continue;
            };
            if fingerprint.contains(".tmp") || self.inflight.contains_key(fingerprint) {
                continue;
            }
            if fs::metadata(self.body_path(fingerprint)).await.is_err() {
                debug!("Removing dangling header record '{fingerprint}'.");
                self.remove_entry(fingerprint).await;
                result.removed += 1;
            }
        }
        let mut entries = fs::read_dir(&self.body_dir).await?;
        while let Some(dirent) = entries.next_entry().await? {
            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(fingerprint) = name.strip_suffix(".tmp") {
                // An abandoned temp body from a crashed writer. The final
                // entry under the bare fingerprint, if any, stays valid.
                if self.inflight.contains_key(fingerprint) {
                    continue;
                }
                debug!("Removing abandoned temp body '{name}'.");
                if let Ok(meta) = dirent.metadata().await {
                    result.bytes_freed += meta.len();
                }
                let _ = fs::remove_file(dirent.path()).await;
                result.removed += 1;
                continue;
            }
            if self.inflight.contains_key(name) {
                continue;
            }
            if fs::metadata(self.header_path(name)).await.is_err() {
                debug!("Removing dangling body file '{name}'.");
                let size = match dirent.metadata().await {
                    Ok(meta) => meta.len(),
                    Err(_) => 0,
                };
                let freed = self.remove_entry(name).await;
                result.bytes_freed += freed.max(size);
                result.removed += 1;
            }
        }

        // Size pass: evict by ascending access time, ties by ascending size.
        if self.max_size > 0 {
            let (evicted, freed) = self.evict_to_limit().await;
            result.removed += evicted;
            result.bytes_freed += freed;
        }

        result.duration = start.elapsed();
        self.publish_gauges();
        Ok(result)
    }

    /// Evicts least-recently-accessed entries until the total size is at or
    /// under `max_size`. Returns (entries evicted, bytes freed).
    async fn evict_to_limit(&self) -> (u64, u64) {
        if self.max_size == 0 || self.total_size.load(Ordering::Relaxed) <= self.max_size {
            return (0, 0);
        }
        let mut candidates: Vec<(String, SystemTime, u64)> = self
            .index
            .iter()
            .map(|e| (e.key().clone(), e.value().access_time, e.value().size))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let mut evicted = 0u64;
        let mut freed = 0u64;
        for (fingerprint, _, _) in candidates {
            if self.total_size.load(Ordering::Relaxed) <= self.max_size {
                break;
            }
            if self.inflight.contains_key(&fingerprint) {
                continue;
            }
            let size = self.remove_entry(&fingerprint).await;
            if size > 0 {
                evicted += 1;
                freed += size;
                metrics::CACHE_EVICTIONS_TOTAL.inc();
            }
        }
        if evicted > 0 {
            info!("Evicted {evicted} cache entries ({freed} bytes) to meet the size bound.");
        }
        (evicted, freed)
    }

    /// A point-in-time counter snapshot. `stale_count` walks the index and
    /// counts entries past the engine TTL that cleanup has not yet removed.
    pub fn stats(&self) -> CacheStats {
        let now = SystemTime::now();
        let stale_count = if self.ttl.is_zero() {
            0
        } else {
            self.index
                .iter()
                .filter(|e| {
                    now.duration_since(e.value().stored_at)
                        .map(|age| age > self.ttl)
                        .unwrap_or(false)
                })
                .count() as u64
        };
        CacheStats {
            total_size: self.total_size.load(Ordering::Relaxed),
            item_count: self.index.len() as u64,
            stale_count,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// The streaming writer returned by [`CacheEngine::store`]. The caller
/// pushes body chunks as they arrive from upstream, then `commit`s on EOF or
/// `abort`s on error. Dropping an unfinished writer aborts it and unlinks
/// the partial temp file.
#[derive(Debug)]
pub struct CacheWriter {
    engine: Arc<CacheEngine>,
    fingerprint: String,
    record: HeaderRecord,
    tmp_path: PathBuf,
    file: Option<File>,
    written: u64,
    tx: watch::Sender<WriteProgress>,
    finished: bool,
}

impl CacheWriter {
    /// Appends a chunk to the body and publishes the new committed length to
    /// joined readers.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), ProxyError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ProxyError::Internal("write after finish".to_string()))?;
        file.write_all(chunk)
            .await
            .map_err(|e| ProxyError::StoreFailure(e.to_string()))?;
        self.written += chunk.len() as u64;
        self.tx.send_replace(WriteProgress::Writing(self.written));
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Finalizes the entry: renames the body into place, writes the header
    /// record, updates the index, and triggers size eviction.
    pub async fn commit(mut self) -> Result<(), ProxyError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| ProxyError::Internal("commit after finish".to_string()))?;
        file.flush()
            .await
            .map_err(|e| ProxyError::StoreFailure(e.to_string()))?;
        drop(file);

        let final_path = self.engine.body_path(&self.fingerprint);
        fs::rename(&self.tmp_path, &final_path)
            .await
            .map_err(|e| ProxyError::StoreFailure(e.to_string()))?;

        self.record.body_size = self.written;
        self.record.access_time = Utc::now();
        self.engine
            .write_record(&self.fingerprint, &self.record)
            .await
            .map_err(|e| ProxyError::StoreFailure(e.to_string()))?;

        let entry = IndexEntry {
            access_time: SystemTime::now(),
            stored_at: SystemTime::from(self.record.response_time),
            size: self.written,
        };
        if let Some(old) = self.engine.index.insert(self.fingerprint.clone(), entry) {
            self.engine.total_size.fetch_sub(old.size, Ordering::Relaxed);
        }
        self.engine.total_size.fetch_add(self.written, Ordering::Relaxed);
        self.engine.publish_gauges();

        self.finished = true;
        self.tx.send_replace(WriteProgress::Done(self.written));
        self.engine.inflight.remove(&self.fingerprint);

        self.engine.evict_to_limit().await;
        Ok(())
    }

    /// Discards the partial entry. Joined readers receive the error.
    pub async fn abort(mut self, reason: &str) {
        self.finished = true;
        self.tx
            .send_replace(WriteProgress::Failed(reason.to_string()));
        self.file.take();
        let _ = fs::remove_file(&self.tmp_path).await;
        self.engine.inflight.remove(&self.fingerprint);
        self.engine.store_failures.fetch_add(1, Ordering::Relaxed);
        metrics::CACHE_STORE_FAILURES_TOTAL.inc();
        debug!("Aborted cache write for '{}': {reason}", self.fingerprint);
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.tx
                .send_replace(WriteProgress::Failed("cache writer dropped".to_string()));
            self.engine.inflight.remove(&self.fingerprint);
            let _ = std::fs::remove_file(&self.tmp_path);
            self.engine.store_failures.fetch_add(1, Ordering::Relaxed);
            metrics::CACHE_STORE_FAILURES_TOTAL.inc();
        }
    }
}

/// Adapts an arbitrary byte stream into the writer, teeing nothing: used by
/// callers that want to persist a body they are not simultaneously serving
/// (e.g. background revalidation fetches).
pub async fn copy_stream_into<S>(mut writer: CacheWriter, mut stream: S) -> Result<(), ProxyError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    use futures::StreamExt;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => writer.write_chunk(&bytes).await?,
            Err(e) => {
                let msg = e.to_string();
                writer.abort(&msg).await;
                return Err(ProxyError::UpstreamTransient(msg));
            }
        }
    }
    writer.commit().await
}
