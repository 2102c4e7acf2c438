use chrono::Utc;
use futures::StreamExt;
use pakmirror::config::CacheConfig;
use pakmirror::core::ProxyError;
use pakmirror::core::cache::{CacheEngine, CacheHit, CacheKey, HeaderRecord};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn cache_config(dir: &std::path::Path, max_size_bytes: u64, ttl: Duration) -> CacheConfig {
    CacheConfig {
        dir: dir.to_path_buf(),
        max_size_bytes,
        ttl,
        cleanup_interval: Duration::ZERO,
    }
}

fn key_for(path: &str) -> CacheKey {
    let url = Url::parse(&format!("http://mirror.test{path}")).unwrap();
    CacheKey::new("GET", &url, &[])
}

fn record(cache_control: &str) -> HeaderRecord {
    let now = Utc::now();
    HeaderRecord {
        status: 200,
        reason: "OK".to_string(),
        headers: vec![("Cache-Control".to_string(), cache_control.to_string())],
        request_time: now,
        response_time: now,
        access_time: now,
        body_size: 0,
    }
}

async fn put(engine: &Arc<CacheEngine>, key: &CacheKey, body: &[u8]) {
    let mut writer = engine.store(key, record("max-age=3600")).await.unwrap();
    writer.write_chunk(body).await.unwrap();
    writer.commit().await.unwrap();
}

async fn read_all(hit: CacheHit) -> Vec<u8> {
    let mut stream = hit.into_stream();
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[tokio::test]
async fn test_store_then_get_round_trips_bytes_and_headers() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();

    let key = key_for("/debian/dists/bookworm/InRelease");
    let body = b"release file contents";
    put(&engine, &key, body).await;

    let hit = engine.get(&key).await.unwrap();
    assert_eq!(hit.record.status, 200);
    assert_eq!(hit.record.header("cache-control"), Some("max-age=3600"));
    assert_eq!(hit.record.body_size, body.len() as u64);
    assert_eq!(read_all(hit).await, body);
}

#[tokio::test]
async fn test_get_absent_key_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();
    let err = engine.get(&key_for("/nothing")).await.unwrap_err();
    assert_eq!(err, ProxyError::CacheMiss);
}

#[tokio::test]
async fn test_second_store_for_same_key_signals_join() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();

    let key = key_for("/debian/pool/main/a/apt/apt_2.6.1_amd64.deb");
    let writer = engine.store(&key, record("max-age=3600")).await.unwrap();

    let err = engine.store(&key, record("max-age=3600")).await.unwrap_err();
    assert_eq!(err, ProxyError::InFlightJoin);

    writer.abort("test over").await;
    // After the writer is gone the key is storable again.
    assert!(engine.store(&key, record("max-age=3600")).await.is_ok());
}

#[tokio::test]
async fn test_reader_joins_in_flight_entry_and_sees_all_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();

    let key = key_for("/debian/pool/main/b/big/big.deb");
    let mut writer = engine.store(&key, record("max-age=3600")).await.unwrap();
    writer.write_chunk(b"hello ").await.unwrap();

    let hit = engine.get(&key).await.unwrap();
    assert!(hit.is_streaming());
    let join = tokio::spawn(read_all(hit));

    writer.write_chunk(b"in-flight ").await.unwrap();
    writer.write_chunk(b"world").await.unwrap();
    writer.commit().await.unwrap();

    assert_eq!(join.await.unwrap(), b"hello in-flight world");

    // The committed entry is a regular hit afterwards.
    let hit = engine.get(&key).await.unwrap();
    assert!(!hit.is_streaming());
    assert_eq!(read_all(hit).await, b"hello in-flight world");
}

#[tokio::test]
async fn test_reader_receives_writer_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();

    let key = key_for("/debian/pool/broken.deb");
    let mut writer = engine.store(&key, record("max-age=3600")).await.unwrap();
    writer.write_chunk(b"partial").await.unwrap();

    let hit = engine.get(&key).await.unwrap();
    let mut stream = hit.into_stream();
    // First chunk arrives.
    assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"partial");

    writer.abort("upstream reset").await;
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(err.to_string().contains("upstream reset"));

    // The partial entry never became visible.
    assert_eq!(engine.get(&key).await.unwrap_err(), ProxyError::CacheMiss);
}

#[tokio::test]
async fn test_purge_empties_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();

    for i in 0..4 {
        put(&engine, &key_for(&format!("/debian/p{i}")), b"data").await;
    }
    assert_eq!(engine.stats().item_count, 4);

    engine.purge().await.unwrap();
    let stats = engine.stats();
    assert_eq!(stats.item_count, 0);
    assert_eq!(stats.total_size, 0);
    assert_eq!(
        engine.get(&key_for("/debian/p0")).await.unwrap_err(),
        ProxyError::CacheMiss
    );
}

#[tokio::test]
async fn test_purge_does_not_disturb_an_ongoing_read() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();

    let key = key_for("/debian/pool/huge.deb");
    let body = vec![0xabu8; 256 * 1024];
    put(&engine, &key, &body).await;

    let hit = engine.get(&key).await.unwrap();
    engine.purge().await.unwrap();

    // The open handle survives the unlink; the read completes in full.
    assert_eq!(read_all(hit).await, body);
    assert_eq!(engine.get(&key).await.unwrap_err(), ProxyError::CacheMiss);
}

#[tokio::test]
async fn test_cleanup_evicts_oldest_entries_down_to_the_size_bound() {
    let dir = tempfile::tempdir().unwrap();

    // Fill without a size bound so all ten entries land on disk.
    {
        let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
            .await
            .unwrap();
        for i in 0..10 {
            put(&engine, &key_for(&format!("/debian/pool/p{i}.deb")), &[i as u8; 200]).await;
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        assert_eq!(engine.stats().total_size, 2000);
    }

    // Reopen with a 1000-byte bound; cleanup must drop exactly the 5 oldest.
    let engine = CacheEngine::open(&cache_config(dir.path(), 1000, Duration::ZERO))
        .await
        .unwrap();
    let result = engine.cleanup().await.unwrap();
    assert_eq!(result.removed, 5);
    assert_eq!(result.bytes_freed, 1000);

    let stats = engine.stats();
    assert_eq!(stats.item_count, 5);
    assert!(stats.total_size <= 1000);

    for i in 0..5 {
        assert!(
            engine
                .get(&key_for(&format!("/debian/pool/p{i}.deb")))
                .await
                .is_err(),
            "old entry p{i} should have been evicted"
        );
    }
    for i in 5..10 {
        assert!(
            engine
                .get(&key_for(&format!("/debian/pool/p{i}.deb")))
                .await
                .is_ok(),
            "recent entry p{i} should have survived"
        );
    }
}

#[tokio::test]
async fn test_store_completion_enforces_the_size_bound() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 500, Duration::ZERO))
        .await
        .unwrap();

    for i in 0..5 {
        put(&engine, &key_for(&format!("/debian/e{i}")), &[0u8; 200]).await;
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    // Eviction runs on every commit, so the bound holds without a cleanup.
    assert!(engine.stats().total_size <= 500);
}

#[tokio::test]
async fn test_cleanup_removes_ttl_expired_entries() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::from_millis(500)))
        .await
        .unwrap();

    let key = key_for("/debian/dists/bookworm/Release");
    put(&engine, &key, b"stale soon").await;

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(engine.stats().stale_count, 1);

    let result = engine.cleanup().await.unwrap();
    assert_eq!(result.stale_removed, 1);
    assert_eq!(engine.get(&key).await.unwrap_err(), ProxyError::CacheMiss);
}

#[tokio::test]
async fn test_body_size_mismatch_is_corrupt_and_self_heals() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();

    let key = key_for("/debian/dists/truncated");
    put(&engine, &key, b"full body").await;

    // Truncate the body behind the engine's back.
    let body_path = dir.path().join("body").join(key.fingerprint());
    std::fs::write(&body_path, b"oops").unwrap();

    assert!(matches!(
        engine.get(&key).await.unwrap_err(),
        ProxyError::CacheCorrupt(_)
    ));
    // The corrupt pair was deleted; the key now plainly misses.
    assert_eq!(engine.get(&key).await.unwrap_err(), ProxyError::CacheMiss);
}

#[tokio::test]
async fn test_cleanup_removes_dangling_files() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();

    let orphan_body = dir.path().join("body").join("0".repeat(64));
    std::fs::write(&orphan_body, b"orphan").unwrap();
    let orphan_header = dir.path().join("header").join("v1").join("f".repeat(64));
    std::fs::write(&orphan_header, record("max-age=1").encode()).unwrap();

    engine.cleanup().await.unwrap();
    assert!(!orphan_body.exists());
    assert!(!orphan_header.exists());
}

#[tokio::test]
async fn test_index_is_rebuilt_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let key = key_for("/alpine/v3.20/main/x86_64/APKINDEX.tar.gz");

    {
        let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
            .await
            .unwrap();
        put(&engine, &key, b"index bytes").await;
    }

    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(engine.stats().item_count, 1);
    let hit = engine.get(&key).await.unwrap();
    assert_eq!(read_all(hit).await, b"index bytes");
}

#[tokio::test]
async fn test_refresh_rewrites_headers_and_keeps_body() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();

    let key = key_for("/ubuntu/dists/noble/Release");
    put(&engine, &key, b"release v1").await;

    let new_time = Utc::now();
    engine
        .refresh(
            &key,
            vec![
                ("Cache-Control".to_string(), "max-age=7200".to_string()),
                ("ETag".to_string(), "\"v2\"".to_string()),
            ],
            new_time,
        )
        .await
        .unwrap();

    let hit = engine.get(&key).await.unwrap();
    assert_eq!(hit.record.header("etag"), Some("\"v2\""));
    assert_eq!(hit.record.header("cache-control"), Some("max-age=7200"));
    assert_eq!(hit.record.response_time, new_time);
    assert_eq!(read_all(hit).await, b"release v1");
}

#[tokio::test]
async fn test_stats_track_hits_and_misses() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&cache_config(dir.path(), 0, Duration::ZERO))
        .await
        .unwrap();

    let key = key_for("/debian/x");
    let _ = engine.get(&key).await;
    put(&engine, &key, b"x").await;
    let _ = engine.get(&key).await.unwrap();

    let stats = engine.stats();
    assert_eq!(stats.miss_count, 1);
    assert_eq!(stats.hit_count, 1);
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
}
