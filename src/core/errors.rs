// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the proxy.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// The request/response combination bypasses the cache and is served straight-through.
    #[error("Request is not cacheable")]
    NotCacheable,

    /// The entry is absent from the cache; the caller should fetch it from upstream.
    #[error("Cache miss")]
    CacheMiss,

    /// A header record exists without its body, or the body size does not match
    /// the record. The entry has been deleted and must be treated as a miss.
    #[error("Corrupt cache entry: {0}")]
    CacheCorrupt(String),

    /// A concurrent writer already exists for this key. The caller should retry
    /// the lookup and attach as a reader of the in-flight entry.
    #[error("Another fetch for this key is in flight")]
    InFlightJoin,

    /// A transient upstream failure that the retrying transport recovers from.
    #[error("Transient upstream error: {0}")]
    UpstreamTransient(String),

    /// A non-retryable upstream failure, surfaced to the client with the upstream status.
    #[error("Upstream error: status {0}")]
    UpstreamFatal(u16),

    /// A disk write failed while storing a response. The response is still
    /// delivered to the client; the cache write is aborted.
    #[error("Cache store failure: {0}")]
    StoreFailure(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Invalid mirror: {0}")]
    MirrorInvalid(String),

    #[error("No rule matches the request path")]
    NoRuleMatch,

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for ProxyError {
    fn clone(&self) -> Self {
        match self {
            ProxyError::Io(e) => ProxyError::Io(Arc::clone(e)),
            ProxyError::NotCacheable => ProxyError::NotCacheable,
            ProxyError::CacheMiss => ProxyError::CacheMiss,
            ProxyError::CacheCorrupt(s) => ProxyError::CacheCorrupt(s.clone()),
            ProxyError::InFlightJoin => ProxyError::InFlightJoin,
            ProxyError::UpstreamTransient(s) => ProxyError::UpstreamTransient(s.clone()),
            ProxyError::UpstreamFatal(status) => ProxyError::UpstreamFatal(*status),
            ProxyError::StoreFailure(s) => ProxyError::StoreFailure(s.clone()),
            ProxyError::ConfigInvalid(s) => ProxyError::ConfigInvalid(s.clone()),
            ProxyError::MirrorInvalid(s) => ProxyError::MirrorInvalid(s.clone()),
            ProxyError::NoRuleMatch => ProxyError::NoRuleMatch,
            ProxyError::HttpClientError(s) => ProxyError::HttpClientError(s.clone()),
            ProxyError::Internal(s) => ProxyError::Internal(s.clone()),
        }
    }
}

impl PartialEq for ProxyError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ProxyError::Io(e1), ProxyError::Io(e2)) => e1.to_string() == e2.to_string(),
            (ProxyError::CacheCorrupt(s1), ProxyError::CacheCorrupt(s2)) => s1 == s2,
            (ProxyError::UpstreamTransient(s1), ProxyError::UpstreamTransient(s2)) => s1 == s2,
            (ProxyError::UpstreamFatal(c1), ProxyError::UpstreamFatal(c2)) => c1 == c2,
            (ProxyError::StoreFailure(s1), ProxyError::StoreFailure(s2)) => s1 == s2,
            (ProxyError::ConfigInvalid(s1), ProxyError::ConfigInvalid(s2)) => s1 == s2,
            (ProxyError::MirrorInvalid(s1), ProxyError::MirrorInvalid(s2)) => s1 == s2,
            (ProxyError::HttpClientError(s1), ProxyError::HttpClientError(s2)) => s1 == s2,
            (ProxyError::Internal(s1), ProxyError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        ProxyError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        ProxyError::HttpClientError(e.to_string())
    }
}

impl From<url::ParseError> for ProxyError {
    fn from(e: url::ParseError) -> Self {
        ProxyError::MirrorInvalid(e.to_string())
    }
}

impl From<regex::Error> for ProxyError {
    fn from(e: regex::Error) -> Self {
        ProxyError::ConfigInvalid(format!("invalid pattern: {e}"))
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        ProxyError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}
