// src/core/cache/key.rs

//! Cache key derivation.
//!
//! A key has two representations: the printable form used as the map index,
//! and a fixed-length hex fingerprint (SHA-256) used as the on-disk file
//! name. Both are derived from the request method, the canonical request
//! URI, and any Vary-header values negotiated on first store.

use sha2::{Digest, Sha256};
use url::Url;

/// An immutable cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    printable: String,
    fingerprint: String,
}

impl CacheKey {
    /// Derives a key from the request method, URL, and negotiated Vary values.
    ///
    /// The URL is canonicalized: scheme and host lowercased by the parser,
    /// default ports elided, and query parameters sorted by name so that
    /// `?a=1&b=2` and `?b=2&a=1` map to the same entry.
    pub fn new(method: &str, url: &Url, vary: &[(String, String)]) -> Self {
        let mut printable = format!("{} {}", method.to_uppercase(), canonical_uri(url));
        for (name, value) in vary {
            printable.push('|');
            printable.push_str(&name.to_lowercase());
            printable.push('=');
            printable.push_str(value);
        }
        let fingerprint = hex::encode(Sha256::digest(printable.as_bytes()));
        Self {
            printable,
            fingerprint,
        }
    }

    /// The human-readable key, used as the in-memory map index.
    pub fn printable(&self) -> &str {
        &self.printable
    }

    /// The stable 64-character hex digest, used as the on-disk file name.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.printable)
    }
}

/// Builds the canonical `scheme://host[:port]/path[?sorted-query]` form.
fn canonical_uri(url: &Url) -> String {
    let mut out = format!(
        "{}://{}",
        url.scheme(),
        url.host_str().unwrap_or_default()
    );
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path());
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort();
        out.push('?');
        for (i, (k, v)) in pairs.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            out.push_str(k);
            if !v.is_empty() {
                out.push('=');
                out.push_str(v);
            }
        }
    }
    out
}
