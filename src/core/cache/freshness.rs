// src/core/cache/freshness.rs

//! Cache-Control parsing and freshness evaluation.
//!
//! A stored response is fresh while its age stays under `max-age` (or
//! `s-maxage` for this shared cache), falls back to the `Expires` header,
//! and is otherwise stale. There is no heuristic freshness: an entry with
//! neither directive nor `Expires` must be revalidated before reuse.

use super::record::HeaderRecord;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A parsed Cache-Control header: an ordered set of directives, each with an
/// optional value. Values surrounded by double quotes are accepted verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheControl {
    directives: Vec<(String, Option<String>)>,
}

impl CacheControl {
    /// Parses a Cache-Control header value. Directive names are
    /// case-insensitive and stored lowercased; unknown directives are kept.
    pub fn parse(input: &str) -> Self {
        let mut directives = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, value) = match part.split_once('=') {
                Some((n, v)) => {
                    let v = v.trim();
                    let v = v
                        .strip_prefix('"')
                        .and_then(|s| s.strip_suffix('"'))
                        .unwrap_or(v);
                    (n.trim().to_lowercase(), Some(v.to_string()))
                }
                None => (part.to_lowercase(), None),
            };
            if !directives.iter().any(|(n, _)| *n == name) {
                directives.push((name, value));
            }
        }
        Self { directives }
    }

    /// Serializes back into a header value. Directive order is preserved
    /// from parsing; the set of directives round-trips.
    pub fn serialize(&self) -> String {
        self.directives
            .iter()
            .map(|(n, v)| match v {
                Some(v) => format!("{n}={v}"),
                None => n.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn has(&self, name: &str) -> bool {
        self.directives.iter().any(|(n, _)| n == name)
    }

    /// The value of a directive, if present and valued.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// A directive value interpreted as a non-negative number of seconds.
    pub fn seconds(&self, name: &str) -> Option<Duration> {
        self.value(name)?.parse::<u64>().ok().map(Duration::from_secs)
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.seconds("max-age")
    }

    pub fn s_maxage(&self) -> Option<Duration> {
        self.seconds("s-maxage")
    }

    pub fn no_cache(&self) -> bool {
        self.has("no-cache")
    }

    pub fn no_store(&self) -> bool {
        self.has("no-store")
    }

    pub fn must_revalidate(&self) -> bool {
        self.has("must-revalidate") || self.has("proxy-revalidate")
    }

    pub fn private(&self) -> bool {
        self.has("private")
    }

    pub fn stale_while_revalidate(&self) -> Option<Duration> {
        self.seconds("stale-while-revalidate")
    }

    pub fn stale_if_error(&self) -> Option<Duration> {
        self.seconds("stale-if-error")
    }
}

impl std::fmt::Display for CacheControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// The verdict the pipeline acts on after a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve directly from the cache.
    Fresh,
    /// Revalidate if possible; a stale-while-revalidate window may still
    /// permit serving the cached bytes while refreshing in the background.
    Stale,
    /// The response forbids reuse without successful revalidation
    /// (`no-cache`, or stale with `must-revalidate`).
    MustRevalidate,
}

/// Computes the current age of a stored response, including the correction
/// from a stored `Age` header.
pub fn current_age(record: &HeaderRecord, now: DateTime<Utc>) -> Duration {
    let elapsed = (now - record.response_time).to_std().unwrap_or_default();
    let initial_age = record
        .header("age")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_default();
    elapsed + initial_age
}

/// Evaluates the freshness of a stored response at `now`.
pub fn evaluate(record: &HeaderRecord, now: DateTime<Utc>) -> Freshness {
    let cc = CacheControl::parse(record.header("cache-control").unwrap_or_default());

    if cc.no_cache() {
        return Freshness::MustRevalidate;
    }

    let age = current_age(record, now);
    let lifetime = cc.s_maxage().or_else(|| cc.max_age());

    let fresh = match lifetime {
        Some(lifetime) => age < lifetime,
        None => match record.header("expires").and_then(parse_http_date) {
            Some(expires) => now < expires,
            // No explicit freshness information: no heuristics, treat as stale.
            None => false,
        },
    };

    if fresh {
        Freshness::Fresh
    } else if cc.must_revalidate() {
        Freshness::MustRevalidate
    } else {
        Freshness::Stale
    }
}

/// Whether a stale entry may still be served in place of a failed
/// revalidation, per its `stale-if-error` window.
pub fn stale_if_error_allows(record: &HeaderRecord, now: DateTime<Utc>) -> bool {
    let cc = CacheControl::parse(record.header("cache-control").unwrap_or_default());
    let Some(window) = cc.stale_if_error() else {
        return false;
    };
    let lifetime = cc
        .s_maxage()
        .or_else(|| cc.max_age())
        .unwrap_or_default();
    current_age(record, now) <= lifetime + window
}

/// Whether a stale entry is inside its `stale-while-revalidate` window and
/// may be served while a background refresh runs.
pub fn swr_allows(record: &HeaderRecord, now: DateTime<Utc>) -> bool {
    let cc = CacheControl::parse(record.header("cache-control").unwrap_or_default());
    let Some(window) = cc.stale_while_revalidate() else {
        return false;
    };
    let lifetime = cc
        .s_maxage()
        .or_else(|| cc.max_age())
        .unwrap_or_default();
    current_age(record, now) <= lifetime + window
}

/// Parses an HTTP date header (`Expires`, `Date`, `Last-Modified`).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
