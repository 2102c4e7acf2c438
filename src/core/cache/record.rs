// src/core/cache/record.rs

//! The serialized header record stored beside each cached body.
//!
//! Format (version `v1`, one file per fingerprint under `header/v1/`):
//! the status line, then `Name: value` header lines, a blank line, three
//! RFC3339Nano timestamp lines (`RequestTime`, `ResponseTime`,
//! `AccessTime`), and one decimal body-size line. The record carries
//! everything needed to recompute freshness without touching the body.

use crate::core::errors::ProxyError;
use chrono::{DateTime, SecondsFormat, Utc};

/// The metadata half of a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderRecord {
    /// Response status code (the stored status line is `HTTP/1.1 <code> <reason>`).
    pub status: u16,
    /// The reason phrase of the status line.
    pub reason: String,
    /// Response headers in original order. Names keep their original casing.
    pub headers: Vec<(String, String)>,
    /// When the upstream request was sent.
    pub request_time: DateTime<Utc>,
    /// When the upstream response arrived. Freshness ages are computed from this.
    pub response_time: DateTime<Utc>,
    /// Last served, as persisted at store/refresh time. Runtime accesses
    /// update the in-memory index instead of rewriting the record.
    pub access_time: DateTime<Utc>,
    /// Body bytes on disk once the entry is final.
    pub body_size: u64,
}

impl HeaderRecord {
    /// Returns the first header value with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes every header with the given name, case-insensitively.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Replaces (or inserts) a header, removing any existing values first.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Serializes the record into the on-disk text format.
    pub fn encode(&self) -> String {
        let mut out = format!("HTTP/1.1 {} {}\n", self.status, self.reason);
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.request_time.to_rfc3339_opts(SecondsFormat::Nanos, true));
        out.push('\n');
        out.push_str(&self.response_time.to_rfc3339_opts(SecondsFormat::Nanos, true));
        out.push('\n');
        out.push_str(&self.access_time.to_rfc3339_opts(SecondsFormat::Nanos, true));
        out.push('\n');
        out.push_str(&self.body_size.to_string());
        out.push('\n');
        out
    }

    /// Parses the on-disk text format. Any structural deviation is reported
    /// as a corrupt entry; the caller deletes the record and treats the key
    /// as absent.
    pub fn parse(input: &str) -> Result<Self, ProxyError> {
        let mut lines = input.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| ProxyError::CacheCorrupt("empty header record".to_string()))?;
        let mut parts = status_line.splitn(3, ' ');
        let _version = parts
            .next()
            .ok_or_else(|| ProxyError::CacheCorrupt("missing status line".to_string()))?;
        let status: u16 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ProxyError::CacheCorrupt("bad status code".to_string()))?;
        let reason = parts.next().unwrap_or_default().to_string();

        let mut headers = Vec::new();
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                ProxyError::CacheCorrupt(format!("malformed header line: {line:?}"))
            })?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let request_time = parse_timestamp(lines.next(), "RequestTime")?;
        let response_time = parse_timestamp(lines.next(), "ResponseTime")?;
        let access_time = parse_timestamp(lines.next(), "AccessTime")?;

        let body_size: u64 = lines
            .next()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| ProxyError::CacheCorrupt("missing body size".to_string()))?;

        Ok(Self {
            status,
            reason,
            headers,
            request_time,
            response_time,
            access_time,
            body_size,
        })
    }
}

fn parse_timestamp(line: Option<&str>, what: &str) -> Result<DateTime<Utc>, ProxyError> {
    let line = line.ok_or_else(|| ProxyError::CacheCorrupt(format!("missing {what}")))?;
    DateTime::parse_from_rfc3339(line.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProxyError::CacheCorrupt(format!("bad {what}: {e}")))
}
