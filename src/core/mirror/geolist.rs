// src/core/mirror/geolist.rs

//! Fetching and parsing of plain-text geo mirror lists.
//!
//! Several distributions publish a regional mirror list as one URL per
//! line (e.g. Ubuntu's `mirrors.txt`). Malformed lines are dropped, not
//! fatal; an unreachable list just leaves the static candidates.

use crate::core::errors::ProxyError;
use tracing::debug;
use url::Url;

/// Downloads a geo mirror list and parses it into candidate URLs.
pub async fn fetch_geo_mirrors(
    client: &reqwest::Client,
    list_url: &Url,
) -> Result<Vec<Url>, ProxyError> {
    let response = client.get(list_url.clone()).send().await?;
    if !response.status().is_success() {
        return Err(ProxyError::MirrorInvalid(format!(
            "geo mirror list '{list_url}' responded with status {}",
            response.status()
        )));
    }
    let body = response.text().await?;
    Ok(parse_mirror_list(&body))
}

/// Parses one-URL-per-line text into normalized mirror URLs. Lines that do
/// not parse, lack a host, or use a non-HTTP scheme are dropped.
pub fn parse_mirror_list(body: &str) -> Vec<Url> {
    let mut mirrors = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Ok(mut url) = Url::parse(line) else {
            debug!("Dropping malformed mirror list line: {line:?}");
            continue;
        };
        if url.host_str().is_none() || !matches!(url.scheme(), "http" | "https") {
            debug!("Dropping non-HTTP mirror list line: {line:?}");
            continue;
        }
        // A trailing slash makes the URL usable as a join base.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        mirrors.push(url);
    }
    mirrors
}
