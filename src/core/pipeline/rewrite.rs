// src/core/pipeline/rewrite.rs

//! URL rewriting: replaces scheme, host, and path of an incoming request
//! with those of the distribution's currently bound mirror.

use crate::core::errors::ProxyError;
use crate::core::mirror::MirrorBindings;
use crate::core::registry::Distribution;
use std::sync::Arc;
use url::Url;

/// Rewrites request URLs onto the mirror currently bound for each
/// distribution. Bindings are read atomically per request; a request sees
/// either the old mirror or the new one, never a torn value.
#[derive(Debug)]
pub struct Rewriter {
    bindings: Arc<MirrorBindings>,
}

impl Rewriter {
    pub fn new(bindings: Arc<MirrorBindings>) -> Self {
        Self { bindings }
    }

    pub fn bindings(&self) -> &MirrorBindings {
        &self.bindings
    }

    /// Rewrites `original` onto the bound mirror: the distribution's
    /// extraction pattern captures the upstream tail, which is
    /// percent-unescaped and appended to the mirror's path. The query
    /// string passes through unchanged.
    pub fn rewrite(&self, dist: &Distribution, original: &Url) -> Result<Url, ProxyError> {
        let mirror = self
            .bindings
            .get(dist.kind)
            .ok_or_else(|| ProxyError::MirrorInvalid(format!("no mirror bound for '{}'", dist.ident)))?;

        let caps = dist
            .extract_pattern
            .captures(original.path())
            .ok_or_else(|| {
                ProxyError::Internal(format!(
                    "path '{}' matched '{}' but its extraction pattern did not",
                    original.path(),
                    dist.ident
                ))
            })?;
        let tail = caps
            .iter()
            .flatten()
            .last()
            .map(|m| m.as_str())
            .unwrap_or_default();
        let tail = urlencoding::decode(tail)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| tail.to_string());
        let tail = tail.trim_start_matches('/');

        let mut target = mirror.clone();
        let base = mirror.path().trim_end_matches('/');
        target.set_path(&format!("{base}/{tail}"));
        target.set_query(original.query());
        Ok(target)
    }
}
