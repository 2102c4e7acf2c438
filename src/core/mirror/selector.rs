// src/core/mirror/selector.rs

//! The mirror selector: assembles the candidate set, runs the benchmark,
//! caches the winner, and publishes bindings the rewriter reads atomically.

use crate::config::BenchmarkConfig;
use crate::core::errors::ProxyError;
use crate::core::mirror::benchmark::rank_candidates;
use crate::core::mirror::binding::MirrorBindings;
use crate::core::mirror::geolist::fetch_geo_mirrors;
use crate::core::registry::{Distribution, DistroKind, Registry};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use url::Url;

/// A benchmark winner with its selection time, for TTL-based reuse.
#[derive(Debug, Clone)]
struct CachedSelection {
    url: Url,
    selected_at: Instant,
}

/// Selects one mirror per distribution and keeps the shared bindings fresh.
pub struct MirrorSelector {
    registry: Arc<Registry>,
    bindings: Arc<MirrorBindings>,
    client: reqwest::Client,
    config: BenchmarkConfig,
    /// Benchmark winners, keyed by distribution kind, valid for `result_ttl`.
    results: DashMap<DistroKind, CachedSelection>,
    /// Geo mirror lists are fetched once per process and reused.
    geo_lists: DashMap<DistroKind, Vec<Url>>,
    /// Configured per-distribution pins. An override disables benchmarking.
    overrides: HashMap<DistroKind, Url>,
}

impl MirrorSelector {
    pub fn new(
        registry: Arc<Registry>,
        bindings: Arc<MirrorBindings>,
        config: BenchmarkConfig,
        overrides: HashMap<DistroKind, Url>,
    ) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()?;
        Ok(Self {
            registry,
            bindings,
            client,
            config,
            results: DashMap::new(),
            geo_lists: DashMap::new(),
            overrides,
        })
    }

    pub fn bindings(&self) -> Arc<MirrorBindings> {
        Arc::clone(&self.bindings)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The candidate set: the static mirror list plus the geo list (fetched
    /// once), de-duplicated by URL equality in list order.
    async fn candidates(&self, dist: &Distribution) -> Vec<Url> {
        let mut candidates: Vec<Url> = dist.mirrors.iter().map(|m| m.url.clone()).collect();

        if let Some(list_url) = &dist.geo_mirror_list {
            let geo = match self.geo_lists.get(&dist.kind) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = match fetch_geo_mirrors(&self.client, list_url).await {
                        Ok(urls) => urls,
                        Err(e) => {
                            warn!("Geo mirror list for '{}' unavailable: {e}", dist.ident);
                            Vec::new()
                        }
                    };
                    self.geo_lists.insert(dist.kind, fetched.clone());
                    fetched
                }
            };
            candidates.extend(geo);
        }

        let mut seen = std::collections::HashSet::new();
        candidates.retain(|u| seen.insert(u.as_str().to_string()));
        candidates
    }

    /// Blocking selection: returns when the ranking completes or the overall
    /// benchmark deadline fires. Honors a configured override and a cached,
    /// still-valid previous winner.
    pub async fn select(&self, dist: &Distribution) -> Result<Url, ProxyError> {
        if let Some(url) = self.overrides.get(&dist.kind) {
            return Ok(url.clone());
        }
        if let Some(cached) = self.results.get(&dist.kind)
            && cached.selected_at.elapsed() < self.config.result_ttl
        {
            return Ok(cached.url.clone());
        }

        let candidates = self.candidates(dist).await;
        if candidates.is_empty() {
            return Err(ProxyError::MirrorInvalid(format!(
                "no mirror candidates for '{}'",
                dist.ident
            )));
        }

        let ranked = rank_candidates(
            &self.client,
            &candidates,
            &dist.benchmark_probe,
            &self.config,
        )
        .await;

        let winner = ranked.first().map(|m| m.url.clone()).ok_or_else(|| {
            ProxyError::MirrorInvalid(format!("no reachable mirror for '{}'", dist.ident))
        })?;

        info!("Selected mirror for '{}': {winner}", dist.ident);
        self.results.insert(
            dist.kind,
            CachedSelection {
                url: winner.clone(),
                selected_at: Instant::now(),
            },
        );
        Ok(winner)
    }

    /// Non-blocking selection. The binding is initialized immediately to the
    /// override, a cached winner, or the first static candidate, so no
    /// request ever observes an absent binding. A background task then runs
    /// the benchmark and invokes the callback with the winner; the default
    /// callback swaps the binding under the write lock.
    pub fn select_async<F>(self: &Arc<Self>, kind: DistroKind, callback: F)
    where
        F: FnOnce(DistroKind, Url) + Send + 'static,
    {
        let Some(dist) = self.registry.get(kind) else {
            return;
        };

        let initial = self
            .overrides
            .get(&kind)
            .cloned()
            .or_else(|| {
                self.results
                    .get(&kind)
                    .filter(|c| c.selected_at.elapsed() < self.config.result_ttl)
                    .map(|c| c.url.clone())
            })
            .or_else(|| dist.default_mirror().map(|m| m.url.clone()));
        match initial {
            Some(url) => self.bindings.set(kind, url),
            None => {
                warn!("Distribution '{}' has no mirror candidates at all.", dist.ident);
                return;
            }
        }

        // An override pins the binding; nothing to benchmark.
        if self.overrides.contains_key(&kind) {
            return;
        }

        let selector = Arc::clone(self);
        tokio::spawn(async move {
            let Some(dist) = selector.registry.get(kind) else {
                return;
            };
            match selector.select(dist).await {
                Ok(winner) => callback(kind, winner),
                Err(e) => {
                    warn!(
                        "Async mirror selection for '{}' failed; keeping the default binding: {e}",
                        dist.ident
                    );
                }
            }
        });
    }

    /// Convenience wrapper: async selection that publishes the winner into
    /// the shared bindings.
    pub fn select_async_into_bindings(self: &Arc<Self>, kind: DistroKind) {
        let bindings = Arc::clone(&self.bindings);
        self.select_async(kind, move |kind, url| bindings.set(kind, url));
    }

    /// Clears the cached result for the given scope (or all distributions)
    /// and recomputes bindings. Rankings run outside any lock the request
    /// path takes; only the final swap briefly holds the write lock.
    pub async fn refresh(&self, scope: Option<DistroKind>) {
        let kinds: Vec<DistroKind> = match scope {
            Some(kind) => vec![kind],
            None => self
                .registry
                .distributions()
                .iter()
                .map(|d| d.kind)
                .collect(),
        };

        for kind in kinds {
            if self.overrides.contains_key(&kind) {
                continue;
            }
            self.results.remove(&kind);
            let Some(dist) = self.registry.get(kind) else {
                continue;
            };
            match self.select(dist).await {
                Ok(winner) => self.bindings.set(kind, winner),
                Err(e) => {
                    warn!(
                        "Mirror refresh for '{}' failed; keeping the previous binding: {e}",
                        dist.ident
                    );
                }
            }
        }
    }
}
