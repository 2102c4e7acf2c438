// src/core/registry/mod.rs

//! The distribution registry: an immutable-after-load table describing every
//! package distribution the proxy knows how to serve.
//!
//! Each entry carries the URL-match pattern that claims request paths, the
//! ordered per-pattern cache rules, the candidate mirror list, the benchmark
//! probe path, and the alias map used to resolve short mirror names from the
//! configuration. All regular expressions are compiled once at load time.

use crate::config::ProxyMode;
use crate::core::errors::ProxyError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

mod builtin;

pub use builtin::builtin_definitions;

/// Identifies a distribution family. The numeric value is stable and is used
/// as the key for mirror bindings and benchmark result caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistroKind {
    Ubuntu = 1,
    Debian = 2,
    Centos = 3,
    Alpine = 4,
}

impl DistroKind {
    /// The canonical lowercase identifier for this distribution.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistroKind::Ubuntu => "ubuntu",
            DistroKind::Debian => "debian",
            DistroKind::Centos => "centos",
            DistroKind::Alpine => "alpine",
        }
    }
}

impl std::fmt::Display for DistroKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single per-pattern caching rule. Rules are evaluated in declaration
/// order within a distribution; the first pattern matching the request path
/// wins.
#[derive(Debug)]
pub struct CacheRule {
    /// The compiled path pattern this rule applies to.
    pub pattern: Regex,
    /// The Cache-Control directive string injected into matching responses.
    /// Empty means the upstream headers pass through untouched.
    pub cache_control: String,
    /// Whether matching requests are rewritten to the bound mirror.
    pub rewrite: bool,
    /// The distribution this rule belongs to.
    pub kind: DistroKind,
}

/// A candidate upstream mirror.
#[derive(Debug, Clone)]
pub struct Mirror {
    pub url: Url,
    /// A short name the configuration can use instead of the full URL.
    pub alias: Option<String>,
    /// Whether this is an official (project-operated) mirror.
    pub official: bool,
}

/// One distribution entry. Immutable after registry load.
#[derive(Debug)]
pub struct Distribution {
    pub ident: &'static str,
    pub kind: DistroKind,
    /// Claims request paths for this distribution.
    pub match_pattern: Regex,
    /// Extracts the upstream tail from a matching request URL. The last
    /// capture group is appended to the mirror path after percent-unescaping.
    pub extract_pattern: Regex,
    /// A small, known-present file used to measure mirror latency.
    pub benchmark_probe: String,
    /// An optional URL serving a plain-text list of regional mirrors.
    pub geo_mirror_list: Option<Url>,
    /// Candidate mirrors in preference order. The first entry is the default
    /// binding until a benchmark round completes.
    pub mirrors: Vec<Mirror>,
    /// Ordered caching rules; first match wins.
    pub rules: Vec<CacheRule>,
}

impl Distribution {
    /// Returns the first rule whose pattern matches the request path.
    pub fn match_rule(&self, path: &str) -> Option<&CacheRule> {
        self.rules.iter().find(|r| r.pattern.is_match(path))
    }

    /// Resolves a configured mirror override: either an alias from the
    /// built-in mirror list or a full URL.
    pub fn resolve_mirror(&self, value: &str) -> Result<Url, ProxyError> {
        if let Some(m) = self
            .mirrors
            .iter()
            .find(|m| m.alias.as_deref() == Some(value))
        {
            return Ok(m.url.clone());
        }
        let url = Url::parse(value)
            .map_err(|e| ProxyError::MirrorInvalid(format!("'{value}': {e}")))?;
        if url.host_str().is_none() {
            return Err(ProxyError::MirrorInvalid(format!("'{value}' has no host")));
        }
        Ok(url)
    }

    /// The mirror a binding starts from before any benchmark completes.
    pub fn default_mirror(&self) -> Option<&Mirror> {
        self.mirrors.first()
    }
}

/// The immutable table of active distributions.
#[derive(Debug)]
pub struct Registry {
    distributions: Vec<Distribution>,
}

impl Registry {
    /// Builds the registry from the built-in definitions, keeping only the
    /// distributions active under the given mode. Patterns are compiled here,
    /// once; a bad built-in pattern is a startup error.
    pub fn load(mode: ProxyMode) -> Result<Self, ProxyError> {
        let mut distributions = Vec::new();
        for def in builtin_definitions() {
            if !mode.includes(def.ident) {
                continue;
            }
            distributions.push(def.compile()?);
        }
        if distributions.is_empty() {
            return Err(ProxyError::ConfigInvalid(
                "no active distributions under the configured mode".to_string(),
            ));
        }
        Ok(Self { distributions })
    }

    /// Builds a registry from explicit distributions, bypassing the built-in
    /// table. Used by embedders and tests.
    pub fn from_distributions(distributions: Vec<Distribution>) -> Self {
        Self { distributions }
    }

    /// Classifies a request path: the first distribution whose match pattern
    /// accepts the path wins, then the first matching rule within it.
    /// Returns `None` when no distribution claims the path.
    pub fn classify(&self, path: &str) -> Option<(&Distribution, &CacheRule)> {
        let dist = self
            .distributions
            .iter()
            .find(|d| d.match_pattern.is_match(path))?;
        let rule = dist.match_rule(path)?;
        Some((dist, rule))
    }

    /// Looks up a distribution by kind.
    pub fn get(&self, kind: DistroKind) -> Option<&Distribution> {
        self.distributions.iter().find(|d| d.kind == kind)
    }

    /// Looks up a distribution by identifier.
    pub fn get_by_ident(&self, ident: &str) -> Option<&Distribution> {
        self.distributions.iter().find(|d| d.ident == ident)
    }

    /// All active distributions in declaration order.
    pub fn distributions(&self) -> &[Distribution] {
        &self.distributions
    }
}

/// The uncompiled shape of a built-in distribution definition.
pub struct DistributionDef {
    pub ident: &'static str,
    pub kind: DistroKind,
    pub match_pattern: &'static str,
    pub extract_pattern: &'static str,
    pub benchmark_probe: &'static str,
    pub geo_mirror_list: Option<&'static str>,
    pub mirrors: &'static [(&'static str, Option<&'static str>, bool)],
    pub rules: &'static [(&'static str, &'static str, bool)],
}

impl DistributionDef {
    fn compile(&self) -> Result<Distribution, ProxyError> {
        let mirrors = self
            .mirrors
            .iter()
            .map(|(raw, alias, official)| {
                let url = Url::parse(raw)
                    .map_err(|e| ProxyError::MirrorInvalid(format!("'{raw}': {e}")))?;
                Ok(Mirror {
                    url,
                    alias: alias.map(str::to_string),
                    official: *official,
                })
            })
            .collect::<Result<Vec<_>, ProxyError>>()?;

        let rules = self
            .rules
            .iter()
            .map(|(pattern, cache_control, rewrite)| {
                Ok(CacheRule {
                    pattern: Regex::new(pattern)?,
                    cache_control: (*cache_control).to_string(),
                    rewrite: *rewrite,
                    kind: self.kind,
                })
            })
            .collect::<Result<Vec<_>, ProxyError>>()?;

        let geo_mirror_list = self
            .geo_mirror_list
            .map(Url::parse)
            .transpose()
            .map_err(|e| ProxyError::MirrorInvalid(format!("geo mirror list: {e}")))?;

        Ok(Distribution {
            ident: self.ident,
            kind: self.kind,
            match_pattern: Regex::new(self.match_pattern)?,
            extract_pattern: Regex::new(self.extract_pattern)?,
            benchmark_probe: self.benchmark_probe.to_string(),
            geo_mirror_list,
            mirrors,
            rules,
        })
    }
}
