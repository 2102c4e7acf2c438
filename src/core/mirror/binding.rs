// src/core/mirror/binding.rs

//! The per-distribution mirror bindings the rewriter reads on every request.
//!
//! Readers vastly outnumber writers: requests take the read lock for a
//! clone, the selector takes the write lock only to swap in a new winner.
//! A binding is initialized before the listener starts serving and is never
//! absent for an active distribution after first resolution.

use crate::core::registry::DistroKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use url::Url;

/// The shared set of mirror bindings, one per active distribution.
#[derive(Debug, Default)]
pub struct MirrorBindings {
    inner: RwLock<HashMap<DistroKind, Url>>,
}

impl MirrorBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently bound mirror for a distribution.
    pub fn get(&self, kind: DistroKind) -> Option<Url> {
        self.inner.read().get(&kind).cloned()
    }

    /// Atomically replaces the binding for a distribution.
    pub fn set(&self, kind: DistroKind, url: Url) {
        self.inner.write().insert(kind, url);
    }

    /// A point-in-time copy of every binding, for the admin surface.
    pub fn snapshot(&self) -> HashMap<DistroKind, Url> {
        self.inner.read().clone()
    }
}
