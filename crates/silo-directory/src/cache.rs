//! Read-through directory cache — spec §3/§4.3.
//!
//! A cache hit is never authoritative: every entry carries the etag it
//! was read with, and a stale-cache hit (spec §8 "cache is an
//! optimization, never a source of truth") is detected by comparing
//! against the owning partition's current etag at lookup time, not by
//! a background invalidation sweep. Bounded by entry count with a
//! simple oldest-by-last-access eviction — the teacher's workspace
//! carries no `lru` crate, so this is built directly on `dashmap`
//! rather than adding one for a single call site.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use silo_core::prelude::{Etag, GrainId, SiloAddress};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedRoute {
    pub silo: SiloAddress,
    pub etag: Etag,
}

struct CacheEntry {
    route: CachedRoute,
    last_access: u64,
}

/// Bounded cache of `GrainId -> CachedRoute` mappings held by silos that
/// are not the authoritative owner of a given grain's partition.
pub struct DirectoryCache {
    entries: DashMap<GrainId, CacheEntry>,
    capacity: usize,
    clock: AtomicU64,
}

impl DirectoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity.min(1024)),
            capacity,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the cached route if present, bumping its recency. Callers
    /// are responsible for validating the etag against the owning
    /// partition before trusting the result (spec §4.3 routing
    /// algorithm, step 1).
    pub fn get(&self, grain: &GrainId) -> Option<CachedRoute> {
        let now = self.tick();
        let mut entry = self.entries.get_mut(grain)?;
        entry.last_access = now;
        Some(entry.route.clone())
    }

    pub fn insert(&self, grain: GrainId, route: CachedRoute) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&grain) {
            self.evict_one();
        }
        let now = self.tick();
        self.entries.insert(grain, CacheEntry { route, last_access: now });
    }

    pub fn invalidate(&self, grain: &GrainId) {
        self.entries.remove(grain);
    }

    /// Drops every cached route whose recomputed owner under a fresh
    /// membership snapshot no longer matches what is cached — spec
    /// §4.3's cache-maintenance rule for both joins and departures,
    /// generalized to one invariant ("stale" means "disagrees with the
    /// current ring") rather than enumerating add/remove cases
    /// separately.
    pub fn retain_consistent_with(&self, current_owner: impl Fn(&GrainId) -> Option<SiloAddress>) {
        let stale: Vec<GrainId> = self
            .entries
            .iter()
            .filter(|kv| current_owner(kv.key()) != Some(kv.value().route.silo))
            .map(|kv| kv.key().clone())
            .collect();
        for grain in stale {
            self.entries.remove(&grain);
        }
    }

    fn evict_one(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|kv| kv.value().last_access)
            .map(|kv| kv.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
