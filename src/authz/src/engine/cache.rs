//! Decision cache for resolved permission sets keyed by (principal, node)

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::types::{NodeId, PermissionSet, PrincipalId};

/// Lower bound on the fence count that triggers a sweep
const MIN_SWEEP: usize = 64;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the cache
    pub enabled: bool,

    /// Maximum number of cached principals
    pub capacity: usize,

    /// Time-to-live for cached permission sets
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Cached entry with TTL
#[derive(Clone)]
struct CachedEntry {
    permissions: PermissionSet,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(permissions: PermissionSet, cached_at: Instant) -> Self {
        Self {
            permissions,
            cached_at,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() >= ttl
    }
}

/// All cached node contexts for one principal
struct PrincipalSlot {
    entries: HashMap<Option<NodeId>, CachedEntry>,
    created_at: Instant,
}

impl PrincipalSlot {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            created_at: Instant::now(),
        }
    }
}

/// Invalidation fence for one principal
#[derive(Debug, Clone, Copy)]
struct Fence {
    generation: u64,
    raised_at: Instant,
}

/// Proof of which cache generation a resolution started from
///
/// Taken before reading the sources; a put carrying a stale ticket is discarded, so
/// a resolution racing with an invalidation can never re-populate the cache with
/// pre-mutation data. A ticket older than the TTL is stale as well: its result would
/// already be expired, and fences older than the TTL can then be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTicket {
    global: u64,
    epoch: u64,
    issued_at: Instant,
}

/// Decision cache
///
/// Provides:
/// - Sharded storage with DashMap (lock per shard, never one global lock)
/// - TTL-based expiration checked on every read
/// - Per-principal invalidation that wins against in-flight resolutions
/// - Capacity bound evicting the oldest principal slots
pub struct DecisionCache {
    /// Cached sets, one slot per principal
    slots: Arc<DashMap<PrincipalId, PrincipalSlot>>,

    /// Invalidation fences, kept for one TTL after the invalidation
    fences: Arc<DashMap<PrincipalId, Fence>>,

    /// Fence count that triggers the next sweep
    sweep_at: AtomicUsize,

    /// Bumped by `clear`
    global_generation: AtomicU64,

    /// Bumped by every `invalidate`
    epoch: AtomicU64,

    /// Cache configuration
    config: CacheConfig,

    /// Cache statistics
    stats: Arc<DashMap<&'static str, usize>>,
}

impl DecisionCache {
    /// Create a new decision cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            fences: Arc::new(DashMap::new()),
            sweep_at: AtomicUsize::new(config.capacity.max(MIN_SWEEP)),
            global_generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            config,
            stats: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a cached permission set if present and unexpired
    pub fn get(&self, principal: &PrincipalId, node: Option<NodeId>) -> Option<PermissionSet> {
        if !self.config.enabled {
            return None;
        }

        if let Some(mut slot) = self.slots.get_mut(principal) {
            let expired = match slot.entries.get(&node) {
                Some(entry) if !entry.is_expired(self.config.ttl) => {
                    self.increment_stat("hits");
                    return Some(entry.permissions.clone());
                }
                Some(_) => true,
                None => false,
            };

            if expired {
                slot.entries.remove(&node);
                self.increment_stat("expirations");
            }
        }

        self.increment_stat("misses");
        None
    }

    /// Ticket to present when storing a result computed from now on
    pub fn ticket(&self, _principal: &PrincipalId) -> CacheTicket {
        // Clock first: a ticket that predates a fence must also predate its raise time
        let issued_at = Instant::now();
        CacheTicket {
            global: self.global_generation.load(Ordering::SeqCst),
            epoch: self.epoch.load(Ordering::SeqCst),
            issued_at,
        }
    }

    /// Store a permission set unless the principal was invalidated since `ticket`
    ///
    /// Returns whether the entry was stored.
    pub fn put(
        &self,
        principal: &PrincipalId,
        node: Option<NodeId>,
        ticket: CacheTicket,
        permissions: PermissionSet,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }
        debug_assert!(
            ticket.epoch <= self.epoch.load(Ordering::SeqCst),
            "ticket was issued by another cache"
        );

        // Evict before taking a shard lock of our own
        if !self.slots.contains_key(principal) && self.slots.len() >= self.config.capacity {
            self.evict_oldest();
        }

        // The fence check runs while the slot's shard is write-locked.
        // `invalidate` raises the fence before removing the slot, so either we
        // observe the fence here, or its removal runs after our insert.
        let mut slot = self
            .slots
            .entry(principal.clone())
            .or_insert_with(PrincipalSlot::new);

        if self.is_stale(principal, &ticket) {
            debug!("Discarding stale resolution for {}", principal);
            drop(slot);
            self.slots
                .remove_if(principal, |_, slot| slot.entries.is_empty());
            self.increment_stat("stale_puts");
            return false;
        }

        slot.entries
            .insert(node, CachedEntry::new(permissions, ticket.issued_at));
        true
    }

    /// Drop every cached set of `principal` and fence off in-flight resolutions
    pub fn invalidate(&self, principal: &PrincipalId) {
        let generation = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.fences.insert(
            principal.clone(),
            Fence {
                generation,
                raised_at: Instant::now(),
            },
        );
        self.slots.remove(principal);
        self.increment_stat("invalidations");

        if self.fences.len() >= self.sweep_at.load(Ordering::Relaxed) {
            self.sweep_fences();
        }
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.global_generation.fetch_add(1, Ordering::SeqCst);
        self.slots.clear();
        self.increment_stat("invalidations");
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            expirations: self.get_stat("expirations"),
            invalidations: self.get_stat("invalidations"),
            stale_puts: self.get_stat("stale_puts"),
            principals: self.slots.len(),
            entries: self.slots.iter().map(|slot| slot.entries.len()).sum(),
            fences: self.fences.len(),
            max_principals: self.config.capacity,
        }
    }

    fn is_stale(&self, principal: &PrincipalId, ticket: &CacheTicket) -> bool {
        if ticket.global != self.global_generation.load(Ordering::SeqCst) {
            return true;
        }
        if ticket.issued_at.elapsed() >= self.config.ttl {
            return true;
        }
        self.fences
            .get(principal)
            .map_or(false, |fence| fence.generation > ticket.epoch)
    }

    /// Drop fences older than the TTL; no live ticket can be rejected by them alone
    fn sweep_fences(&self) {
        let ttl = self.config.ttl;
        self.fences.retain(|_, fence| fence.raised_at.elapsed() < ttl);

        let remaining = self.fences.len();
        self.sweep_at.store(
            (remaining * 2).max(self.config.capacity).max(MIN_SWEEP),
            Ordering::Relaxed,
        );
        debug!("Swept invalidation fences, {} remaining", remaining);
    }

    /// Evict the oldest 10% of principal slots (at least one)
    fn evict_oldest(&self) {
        let to_remove = (self.config.capacity / 10).max(1);

        let mut by_age: Vec<(PrincipalId, Instant)> = self
            .slots
            .iter()
            .map(|slot| (slot.key().clone(), slot.created_at))
            .collect();
        by_age.sort_by_key(|(_, created_at)| *created_at);

        for (principal, _) in by_age.into_iter().take(to_remove) {
            self.slots.remove(&principal);
            self.increment_stat("evictions");
        }
    }

    fn increment_stat(&self, key: &'static str) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub invalidations: usize,
    pub stale_puts: usize,
    pub principals: usize,
    pub entries: usize,
    pub fences: usize,
    pub max_principals: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
