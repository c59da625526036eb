//! Cache-aside location lookups
//!
//! Entries are keyed by IP address only and expire independently. Private
//! addresses bypass the cache entirely. When the store is unavailable the
//! resolver is called directly, its result is not cached and the `geo_cache`
//! component reads degraded until the store answers again.

use super::{is_lookup_candidate, GeoResolver};
use crate::error::CacheError;
use crate::health::{components, HealthRegistry};
use crate::models::Location;
use crate::observability::ProbeMetrics;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default lifetime of a cached location (30 days)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(2_592_000);

/// Key/value store holding resolved locations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry; expired entries read as misses
    async fn get(&self, ip: &str) -> Result<Option<Location>, CacheError>;

    /// Store `location` for `ip`, replacing any previous entry
    async fn set(&self, ip: &str, location: Location, ttl: Duration) -> Result<(), CacheError>;

    /// Drop expired entries; returns how many were removed
    async fn purge_expired(&self) -> Result<usize, CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    location: Location,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process cache store
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, ip: &str) -> Result<Option<Location>, CacheError> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(ip)
            .map(|entry| (entry.is_live(now), entry.location.clone()));

        match hit {
            Some((true, location)) => Ok(Some(location)),
            Some((false, _)) => {
                self.entries.remove_if(ip, |_, entry| !entry.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, ip: &str, location: Location, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            location,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(ip.to_string(), entry);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

/// Location lookups with a cache in front of the resolver
#[derive(Clone)]
pub struct LocationCache {
    store: Arc<dyn CacheStore>,
    resolver: Arc<dyn GeoResolver>,
    ttl: Duration,
    metrics: ProbeMetrics,
    health: Option<HealthRegistry>,
    /// Whether the store is currently reported as down
    store_down: Arc<Mutex<bool>>,
}

impl LocationCache {
    pub fn new(store: Arc<dyn CacheStore>, resolver: Arc<dyn GeoResolver>, ttl: Duration) -> Self {
        Self {
            store,
            resolver,
            ttl,
            metrics: ProbeMetrics::new(),
            health: None,
            store_down: Arc::new(Mutex::new(false)),
        }
    }

    /// Report store outages on the `geo_cache` component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolve `ip`, consulting the cache first
    pub async fn get_or_fetch(&self, ip: &str) -> Option<Location> {
        if !is_lookup_candidate(ip) {
            return None;
        }

        match self.store.get(ip).await {
            Ok(Some(location)) => {
                self.metrics.inc_geo_cache_hits();
                self.store_answered().await;
                return Some(location);
            }
            Ok(None) => {
                self.metrics.inc_geo_cache_misses();
                self.store_answered().await;
            }
            Err(e) => {
                self.metrics.inc_geo_cache_fallbacks();
                warn!(ip = %ip, error = %e, "Location cache unavailable, resolving directly");
                self.store_failed(&e).await;
                return self.resolver.resolve(ip).await;
            }
        }

        let location = self.resolver.resolve(ip).await?;

        match self.store.set(ip, location.clone(), self.ttl).await {
            Ok(()) => {
                debug!(ip = %ip, ttl_secs = self.ttl.as_secs(), "Cached location");
            }
            Err(e) => {
                self.metrics.inc_geo_cache_fallbacks();
                warn!(ip = %ip, error = %e, "Failed to cache location");
                self.store_failed(&e).await;
            }
        }

        Some(location)
    }

    /// Drop expired entries from the underlying store
    pub async fn purge_expired(&self) -> usize {
        match self.store.purge_expired().await {
            Ok(removed) => {
                self.store_answered().await;
                removed
            }
            Err(e) => {
                warn!(error = %e, "Failed to purge expired locations");
                self.store_failed(&e).await;
                0
            }
        }
    }

    async fn store_failed(&self, error: &CacheError) {
        let Some(health) = &self.health else {
            return;
        };
        let mut down = self.store_down.lock().await;
        if !*down {
            health
                .set_degraded(components::GEO_CACHE, error.to_string())
                .await;
            *down = true;
        }
    }

    async fn store_answered(&self) {
        let Some(health) = &self.health else {
            return;
        };
        let mut down = self.store_down.lock().await;
        if *down {
            info!("Location cache store recovered");
            health.set_healthy(components::GEO_CACHE).await;
            *down = false;
        }
    }
}
