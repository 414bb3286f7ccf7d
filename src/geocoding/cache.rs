use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use super::{GeocodedPlace, Geocoder};
use crate::metrics_consts::GEOCODE_CACHE_TOTAL;

/// LRU decorator around a geocoding provider.
///
/// Lookups promote their entry to most-recently-used, inserts beyond capacity
/// evict the least-recently-used entry, and results with an empty formatted
/// address are never stored, so a transient "not found" gets retried on the
/// next occurrence. Errors bypass the cache entirely. The provider call itself
/// runs outside the lock, so contention is limited to map bookkeeping.
pub struct CachedGeocoder<G> {
    inner: G,
    cache: Mutex<LruCache<String, GeocodedPlace>>,
}

impl<G> CachedGeocoder<G> {
    pub fn new(inner: G, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &G {
        &self.inner
    }

    async fn lookup(&self, method: &'static str, key: &str) -> Option<GeocodedPlace> {
        let mut cache = self.cache.lock().await;
        let found = cache.get(key).cloned();
        let result = if found.is_some() { "hit" } else { "miss" };
        metrics::counter!(GEOCODE_CACHE_TOTAL, "method" => method, "result" => result)
            .increment(1);
        found
    }

    async fn store(&self, key: String, place: &GeocodedPlace) {
        // Empty results are not cached; see the type-level docs.
        if place.formatted_address.is_empty() {
            return;
        }
        self.cache.lock().await.put(key, place.clone());
    }
}

#[async_trait]
impl<G: Geocoder> Geocoder for CachedGeocoder<G> {
    async fn forward(&self, name: &str, state: &str) -> anyhow::Result<GeocodedPlace> {
        let key = format!("fwd:{name}|{state}");
        if let Some(place) = self.lookup("forward", &key).await {
            return Ok(place);
        }
        let place = self.inner.forward(name, state).await?;
        self.store(key, &place).await;
        Ok(place)
    }

    async fn reverse(&self, lat: f64, lon: f64) -> anyhow::Result<GeocodedPlace> {
        let key = format!("rev:{lat:.6},{lon:.6}");
        if let Some(place) = self.lookup("reverse", &key).await {
            return Ok(place);
        }
        let place = self.inner.reverse(lat, lon).await?;
        self.store(key, &place).await;
        Ok(place)
    }
}
