use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use storm_etl::geocoding::{enrich_with_geocoding, CachedGeocoder, GeocodedPlace, Geocoder};
use storm_etl::types::{
    GeocodeSource, Geo, Location, Measurement, StormEvent, EVENT_SOURCE,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 27, 6, 0, 0).unwrap()
}

fn event(geo: Geo, name: &str, state: &str) -> StormEvent {
    StormEvent {
        id: "hail-0011223344556677".to_string(),
        event_type: "hail".to_string(),
        geo,
        measurement: Measurement::default(),
        begin_time: now(),
        end_time: now(),
        source: EVENT_SOURCE.to_string(),
        location: Location {
            name: name.to_string(),
            state: state.to_string(),
            ..Default::default()
        },
        comments: String::new(),
        source_office: None,
        time_bucket: None,
        geocoding: None,
        raw_payload: Vec::new(),
        processed_at: now(),
    }
}

fn chappel() -> GeocodedPlace {
    GeocodedPlace {
        lat: 31.02,
        lon: -98.44,
        formatted_address: "Chappel, Texas, United States".to_string(),
        place_name: "Chappel".to_string(),
        confidence: 0.98,
    }
}

enum Behavior {
    Found(GeocodedPlace),
    Empty,
    Error,
}

/// Fake provider that records how many times each query was issued.
struct ScriptedGeocoder {
    behavior: Behavior,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedGeocoder {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, key: String) -> anyhow::Result<GeocodedPlace> {
        *self.calls.lock().unwrap().entry(key).or_insert(0) += 1;
        match &self.behavior {
            Behavior::Found(place) => Ok(place.clone()),
            Behavior::Empty => Ok(GeocodedPlace::default()),
            Behavior::Error => anyhow::bail!("provider unavailable"),
        }
    }

    fn calls_for(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Geocoder for ScriptedGeocoder {
    async fn forward(&self, name: &str, state: &str) -> anyhow::Result<GeocodedPlace> {
        self.record(format!("fwd:{name}|{state}"))
    }

    async fn reverse(&self, lat: f64, lon: f64) -> anyhow::Result<GeocodedPlace> {
        self.record(format!("rev:{lat:.6},{lon:.6}"))
    }
}

#[tokio::test]
async fn coordinates_present_triggers_reverse_lookup() {
    let geocoder = ScriptedGeocoder::new(Behavior::Found(chappel()));
    let input = event(Geo { lat: 31.02, lon: -98.44 }, "Chappel", "TX");

    let enriched = enrich_with_geocoding(input, Some(&geocoder)).await;

    let block = enriched.geocoding.expect("geocoding block");
    assert_eq!(block.source, GeocodeSource::Reverse);
    assert_eq!(block.formatted_address, "Chappel, Texas, United States");
    assert_eq!(block.place_name, "Chappel");
    assert_eq!(block.confidence, 0.98);
    // Reverse lookups never move the event.
    assert_eq!(enriched.geo, Geo { lat: 31.02, lon: -98.44 });
    assert_eq!(geocoder.calls_for("rev:31.020000,-98.440000"), 1);
    assert_eq!(geocoder.total_calls(), 1);
}

#[tokio::test]
async fn reverse_empty_result_records_original() {
    let geocoder = ScriptedGeocoder::new(Behavior::Empty);
    let input = event(Geo { lat: 31.02, lon: -98.44 }, "Chappel", "TX");

    let enriched = enrich_with_geocoding(input, Some(&geocoder)).await;

    let block = enriched.geocoding.expect("geocoding block");
    assert_eq!(block.source, GeocodeSource::Original);
    assert!(block.formatted_address.is_empty());
}

#[tokio::test]
async fn reverse_error_degrades_to_failed() {
    let geocoder = ScriptedGeocoder::new(Behavior::Error);
    let input = event(Geo { lat: 31.02, lon: -98.44 }, "Chappel", "TX");

    let enriched = enrich_with_geocoding(input, Some(&geocoder)).await;

    let block = enriched.geocoding.expect("geocoding block");
    assert_eq!(block.source, GeocodeSource::Failed);
    assert_eq!(enriched.geo, Geo { lat: 31.02, lon: -98.44 });
}

#[tokio::test]
async fn missing_coordinates_fall_back_to_forward_lookup() {
    let geocoder = ScriptedGeocoder::new(Behavior::Found(chappel()));
    let input = event(Geo::default(), "Chappel", "TX");

    let enriched = enrich_with_geocoding(input, Some(&geocoder)).await;

    let block = enriched.geocoding.expect("geocoding block");
    assert_eq!(block.source, GeocodeSource::Forward);
    // Forward lookups fill in the coordinates.
    assert_eq!(enriched.geo, Geo { lat: 31.02, lon: -98.44 });
    assert_eq!(geocoder.calls_for("fwd:Chappel|TX"), 1);
}

#[tokio::test]
async fn forward_zero_coordinates_records_original() {
    let geocoder = ScriptedGeocoder::new(Behavior::Empty);
    let input = event(Geo::default(), "Chappel", "TX");

    let enriched = enrich_with_geocoding(input, Some(&geocoder)).await;

    assert_eq!(
        enriched.geocoding.expect("geocoding block").source,
        GeocodeSource::Original
    );
    assert_eq!(enriched.geo, Geo::default());
}

#[tokio::test]
async fn nothing_to_look_up_records_original_without_calls() {
    let geocoder = ScriptedGeocoder::new(Behavior::Found(chappel()));
    let input = event(Geo::default(), "", "TX");

    let enriched = enrich_with_geocoding(input, Some(&geocoder)).await;

    assert_eq!(
        enriched.geocoding.expect("geocoding block").source,
        GeocodeSource::Original
    );
    assert_eq!(geocoder.total_calls(), 0);
}

#[tokio::test]
async fn disabled_geocoder_is_a_no_op() {
    let input = event(Geo { lat: 31.02, lon: -98.44 }, "Chappel", "TX");
    let enriched = enrich_with_geocoding(input, None).await;
    assert!(enriched.geocoding.is_none());
}

#[tokio::test]
async fn cache_serves_repeat_lookups_without_the_provider() {
    let inner = ScriptedGeocoder::new(Behavior::Found(chappel()));
    let cached = CachedGeocoder::new(inner, 10);

    let first = cached.forward("Chappel", "TX").await.unwrap();
    let second = cached.forward("Chappel", "TX").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(cached_inner(&cached).calls_for("fwd:Chappel|TX"), 1);

    cached.reverse(31.02, -98.44).await.unwrap();
    cached.reverse(31.02, -98.44).await.unwrap();
    assert_eq!(cached_inner(&cached).calls_for("rev:31.020000,-98.440000"), 1);
}

// The decorator owns its inner provider; tests reach through to its counters.
fn cached_inner(cached: &CachedGeocoder<ScriptedGeocoder>) -> &ScriptedGeocoder {
    cached.inner()
}

#[tokio::test]
async fn least_recently_used_entry_is_evicted_at_capacity() {
    let inner = ScriptedGeocoder::new(Behavior::Found(chappel()));
    let cached = CachedGeocoder::new(inner, 2);

    cached.forward("a", "TX").await.unwrap(); // cache: a
    cached.forward("b", "TX").await.unwrap(); // cache: b, a
    cached.forward("a", "TX").await.unwrap(); // promote a -> cache: a, b
    cached.forward("c", "TX").await.unwrap(); // evicts b -> cache: c, a

    // a and c are still cached; b was evicted and hits the provider again.
    cached.forward("a", "TX").await.unwrap();
    cached.forward("c", "TX").await.unwrap();
    cached.forward("b", "TX").await.unwrap();

    let inner = cached_inner(&cached);
    assert_eq!(inner.calls_for("fwd:a|TX"), 1);
    assert_eq!(inner.calls_for("fwd:c|TX"), 1);
    assert_eq!(inner.calls_for("fwd:b|TX"), 2);
}

#[tokio::test]
async fn empty_results_are_not_cached() {
    let inner = ScriptedGeocoder::new(Behavior::Empty);
    let cached = CachedGeocoder::new(inner, 10);

    cached.forward("Nowhere", "TX").await.unwrap();
    cached.forward("Nowhere", "TX").await.unwrap();

    // Both lookups reached the provider, so a transient "not found" can heal.
    assert_eq!(cached_inner(&cached).calls_for("fwd:Nowhere|TX"), 2);
}

#[tokio::test]
async fn errors_bypass_the_cache() {
    let inner = ScriptedGeocoder::new(Behavior::Error);
    let cached = CachedGeocoder::new(inner, 10);

    assert!(cached.forward("Chappel", "TX").await.is_err());
    assert!(cached.forward("Chappel", "TX").await.is_err());

    assert_eq!(cached_inner(&cached).calls_for("fwd:Chappel|TX"), 2);
}
