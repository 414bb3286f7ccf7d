use async_trait::async_trait;
use tracing::warn;

use crate::types::{GeocodeSource, Geocoding, StormEvent};

pub mod cache;
pub mod mapbox;

pub use cache::CachedGeocoder;
pub use mapbox::MapboxClient;

/// A place returned by a geocoding provider. An empty `formatted_address`
/// means the provider found nothing for the query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeocodedPlace {
    pub lat: f64,
    pub lon: f64,
    pub formatted_address: String,
    pub place_name: String,
    /// Provider confidence score in [0, 1].
    pub confidence: f64,
}

/// Resolves place names to coordinates and back.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Converts a location name and state to coordinates and place details.
    async fn forward(&self, name: &str, state: &str) -> anyhow::Result<GeocodedPlace>;

    /// Converts coordinates to place details.
    async fn reverse(&self, lat: f64, lon: f64) -> anyhow::Result<GeocodedPlace>;
}

/// Attempts to enrich an event with geocoding data. With no geocoder the
/// event passes through untouched; provider failures degrade gracefully,
/// recording `failed` and leaving the event's coordinates alone.
pub async fn enrich_with_geocoding(
    mut event: StormEvent,
    geocoder: Option<&dyn Geocoder>,
) -> StormEvent {
    let Some(geocoder) = geocoder else {
        return event;
    };

    let has_coords = event.geo.lat != 0.0 || event.geo.lon != 0.0;
    let has_name = !event.location.name.is_empty() && !event.location.state.is_empty();

    if has_coords {
        // Reverse geocode: coordinates -> place details.
        match geocoder.reverse(event.geo.lat, event.geo.lon).await {
            Ok(place) if !place.formatted_address.is_empty() => {
                event.geocoding = Some(Geocoding {
                    formatted_address: place.formatted_address,
                    place_name: place.place_name,
                    confidence: place.confidence,
                    source: GeocodeSource::Reverse,
                });
            }
            Ok(_) => {
                event.geocoding = Some(Geocoding::from_source(GeocodeSource::Original));
            }
            Err(err) => {
                warn!(
                    event_id = %event.id,
                    lat = event.geo.lat,
                    lon = event.geo.lon,
                    error = %err,
                    "reverse geocoding failed"
                );
                event.geocoding = Some(Geocoding::from_source(GeocodeSource::Failed));
            }
        }
    } else if has_name {
        // Forward geocode: location name -> coordinates.
        match geocoder
            .forward(&event.location.name, &event.location.state)
            .await
        {
            Ok(place) if place.lat != 0.0 || place.lon != 0.0 => {
                event.geo.lat = place.lat;
                event.geo.lon = place.lon;
                event.geocoding = Some(Geocoding {
                    formatted_address: place.formatted_address,
                    place_name: place.place_name,
                    confidence: place.confidence,
                    source: GeocodeSource::Forward,
                });
            }
            Ok(_) => {
                event.geocoding = Some(Geocoding::from_source(GeocodeSource::Original));
            }
            Err(err) => {
                warn!(
                    event_id = %event.id,
                    location = %event.location.name,
                    state = %event.location.state,
                    error = %err,
                    "forward geocoding failed"
                );
                event.geocoding = Some(Geocoding::from_source(GeocodeSource::Failed));
            }
        }
    } else {
        event.geocoding = Some(Geocoding::from_source(GeocodeSource::Original));
    }

    event
}
