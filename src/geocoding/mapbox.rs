use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use super::{GeocodedPlace, Geocoder};
use crate::metrics_consts::{GEOCODE_API_DURATION_SECONDS, GEOCODE_REQUESTS_TOTAL};

const DEFAULT_BASE_URL: &str = "https://api.mapbox.com/geocoding/v5/mapbox.places";

/// Geocoder backed by the Mapbox Geocoding API.
pub struct MapboxClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl MapboxClient {
    pub fn new(token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build mapbox http client")?;
        Ok(Self {
            client,
            token: token.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Points the client at a different endpoint. Used by tests to target a
    /// mock server.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn lookup(
        &self,
        method: &'static str,
        term: &str,
        types: Option<&str>,
    ) -> anyhow::Result<GeocodedPlace> {
        let mut url = Url::parse(&self.base_url).context("parse mapbox base url")?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("mapbox base url cannot be a base"))?
            .push(&format!("{term}.json"));
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("access_token", &self.token)
                .append_pair("limit", "1");
            if let Some(types) = types {
                pairs.append_pair("types", types);
            }
        }

        let started = Instant::now();
        let result = self.request(url).await;
        metrics::histogram!(GEOCODE_API_DURATION_SECONDS, "method" => method)
            .record(started.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(place) if place.formatted_address.is_empty() => "empty",
            Ok(_) => "success",
            Err(_) => "error",
        };
        metrics::counter!(GEOCODE_REQUESTS_TOTAL, "method" => method, "outcome" => outcome)
            .increment(1);

        result
    }

    async fn request(&self, url: Url) -> anyhow::Result<GeocodedPlace> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("mapbox request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("mapbox api error: status {status}: {body}");
        }

        let decoded: GeocodeResponse = response
            .json()
            .await
            .context("decode mapbox response")?;

        let Some(feature) = decoded.features.into_iter().next() else {
            return Ok(GeocodedPlace::default());
        };

        let mut place = GeocodedPlace {
            formatted_address: feature.place_name,
            place_name: feature.text,
            confidence: feature.relevance,
            ..Default::default()
        };
        if let [lon, lat] = feature.center[..] {
            place.lon = lon;
            place.lat = lat;
        }
        Ok(place)
    }
}

#[async_trait]
impl Geocoder for MapboxClient {
    async fn forward(&self, name: &str, state: &str) -> anyhow::Result<GeocodedPlace> {
        let query = if state.is_empty() {
            name.to_string()
        } else {
            format!("{name}, {state}")
        };
        self.lookup("forward", &query, Some("place,locality")).await
    }

    async fn reverse(&self, lat: f64, lon: f64) -> anyhow::Result<GeocodedPlace> {
        // Mapbox expects lon,lat order.
        self.lookup("reverse", &format!("{lon:.6},{lat:.6}"), None)
            .await
    }
}

// Mapbox API response shape; only the fields the pipeline consumes.

#[derive(Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    /// `[lon, lat]`
    #[serde(default)]
    center: Vec<f64>,
    #[serde(default)]
    place_name: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    relevance: f64,
}
