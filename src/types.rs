use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier stamped on every event this pipeline produces.
pub const EVENT_SOURCE: &str = "spc";

/// The flat JSON record published by the upstream collector. Every value is a
/// string, including the numeric ones; missing fields become empty strings and
/// unknown fields are ignored. Each report type carries its magnitude in a
/// different column (`Size`, `F_Scale`, `Speed`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default, rename = "Time")]
    pub time: String,
    #[serde(default, rename = "Size")]
    pub size: String,
    #[serde(default, rename = "F_Scale")]
    pub f_scale: String,
    #[serde(default, rename = "Speed")]
    pub speed: String,
    #[serde(default, rename = "Location")]
    pub location: String,
    #[serde(default, rename = "County")]
    pub county: String,
    #[serde(default, rename = "State")]
    pub state: String,
    #[serde(default, rename = "Lat")]
    pub lat: String,
    #[serde(default, rename = "Lon")]
    pub lon: String,
    #[serde(default, rename = "Comments")]
    pub comments: String,
    #[serde(default, rename = "EventType")]
    pub event_type: String,
}

/// Commit capability tied to a message's broker offset. Consuming the boxed
/// handle makes invoke-at-most-once structural; the pipeline invokes it
/// exactly once, after the message's fate is decided.
pub trait CommitHandle: Send + Sync {
    fn commit(self: Box<Self>) -> anyhow::Result<()>;
}

/// An unprocessed message pulled from the source topic, with enough transport
/// metadata to log failures and commit the offset once the message is handled.
/// The ingest timestamp supplies the date that the record's HHMM time is
/// combined with.
pub struct RawMessage {
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: DateTime<Utc>,
    pub commit: Box<dyn CommitHandle>,
}

/// WGS-84 coordinate pair. A failed parse of either field yields 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Geo {
    pub lat: f64,
    pub lon: f64,
}

/// The raw NWS relative-location string and its parsed components. Enrichment
/// splits "8 ESE Chappel" into name/distance/direction; when the raw string
/// doesn't match that shape it is kept as the name and the parsed fields stay
/// absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub county: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Severe,
    Extreme,
}

/// What was observed: magnitude, its unit, and the derived severity label.
/// Severity is absent when the magnitude is 0 or the event type is not
/// recognized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub magnitude: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// How the geocoding block was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeocodeSource {
    Forward,
    Reverse,
    Original,
    Failed,
}

/// Result of the optional geocoding enrichment step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geocoding {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub formatted_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub place_name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub confidence: f64,
    pub source: GeocodeSource,
}

impl Geocoding {
    /// A block that records only how the lookup went, with no place details.
    pub fn from_source(source: GeocodeSource) -> Self {
        Self {
            formatted_address: String::new(),
            place_name: String::new(),
            confidence: 0.0,
            source,
        }
    }
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

/// The canonical enriched event, and the JSON value written to the sink topic.
///
/// The id is a deterministic fingerprint of the event's key fields, so
/// reprocessing the same raw message always yields the same id and downstream
/// consumers can deduplicate redeliveries naturally. Optional fields are
/// omitted from the JSON when absent; the retained raw payload is never
/// serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormEvent {
    pub id: String,
    pub event_type: String,
    pub geo: Geo,
    pub measurement: Measurement,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub location: Location,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_office: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_bucket: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocoding: Option<Geocoding>,

    #[serde(skip)]
    pub raw_payload: Vec<u8>,
    pub processed_at: DateTime<Utc>,
}

/// The wire form destined for the sink topic: key is the event id's bytes,
/// payload is the event's JSON serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputMessage {
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}
