use std::sync::LazyLock;

use chrono::{DateTime, Duration, SecondsFormat, Timelike, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::clock;
use crate::types::{
    Geo, Location, Measurement, OutputMessage, RawMessage, RawRecord, Severity, StormEvent,
    EVENT_SOURCE,
};

// Matches a 3-5 letter NWS office code in parentheses at the end of a comment,
// e.g. "Quarter hail reported. (FWD)" -> "FWD".
static SOURCE_OFFICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([A-Z]{3,5})\)\s*$").unwrap());

// Parses NWS-style relative locations: "<distance> <compass> <name>",
// e.g. "8 ESE Chappel" -> distance=8, direction=ESE, name=Chappel.
static LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)\s+([NSEW]{1,3})\s+(.+)$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid raw record payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Decodes a raw message payload into a `StormEvent`.
///
/// The only way this fails is a payload that isn't JSON or isn't shaped as a
/// record; missing fields are tolerated and become empty strings. The event id
/// is fingerprinted here, before magnitude normalization, so it is stable
/// across reprocessing of the same raw message.
pub fn parse(msg: &RawMessage) -> Result<StormEvent, ParseError> {
    let record: RawRecord = serde_json::from_slice(&msg.payload)?;

    let lat = parse_float_or_zero(&record.lat);
    let lon = parse_float_or_zero(&record.lon);
    let magnitude = parse_magnitude(
        &record.event_type,
        &record.size,
        &record.f_scale,
        &record.speed,
    );
    let begin_time = combine_hhmm(msg.timestamp, &record.time);
    let id = generate_id(
        &record.event_type,
        &record.state,
        lat,
        lon,
        &record.time,
        magnitude,
    );

    Ok(StormEvent {
        id,
        event_type: record.event_type,
        geo: Geo { lat, lon },
        measurement: Measurement {
            magnitude,
            unit: String::new(),
            severity: None,
        },
        begin_time,
        end_time: begin_time,
        source: EVENT_SOURCE.to_string(),
        location: Location {
            raw: record.location,
            state: record.state,
            county: record.county,
            ..Default::default()
        },
        comments: record.comments,
        source_office: None,
        time_bucket: None,
        geocoding: None,
        raw_payload: msg.payload.clone(),
        processed_at: DateTime::UNIX_EPOCH,
    })
}

/// Normalizes, classifies, and enriches a parsed storm event. Total: never
/// fails, and applying it twice changes nothing beyond `processed_at`.
pub fn enrich(mut event: StormEvent) -> StormEvent {
    event.event_type = normalize_event_type(event.event_type);
    event.measurement.unit = normalize_unit(&event.event_type, &event.measurement.unit);
    event.measurement.magnitude = normalize_magnitude(
        &event.event_type,
        event.measurement.magnitude,
        &event.measurement.unit,
    );
    event.measurement.severity = derive_severity(&event.event_type, event.measurement.magnitude);
    event.source_office = extract_source_office(&event.comments);
    let (name, distance, direction) = parse_location(&event.location.raw);
    event.location.name = name;
    event.location.distance = distance;
    event.location.direction = direction;
    event.time_bucket = derive_time_bucket(event.begin_time);
    event.processed_at = clock::now();
    event
}

/// Marshals an enriched event into its sink-topic wire form. The retained raw
/// payload is dropped; the key is the event id's bytes.
pub fn serialize(event: &StormEvent) -> Result<OutputMessage, serde_json::Error> {
    let payload = serde_json::to_vec(event)?;
    Ok(OutputMessage {
        key: event.id.clone().into_bytes(),
        payload,
        headers: vec![
            ("event_type".to_string(), event.event_type.clone()),
            (
                "processed_at".to_string(),
                event
                    .processed_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ],
    })
}

fn parse_float_or_zero(value: &str) -> f64 {
    value.trim().parse().unwrap_or(0.0)
}

/// Selects and parses the type-specific magnitude column. Empty strings and
/// the sentinel "UNK" (any case) mean unknown and map to 0, as does anything
/// that doesn't parse once an `EF`/`F` scale prefix is stripped.
fn parse_magnitude(event_type: &str, size: &str, f_scale: &str, speed: &str) -> f64 {
    let raw = match event_type {
        "hail" => size,
        "tornado" => f_scale,
        "wind" => speed,
        _ => return 0.0,
    };

    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("UNK") {
        return 0.0;
    }
    let raw = raw.strip_prefix("EF").unwrap_or(raw);
    let raw = raw.strip_prefix('F').unwrap_or(raw);

    raw.parse().unwrap_or(0.0)
}

/// Combines the ingest date with an HHMM time string ("1510" -> 15:10), also
/// accepting three digits ("930" -> 09:30). Anything malformed yields the
/// ingest date at midnight UTC.
fn combine_hhmm(base: DateTime<Utc>, hhmm: &str) -> DateTime<Utc> {
    let midnight = base
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc();

    let trimmed = hhmm.trim();
    if !(trimmed.len() == 3 || trimmed.len() == 4)
        || !trimmed.bytes().all(|b| b.is_ascii_digit())
    {
        return midnight;
    }
    let padded = if trimmed.len() == 3 {
        format!("0{trimmed}")
    } else {
        trimmed.to_string()
    };

    let (Ok(hour), Ok(minute)) = (padded[..2].parse::<i64>(), padded[2..].parse::<i64>()) else {
        return midnight;
    };
    if hour > 23 || minute > 59 {
        return midnight;
    }

    midnight + Duration::hours(hour) + Duration::minutes(minute)
}

/// Produces a deterministic id from the event's key fields. Coordinates enter
/// at four decimal places and the magnitude in its shortest round-trip decimal
/// form, so recomputation over the same inputs is byte-identical.
fn generate_id(
    event_type: &str,
    state: &str,
    lat: f64,
    lon: f64,
    time: &str,
    magnitude: f64,
) -> String {
    let input = format!(
        "{event_type}|{state}|{lat:.4}|{lon:.4}|{time}|{}",
        format_magnitude(magnitude)
    );
    let digest = Sha256::digest(input.as_bytes());
    let mut short = format!("{:x}", digest);
    short.truncate(16);
    if event_type.is_empty() {
        short
    } else {
        format!("{event_type}-{short}")
    }
}

/// Shortest decimal representation that round-trips the value: 175 -> "175",
/// 1.75 -> "1.75", 0 -> "0". Part of the id contract.
fn format_magnitude(magnitude: f64) -> String {
    format!("{magnitude}")
}

/// Validates the event type added by the upstream collector. Exact matches
/// only; the producer is known to emit already-canonical values, so no case
/// folding or trimming is applied here.
fn normalize_event_type(value: String) -> String {
    match value.as_str() {
        "hail" | "wind" | "tornado" => value,
        _ => String::new(),
    }
}

/// Returns the unit lowercased if present, otherwise the default unit for the
/// event type: inches for hail, mph for wind, F-scale for tornado.
fn normalize_unit(event_type: &str, unit: &str) -> String {
    let unit = unit.trim().to_lowercase();
    if !unit.is_empty() {
        return unit;
    }

    match event_type {
        "hail" => "in",
        "wind" => "mph",
        "tornado" => "f_scale",
        _ => "",
    }
    .to_string()
}

/// Corrects the legacy hundredths-of-inch hail encoding (175 = 1.75in).
/// Values >= 10 with unit "in" are unambiguously that encoding, since the
/// largest hail ever recorded in the US was about 8 inches.
fn normalize_magnitude(event_type: &str, magnitude: f64, unit: &str) -> f64 {
    if magnitude == 0.0 {
        return magnitude;
    }
    if event_type == "hail" && unit == "in" && magnitude >= 10.0 {
        return magnitude / 100.0;
    }
    magnitude
}

/// Maps magnitude to a severity label:
///   - hail: <0.75in minor, <1.5in moderate, <2.5in severe, else extreme
///   - wind: <50mph minor, <74mph moderate (tropical storm), <96mph severe
///     (hurricane Cat 2), else extreme
///   - tornado: EF0-1 minor, EF2 moderate, EF3-4 severe, EF5 extreme
///
/// None when magnitude is 0 or the event type is unrecognized.
fn derive_severity(event_type: &str, magnitude: f64) -> Option<Severity> {
    if magnitude == 0.0 {
        return None;
    }

    let severity = match event_type {
        "hail" => {
            if magnitude < 0.75 {
                Severity::Minor
            } else if magnitude < 1.5 {
                Severity::Moderate
            } else if magnitude < 2.5 {
                Severity::Severe
            } else {
                Severity::Extreme
            }
        }
        "wind" => {
            if magnitude < 50.0 {
                Severity::Minor
            } else if magnitude < 74.0 {
                Severity::Moderate
            } else if magnitude < 96.0 {
                Severity::Severe
            } else {
                Severity::Extreme
            }
        }
        "tornado" => {
            if magnitude <= 1.0 {
                Severity::Minor
            } else if magnitude == 2.0 {
                Severity::Moderate
            } else if magnitude <= 4.0 {
                Severity::Severe
            } else {
                Severity::Extreme
            }
        }
        _ => return None,
    };
    Some(severity)
}

/// Pulls the NWS Weather Forecast Office code from the end of a comment
/// string, e.g. "Large hail reported. (OUN)" -> "OUN".
fn extract_source_office(comments: &str) -> Option<String> {
    let comments = comments.trim();
    if comments.is_empty() {
        return None;
    }

    SOURCE_OFFICE_RE
        .captures(comments)
        .map(|captures| captures[1].to_string())
}

/// Splits an NWS relative location string into (name, distance, direction).
/// A string that doesn't match the format is returned whole as the name with
/// the parsed fields absent.
fn parse_location(raw: &str) -> (String, Option<f64>, Option<String>) {
    let raw = raw.trim();
    if raw.is_empty() {
        return (String::new(), None, None);
    }

    let Some(captures) = LOCATION_RE.captures(raw) else {
        return (raw.to_string(), None, None);
    };
    let Ok(distance) = captures[1].parse::<f64>() else {
        return (raw.to_string(), None, None);
    };

    (
        captures[3].trim().to_string(),
        Some(distance),
        Some(captures[2].to_string()),
    )
}

/// Truncates the event time to the top of the hour in UTC. The zero instant
/// has no bucket.
fn derive_time_bucket(begin_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if begin_time == DateTime::UNIX_EPOCH {
        return None;
    }

    Some(
        begin_time
            .date_naive()
            .and_hms_opt(begin_time.hour(), 0, 0)
            .expect("hour is within range")
            .and_utc(),
    )
}
