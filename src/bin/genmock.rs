//! Publishes a small set of representative raw storm reports to the source
//! topic, for exercising the pipeline end to end without the upstream
//! collector.
//!
//! Usage: set the same environment as the service (KAFKA_BROKERS,
//! KAFKA_SOURCE_TOPIC) and run `genmock`.

use std::time::Duration;

use anyhow::Context as _;
use rdkafka::producer::FutureRecord;
use serde_json::json;
use storm_etl::config::Config;
use storm_etl::kafka::create_producer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_with_defaults().context("load configuration")?;
    let producer = create_producer(&config.kafka)
        .await
        .context("create producer")?;

    let reports = sample_reports();
    for report in &reports {
        let payload = serde_json::to_vec(report).context("serialize mock report")?;
        producer
            .send(
                FutureRecord {
                    topic: &config.source_topic,
                    payload: Some(&payload),
                    partition: None,
                    key: None::<&str>,
                    timestamp: None,
                    headers: None,
                },
                Duration::from_secs(10),
            )
            .await
            .map_err(|(err, _)| err)
            .context("produce mock report")?;
    }

    info!(
        count = reports.len(),
        topic = %config.source_topic,
        "published mock storm reports"
    );
    Ok(())
}

/// One report per event type, plus the known awkward shapes: a legacy
/// hundredths-of-inch hail size, an EF-prefixed tornado rating, an unknown
/// wind speed, and a location that doesn't follow the relative format.
fn sample_reports() -> Vec<serde_json::Value> {
    vec![
        json!({
            "Time": "1510",
            "Size": "125",
            "Location": "8 ESE Chappel",
            "County": "San Saba",
            "State": "TX",
            "Lat": "31.02",
            "Lon": "-98.44",
            "Comments": "1.25 inch hail reported. (SJT)",
            "EventType": "hail"
        }),
        json!({
            "Time": "1223",
            "F_Scale": "EF2",
            "Location": "2 N Mcalester",
            "County": "Pittsburg",
            "State": "OK",
            "Lat": "34.96",
            "Lon": "-95.77",
            "Comments": "Tornado confirmed (TSA)",
            "EventType": "tornado"
        }),
        json!({
            "Time": "1245",
            "Speed": "UNK",
            "Location": "3 W Ada",
            "County": "Pontotoc",
            "State": "OK",
            "Lat": "34.77",
            "Lon": "-96.72",
            "Comments": "Trees down (OUN)",
            "EventType": "wind"
        }),
        json!({
            "Time": "930",
            "Speed": "65",
            "Location": "Downtown Dallas",
            "County": "Dallas",
            "State": "TX",
            "Lat": "32.78",
            "Lon": "-96.80",
            "Comments": "Measured gust. (FWD)",
            "EventType": "wind"
        }),
    ]
}
