use std::sync::Arc;

use anyhow::Context as _;
use storm_etl::{
    config::Config,
    geocoding::{CachedGeocoder, Geocoder, MapboxClient},
    kafka::{create_producer, SinkProducer, SourceConsumer},
    metrics_consts::GEOCODE_ENABLED,
    pipeline::{Pipeline, Transformer},
    server,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer: tracing_subscriber::filter::Filtered<
        tracing_subscriber::fmt::Layer<tracing_subscriber::Registry>,
        EnvFilter,
        tracing_subscriber::Registry,
    > = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("starting storm report etl");

    let config = Config::init_with_defaults().context("load configuration")?;
    let geocoding_enabled = config.geocoding_enabled();

    let consumer = SourceConsumer::new(
        &config.kafka,
        &config.group_id,
        &config.source_topic,
        &config.offset_reset,
        config.batch_flush_interval.0,
    )
    .context("create source consumer")?;
    info!(
        topic = %config.source_topic,
        group = %config.group_id,
        "subscribed to source topic"
    );

    let producer = create_producer(&config.kafka)
        .await
        .context("create sink producer")?;
    let loader = SinkProducer::new(producer, config.sink_topic.clone());

    let geocoder: Option<Arc<dyn Geocoder>> = if geocoding_enabled {
        info!(cache_size = config.mapbox_cache_size, "geocoding enrichment enabled");
        let client = MapboxClient::new(&config.mapbox_token, config.mapbox_timeout.0)
            .context("create mapbox client")?;
        Some(Arc::new(CachedGeocoder::new(
            client,
            config.mapbox_cache_size,
        )))
    } else {
        None
    };

    let transformer = Transformer::new(geocoder);
    let pipeline = Pipeline::new(consumer, transformer, loader, config.batch_size);
    let ready = pipeline.readiness();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    // The router installs the metrics recorder; gauges only register after it.
    let router = server::router(ready);
    metrics::gauge!(GEOCODE_ENABLED).set(if geocoding_enabled { 1.0 } else { 0.0 });

    let http_addr = config.http_addr.clone();
    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(err) = server::serve(router, &http_addr, server_shutdown).await {
            error!(error = %err, "http server error");
        }
    });

    let pipeline_shutdown = shutdown.clone();
    let mut pipeline_handle = tokio::spawn(async move { pipeline.run(pipeline_shutdown).await });

    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = &mut pipeline_handle => {
            warn!("pipeline task exited unexpectedly");
            shutdown.cancel();
        }
    }

    info!("shutting down");
    let drained = tokio::time::timeout(config.shutdown_timeout.0, async {
        if !pipeline_handle.is_finished() {
            let _ = pipeline_handle.await;
        }
        let _ = server_handle.await;
    })
    .await;
    if drained.is_err() {
        warn!(
            timeout = ?config.shutdown_timeout.0,
            "shutdown timeout reached before tasks drained"
        );
    }

    info!("shutdown complete");
    Ok(())
}
