use axum::{http::StatusCode, routing::get, Router};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tokio_util::sync::CancellationToken;

use crate::metrics_consts::BATCH_SIZE;
use crate::pipeline::ReadinessFlag;

pub async fn index() -> &'static str {
    "storm report etl service"
}

/// Builds the operational router: liveness, readiness, and the Prometheus
/// exposition. Installs the global metrics recorder, so call it once.
pub fn router(ready: ReadinessFlag) -> Router {
    setup_metrics_routes(health_router(ready))
}

/// The liveness and readiness routes alone, without the metrics recorder.
pub fn health_router(ready: ReadinessFlag) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(|| std::future::ready(StatusCode::OK)))
        .route(
            "/readyz",
            get(move || std::future::ready(readyz(ready.clone()))),
        )
}

/// Adds the prometheus endpoint to a router; call last.
fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = setup_metrics_recorder();
    router.route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    )
}

fn readyz(ready: ReadinessFlag) -> (StatusCode, String) {
    match ready.check_ready() {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

fn setup_metrics_recorder() -> PrometheusHandle {
    const SIZE_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 20.0, 30.0, 40.0, 50.0, 75.0, 100.0];
    const DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(BATCH_SIZE.to_string()), SIZE_BUCKETS)
        .unwrap()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .unwrap()
        .install_recorder()
        .unwrap()
}

/// Binds a `TcpListener` on the provided address and serves the router until
/// the token is cancelled.
pub async fn serve(
    router: Router,
    bind: &str,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
