use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::geocoding::{enrich_with_geocoding, Geocoder};
use crate::metrics_consts::{
    BATCH_PROCESSING_DURATION_SECONDS, BATCH_SIZE, MESSAGES_CONSUMED_TOTAL,
    MESSAGES_PRODUCED_TOTAL, PIPELINE_RUNNING, TRANSFORM_ERRORS_TOTAL,
};
use crate::transform::{self, ParseError};
use crate::types::{OutputMessage, RawMessage};

const BACKOFF_INITIAL: Duration = Duration::from_millis(200);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Reads a batch of raw messages from the source. May return fewer than `max`
/// messages, or none at all on a quiet topic.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_batch(&self, max: usize) -> anyhow::Result<Vec<RawMessage>>;
}

/// Writes a batch of output messages to the sink. All-or-nothing from the
/// pipeline's viewpoint: a partial write must surface as an error so the whole
/// batch is retried, which is safe because event ids are deterministic.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load_batch(&self, batch: &[OutputMessage]) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Converts one raw message into its output form: parse, enrich, optionally
/// geocode, serialize. Parsing is the only stage that can fail.
pub struct Transformer {
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl Transformer {
    /// Pass `None` to disable geocoding enrichment.
    pub fn new(geocoder: Option<Arc<dyn Geocoder>>) -> Self {
        Self { geocoder }
    }

    pub async fn transform(&self, msg: &RawMessage) -> Result<OutputMessage, TransformError> {
        let event = transform::parse(msg)?;
        let event = transform::enrich(event);
        let event = enrich_with_geocoding(event, self.geocoder.as_deref()).await;
        Ok(transform::serialize(&event)?)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("pipeline has not completed a load yet")]
pub struct NotReadyError;

/// Single boolean readiness signal, set on the first successful load and never
/// cleared. Clones share the flag, so the HTTP server can read what the
/// pipeline writes.
#[derive(Clone, Default)]
pub struct ReadinessFlag(Arc<AtomicBool>);

impl ReadinessFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_ready(&self) -> Result<(), NotReadyError> {
        if self.0.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(NotReadyError)
        }
    }

    fn mark_ready(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// The batched extract-transform-load loop.
///
/// Delivery is at-least-once: a message's offset is committed only once its
/// fate is final, either loaded into the sink or skipped as unparseable.
/// A message that fails to parse is a poison pill: its offset is
/// committed immediately so the pipeline cannot live-lock on it. Transient
/// extract/load failures back off exponentially and retry; offsets for the
/// affected messages stay uncommitted, so the broker redelivers them and the
/// deterministic ids let downstream deduplicate.
pub struct Pipeline<E, L> {
    extractor: E,
    transformer: Transformer,
    loader: L,
    batch_size: usize,
    ready: ReadinessFlag,
}

impl<E: Extractor, L: Loader> Pipeline<E, L> {
    pub fn new(extractor: E, transformer: Transformer, loader: L, batch_size: usize) -> Self {
        Self {
            extractor,
            transformer,
            loader,
            batch_size,
            ready: ReadinessFlag::new(),
        }
    }

    /// Shared handle to the readiness signal.
    pub fn readiness(&self) -> ReadinessFlag {
        self.ready.clone()
    }

    /// Runs the loop until the token is cancelled. Cancellation is a clean
    /// stop, not an error.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("pipeline started");
        metrics::gauge!(PIPELINE_RUNNING).set(1.0);
        self.run_loop(&shutdown).await;
        metrics::gauge!(PIPELINE_RUNNING).set(0.0);
        info!("pipeline stopped");
    }

    async fn run_loop(&self, shutdown: &CancellationToken) {
        let mut backoff = BACKOFF_INITIAL;

        loop {
            if shutdown.is_cancelled() {
                return;
            }

            let extracted = tokio::select! {
                _ = shutdown.cancelled() => return,
                extracted = self.extractor.extract_batch(self.batch_size) => extracted,
            };

            let batch = match extracted {
                Ok(batch) => batch,
                Err(err) => {
                    error!(error = %err, "extract failed");
                    if !self.backoff_or_stop(shutdown, &mut backoff).await {
                        return;
                    }
                    continue;
                }
            };

            // An empty batch is normal quiescence on a quiet topic.
            if batch.is_empty() {
                continue;
            }
            backoff = BACKOFF_INITIAL;

            metrics::histogram!(BATCH_SIZE).record(batch.len() as f64);
            metrics::counter!(MESSAGES_CONSUMED_TOTAL).increment(batch.len() as u64);
            let started = Instant::now();

            let mut outputs = Vec::with_capacity(batch.len());
            let mut loaded = Vec::with_capacity(batch.len());
            for msg in batch {
                match self.transformer.transform(&msg).await {
                    Ok(output) => {
                        outputs.push(output);
                        loaded.push(msg);
                    }
                    Err(err) => {
                        // Poison pill: count it, log it, and commit its offset
                        // now so it is never redelivered.
                        metrics::counter!(TRANSFORM_ERRORS_TOTAL).increment(1);
                        warn!(
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            error = %err,
                            "transform failed, skipping message"
                        );
                        commit_message(msg);
                    }
                }
            }

            if outputs.is_empty() {
                continue;
            }

            if let Err(err) = self.loader.load_batch(&outputs).await {
                if shutdown.is_cancelled() {
                    return;
                }
                // Offsets for this batch were not committed, so the messages
                // will be redelivered after the retry.
                error!(error = %err, "load failed");
                if !self.backoff_or_stop(shutdown, &mut backoff).await {
                    return;
                }
                continue;
            }
            metrics::counter!(MESSAGES_PRODUCED_TOTAL).increment(outputs.len() as u64);

            for msg in loaded {
                commit_message(msg);
            }

            metrics::histogram!(BATCH_PROCESSING_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            self.ready.mark_ready();
        }
    }

    /// Sleeps with the current backoff and doubles it, capped at the maximum.
    /// Returns false if the pipeline should stop instead.
    async fn backoff_or_stop(
        &self,
        shutdown: &CancellationToken,
        backoff: &mut Duration,
    ) -> bool {
        if shutdown.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(*backoff) => {}
        }
        *backoff = (*backoff * 2).min(BACKOFF_MAX);
        true
    }
}

/// Invokes the message's commit capability. Commit failures are logged but not
/// fatal; the next successful commit on the partition subsumes them.
fn commit_message(msg: RawMessage) {
    let RawMessage {
        topic,
        partition,
        offset,
        commit,
        ..
    } = msg;
    if let Err(err) = commit.commit() {
        warn!(
            topic = %topic,
            partition = partition,
            offset = offset,
            error = %err,
            "commit offset failed"
        );
    }
}
