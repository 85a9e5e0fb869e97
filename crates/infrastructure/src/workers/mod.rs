//! Ingest workers
//!
//! One worker per configured source: poll a small window, run each event
//! through the ingest pipeline in order, settle the handoff with the
//! source, repeat. Per-source FIFO holds within a worker; there is no
//! ordering across sources. A watch channel propagates shutdown; the
//! worker drains its current window before exiting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use application::IngestService;
use application::ports::EventSource;

/// Worker settings
#[derive(Debug, Clone)]
pub struct IngestWorkerConfig {
    /// Pause between polls
    pub poll_interval: Duration,
    /// Events polled per window
    pub poll_batch: u32,
}

impl Default for IngestWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_batch: 50,
        }
    }
}

/// Spawn one ingest worker for a source
///
/// Returns the handle; the worker exits when `shutdown` flips to `true`.
pub fn spawn_ingest_worker(
    source: Arc<dyn EventSource>,
    ingest: Arc<IngestService>,
    config: IngestWorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let descriptor = source.descriptor();
    info!(
        source = %descriptor,
        interval_secs = config.poll_interval.as_secs(),
        batch = config.poll_batch,
        "Starting ingest worker"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                changed = shutdown.changed() => {
                    // A closed channel means the supervisor is gone.
                    if changed.is_err() || *shutdown.borrow() {
                        info!(source = %descriptor, "Ingest worker stopping");
                        return;
                    }
                },
            }

            let events = match source.poll(config.poll_batch).await {
                Ok(events) => events,
                Err(err) => {
                    // The source is unreachable; this worker pauses and
                    // re-polls, everything else keeps running.
                    warn!(source = %descriptor, error = %err, "Source poll failed");
                    continue;
                },
            };
            if events.is_empty() {
                continue;
            }
            debug!(source = %descriptor, count = events.len(), "Polled events");

            for event in events {
                if *shutdown.borrow() {
                    info!(source = %descriptor, "Ingest worker stopping mid-window");
                    return;
                }

                match ingest.process_event(&event).await {
                    Ok(status) => {
                        debug!(
                            event = %event.stable_id(),
                            status = status.as_str(),
                            "Event handed off"
                        );
                        if let Err(err) = source.commit(&event).await {
                            warn!(error = %err, "Source commit failed");
                        }
                    },
                    Err(err) => {
                        error!(
                            event = %event.stable_id(),
                            error = %err,
                            "Event processing failed"
                        );
                        if let Err(reject_err) = source.reject(&event, &err.to_string()).await {
                            warn!(error = %reject_err, "Source reject failed");
                        }
                        if err.is_retryable() {
                            // Store/source trouble aborts the rest of this
                            // window; the next tick re-polls it.
                            break;
                        }
                    },
                }
            }
        }
    })
}
