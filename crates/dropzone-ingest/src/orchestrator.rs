//! Ingestion orchestrator
//!
//! Drives poll cycles: health check, list, filter and claim, then fetch and
//! parse each claimed file concurrently and hand every result to the sink.
//! A file's failure stays with that file; only the claim store or the listing
//! can fail a whole cycle.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::claims::ClaimStore;
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::listing::{FilenamePattern, ListingFilter, RemoteFileRef, Selection};
use crate::pipeline::FetchParsePipeline;
use crate::sink::DocumentSink;
use crate::source::RemoteFileSource;
use crate::trace::SpanFactory;

/// Counters for one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub batch_id: Uuid,
    pub listed: usize,
    pub matched: usize,
    pub claimed: usize,
    pub denied: usize,
    pub deferred: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Results the sink refused
    pub undelivered: usize,
}

impl CycleReport {
    fn from_selection(selection: &Selection) -> Self {
        Self {
            batch_id: selection.batch_id,
            listed: selection.listed,
            matched: selection.matched,
            claimed: selection.claimed.len(),
            denied: selection.denied,
            deferred: selection.deferred,
            ..Default::default()
        }
    }
}

struct FileOutcome {
    succeeded: bool,
    delivered: bool,
}

/// Polling ingestion service
///
/// Cheap to clone; clones share the claim store, worker limit, and backoff.
#[derive(Clone)]
pub struct IngestOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn RemoteFileSource>,
    store: Arc<dyn ClaimStore>,
    sink: Arc<dyn DocumentSink>,
    filter: ListingFilter,
    pipeline: Arc<FetchParsePipeline>,
    workers: Arc<Semaphore>,
    backoff: Mutex<Backoff>,
    /// Sequence number of the last cycle started by `run`
    cycles_started: AtomicU64,
    remote_directory: String,
    poll_interval: Duration,
    max_backoff: Duration,
}

impl IngestOrchestrator {
    pub fn new(
        config: &IngestConfig,
        source: Arc<dyn RemoteFileSource>,
        store: Arc<dyn ClaimStore>,
        sink: Arc<dyn DocumentSink>,
        spans: Arc<dyn SpanFactory>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let pattern = FilenamePattern::parse(&config.filename_pattern)?;
        let filter = ListingFilter::new(
            store.clone(),
            pattern,
            config.remote_directory.clone(),
            config.max_fetch_size,
        );
        let pipeline = FetchParsePipeline::new(source.clone(), spans, config.parse_timeout);

        Ok(Self {
            inner: Arc::new(Inner {
                source,
                store,
                sink,
                filter,
                pipeline: Arc::new(pipeline),
                workers: Arc::new(Semaphore::new(config.max_concurrent_files)),
                backoff: Mutex::new(Backoff::default()),
                cycles_started: AtomicU64::new(0),
                remote_directory: config.remote_directory.clone(),
                poll_interval: config.poll_interval,
                max_backoff: config.max_backoff,
            }),
        })
    }

    /// Run one full poll cycle
    ///
    /// Returns `Err` when the claim store is unreachable or the listing fails.
    /// Files claimed before a claim store failure are still processed and
    /// delivered before the error is returned.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let batch_id = Uuid::new_v4();
        let inner = &self.inner;

        inner.store.health_check().await?;

        let listing = inner.source.list(&inner.remote_directory).await?;
        let selection = inner.filter.select(listing, batch_id).await;
        let mut report = CycleReport::from_selection(&selection);

        debug!(
            batch = %batch_id,
            listed = report.listed,
            matched = report.matched,
            claimed = report.claimed,
            denied = report.denied,
            deferred = report.deferred,
            "Listing filtered"
        );

        let Selection {
            claimed,
            claim_error,
            ..
        } = selection;

        let mut workers = JoinSet::new();
        for file in claimed {
            workers.spawn(process_file(
                inner.pipeline.clone(),
                inner.sink.clone(),
                inner.workers.clone(),
                file,
            ));
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => {
                    if outcome.succeeded {
                        report.succeeded += 1;
                    } else {
                        report.failed += 1;
                    }
                    if !outcome.delivered {
                        report.undelivered += 1;
                    }
                },
                // The pipeline turns its own panics into failure results; this
                // is a panic in the sink or an abort
                Err(e) => {
                    error!(batch = %batch_id, error = %e, "File worker did not complete");
                    report.failed += 1;
                    report.undelivered += 1;
                },
            }
        }

        if let Some(e) = claim_error {
            warn!(
                batch = %batch_id,
                claimed = report.claimed,
                "Cycle stopped early: claim store failed part-way"
            );
            return Err(e);
        }

        if report.claimed > 0 {
            info!(
                batch = %batch_id,
                succeeded = report.succeeded,
                failed = report.failed,
                undelivered = report.undelivered,
                deferred = report.deferred,
                "Poll cycle completed"
            );
        }

        Ok(report)
    }

    /// Poll until `shutdown` is cancelled, then wait for in-flight cycles
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.inner.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cycles = TaskTracker::new();

        info!(
            directory = %self.inner.remote_directory,
            interval_ms = self.inner.poll_interval.as_millis() as u64,
            "Ingestion orchestrator started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(until) = self.backing_off_until() {
                        let remaining = until.saturating_duration_since(Instant::now());
                        debug!(resume_in_ms = remaining.as_millis() as u64, "Backing off, skipping tick");
                        continue;
                    }

                    let cycle = self.inner.cycles_started.fetch_add(1, Ordering::Relaxed) + 1;
                    let this = self.clone();
                    cycles.spawn(async move {
                        let outcome = this.run_cycle().await;
                        this.record_cycle(cycle, outcome.as_ref().err());
                    });
                }
            }
        }

        info!(in_flight = cycles.len(), "Shutdown requested, waiting for running cycles");
        cycles.close();
        cycles.wait().await;
        info!("Ingestion orchestrator stopped");
    }

    fn backing_off_until(&self) -> Option<Instant> {
        let backoff = self.inner.backoff.lock().ok()?;
        backoff.resume_at.filter(|at| *at > Instant::now())
    }

    fn record_cycle(&self, cycle: u64, failure: Option<&IngestError>) {
        let Ok(mut backoff) = self.inner.backoff.lock() else {
            return;
        };

        match failure {
            None => {
                if !backoff.succeed(cycle) {
                    debug!(cycle, "Success from a cycle older than the last failure, backoff kept");
                }
            },
            Some(e) => match backoff.fail(cycle, self.inner.poll_interval, self.inner.max_backoff) {
                Some(delay) => error!(
                    cycle,
                    error = %e,
                    error_type = e.kind(),
                    consecutive_failures = backoff.consecutive_failures,
                    backoff_ms = delay.as_millis() as u64,
                    "Poll cycle failed"
                ),
                None => warn!(
                    cycle,
                    error = %e,
                    "Failure from a cycle older than the last success, backoff not extended"
                ),
            },
        }
    }
}

async fn process_file(
    pipeline: Arc<FetchParsePipeline>,
    sink: Arc<dyn DocumentSink>,
    workers: Arc<Semaphore>,
    file: RemoteFileRef,
) -> FileOutcome {
    // The semaphore is never closed
    let _permit = workers.acquire_owned().await.ok();

    let result = pipeline.process(&file).await;

    let succeeded = result.is_success();
    let delivered = match sink.ingest(result).await {
        Ok(()) => true,
        Err(e) => {
            error!(file = %file.filename, error = %format!("{:#}", e), "Sink rejected result");
            false
        },
    };

    FileOutcome {
        succeeded,
        delivered,
    }
}

/// Backoff shared by overlapping cycles
///
/// Outcomes are keyed by the sequence number of the cycle that produced
/// them. A success only clears the backoff if its cycle started after the
/// newest failing one, and a failure is dropped if a newer cycle already
/// succeeded.
#[derive(Debug, Default)]
struct Backoff {
    consecutive_failures: u32,
    resume_at: Option<Instant>,
    last_failed_cycle: u64,
    last_succeeded_cycle: u64,
}

impl Backoff {
    /// Record a failure; `None` if the outcome is stale
    fn fail(&mut self, cycle: u64, poll_interval: Duration, max_backoff: Duration) -> Option<Duration> {
        if cycle < self.last_succeeded_cycle {
            return None;
        }
        self.last_failed_cycle = self.last_failed_cycle.max(cycle);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let delay = backoff_delay(poll_interval, self.consecutive_failures, max_backoff);
        self.resume_at = Some(Instant::now() + delay);
        Some(delay)
    }

    /// Record a success; false if the outcome is stale
    fn succeed(&mut self, cycle: u64) -> bool {
        if cycle < self.last_failed_cycle {
            return false;
        }
        self.last_succeeded_cycle = self.last_succeeded_cycle.max(cycle);
        self.consecutive_failures = 0;
        self.resume_at = None;
        true
    }
}

/// `poll_interval * 2^(failures - 1)`, capped at `max_backoff`
pub fn backoff_delay(poll_interval: Duration, failures: u32, max_backoff: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let exponent = (failures - 1).min(20);
    poll_interval.saturating_mul(1u32 << exponent).min(max_backoff)
}
