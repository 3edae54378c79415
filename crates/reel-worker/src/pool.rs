//! Worker pool.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Instrument};

use reel_queue::{FailOutcome, JobQueue, Lease, QueueError, VideoJob};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::processor::{JobOutcome, JobProcessor};

/// Runs `concurrency` workers against the queue until shutdown.
///
/// Each worker handles one job at a time, so the number of workers is the
/// number of concurrent transcodes.
pub struct WorkerPool {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    processor: Arc<JobProcessor>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, processor: Arc<JobProcessor>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config: processor.config().clone(),
            queue,
            processor,
            shutdown,
        }
    }

    /// Signal shutdown. Workers stop leasing; in-flight jobs run to completion
    /// within `shutdown_timeout`.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting worker pool with {} workers",
            self.config.concurrency
        );

        let restored = self.queue.take_restore_report();
        settle_dead_letters(&self.processor, restored.dead_lettered, "restore").await;

        let mut workers = JoinSet::new();
        for index in 0..self.config.concurrency {
            let name = format!("worker-{index}");
            workers.spawn(worker_loop(
                name,
                Arc::clone(&self.queue),
                Arc::clone(&self.processor),
                self.config.clone(),
                self.shutdown.subscribe(),
            ));
        }
        let reclaimer = tokio::spawn(reclaim_loop(
            Arc::clone(&self.queue),
            Arc::clone(&self.processor),
            self.config.clone(),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        let _ = shutdown_rx.wait_for(|stop| *stop).await;

        info!("Waiting for in-flight jobs to complete...");
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    error!("Worker task panicked: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            // Their leases expire and the jobs are redelivered.
            warn!(
                "Shutdown timeout reached, abandoning {} in-flight jobs",
                workers.len()
            );
            workers.abort_all();
        }
        reclaimer.abort();

        info!("Worker pool stopped");
        Ok(())
    }
}

async fn worker_loop(
    name: String,
    queue: Arc<JobQueue>,
    processor: Arc<JobProcessor>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        // Only the wait races shutdown; `lease` itself is never dropped midway.
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = queue.wait_for_job() => {}
        }
        if let Some(lease) = queue.lease(&name).await {
            run_job(&queue, &processor, &config, lease).await;
        }
    }
}

async fn run_job(queue: &Arc<JobQueue>, processor: &JobProcessor, config: &WorkerConfig, lease: Lease) {
    let logger = JobLogger::new(&lease);
    let span = logger.create_span();

    async {
        logger.log_start(&lease.input_path.display().to_string());
        let started = Instant::now();

        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(queue),
            lease.clone(),
            config.job_heartbeat_interval,
        ));
        let outcome = processor.process(&lease).await;
        heartbeat.abort();

        histogram!("reel_job_duration_seconds").record(started.elapsed().as_secs_f64());
        settle(queue, processor, &logger, &lease, outcome).await;
    }
    .instrument(span)
    .await
}

async fn heartbeat_loop(queue: Arc<JobQueue>, lease: Lease, every: std::time::Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(e) = queue.heartbeat(&lease) {
            warn!(job_id = %lease.job_id, "Lease heartbeat stopped: {}", e);
            break;
        }
    }
}

async fn settle(
    queue: &JobQueue,
    processor: &JobProcessor,
    logger: &JobLogger,
    lease: &Lease,
    outcome: JobOutcome,
) {
    let (error, retryable) = match outcome {
        JobOutcome::Transcoded(result) => {
            counter!("reel_transcodes_total", "outcome" => "ready").increment(1);
            logger.log_completion(&format!(
                "{} ({}s)",
                result.output_path.display(),
                result.duration_sec
            ));
            ack(queue, logger, lease).await;
            return;
        }
        JobOutcome::AlreadyReady => {
            logger.log_completion("already ready, skipped transcode");
            ack(queue, logger, lease).await;
            return;
        }
        JobOutcome::Retry(e) => (e, true),
        JobOutcome::Permanent(e) => (e, false),
    };

    counter!("reel_transcodes_total", "outcome" => "failed").increment(1);
    logger.log_error(&error.to_string());

    match queue.fail(lease, &error.to_string(), retryable).await {
        Ok(FailOutcome::Retrying { .. }) => {}
        Ok(FailOutcome::DeadLettered { attempts }) => {
            logger.log_error(&format!("giving up after {attempts} attempts"));
            processor
                .on_dead_letter(&lease.video_id, &lease.input_path, !retryable)
                .await;
        }
        Err(QueueError::LeaseLost(_)) => {
            logger.log_warning("lease lost before failure was recorded; job was redelivered");
        }
        Err(e) => logger.log_error(&format!("failed to record failure: {e}")),
    }
}

async fn ack(queue: &JobQueue, logger: &JobLogger, lease: &Lease) {
    match queue.ack(lease).await {
        Ok(()) => {}
        // The redelivered copy will find the record Ready and skip.
        Err(QueueError::LeaseLost(_)) => {
            logger.log_warning("lease lost before ack; job was redelivered")
        }
        Err(e) => logger.log_error(&format!("failed to ack: {e}")),
    }
}

async fn reclaim_loop(
    queue: Arc<JobQueue>,
    processor: Arc<JobProcessor>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(config.claim_interval);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                let report = queue.reclaim_expired().await;
                settle_dead_letters(&processor, report.dead_lettered, "lease expiry").await;
            }
        }
    }
}

/// Mark the records of jobs the queue dead-lettered on its own as Failed.
async fn settle_dead_letters(processor: &JobProcessor, jobs: Vec<VideoJob>, cause: &str) {
    for job in jobs {
        warn!(job_id = %job.id, video_id = %job.video_id, cause, "Job dead-lettered without a worker result");
        processor.on_dead_letter(&job.video_id, &job.input_path, false).await;
    }
}
