//! The job table and its scheduling contract.
//!
//! Jobs live in one map keyed by id. Pending jobs are also indexed by
//! `(available_at, seq)` so `lease` always hands out the oldest job whose
//! backoff has elapsed. Every transition happens under one short lock;
//! snapshot I/O happens after the lock is released.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use reel_models::{JobId, JobState, VideoId};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{FailOutcome, Lease, QueueStats, ReclaimReport, VideoJob};
use crate::snapshot::{QueueSnapshot, SnapshotStore};

const LEASE_EXPIRED: &str = "lease expired before the job was settled";
const LOST_ON_RESTART: &str = "worker lost on restart";

#[derive(Debug)]
struct ActiveLease {
    token: u64,
    deadline: Instant,
}

#[derive(Debug)]
struct Slot {
    job: VideoJob,
    seq: u64,
    available_at: Instant,
    lease: Option<ActiveLease>,
}

#[derive(Debug, Default)]
struct Table {
    jobs: HashMap<JobId, Slot>,
    /// Pending jobs ordered by availability, then enqueue order
    waiting: BTreeSet<(Instant, u64, JobId)>,
    /// Non-terminal job per video, for idempotent enqueue
    in_flight: HashMap<VideoId, JobId>,
    /// Completed job ids, oldest first, bounded by `completed_retention`
    completed: VecDeque<JobId>,
    completed_total: u64,
    next_seq: u64,
    next_token: u64,
    version: u64,
    /// What `restore` did, until the pool picks it up
    restored: ReclaimReport,
}

impl Table {
    fn insert_pending(&mut self, job: VideoJob, available_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = job.id.clone();
        self.waiting.insert((available_at, seq, id.clone()));
        self.jobs.insert(
            id,
            Slot {
                job,
                seq,
                available_at,
                lease: None,
            },
        );
    }

    fn requeue(&mut self, id: &JobId, available_at: Instant) {
        if let Some(slot) = self.jobs.get_mut(id) {
            slot.available_at = available_at;
            slot.lease = None;
            slot.job.state = JobState::Pending;
            self.waiting.insert((available_at, slot.seq, id.clone()));
        }
    }

    fn unqueue(&mut self, id: &JobId) {
        if let Some(slot) = self.jobs.get(id) {
            self.waiting.remove(&(slot.available_at, slot.seq, id.clone()));
        }
    }

    fn check_lease(&mut self, lease: &Lease) -> QueueResult<&mut Slot> {
        let slot = self
            .jobs
            .get_mut(&lease.job_id)
            .ok_or_else(|| QueueError::job_not_found(lease.job_id.as_str()))?;
        let held = slot.job.state == JobState::Active
            && slot.lease.as_ref().is_some_and(|l| l.token == lease.token);
        if held {
            Ok(slot)
        } else {
            Err(QueueError::LeaseLost(lease.job_id.to_string()))
        }
    }

    /// Settle a failed attempt: back to Pending with backoff, or dead-letter.
    fn settle_failure(
        &mut self,
        config: &QueueConfig,
        id: &JobId,
        error: &str,
        retryable: bool,
        now: Instant,
    ) -> Option<FailOutcome> {
        let slot = self.jobs.get_mut(id)?;
        slot.lease = None;
        slot.job.last_error = Some(error.to_string());
        let attempts = slot.job.attempts;

        if !retryable || slot.job.is_exhausted() {
            slot.job.state = JobState::Failed;
            slot.job.retry_at = None;
            slot.job.finished_at = Some(Utc::now());
            let video_id = slot.job.video_id.clone();
            self.in_flight.remove(&video_id);
            return Some(FailOutcome::DeadLettered { attempts });
        }

        let delay = config.delay_for_attempt(attempts);
        slot.job.retry_at = Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
        self.requeue(id, now + delay);
        Some(FailOutcome::Retrying {
            attempt: attempts,
            delay,
        })
    }

    fn complete(&mut self, id: &JobId, retention: usize) {
        let Some(slot) = self.jobs.get_mut(id) else {
            return;
        };
        slot.lease = None;
        slot.job.state = JobState::Completed;
        slot.job.retry_at = None;
        slot.job.finished_at = Some(Utc::now());
        let video_id = slot.job.video_id.clone();

        self.in_flight.remove(&video_id);
        self.completed_total += 1;
        self.completed.push_back(id.clone());
        while self.completed.len() > retention {
            if let Some(evicted) = self.completed.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            waiting: self.waiting.len(),
            completed: self.completed_total,
            ..Default::default()
        };
        for slot in self.jobs.values() {
            match slot.job.state {
                JobState::Active => stats.active += 1,
                JobState::Failed => stats.failed += 1,
                JobState::Pending | JobState::Completed => {}
            }
        }
        stats
    }

    fn to_snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            saved_at: Utc::now(),
            completed_total: self.completed_total,
            jobs: self.jobs.values().map(|slot| slot.job.clone()).collect(),
        }
    }

    fn restore(&mut self, snapshot: QueueSnapshot) {
        let now = Instant::now();
        let wall_now = Utc::now();
        let mut jobs = snapshot.jobs;
        jobs.sort_by_key(|job| job.enqueued_at);

        let mut completed = Vec::new();
        for mut job in jobs {
            match job.state {
                JobState::Pending => {
                    let wait = job
                        .retry_at
                        .and_then(|at| (at - wall_now).to_std().ok())
                        .unwrap_or(Duration::ZERO);
                    self.in_flight.insert(job.video_id.clone(), job.id.clone());
                    self.insert_pending(job, now + wait);
                }
                JobState::Active if job.is_exhausted() => {
                    job.state = JobState::Failed;
                    job.last_error = Some(LOST_ON_RESTART.to_string());
                    job.finished_at = Some(wall_now);
                    self.restored.dead_lettered.push(job.clone());
                    self.insert_settled(job);
                }
                JobState::Active => {
                    job.state = JobState::Pending;
                    job.retry_at = None;
                    self.restored.requeued.push(job.id.clone());
                    self.in_flight.insert(job.video_id.clone(), job.id.clone());
                    self.insert_pending(job, now);
                }
                JobState::Completed => completed.push(job),
                JobState::Failed => self.insert_settled(job),
            }
        }

        completed.sort_by_key(|job| job.finished_at);
        for job in completed {
            self.completed.push_back(job.id.clone());
            self.insert_settled(job);
        }
        self.completed_total = snapshot.completed_total.max(self.completed.len() as u64);
    }

    fn insert_settled(&mut self, job: VideoJob) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.jobs.insert(
            job.id.clone(),
            Slot {
                job,
                seq,
                available_at: Instant::now(),
                lease: None,
            },
        );
    }
}

/// In-process job queue with leases, retries and a dead-letter set.
pub struct JobQueue {
    config: QueueConfig,
    table: Mutex<Table>,
    notify: Notify,
    snapshots: Option<SnapshotStore>,
    closed: AtomicBool,
}

impl JobQueue {
    /// Create an empty queue. Snapshots are written if `state_path` is set,
    /// but nothing is loaded; use [`JobQueue::open`] to restore.
    pub fn new(config: QueueConfig) -> Self {
        let snapshots = config.state_path.as_ref().map(SnapshotStore::new);
        Self {
            config,
            table: Mutex::new(Table::default()),
            notify: Notify::new(),
            snapshots,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a queue, restoring the snapshot at `state_path` if one exists.
    ///
    /// Jobs that were Active when the snapshot was taken lost their worker with
    /// the process and are put back to Pending, or dead-lettered if that was
    /// their last attempt. See [`JobQueue::take_restore_report`].
    pub async fn open(config: QueueConfig) -> QueueResult<Self> {
        let queue = Self::new(config);
        if let Some(store) = &queue.snapshots {
            if let Some(snapshot) = store.load().await? {
                let job_count = snapshot.jobs.len();
                let (redelivered, dead_lettered) = {
                    let mut table = queue.table.lock();
                    table.restore(snapshot);
                    (table.restored.requeued.len(), table.restored.dead_lettered.len())
                };
                if dead_lettered > 0 {
                    counter!("reel_jobs_dead_lettered_total").increment(dead_lettered as u64);
                }
                info!(
                    path = %store.path().display(),
                    jobs = job_count,
                    redelivered,
                    dead_lettered,
                    "Restored job queue from snapshot"
                );
                queue.record_depth();
            }
        }
        Ok(queue)
    }

    /// Jobs the restore put back to Pending or dead-lettered.
    ///
    /// Returned once; later calls get an empty report. Dead-lettered jobs
    /// still need their video record marked Failed by the caller.
    pub fn take_restore_report(&self) -> ReclaimReport {
        std::mem::take(&mut self.table.lock().restored)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Stop accepting new jobs. Leasing and settling keep working.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Add a transcode job for `video_id`.
    ///
    /// Idempotent per video: while a job for the video is Pending or Active,
    /// its id is returned instead of creating a second one.
    pub async fn enqueue(&self, video_id: VideoId, input_path: PathBuf) -> QueueResult<JobId> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        let (job_id, snapshot) = {
            let mut table = self.table.lock();
            if let Some(existing) = table.in_flight.get(&video_id) {
                debug!(job_id = %existing, video_id = %video_id, "Job already queued for video");
                return Ok(existing.clone());
            }
            let job = VideoJob::new(video_id.clone(), input_path, self.config.max_attempts);
            let job_id = job.id.clone();
            table.in_flight.insert(video_id.clone(), job_id.clone());
            table.insert_pending(job, Instant::now());
            (job_id, self.capture(&mut table))
        };

        self.persist(snapshot).await;
        counter!("reel_jobs_enqueued_total").increment(1);
        self.notify.notify_waiters();
        info!(job_id = %job_id, video_id = %video_id, "Enqueued transcode job");
        Ok(job_id)
    }

    /// Lease the oldest available job, if any.
    ///
    /// Increments the job's attempt count. The lease is valid for
    /// `lease_timeout` unless extended with [`JobQueue::heartbeat`].
    pub async fn lease(&self, worker: &str) -> Option<Lease> {
        let (lease, snapshot) = {
            let mut table = self.table.lock();
            let now = Instant::now();
            let (available_at, seq, job_id) = table.waiting.first()?.clone();
            if available_at > now {
                return None;
            }
            table.waiting.remove(&(available_at, seq, job_id.clone()));
            table.next_token += 1;
            let token = table.next_token;

            let slot = table.jobs.get_mut(&job_id)?;
            slot.job.attempts += 1;
            slot.job.state = JobState::Active;
            slot.job.retry_at = None;
            slot.lease = Some(ActiveLease {
                token,
                deadline: now + self.config.lease_timeout,
            });

            let lease = Lease {
                job_id,
                video_id: slot.job.video_id.clone(),
                input_path: slot.job.input_path.clone(),
                attempt: slot.job.attempts,
                max_attempts: slot.job.max_attempts,
                worker: worker.to_string(),
                token,
            };
            (lease, self.capture(&mut table))
        };

        self.persist(snapshot).await;
        debug!(
            job_id = %lease.job_id,
            worker = %lease.worker,
            attempt = lease.attempt,
            "Leased job"
        );
        Some(lease)
    }

    /// Wait until a job can be leased, then lease it.
    ///
    /// Not cancel-safe: dropping the future after the table handed out the
    /// lease loses it until the lease expires. Race [`JobQueue::wait_for_job`]
    /// instead and call [`JobQueue::lease`] once it returns.
    pub async fn next_lease(&self, worker: &str) -> Lease {
        loop {
            self.wait_for_job().await;
            if let Some(lease) = self.lease(worker).await {
                return lease;
            }
        }
    }

    /// Resolve once some Pending job's backoff has elapsed.
    ///
    /// Sleeps until the earliest backoff elapses or an enqueue/requeue
    /// notification arrives. Cancel-safe: it never touches the table. Another
    /// worker may still win the job, so `lease` can return `None` afterwards.
    pub async fn wait_for_job(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.next_available_at() {
                Some(at) if at <= Instant::now() => return,
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn next_available_at(&self) -> Option<Instant> {
        self.table.lock().waiting.first().map(|(at, _, _)| *at)
    }

    /// Extend the lease deadline by another `lease_timeout`.
    pub fn heartbeat(&self, lease: &Lease) -> QueueResult<()> {
        let mut table = self.table.lock();
        let slot = table.check_lease(lease)?;
        if let Some(active) = slot.lease.as_mut() {
            active.deadline = Instant::now() + self.config.lease_timeout;
        }
        Ok(())
    }

    /// Mark the leased job Completed.
    pub async fn ack(&self, lease: &Lease) -> QueueResult<()> {
        let snapshot = {
            let mut table = self.table.lock();
            table.check_lease(lease)?;
            table.complete(&lease.job_id, self.config.completed_retention);
            self.capture(&mut table)
        };

        self.persist(snapshot).await;
        counter!("reel_jobs_completed_total").increment(1);
        info!(job_id = %lease.job_id, attempt = lease.attempt, "Job completed");
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Retryable failures go back to Pending after
    /// `backoff_base * 2^(attempt - 1)`; permanent failures and the last
    /// attempt move the job to the dead-letter set.
    pub async fn fail(&self, lease: &Lease, error: &str, retryable: bool) -> QueueResult<FailOutcome> {
        let (outcome, snapshot) = {
            let mut table = self.table.lock();
            table.check_lease(lease)?;
            let outcome = table
                .settle_failure(&self.config, &lease.job_id, error, retryable, Instant::now())
                .ok_or_else(|| QueueError::job_not_found(lease.job_id.as_str()))?;
            (outcome, self.capture(&mut table))
        };

        self.persist(snapshot).await;
        match &outcome {
            FailOutcome::Retrying { attempt, delay } => {
                counter!("reel_jobs_retried_total").increment(1);
                warn!(
                    job_id = %lease.job_id,
                    attempt,
                    retry_in_secs = delay.as_secs_f64(),
                    "Job failed, scheduling retry: {}",
                    error
                );
                self.notify.notify_waiters();
            }
            FailOutcome::DeadLettered { attempts } => {
                counter!("reel_jobs_dead_lettered_total").increment(1);
                warn!(
                    job_id = %lease.job_id,
                    attempts,
                    retryable,
                    "Job dead-lettered: {}",
                    error
                );
            }
        }
        Ok(outcome)
    }

    /// Return jobs whose lease deadline has passed to Pending, or dead-letter
    /// them if that attempt was their last.
    pub async fn reclaim_expired(&self) -> ReclaimReport {
        let (report, snapshot) = {
            let mut table = self.table.lock();
            let now = Instant::now();
            let expired: Vec<JobId> = table
                .jobs
                .iter()
                .filter(|(_, slot)| {
                    slot.job.state == JobState::Active
                        && slot.lease.as_ref().is_some_and(|l| l.deadline <= now)
                })
                .map(|(id, _)| id.clone())
                .collect();
            if expired.is_empty() {
                return ReclaimReport::default();
            }

            let mut report = ReclaimReport::default();
            for id in expired {
                match table.settle_failure(&self.config, &id, LEASE_EXPIRED, true, now) {
                    // Redelivery is immediate: the attempt was lost, not failed.
                    Some(FailOutcome::Retrying { .. }) => {
                        table.unqueue(&id);
                        table.requeue(&id, now);
                        if let Some(slot) = table.jobs.get_mut(&id) {
                            slot.job.retry_at = None;
                        }
                        report.requeued.push(id);
                    }
                    Some(FailOutcome::DeadLettered { .. }) => {
                        if let Some(slot) = table.jobs.get(&id) {
                            report.dead_lettered.push(slot.job.clone());
                        }
                    }
                    None => {}
                }
            }
            (report, self.capture(&mut table))
        };

        self.persist(snapshot).await;
        if !report.requeued.is_empty() {
            counter!("reel_jobs_reclaimed_total").increment(report.requeued.len() as u64);
            self.notify.notify_waiters();
        }
        if !report.dead_lettered.is_empty() {
            counter!("reel_jobs_dead_lettered_total").increment(report.dead_lettered.len() as u64);
        }
        info!(
            requeued = report.requeued.len(),
            dead_lettered = report.dead_lettered.len(),
            "Reclaimed expired leases"
        );
        report
    }

    /// Put a dead-lettered job back in the queue with a fresh attempt budget.
    pub async fn retry_dead_letter(&self, job_id: &JobId) -> QueueResult<VideoJob> {
        let (job, snapshot) = {
            let mut table = self.table.lock();
            let slot = table
                .jobs
                .get(job_id)
                .ok_or_else(|| QueueError::job_not_found(job_id.as_str()))?;
            if slot.job.state != JobState::Failed {
                return Err(QueueError::InvalidState {
                    job_id: job_id.to_string(),
                    state: slot.job.state,
                });
            }
            let video_id = slot.job.video_id.clone();
            if table.in_flight.contains_key(&video_id) {
                return Err(QueueError::AlreadyQueued(video_id.to_string()));
            }

            let now = Instant::now();
            table.requeue(job_id, now);
            table.in_flight.insert(video_id, job_id.clone());
            let slot = table
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| QueueError::job_not_found(job_id.as_str()))?;
            slot.job.attempts = 0;
            slot.job.last_error = None;
            slot.job.finished_at = None;
            let job = slot.job.clone();
            (job, self.capture(&mut table))
        };

        self.persist(snapshot).await;
        self.notify.notify_waiters();
        info!(job_id = %job_id, video_id = %job.video_id, "Dead-lettered job requeued");
        Ok(job)
    }

    /// Dead-lettered jobs, oldest failure first.
    pub fn dead_letters(&self) -> Vec<VideoJob> {
        let table = self.table.lock();
        let mut jobs: Vec<VideoJob> = table
            .jobs
            .values()
            .filter(|slot| slot.job.state == JobState::Failed)
            .map(|slot| slot.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.finished_at);
        jobs
    }

    pub fn job(&self, job_id: &JobId) -> Option<VideoJob> {
        self.table.lock().jobs.get(job_id).map(|slot| slot.job.clone())
    }

    pub fn stats(&self) -> QueueStats {
        self.table.lock().stats()
    }

    /// Bump the table version, refresh gauges and serialize for the snapshot
    /// writer. Called with the table lock held.
    fn capture(&self, table: &mut Table) -> Option<(u64, Vec<u8>)> {
        table.version += 1;
        set_depth_gauges(&table.stats());

        if self.snapshots.is_none() {
            return None;
        }
        match serde_json::to_vec(&table.to_snapshot()) {
            Ok(bytes) => Some((table.version, bytes)),
            Err(e) => {
                warn!("Failed to serialize queue snapshot: {}", e);
                None
            }
        }
    }

    async fn persist(&self, snapshot: Option<(u64, Vec<u8>)>) {
        let (Some(store), Some((version, bytes))) = (&self.snapshots, snapshot) else {
            return;
        };
        if let Err(e) = store.save(version, bytes).await {
            counter!("reel_queue_snapshot_errors_total").increment(1);
            warn!(path = %store.path().display(), "Failed to write queue snapshot: {}", e);
        }
    }

    fn record_depth(&self) {
        set_depth_gauges(&self.stats());
    }
}

fn set_depth_gauges(stats: &QueueStats) {
    gauge!("reel_queue_waiting").set(stats.waiting as f64);
    gauge!("reel_queue_active").set(stats.active as f64);
    gauge!("reel_queue_dead_letters").set(stats.failed as f64);
}
