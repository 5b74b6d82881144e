//! C8 — priority+time-ordered job queue, bounded worker pool, timeout and
//! retry handling, and the periodic re-discovery loop.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use discovery_core::{AggregatedResult, DiscoveryJob, EventKind, JobPriority, JobStatus, Priority};
use rand::Rng;
use tokio::sync::{Mutex, Notify, Semaphore};
use uuid::Uuid;

use crate::engine::DiscoveryEngine;
use crate::event_bus::EventBus;
use crate::stopper::Stopper;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: usize,
    pub tick_interval: Duration,
    pub periodic_enabled: bool,
    pub periodic_interval: Duration,
    pub periodic_jitter: Duration,
    pub periodic_protocols: Vec<String>,
    /// Per-job deadline (§4.8 step 4), applied to every job this scheduler
    /// submits, including the periodic re-discovery job.
    pub job_timeout_s: f64,
    pub max_retries: u32,
    pub retry_delay_s: f64,
    pub backoff_factor: f64,
    pub max_backoff_s: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_concurrent_jobs: 5,
            tick_interval: Duration::from_secs(1),
            periodic_enabled: true,
            periodic_interval: Duration::from_secs(300),
            periodic_jitter: Duration::from_secs(10),
            periodic_protocols: Vec::new(),
            job_timeout_s: 30.0,
            max_retries: 3,
            retry_delay_s: 1.0,
            backoff_factor: 2.0,
            max_backoff_s: 60.0,
        }
    }
}

struct HeapEntry(DiscoveryJob);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.queue_key() == other.0.queue_key()
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.queue_key().cmp(&other.0.queue_key())
    }
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, DiscoveryJob>,
    running: HashSet<Uuid>,
    queue: BinaryHeap<Reverse<HeapEntry>>,
}

#[derive(Debug, Default, Clone)]
pub struct SchedulerStats {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_discovery_time_s: f64,
}

impl SchedulerStats {
    pub fn average_discovery_time_s(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_discovery_time_s / self.completed as f64
        }
    }
}

/// Dequeues [`DiscoveryJob`]s in `(priority, scheduled_at)` order and runs
/// them against the [`DiscoveryEngine`] with a bounded worker pool.
pub struct Scheduler {
    engine: Arc<DiscoveryEngine>,
    event_bus: Arc<EventBus>,
    config: SchedulerConfig,
    inner: Mutex<Inner>,
    notify: Notify,
    semaphore: Arc<Semaphore>,
    stopper: Stopper,
    stats: Mutex<SchedulerStats>,
    started_at: DateTime<Utc>,
    running_flag: AtomicBool,
    submitted: AtomicU64,
}

impl Scheduler {
    pub fn new(engine: Arc<DiscoveryEngine>, event_bus: Arc<EventBus>, config: SchedulerConfig) -> Arc<Self> {
        let max = config.max_concurrent_jobs;
        Arc::new(Scheduler {
            engine,
            event_bus,
            config,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            semaphore: Arc::new(Semaphore::new(max)),
            stopper: Stopper::new(),
            stats: Mutex::new(SchedulerStats::default()),
            started_at: Utc::now(),
            running_flag: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
        })
    }

    pub async fn submit(&self, job: DiscoveryJob) -> Uuid {
        let id = job.job_id;
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(id, job.clone());
        inner.queue.push(Reverse(HeapEntry(job)));
        self.submitted.fetch_add(1, Ordering::Relaxed);
        drop(inner);
        self.notify.notify_one();
        id
    }

    /// Transitions a pending/scheduled job to `cancelled`. Running jobs are
    /// left to finish or time out.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&job_id) {
            Some(job) if matches!(job.status, JobStatus::Pending | JobStatus::Scheduled) => {
                job.status = JobStatus::Cancelled;
                drop(inner);
                self.stats.lock().await.cancelled += 1;
                true
            }
            _ => false,
        }
    }

    pub async fn job(&self, job_id: Uuid) -> Option<DiscoveryJob> {
        self.inner.lock().await.jobs.get(&job_id).cloned()
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.stats.lock().await.clone()
    }

    pub fn uptime(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_running(&self) -> bool {
        self.running_flag.load(Ordering::Relaxed)
    }

    /// Pops the next queue entry that is actually due; re-enqueues entries
    /// found not due yet.
    async fn pop_due(&self) -> Option<DiscoveryJob> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut deferred = Vec::new();
        let result = loop {
            match inner.queue.pop() {
                None => break None,
                Some(Reverse(HeapEntry(job))) => {
                    let current_status = inner.jobs.get(&job.job_id).map(|j| j.status);
                    if current_status == Some(JobStatus::Cancelled) {
                        continue;
                    }
                    if job.scheduled_at > now {
                        deferred.push(job);
                        continue;
                    }
                    break Some(job);
                }
            }
        };
        for job in deferred {
            inner.queue.push(Reverse(HeapEntry(job)));
        }
        result
    }

    /// Runs the scheduler's dispatch loop and periodic-discovery injector
    /// until `stop` is called. Intended to be spawned as a background task.
    pub async fn run(self: Arc<Self>) {
        self.running_flag.store(true, Ordering::Relaxed);
        let mut tick = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = self.stopper.stopped() => break,
                _ = tick.tick() => {
                    self.maybe_inject_periodic_job().await;
                    self.dispatch_ready_jobs().await;
                }
                _ = self.notify.notified() => {
                    self.dispatch_ready_jobs().await;
                }
            }
        }
        self.running_flag.store(false, Ordering::Relaxed);
    }

    async fn maybe_inject_periodic_job(&self) {
        if !self.config.periodic_enabled {
            return;
        }
        let already_pending = {
            let inner = self.inner.lock().await;
            inner.jobs.values().any(|j| {
                j.name == "periodic_discovery"
                    && matches!(j.status, JobStatus::Pending | JobStatus::Scheduled | JobStatus::Running)
            })
        };
        if already_pending {
            return;
        }
        let jitter_s = rand::thread_rng().gen_range(0.0..=self.config.periodic_jitter.as_secs_f64());
        let mut job = DiscoveryJob::new(
            "periodic_discovery",
            self.config.periodic_protocols.clone(),
            JobPriority::Normal,
        );
        job.scheduled_at = Utc::now() + chrono::Duration::milliseconds(((self.config.periodic_interval.as_secs_f64() + jitter_s) * 1000.0) as i64);
        job.timeout_s = self.config.job_timeout_s;
        job.max_retries = self.config.max_retries;
        job.retry_delay_s = self.config.retry_delay_s;
        job.backoff_factor = self.config.backoff_factor;
        job.max_backoff_s = self.config.max_backoff_s;
        self.submit(job).await;
    }

    async fn dispatch_ready_jobs(self: &Arc<Self>) {
        loop {
            if self.semaphore.available_permits() == 0 {
                return;
            }
            let job = match self.pop_due().await {
                Some(job) => job,
                None => return,
            };
            if job.status == JobStatus::Cancelled {
                continue;
            }
            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    let mut inner = self.inner.lock().await;
                    inner.queue.push(Reverse(HeapEntry(job)));
                    return;
                }
            };
            let scheduler = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                scheduler.execute(job).await;
            });
        }
    }

    async fn execute(self: Arc<Self>, mut job: DiscoveryJob) {
        let job_id = job.job_id;
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        {
            let mut inner = self.inner.lock().await;
            inner.running.insert(job_id);
            inner.jobs.insert(job_id, job.clone());
        }

        self.event_bus
            .publish(discovery_core::Event::new(
                "scheduler",
                Priority::Normal,
                EventKind::DiscoveryStarted {
                    protocols: job.protocols.clone(),
                    params: job.params.clone(),
                },
            ))
            .await;

        let protocols = if job.protocols.is_empty() { None } else { Some(job.protocols.clone()) };
        let timeout = Duration::from_secs_f64(job.timeout_s);
        let call = self.engine.discover_all(protocols.as_deref(), &job.params);
        let outcome = tokio::time::timeout(timeout, call).await;

        match outcome {
            Ok(result) => self.finish_success(&mut job, result).await,
            Err(_) => self.finish_failure(&mut job, "Job timed out".to_string()).await,
        }

        let mut inner = self.inner.lock().await;
        inner.running.remove(&job_id);
        inner.jobs.insert(job_id, job);
    }

    async fn finish_success(&self, job: &mut DiscoveryJob, result: AggregatedResult) {
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        let devices_found = result.devices.len();
        let duration_s = result.duration_s;
        let protocols_succeeded = result.protocols_succeeded;
        let protocols_total = result.protocols_total;
        job.result = Some(result);

        let mut stats = self.stats.lock().await;
        stats.completed += 1;
        stats.total_discovery_time_s += duration_s;
        drop(stats);

        self.event_bus
            .publish(discovery_core::Event::new(
                "scheduler",
                Priority::Normal,
                EventKind::DiscoveryCompleted {
                    protocols_succeeded,
                    protocols_total,
                    duration_s,
                    devices_found,
                },
            ))
            .await;
    }

    /// On failure: records the error, publishes `DiscoveryError`, and
    /// either re-enqueues with exponential backoff or finalizes as failed.
    async fn finish_failure(&self, job: &mut DiscoveryJob, error: String) {
        job.error = Some(error.clone());
        let can_retry = job.can_retry();

        self.event_bus
            .publish(discovery_core::Event::new(
                "scheduler",
                Priority::High,
                EventKind::DiscoveryError {
                    message: error,
                    kind: "job_failed".to_string(),
                    protocol: None,
                    recoverable: can_retry,
                },
            ))
            .await;

        if can_retry {
            let delay_s = job.next_retry_delay_s();
            job.retry_count += 1;
            job.scheduled_at = Utc::now() + chrono::Duration::milliseconds((delay_s * 1000.0) as i64);
            job.status = JobStatus::Scheduled;
            let mut inner = self.inner.lock().await;
            inner.queue.push(Reverse(HeapEntry(job.clone())));
            drop(inner);
            self.notify.notify_one();
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            self.stats.lock().await.failed += 1;
        }
    }

    /// Prevents new dispatch and marks any still-running jobs cancelled in
    /// their records. In-flight worker tasks are not
    /// forcibly aborted; they observe `stopper` only at their next
    /// suspension point.
    pub async fn stop(&self) {
        self.stopper.stop();
        let mut inner = self.inner.lock().await;
        let running_ids: Vec<Uuid> = inner.running.iter().cloned().collect();
        for id in running_ids {
            if let Some(job) = inner.jobs.get_mut(&id) {
                job.status = JobStatus::Cancelled;
            }
        }
        inner.running.clear();
        self.event_bus.shutdown().await;
    }
}
