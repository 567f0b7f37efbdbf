use crate::task::{
    CollectionTask,
    TaskHandle,
    TaskKind,
    TaskState,
};
use chrono::{
    DateTime,
    Utc,
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        oneshot,
        watch,
        Semaphore,
    },
    task::{
        JoinHandle,
        JoinSet,
    },
    time::{
        interval_at,
        Instant,
        MissedTickBehavior,
    },
};
use tokio_util::{
    sync::CancellationToken,
    time::DelayQueue,
};
use vidwatch_store::{
    MetricSnapshot,
    SnapshotStore,
    VideoRegistry,
    VideoStatus,
};
use vidwatch_upstream::{
    FetchError,
    MetricsSource,
    QuotaTracker,
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often counters are collected for every active video.
    pub metrics_interval: Duration,
    /// How often every active video is checked for continued existence.
    pub liveness_interval: Duration,
    /// Size of the worker pool. The binding constraint is the shared
    /// upstream quota, not local CPU, so this stays small.
    pub workers: usize,
    /// Total attempts per task before it fails terminally.
    pub max_attempts: u32,
    /// Backoff between attempts grows as `backoff_base * 2^attempt`.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Deadline for one task attempt; longer than any single upstream call
    /// timeout, so a hung request cannot pin a worker slot.
    pub task_timeout: Duration,
    /// When set, snapshots older than this are pruned on the liveness tick.
    pub retention: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            metrics_interval: Duration::from_secs(60 * 60),
            liveness_interval: Duration::from_secs(24 * 60 * 60),
            workers: 8,
            max_attempts: 3,
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(15 * 60),
            task_timeout: Duration::from_secs(60),
            retention: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("the collection scheduler is no longer running")]
pub struct SchedulerStopped;

enum Command {
    Submit {
        video_id: String,
        kind: TaskKind,
        reply: oneshot::Sender<TaskHandle>,
    },
}

/// Clonable handle used by the admin surface to inject work and to stop the
/// scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    cmd_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl SchedulerHandle {
    /// Submit a task ahead of the periodic queue (priority, not preemption:
    /// it still waits for a free worker). Deduplicated against any task for
    /// the same (video, kind) that is already pending or running.
    pub async fn trigger(
        &self,
        video_id: impl Into<String>,
        kind: TaskKind,
    ) -> Result<TaskHandle, SchedulerStopped> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit {
                video_id: video_id.into(),
                kind,
                reply,
            })
            .await
            .map_err(|_| SchedulerStopped)?;
        rx.await.map_err(|_| SchedulerStopped)
    }

    /// Request cooperative shutdown: no new tasks are dispatched, in-flight
    /// workers run to completion.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

pub struct Scheduler;

impl Scheduler {
    /// Start the dispatch loop. Returns the control handle and the join
    /// handle of the loop task; the loop exits once
    /// [`SchedulerHandle::shutdown`] is called and all workers have drained.
    pub fn spawn(
        registry: VideoRegistry,
        snapshots: SnapshotStore,
        source: Arc<dyn MetricsSource>,
        quota: Arc<QuotaTracker>,
        config: SchedulerConfig,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            registry,
            snapshots,
            source,
            quota,
            workers: Arc::new(Semaphore::new(config.workers)),
            config,
            ready: VecDeque::new(),
            inflight: HashMap::new(),
            delayed: DelayQueue::new(),
            join_set: JoinSet::new(),
            events_tx,
            quota_paused: false,
        };

        let join = tokio::spawn(dispatcher.run(cmd_rx, events_rx, cancel.clone()));
        (SchedulerHandle { cmd_tx, cancel }, join)
    }
}

/// Worker-reported outcome of one task attempt.
enum TaskOutcome {
    Succeeded,
    /// Not worth retrying; the task is done and failed.
    Terminal(String),
    /// Worth another attempt after backoff.
    Retryable(String),
    /// The upstream quota is spent; the task did no work and should run
    /// again, without consuming an attempt, once the quota resets.
    QuotaDeferred(DateTime<Utc>),
}

struct WorkerEvent {
    task: CollectionTask,
    outcome: TaskOutcome,
}

enum Delayed {
    Retry(CollectionTask),
    QuotaResume,
}

enum Wake {
    Cancelled,
    MetricsTick,
    LivenessTick,
    Command(Command),
    Expired(Delayed),
    Worker(WorkerEvent),
}

struct Dispatcher {
    registry: VideoRegistry,
    snapshots: SnapshotStore,
    source: Arc<dyn MetricsSource>,
    quota: Arc<QuotaTracker>,
    config: SchedulerConfig,
    workers: Arc<Semaphore>,
    ready: VecDeque<CollectionTask>,
    inflight: HashMap<(String, TaskKind), watch::Sender<TaskState>>,
    delayed: DelayQueue<Delayed>,
    join_set: JoinSet<()>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    quota_paused: bool,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
        cancel: CancellationToken,
    ) {
        let mut metrics_tick = interval_at(
            Instant::now() + self.config.metrics_interval,
            self.config.metrics_interval,
        );
        metrics_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut liveness_tick = interval_at(
            Instant::now() + self.config.liveness_interval,
            self.config.liveness_interval,
        );
        liveness_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            workers = self.config.workers,
            metrics_interval = ?self.config.metrics_interval,
            liveness_interval = ?self.config.liveness_interval,
            "collection scheduler started"
        );

        loop {
            self.dispatch_ready();

            let wake = tokio::select! {
                _ = cancel.cancelled() => Wake::Cancelled,
                _ = metrics_tick.tick() => Wake::MetricsTick,
                _ = liveness_tick.tick() => Wake::LivenessTick,
                Some(cmd) = cmd_rx.recv() => Wake::Command(cmd),
                Some(event) = events_rx.recv() => Wake::Worker(event),
                Some(expired) = std::future::poll_fn(|cx| self.delayed.poll_expired(cx)),
                    if !self.delayed.is_empty() =>
                {
                    Wake::Expired(expired.into_inner())
                }
            };

            match wake {
                Wake::Cancelled => break,
                Wake::MetricsTick => self.enqueue_sweep(TaskKind::MetricsCollection),
                Wake::LivenessTick => {
                    self.enqueue_sweep(TaskKind::ExistenceCheck);
                    self.prune_retention();
                }
                Wake::Command(Command::Submit { video_id, kind, reply }) => {
                    let handle = self.submit(video_id, kind, true);
                    let _ = reply.send(handle);
                }
                Wake::Expired(Delayed::Retry(task)) => {
                    self.set_state(&task.key(), TaskState::Pending);
                    self.ready.push_back(task);
                }
                Wake::Expired(Delayed::QuotaResume) => {
                    info!("quota reset reached, resuming dispatch");
                    self.quota.clear();
                    self.quota_paused = false;
                }
                Wake::Worker(event) => self.handle_worker_event(event),
            }
        }

        info!("scheduler shutting down, draining in-flight tasks");
        while self.join_set.join_next().await.is_some() {}
        info!("scheduler stopped");
    }

    /// Enqueue one task per active video. Videos with a task of this kind
    /// already pending or running are skipped by the dedup in `submit`.
    fn enqueue_sweep(&mut self, kind: TaskKind) {
        match self.registry.list_active() {
            Ok(videos) => {
                debug!(%kind, videos = videos.len(), "sweep start");
                for video in videos {
                    self.submit(video.video_id, kind, false);
                }
            }
            Err(error) => {
                // One failed enumeration skips this sweep; the next tick
                // tries again.
                error!(%kind, %error, "sweep enumeration failed");
            }
        }
    }

    fn prune_retention(&self) {
        let Some(retention) = self.config.retention else {
            return;
        };
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        match self.snapshots.prune_before(Utc::now() - retention) {
            Ok(deleted) if deleted > 0 => info!(deleted, "pruned snapshots past retention"),
            Ok(_) => {}
            Err(error) => error!(%error, "retention pruning failed"),
        }
    }

    /// Register a task unless an equivalent one is already in flight, in
    /// which case the caller gets a handle onto the existing task.
    fn submit(&mut self, video_id: String, kind: TaskKind, priority: bool) -> TaskHandle {
        let key = (video_id.clone(), kind);
        if let Some(tx) = self.inflight.get(&key) {
            return TaskHandle::new(video_id, kind, tx.subscribe());
        }

        let (tx, rx) = watch::channel(TaskState::Pending);
        self.inflight.insert(key, tx);
        let task = CollectionTask::new(video_id.clone(), kind);
        if priority {
            self.ready.push_front(task);
        } else {
            self.ready.push_back(task);
        }
        TaskHandle::new(video_id, kind, rx)
    }

    /// Hand ready tasks to free workers, unless dispatch is suspended for
    /// quota.
    fn dispatch_ready(&mut self) {
        if !self.quota_paused {
            if let Some(resets_at) = self.quota.exhausted_until() {
                // Exhaustion observed by the client before any worker could
                // report it.
                if resets_at > Utc::now() {
                    self.pause_until(resets_at);
                }
            }
        }
        while !self.quota_paused {
            let Ok(permit) = self.workers.clone().try_acquire_owned() else {
                break;
            };
            let Some(task) = self.ready.pop_front() else {
                break;
            };
            self.set_state(&task.key(), TaskState::Running);

            let registry = self.registry.clone();
            let snapshots = self.snapshots.clone();
            let source = self.source.clone();
            let events_tx = self.events_tx.clone();
            let task_timeout = self.config.task_timeout;
            self.join_set.spawn(async move {
                let attempt = tokio::time::timeout(
                    task_timeout,
                    run_attempt(&task, &registry, &snapshots, source.as_ref()),
                );
                let outcome = match attempt.await {
                    Ok(outcome) => outcome,
                    Err(_) => TaskOutcome::Retryable("task deadline exceeded".to_owned()),
                };
                // Free the worker slot before reporting, so the dispatcher
                // can immediately hand out the next task.
                drop(permit);
                let _ = events_tx.send(WorkerEvent { task, outcome });
            });
        }
    }

    fn handle_worker_event(&mut self, WorkerEvent { task, outcome }: WorkerEvent) {
        let key = task.key();
        match outcome {
            TaskOutcome::Succeeded => {
                self.finish(&key, TaskState::Succeeded);
            }
            TaskOutcome::Terminal(reason) => {
                warn!(
                    video_id = %task.video_id,
                    kind = %task.kind,
                    attempt = task.attempt + 1,
                    %reason,
                    "task failed terminally"
                );
                self.finish(&key, TaskState::Failed { reason });
            }
            TaskOutcome::Retryable(reason) => {
                let next_attempt = task.attempt + 1;
                if next_attempt >= self.config.max_attempts {
                    warn!(
                        video_id = %task.video_id,
                        kind = %task.kind,
                        attempts = next_attempt,
                        %reason,
                        "task failed after exhausting retries"
                    );
                    self.finish(&key, TaskState::Failed { reason });
                } else {
                    let delay = backoff_delay(&self.config, next_attempt);
                    debug!(
                        video_id = %task.video_id,
                        kind = %task.kind,
                        next_attempt,
                        ?delay,
                        %reason,
                        "retrying after backoff"
                    );
                    self.set_state(&key, TaskState::Retrying { next_attempt });
                    self.delayed.insert(
                        Delayed::Retry(CollectionTask {
                            attempt: next_attempt,
                            ..task
                        }),
                        delay,
                    );
                }
            }
            TaskOutcome::QuotaDeferred(resets_at) => {
                // The attempt did no work; the interrupted sweep resumes
                // from this task once the quota is back.
                self.set_state(&key, TaskState::Pending);
                self.ready.push_front(task);
                self.pause_until(resets_at);
            }
        }
    }

    fn pause_until(&mut self, resets_at: DateTime<Utc>) {
        if self.quota_paused {
            return;
        }
        self.quota_paused = true;
        let delay = (resets_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_secs(1));
        info!(%resets_at, "quota exhausted, pausing dispatch");
        self.delayed.insert(Delayed::QuotaResume, delay);
    }

    fn set_state(&self, key: &(String, TaskKind), state: TaskState) {
        if let Some(tx) = self.inflight.get(key) {
            tx.send_replace(state);
        }
    }

    fn finish(&mut self, key: &(String, TaskKind), state: TaskState) {
        if let Some(tx) = self.inflight.remove(key) {
            tx.send_replace(state);
        }
    }
}

/// One attempt at a task, classified for the retry policy. Never panics and
/// never escalates: a bad video must not halt the sweep.
async fn run_attempt(
    task: &CollectionTask,
    registry: &VideoRegistry,
    snapshots: &SnapshotStore,
    source: &dyn MetricsSource,
) -> TaskOutcome {
    match task.kind {
        TaskKind::MetricsCollection => {
            let ids = [task.video_id.clone()];
            let mut results = match source.fetch_metrics(&ids).await {
                Ok(results) => results,
                Err(error) => return classify_fetch_error(error),
            };
            match results.remove(&task.video_id) {
                Some(Ok(counters)) => {
                    let captured_at = Utc::now();
                    let snapshot = MetricSnapshot {
                        captured_at,
                        counters,
                    };
                    let recorded = snapshots
                        .append(&task.video_id, &snapshot)
                        .and_then(|()| registry.mark_collected(&task.video_id, captured_at));
                    match recorded {
                        Ok(()) => {
                            debug!(
                                video_id = %task.video_id,
                                views = counters.views,
                                likes = counters.likes,
                                comments = counters.comments,
                                "recorded snapshot"
                            );
                            TaskOutcome::Succeeded
                        }
                        // The video was removed while the fetch was in
                        // flight; nothing to retry.
                        Err(error) => TaskOutcome::Terminal(error.to_string()),
                    }
                }
                // Terminal for this task, but a metrics failure never
                // changes the video's status; that is the existence
                // check's call.
                Some(Err(error)) => TaskOutcome::Terminal(error.to_string()),
                None => TaskOutcome::Terminal("upstream returned no result for the video".to_owned()),
            }
        }
        TaskKind::ExistenceCheck => {
            let exists = match source.check_exists(&task.video_id).await {
                Ok(exists) => exists,
                Err(error) => return classify_fetch_error(error),
            };
            let status = if exists {
                VideoStatus::Active
            } else {
                VideoStatus::Unavailable
            };
            if !exists {
                warn!(video_id = %task.video_id, "video no longer available upstream");
            }
            match registry.set_status(&task.video_id, status, Utc::now()) {
                Ok(()) => TaskOutcome::Succeeded,
                Err(error) => TaskOutcome::Terminal(error.to_string()),
            }
        }
    }
}

fn classify_fetch_error(error: FetchError) -> TaskOutcome {
    match error {
        FetchError::Transient(reason) => TaskOutcome::Retryable(reason),
        FetchError::QuotaExhausted { resets_at } => TaskOutcome::QuotaDeferred(resets_at),
        FetchError::Denied(reason) => TaskOutcome::Terminal(reason),
    }
}

fn backoff_delay(config: &SchedulerConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    config.backoff_base.saturating_mul(factor).min(config.backoff_cap)
}
