use tokio::sync::watch;

/// What a task does to its video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TaskKind {
    /// Fetch current counters and append a snapshot.
    #[strum(serialize = "metrics")]
    MetricsCollection,
    /// Confirm the video still exists upstream and update its status.
    #[strum(serialize = "existence")]
    ExistenceCheck,
}

/// Transient unit of work; lives only inside one scheduling cycle.
///
/// Tasks are idempotent: re-running a collection at a slightly different
/// time simply appends another valid snapshot, so nothing here needs to be
/// persisted across a crash.
#[derive(Debug, Clone)]
pub struct CollectionTask {
    pub video_id: String,
    pub kind: TaskKind,
    /// Attempts already executed.
    pub attempt: u32,
}

impl CollectionTask {
    pub(crate) fn new(video_id: String, kind: TaskKind) -> Self {
        Self {
            video_id,
            kind,
            attempt: 0,
        }
    }

    pub(crate) fn key(&self) -> (String, TaskKind) {
        (self.video_id.clone(), self.kind)
    }
}

/// Observable lifecycle of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    /// Waiting out the backoff delay before the next attempt.
    Retrying { next_attempt: u32 },
    Succeeded,
    /// Terminal failure; the sweep carries on without this task.
    Failed { reason: String },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed { .. })
    }
}

/// Cheap handle onto a submitted task. Duplicate submissions for the same
/// (video, kind) receive handles onto the same underlying task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub video_id: String,
    pub kind: TaskKind,
    rx: watch::Receiver<TaskState>,
}

impl TaskHandle {
    pub(crate) fn new(video_id: String, kind: TaskKind, rx: watch::Receiver<TaskState>) -> Self {
        Self { video_id, kind, rx }
    }

    /// The task's state right now.
    pub fn state(&self) -> TaskState {
        self.rx.borrow().clone()
    }

    /// Wait until the task reaches a terminal state. If the scheduler shuts
    /// down first, the last observed state is returned as-is.
    pub async fn finished(&mut self) -> TaskState {
        loop {
            let state = self.rx.borrow_and_update().clone();
            if state.is_terminal() {
                return state;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}
