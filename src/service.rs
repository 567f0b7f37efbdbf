//! The admin surface: the operations exposed to whatever front end drives
//! the daemon (tool layer, CLI, tests). It validates, delegates to the
//! registry/scheduler/analytics, and maps their errors onto one surface.

use chrono::{
    DateTime,
    Utc,
};
use std::sync::Arc;
use vidwatch_analytics::{
    Analytics,
    TrendError,
    TrendReport,
    TrendUnit,
};
use vidwatch_collector::{
    SchedulerHandle,
    TaskHandle,
    TaskKind,
};
use vidwatch_store::{
    SnapshotStore,
    StoreError,
    TrackedVideo,
    VideoRegistry,
    VideoStatus,
};
use vidwatch_upstream::MetricsSource;

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    /// The video does not exist upstream (registration) or is not tracked
    /// (removal, manual collection).
    #[error("video {0} was not found")]
    NotFound(String),

    /// A trend was requested for a video that was never registered. No
    /// history is fabricated; callers may choose to register it and answer
    /// with current data only.
    #[error("video {0} is not tracked, no history to analyze")]
    UnknownVideo(String),

    /// A valid request over a window that does not hold enough samples yet.
    #[error("only {found} snapshot(s) in the requested window, need at least 2")]
    InsufficientData { found: usize },

    #[error("the upstream metrics service is unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("the collection scheduler is not running")]
    SchedulerStopped,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::VideoNotFound(id) => ServiceError::NotFound(id),
            StoreError::UnknownVideo(id) => ServiceError::UnknownVideo(id),
            other => ServiceError::Store(other),
        }
    }
}

impl From<TrendError> for ServiceError {
    fn from(error: TrendError) -> Self {
        match error {
            TrendError::UnknownVideo(id) => ServiceError::UnknownVideo(id),
            TrendError::InsufficientData { found } => ServiceError::InsufficientData { found },
            TrendError::Store(other) => ServiceError::Store(other),
        }
    }
}

/// Facade over the engine for registration, manual collection, and trend
/// queries.
pub struct MetricsService {
    registry: VideoRegistry,
    analytics: Analytics,
    source: Arc<dyn MetricsSource>,
    scheduler: SchedulerHandle,
}

impl MetricsService {
    pub fn new(
        registry: VideoRegistry,
        snapshots: SnapshotStore,
        source: Arc<dyn MetricsSource>,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            analytics: Analytics::new(registry.clone(), snapshots),
            registry,
            source,
            scheduler,
        }
    }

    /// Start tracking a video: fetch its metadata, upsert the registry row,
    /// and schedule an initial collection ahead of the periodic queue.
    pub async fn register_video(&self, video_id: &str) -> Result<TrackedVideo, ServiceError> {
        let ids = [video_id.to_owned()];
        let mut details = self
            .source
            .fetch_details(&ids)
            .await
            .map_err(|error| ServiceError::UpstreamUnavailable(error.to_string()))?;
        let details = match details.remove(video_id) {
            Some(Ok(details)) => details,
            Some(Err(_)) | None => return Err(ServiceError::NotFound(video_id.to_owned())),
        };

        let video = self.registry.register(video_id, &details, Utc::now())?;

        // Best effort; the next periodic sweep covers the video anyway.
        if let Err(error) = self
            .scheduler
            .trigger(video_id, TaskKind::MetricsCollection)
            .await
        {
            warn!(video_id, %error, "could not schedule the initial collection");
        }
        Ok(video)
    }

    pub fn remove_video(&self, video_id: &str, purge_history: bool) -> Result<(), ServiceError> {
        Ok(self.registry.remove(video_id, purge_history)?)
    }

    /// Collect now instead of waiting for the next sweep. Deduplicated: if a
    /// collection for this video is already pending or running, the returned
    /// handle observes that task.
    pub async fn trigger_collection(&self, video_id: &str) -> Result<TaskHandle, ServiceError> {
        self.registry.get(video_id)?;
        self.scheduler
            .trigger(video_id, TaskKind::MetricsCollection)
            .await
            .map_err(|_| ServiceError::SchedulerStopped)
    }

    pub fn get_trend(
        &self,
        video_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        unit: TrendUnit,
    ) -> Result<TrendReport, ServiceError> {
        Ok(self.analytics.trend_report(video_id, from, to, unit)?)
    }

    pub fn list_tracked(
        &self,
        status: Option<VideoStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TrackedVideo>, ServiceError> {
        Ok(self.registry.list(status, limit, offset)?)
    }
}
