use crate::error::{
    EntityResult,
    FetchResult,
};
use std::collections::HashMap;
use vidwatch_store::{
    CounterSet,
    VideoDetails,
};

/// The upstream operations the collection scheduler depends on.
///
/// [`UpstreamClient`](crate::UpstreamClient) is the production
/// implementation; tests drive the scheduler with a scripted source.
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    /// Current counters for each requested video. The outer result is the
    /// whole-call outcome; per-video outcomes are reported individually so
    /// one missing video does not poison the batch.
    async fn fetch_metrics(
        &self,
        ids: &[String],
    ) -> FetchResult<HashMap<String, EntityResult<CounterSet>>>;

    /// Static metadata for each requested video.
    async fn fetch_details(
        &self,
        ids: &[String],
    ) -> FetchResult<HashMap<String, EntityResult<VideoDetails>>>;

    /// Whether the video is still present and readable upstream.
    async fn check_exists(&self, id: &str) -> FetchResult<bool>;
}
