use crate::{
    error::{
        EntityError,
        EntityResult,
        FetchError,
        FetchResult,
    },
    quota::QuotaTracker,
    source::MetricsSource,
    wire::{
        ApiErrorBody,
        VideoItem,
        VideoListResponse,
    },
};
use chrono::{
    DateTime,
    Duration as ChronoDuration,
    Utc,
};
use reqwest::{
    header::RETRY_AFTER,
    Client as HttpClient,
    StatusCode,
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};
use tracing::{
    debug,
    warn,
};
use url::Url;
use vidwatch_store::{
    CounterSet,
    VideoDetails,
};

/// Hard limit of the upstream `videos` endpoint: at most 50 IDs per call.
const MAX_IDS_PER_CALL: usize = 50;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub api_key: String,
    /// Per-call timeout; must stay below the scheduler's task deadline so a
    /// hung request cannot pin a worker.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: Url, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Request wrapper around the upstream metrics API.
///
/// Batches IDs up to the endpoint maximum, decodes the wire payload, and
/// classifies every failure before it leaves this crate. Refuses to issue
/// calls while the shared [`QuotaTracker`] reports exhaustion.
pub struct UpstreamClient {
    http: HttpClient,
    config: ClientConfig,
    quota: Arc<QuotaTracker>,
}

impl UpstreamClient {
    pub fn new(config: ClientConfig, quota: Arc<QuotaTracker>) -> Self {
        Self {
            http: HttpClient::new(),
            config,
            quota,
        }
    }

    pub fn quota(&self) -> Arc<QuotaTracker> {
        self.quota.clone()
    }

    async fn list_videos(&self, part: &str, ids: &[String]) -> FetchResult<Vec<VideoItem>> {
        if let Some(resets_at) = self.quota.exhausted_until() {
            if resets_at > Utc::now() {
                return Err(FetchError::QuotaExhausted { resets_at });
            }
            self.quota.clear();
        }

        let url = self
            .config
            .base_url
            .join("videos")
            .map_err(|e| FetchError::Denied(format!("invalid upstream base url: {e}")))?;

        let mut items = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_CALL) {
            debug!(part, count = chunk.len(), "requesting video batch");
            let response = self
                .http
                .get(url.clone())
                .query(&[
                    ("part", part),
                    ("id", chunk.join(",").as_str()),
                    ("key", self.config.api_key.as_str()),
                ])
                .timeout(self.config.timeout)
                .send()
                .await
                .map_err(|e| FetchError::Transient(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let retry_after = parse_retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                let error = classify_failure(status, retry_after, &body);
                if let FetchError::QuotaExhausted { resets_at } = &error {
                    self.quota.record_exhausted(*resets_at);
                } else {
                    warn!(%status, %error, "upstream call failed");
                }
                return Err(error);
            }

            let page: VideoListResponse = response
                .json()
                .await
                .map_err(|e| FetchError::Transient(format!("undecodable upstream payload: {e}")))?;
            items.extend(page.items);
        }
        Ok(items)
    }
}

#[async_trait::async_trait]
impl MetricsSource for UpstreamClient {
    async fn fetch_metrics(
        &self,
        ids: &[String],
    ) -> FetchResult<HashMap<String, EntityResult<CounterSet>>> {
        let items = self.list_videos("statistics", ids).await?;
        Ok(collate(ids, items, |item| {
            item.statistics.map(|stats| CounterSet {
                views: stats.view_count,
                likes: stats.like_count,
                comments: stats.comment_count,
            })
        }))
    }

    async fn fetch_details(
        &self,
        ids: &[String],
    ) -> FetchResult<HashMap<String, EntityResult<VideoDetails>>> {
        let items = self.list_videos("snippet", ids).await?;
        Ok(collate(ids, items, |item| {
            item.snippet.map(|snippet| VideoDetails {
                title: snippet.title,
                channel_id: snippet.channel_id,
                channel_title: snippet.channel_title,
                published_at: snippet.published_at,
            })
        }))
    }

    async fn check_exists(&self, id: &str) -> FetchResult<bool> {
        let ids = [id.to_owned()];
        let items = self.list_videos("id", &ids).await?;
        Ok(items.iter().any(|item| item.id == id))
    }
}

/// Line up response items with the requested IDs. An ID the upstream did not
/// echo back is gone ([`EntityError::NotFound`]); an item without the
/// requested part has its data withheld ([`EntityError::PermissionDenied`]).
fn collate<T>(
    ids: &[String],
    items: Vec<VideoItem>,
    extract: impl Fn(VideoItem) -> Option<T>,
) -> HashMap<String, EntityResult<T>> {
    let mut by_id: HashMap<String, EntityResult<T>> = items
        .into_iter()
        .map(|item| {
            let id = item.id.clone();
            let outcome = extract(item).ok_or(EntityError::PermissionDenied);
            (id, outcome)
        })
        .collect();

    ids.iter()
        .map(|id| {
            let outcome = by_id.remove(id).unwrap_or(Err(EntityError::NotFound));
            (id.clone(), outcome)
        })
        .collect()
}

/// Classify a non-success HTTP response into the retry taxonomy.
fn classify_failure(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> FetchError {
    let payload = serde_json::from_str::<ApiErrorBody>(body).ok();
    let reason = payload
        .as_ref()
        .and_then(|b| b.error.errors.first())
        .map(|e| e.reason.as_str())
        .unwrap_or_default();
    let message = payload
        .as_ref()
        .map(|b| b.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {status}"));

    if matches!(reason, "quotaExceeded" | "dailyLimitExceeded") {
        let resets_at = retry_after
            .and_then(|d| ChronoDuration::from_std(d).ok())
            .map(|d| Utc::now() + d)
            .unwrap_or_else(|| next_daily_reset(Utc::now()));
        return FetchError::QuotaExhausted { resets_at };
    }

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return FetchError::Transient(message);
    }

    FetchError::Denied(message)
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// The upstream does not always send a reset deadline with quota errors; the
/// allocation is known to replenish daily, so fall back to the next UTC
/// midnight.
fn next_daily_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    (now + ChronoDuration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now + ChronoDuration::days(1))
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone as _;
    use pretty_assertions::assert_eq;

    fn item(id: &str, views: Option<u64>) -> VideoItem {
        let payload = match views {
            Some(views) => format!(r#"{{"id": "{id}", "statistics": {{"viewCount": "{views}"}}}}"#),
            None => format!(r#"{{"id": "{id}"}}"#),
        };
        serde_json::from_str(&payload).unwrap()
    }

    fn counters(item: VideoItem) -> Option<CounterSet> {
        item.statistics.map(|stats| CounterSet {
            views: stats.view_count,
            likes: stats.like_count,
            comments: stats.comment_count,
        })
    }

    #[test]
    fn collate_reports_each_requested_id() {
        let ids = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let items = vec![item("a", Some(5)), item("c", None)];
        let collated = collate(&ids, items, counters);

        assert_eq!(collated.len(), 3);
        assert_eq!(collated["a"].as_ref().unwrap().views, 5);
        assert_eq!(collated["b"], Err(EntityError::NotFound));
        assert_eq!(collated["c"], Err(EntityError::PermissionDenied));
    }

    #[test]
    fn quota_reason_maps_to_quota_exhausted() {
        let body = r#"{"error": {"message": "Quota exceeded.", "errors": [{"reason": "quotaExceeded"}]}}"#;
        let error = classify_failure(StatusCode::FORBIDDEN, Some(Duration::from_secs(600)), body);
        let FetchError::QuotaExhausted { resets_at } = error else {
            panic!("expected quota exhaustion, got {error:?}");
        };
        let delay = resets_at - Utc::now();
        assert!(delay > ChronoDuration::minutes(9) && delay <= ChronoDuration::minutes(10));
    }

    #[test]
    fn quota_without_retry_after_falls_back_to_daily_reset() {
        let body = r#"{"error": {"message": "Quota exceeded.", "errors": [{"reason": "dailyLimitExceeded"}]}}"#;
        let error = classify_failure(StatusCode::FORBIDDEN, None, body);
        let FetchError::QuotaExhausted { resets_at } = error else {
            panic!("expected quota exhaustion, got {error:?}");
        };
        assert!(resets_at > Utc::now());
        assert_eq!(resets_at.time(), chrono::NaiveTime::MIN);
    }

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        assert!(matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, None, ""),
            FetchError::Transient(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, None, ""),
            FetchError::Transient(_)
        ));
    }

    #[test]
    fn other_client_errors_are_denied_with_upstream_message() {
        let body = r#"{"error": {"message": "API key not valid.", "errors": [{"reason": "badRequest"}]}}"#;
        let error = classify_failure(StatusCode::BAD_REQUEST, None, body);
        assert_eq!(error, FetchError::Denied("API key not valid.".to_owned()));
    }

    #[test]
    fn next_daily_reset_is_the_following_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 17, 45, 12).unwrap();
        assert_eq!(
            next_daily_reset(now),
            Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap()
        );
    }
}
