//! Trend and growth queries over the recorded snapshot series.
//!
//! All statistics are computed from the first and last snapshot inside the
//! requested window, over whatever sparse, irregularly spaced samples the
//! collector managed to record. Nothing is interpolated and no history is
//! fabricated: a video without a registry row is [`TrendError::UnknownVideo`],
//! a window with fewer than two samples is [`TrendError::InsufficientData`].

mod report;

pub use report::{
    CounterGrowth,
    GrowthReport,
    GrowthStats,
    TrendPoint,
    TrendReport,
    TrendUnit,
};

use chrono::{
    DateTime,
    Utc,
};
use vidwatch_store::{
    MetricSnapshot,
    SnapshotStore,
    StoreError,
    VideoRegistry,
};

#[derive(thiserror::Error, Debug)]
pub enum TrendError {
    /// The video was never registered. The engine does not invent history
    /// for it; registering and answering with current data only is the
    /// caller's decision.
    #[error("video {0} is not tracked, no history to analyze")]
    UnknownVideo(String),

    /// Fewer than two snapshots fall inside the window. A single data point
    /// cannot establish growth, and that must be reported rather than
    /// returned as zero.
    #[error("only {found} snapshot(s) in the window, need at least 2 to compute growth")]
    InsufficientData { found: usize },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for TrendError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::VideoNotFound(id) | StoreError::UnknownVideo(id) => {
                TrendError::UnknownVideo(id)
            }
            other => TrendError::Store(other),
        }
    }
}

/// Likes and comments earned per view, as a percentage.
pub fn engagement_rate(snapshot: &MetricSnapshot) -> f64 {
    let counters = &snapshot.counters;
    (counters.likes + counters.comments) as f64 / counters.views.max(1) as f64 * 100.0
}

/// Read-side engine answering windowed trend queries against the store.
#[derive(Clone)]
pub struct Analytics {
    registry: VideoRegistry,
    snapshots: SnapshotStore,
}

impl Analytics {
    pub fn new(registry: VideoRegistry, snapshots: SnapshotStore) -> Self {
        Self {
            registry,
            snapshots,
        }
    }

    /// Per-counter growth between the first and last snapshot in
    /// `[from, to]`. Snapshots outside the window never influence the
    /// result.
    pub fn growth(
        &self,
        video_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<GrowthReport, TrendError> {
        self.registry.get(video_id)?;
        let samples = self.snapshots.query(video_id, from, to)?;
        if samples.len() < 2 {
            return Err(TrendError::InsufficientData {
                found: samples.len(),
            });
        }
        let first = samples[0];
        let last = samples[samples.len() - 1];
        Ok(GrowthReport {
            video_id: video_id.to_owned(),
            from,
            to,
            samples: samples.len(),
            counters: CounterGrowth::between(&first.counters, &last.counters),
            first,
            last,
        })
    }

    /// The window downsampled to one point per non-empty bucket. The series
    /// is sparse: buckets without samples are omitted, never zero-filled.
    pub fn bucketed_series(
        &self,
        video_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        unit: TrendUnit,
    ) -> Result<Vec<TrendPoint>, TrendError> {
        self.registry.get(video_id)?;
        let buckets = self
            .snapshots
            .bucket(video_id, from, to, unit.bucket_width())?;
        Ok(buckets
            .into_iter()
            .map(|(bucket_start, snapshot)| TrendPoint {
                bucket_start,
                captured_at: snapshot.captured_at,
                counters: snapshot.counters,
            })
            .collect())
    }

    /// The full trend answer served to the admin surface: growth, current
    /// counters, engagement, and the bucketed breakdown.
    pub fn trend_report(
        &self,
        video_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        unit: TrendUnit,
    ) -> Result<TrendReport, TrendError> {
        let video = self.registry.get(video_id)?;
        let growth = self.growth(video_id, from, to)?;
        let series = self.bucketed_series(video_id, from, to, unit)?;
        Ok(TrendReport {
            video_id: video_id.to_owned(),
            title: video.title,
            channel_title: video.channel_title,
            from,
            to,
            unit,
            samples: growth.samples,
            current: growth.last.counters,
            engagement_rate: engagement_rate(&growth.last),
            growth: growth.counters,
            series,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone as _;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use vidwatch_store::{
        CounterSet,
        Database,
        VideoDetails,
    };

    fn engine() -> (VideoRegistry, SnapshotStore, Analytics) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = VideoRegistry::new(db.clone());
        let snapshots = SnapshotStore::new(db);
        let analytics = Analytics::new(registry.clone(), snapshots.clone());
        (registry, snapshots, analytics)
    }

    fn track(registry: &VideoRegistry, id: &str) {
        let details = VideoDetails {
            title: format!("Video {id}"),
            channel_id: "UC1".to_owned(),
            channel_title: "Channel".to_owned(),
            published_at: None,
        };
        registry.register(id, &details, Utc::now()).unwrap();
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn snap(at: DateTime<Utc>, views: u64, likes: u64, comments: u64) -> MetricSnapshot {
        MetricSnapshot {
            captured_at: at,
            counters: CounterSet {
                views,
                likes,
                comments,
            },
        }
    }

    #[test]
    fn growth_from_zero_base_uses_floored_denominator() {
        // Registered at T0 with 0 views, 100 views an hour later, 150 after
        // two hours: absolute growth 150, percent 150 / max(0, 1) * 100.
        let (registry, snapshots, analytics) = engine();
        track(&registry, "abc123");
        let hour = chrono::Duration::hours(1);
        snapshots.append("abc123", &snap(t0(), 0, 0, 0)).unwrap();
        snapshots.append("abc123", &snap(t0() + hour, 100, 3, 1)).unwrap();
        snapshots.append("abc123", &snap(t0() + hour * 2, 150, 5, 2)).unwrap();

        let report = analytics.growth("abc123", t0(), t0() + hour * 2).unwrap();
        assert_eq!(report.samples, 3);
        assert_eq!(report.counters.views.absolute, 150);
        assert_eq!(report.counters.views.percent, 15000.0);
        assert_eq!(report.counters.likes.absolute, 5);
        assert_eq!(report.counters.comments.absolute, 2);
    }

    #[test]
    fn growth_ignores_snapshots_outside_the_window() {
        let (registry, snapshots, analytics) = engine();
        track(&registry, "abc123");
        let hour = chrono::Duration::hours(1);
        // Noise before and after the window.
        snapshots.append("abc123", &snap(t0() - hour, 1, 0, 0)).unwrap();
        snapshots.append("abc123", &snap(t0(), 100, 10, 1)).unwrap();
        snapshots.append("abc123", &snap(t0() + hour, 180, 14, 2)).unwrap();
        snapshots.append("abc123", &snap(t0() + hour * 5, 9999, 99, 9)).unwrap();

        let report = analytics.growth("abc123", t0(), t0() + hour).unwrap();
        assert_eq!(report.samples, 2);
        assert_eq!(report.counters.views.absolute, 80);
        assert_eq!(report.counters.views.percent, 80.0);
        assert_eq!(report.first.counters.views, 100);
        assert_eq!(report.last.counters.views, 180);
    }

    #[test]
    fn a_decrease_is_reported_as_negative_growth() {
        let (registry, snapshots, analytics) = engine();
        track(&registry, "abc123");
        let hour = chrono::Duration::hours(1);
        snapshots.append("abc123", &snap(t0(), 200, 0, 0)).unwrap();
        snapshots.append("abc123", &snap(t0() + hour, 150, 0, 0)).unwrap();

        let report = analytics.growth("abc123", t0(), t0() + hour).unwrap();
        assert_eq!(report.counters.views.absolute, -50);
        assert_eq!(report.counters.views.percent, -25.0);
    }

    #[test]
    fn fewer_than_two_samples_is_insufficient_data_not_zero() {
        let (registry, snapshots, analytics) = engine();
        track(&registry, "abc123");
        let window_end = t0() + chrono::Duration::days(1);

        let err = analytics.growth("abc123", t0(), window_end).unwrap_err();
        assert!(matches!(err, TrendError::InsufficientData { found: 0 }));

        snapshots.append("abc123", &snap(t0(), 10, 0, 0)).unwrap();
        let err = analytics.growth("abc123", t0(), window_end).unwrap_err();
        assert!(matches!(err, TrendError::InsufficientData { found: 1 }));
    }

    #[test]
    fn untracked_video_is_unknown_not_empty() {
        let (_registry, _snapshots, analytics) = engine();
        let err = analytics
            .trend_report("ghost", t0(), t0() + chrono::Duration::days(1), TrendUnit::Day)
            .unwrap_err();
        assert!(matches!(err, TrendError::UnknownVideo(id) if id == "ghost"));
    }

    #[test]
    fn engagement_rate_floors_views_at_one() {
        let zero_views = snap(t0(), 0, 3, 2);
        assert_eq!(engagement_rate(&zero_views), 500.0);

        let watched = snap(t0(), 1000, 40, 10);
        assert_eq!(engagement_rate(&watched), 5.0);
    }

    #[test]
    fn bucketed_series_is_sparse() {
        let (registry, snapshots, analytics) = engine();
        track(&registry, "abc123");
        let hour = chrono::Duration::hours(1);
        // Day one: two samples. Day two: nothing. Day three: one sample.
        snapshots.append("abc123", &snap(t0(), 10, 0, 0)).unwrap();
        snapshots.append("abc123", &snap(t0() + hour * 6, 60, 0, 0)).unwrap();
        snapshots
            .append("abc123", &snap(t0() + chrono::Duration::days(2), 300, 0, 0))
            .unwrap();

        let series = analytics
            .bucketed_series("abc123", t0(), t0() + chrono::Duration::days(3), TrendUnit::Day)
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].counters.views, 60);
        assert_eq!(series[1].counters.views, 300);
    }

    #[test]
    fn trend_report_combines_growth_series_and_engagement() {
        let (registry, snapshots, analytics) = engine();
        track(&registry, "abc123");
        let hour = chrono::Duration::hours(1);
        snapshots.append("abc123", &snap(t0(), 100, 10, 0)).unwrap();
        snapshots.append("abc123", &snap(t0() + hour * 3, 400, 16, 4)).unwrap();

        let report = analytics
            .trend_report("abc123", t0(), t0() + hour * 4, TrendUnit::Hour)
            .unwrap();
        assert_eq!(report.title, "Video abc123");
        assert_eq!(report.samples, 2);
        assert_eq!(report.current.views, 400);
        assert_eq!(report.growth.views.absolute, 300);
        assert_eq!(report.growth.views.percent, 300.0);
        assert_eq!(report.engagement_rate, 5.0);
        assert_eq!(report.series.len(), 2);
    }

    #[test]
    fn unit_widths_match_their_calendar_size() {
        assert_eq!(TrendUnit::Hour.bucket_width().as_secs(), 3_600);
        assert_eq!(TrendUnit::Day.bucket_width().as_secs(), 86_400);
        assert_eq!(TrendUnit::Week.bucket_width().as_secs(), 604_800);
        assert_eq!(TrendUnit::Month.bucket_width().as_secs(), 2_592_000);
    }
}
