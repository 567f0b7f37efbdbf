use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;
use vidwatch_store::{
    CounterSet,
    MetricSnapshot,
};

/// Bucket width for a trend breakdown.
///
/// Buckets are fixed-width, epoch-aligned windows; a month is a flat 30
/// days, which keeps bucket identity independent of the query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TrendUnit {
    Hour,
    Day,
    Week,
    Month,
}

impl TrendUnit {
    pub fn bucket_width(self) -> Duration {
        match self {
            TrendUnit::Hour => Duration::from_secs(60 * 60),
            TrendUnit::Day => Duration::from_secs(24 * 60 * 60),
            TrendUnit::Week => Duration::from_secs(7 * 24 * 60 * 60),
            TrendUnit::Month => Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Growth of a single counter across a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GrowthStats {
    /// `last - first`; negative when the observed counter decreased.
    pub absolute: i64,
    /// `absolute / max(first, 1) * 100`. The floored denominator avoids a
    /// division by zero when the counter starts at 0; the result is then an
    /// approximation, not a true percentage.
    pub percent: f64,
}

impl GrowthStats {
    fn between(first: u64, last: u64) -> Self {
        let absolute = last as i64 - first as i64;
        let percent = absolute as f64 / first.max(1) as f64 * 100.0;
        Self { absolute, percent }
    }
}

/// Growth of every tracked counter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CounterGrowth {
    pub views: GrowthStats,
    pub likes: GrowthStats,
    pub comments: GrowthStats,
}

impl CounterGrowth {
    pub fn between(first: &CounterSet, last: &CounterSet) -> Self {
        Self {
            views: GrowthStats::between(first.views, last.views),
            likes: GrowthStats::between(first.likes, last.likes),
            comments: GrowthStats::between(first.comments, last.comments),
        }
    }
}

/// Result of a plain growth query.
#[derive(Debug, Clone, Serialize)]
pub struct GrowthReport {
    pub video_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Snapshots found inside the window (at least 2).
    pub samples: usize,
    pub counters: CounterGrowth,
    pub first: MetricSnapshot,
    pub last: MetricSnapshot,
}

/// One point of a bucketed series: the last snapshot observed in the bucket.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrendPoint {
    pub bucket_start: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
    pub counters: CounterSet,
}

/// Full trend answer for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub video_id: String,
    pub title: String,
    pub channel_title: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub unit: TrendUnit,
    pub samples: usize,
    /// Counters of the newest snapshot in the window.
    pub current: CounterSet,
    pub engagement_rate: f64,
    pub growth: CounterGrowth,
    /// Sparse: one entry per non-empty bucket, in time order.
    pub series: Vec<TrendPoint>,
}
