use crate::{
    db::{
        from_unix,
        to_unix,
        Database,
    },
    error::StoreError,
};
use chrono::{
    DateTime,
    Utc,
};
use rusqlite::params;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tracing::debug;

/// The counters observed for a video at one point in time.
///
/// Values are recorded exactly as the upstream reported them. They are
/// monotonically non-decreasing in the common case, but a decrease (count
/// correction, demonetization) is kept as observed, never clamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSet {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
}

/// One timestamped reading of a video's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricSnapshot {
    pub captured_at: DateTime<Utc>,
    pub counters: CounterSet,
}

/// Append-only time series of [`MetricSnapshot`]s keyed by
/// `(video_id, captured_at)`.
#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<Database>,
}

impl SnapshotStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record one snapshot. Fails with [`StoreError::UnknownVideo`] when the
    /// video has no registry row; otherwise always succeeds. Two snapshots at
    /// the same second are both kept: capture timestamps are assigned by the
    /// collector, and duplicates are tolerated rather than deduplicated.
    pub fn append(&self, video_id: &str, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let known: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM videos WHERE video_id = ?1)",
                [video_id],
                |row| row.get(0),
            )?;
            if !known {
                return Err(StoreError::UnknownVideo(video_id.to_owned()));
            }
            tx.execute(
                "INSERT INTO snapshots (video_id, captured_at, views, likes, comments)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    video_id,
                    to_unix(snapshot.captured_at),
                    snapshot.counters.views as i64,
                    snapshot.counters.likes as i64,
                    snapshot.counters.comments as i64,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// All snapshots in `[from, to]` (inclusive), ascending by capture time.
    /// An empty window yields an empty vec, not an error.
    pub fn query(
        &self,
        video_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT captured_at, views, likes, comments FROM snapshots
                 WHERE video_id = ?1 AND captured_at >= ?2 AND captured_at <= ?3
                 ORDER BY captured_at ASC",
            )?;
            let rows = stmt.query_map(params![video_id, to_unix(from), to_unix(to)], snapshot_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Downsample the series to one point per non-empty bucket of `width`,
    /// keeping the **last** snapshot observed in each bucket (the right
    /// representative for cumulative counters). Buckets are epoch-aligned;
    /// empty buckets are omitted, never zero-filled.
    pub fn bucket(
        &self,
        video_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        width: Duration,
    ) -> Result<Vec<(DateTime<Utc>, MetricSnapshot)>, StoreError> {
        let width = width.as_secs() as i64;
        if width < 1 {
            return Err(StoreError::InvalidBucketWidth);
        }
        self.db.with_conn(|conn| {
            // SQLite resolves the bare columns against the row carrying
            // MAX(captured_at) within each group.
            let mut stmt = conn.prepare(
                "SELECT (captured_at / ?4) * ?4 AS bucket_start,
                        captured_at, views, likes, comments, MAX(captured_at)
                 FROM snapshots
                 WHERE video_id = ?1 AND captured_at >= ?2 AND captured_at <= ?3
                 GROUP BY bucket_start
                 ORDER BY bucket_start ASC",
            )?;
            let rows = stmt.query_map(
                params![video_id, to_unix(from), to_unix(to), width],
                |row| {
                    let bucket_start: i64 = row.get(0)?;
                    let snapshot = MetricSnapshot {
                        captured_at: from_unix(row.get(1)?),
                        counters: CounterSet {
                            views: row.get::<_, i64>(2)? as u64,
                            likes: row.get::<_, i64>(3)? as u64,
                            comments: row.get::<_, i64>(4)? as u64,
                        },
                    };
                    Ok((from_unix(bucket_start), snapshot))
                },
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// The most recent snapshot for a video, if any.
    pub fn latest(&self, video_id: &str) -> Result<Option<MetricSnapshot>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT captured_at, views, likes, comments FROM snapshots
                 WHERE video_id = ?1 ORDER BY captured_at DESC LIMIT 1",
            )?;
            let mut rows = stmt.query_map([video_id], snapshot_from_row)?;
            Ok(rows.next().transpose()?)
        })
    }

    /// Retention knob: drop all snapshots captured before `cutoff`, across
    /// every video. Returns the number of rows deleted.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM snapshots WHERE captured_at < ?1",
                [to_unix(cutoff)],
            )?;
            if deleted > 0 {
                debug!(deleted, %cutoff, "pruned snapshots past retention");
            }
            Ok(deleted)
        })
    }
}

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricSnapshot> {
    Ok(MetricSnapshot {
        captured_at: from_unix(row.get(0)?),
        counters: CounterSet {
            views: row.get::<_, i64>(1)? as u64,
            likes: row.get::<_, i64>(2)? as u64,
            comments: row.get::<_, i64>(3)? as u64,
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{
        VideoDetails,
        VideoRegistry,
    };
    use chrono::TimeZone as _;
    use pretty_assertions::assert_eq;

    fn stores() -> (VideoRegistry, SnapshotStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (VideoRegistry::new(db.clone()), SnapshotStore::new(db))
    }

    fn track(registry: &VideoRegistry, id: &str) {
        let details = VideoDetails {
            title: id.to_owned(),
            channel_id: "UC123".to_owned(),
            channel_title: "Channel".to_owned(),
            published_at: None,
        };
        registry.register(id, &details, Utc::now()).unwrap();
    }

    fn snap(at: DateTime<Utc>, views: u64) -> MetricSnapshot {
        MetricSnapshot {
            captured_at: at,
            counters: CounterSet {
                views,
                likes: views / 10,
                comments: views / 100,
            },
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn append_requires_registration() {
        let (_registry, snapshots) = stores();
        let err = snapshots.append("ghost", &snap(t0(), 1)).unwrap_err();
        assert!(matches!(err, StoreError::UnknownVideo(id) if id == "ghost"));
    }

    #[test]
    fn query_returns_window_in_capture_order() {
        let (registry, snapshots) = stores();
        track(&registry, "abc123");
        let hours: Vec<_> = (0..5).map(|h| t0() + chrono::Duration::hours(h)).collect();
        // Insert out of order; the index orders reads.
        for &h in [3usize, 0, 4, 1, 2].iter() {
            snapshots.append("abc123", &snap(hours[h], 100 * h as u64)).unwrap();
        }

        let rows = snapshots.query("abc123", hours[1], hours[3]).unwrap();
        let views: Vec<_> = rows.iter().map(|s| s.counters.views).collect();
        assert_eq!(views, vec![100, 200, 300]);

        // Outside the recorded range: empty, not an error.
        assert_eq!(
            snapshots
                .query("abc123", t0() - chrono::Duration::days(2), t0() - chrono::Duration::days(1))
                .unwrap(),
            vec![]
        );
    }

    #[test]
    fn duplicate_capture_times_are_both_kept() {
        let (registry, snapshots) = stores();
        track(&registry, "abc123");
        snapshots.append("abc123", &snap(t0(), 10)).unwrap();
        snapshots.append("abc123", &snap(t0(), 11)).unwrap();
        assert_eq!(snapshots.query("abc123", t0(), t0()).unwrap().len(), 2);
    }

    #[test]
    fn counter_decreases_are_preserved() {
        let (registry, snapshots) = stores();
        track(&registry, "abc123");
        snapshots.append("abc123", &snap(t0(), 500)).unwrap();
        snapshots
            .append("abc123", &snap(t0() + chrono::Duration::hours(1), 450))
            .unwrap();
        let rows = snapshots
            .query("abc123", t0(), t0() + chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(rows[1].counters.views, 450);
    }

    #[test]
    fn bucket_keeps_last_snapshot_and_skips_empty_buckets() {
        let (registry, snapshots) = stores();
        track(&registry, "abc123");
        // Hour 0: two samples. Hour 1: empty. Hour 2: one sample.
        snapshots.append("abc123", &snap(t0(), 10)).unwrap();
        snapshots
            .append("abc123", &snap(t0() + chrono::Duration::minutes(30), 20))
            .unwrap();
        snapshots
            .append("abc123", &snap(t0() + chrono::Duration::hours(2), 50))
            .unwrap();

        let buckets = snapshots
            .bucket(
                "abc123",
                t0(),
                t0() + chrono::Duration::hours(3),
                Duration::from_secs(3600),
            )
            .unwrap();

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].0, t0());
        assert_eq!(buckets[0].1.counters.views, 20);
        assert_eq!(buckets[1].0, t0() + chrono::Duration::hours(2));
        assert_eq!(buckets[1].1.counters.views, 50);
    }

    #[test]
    fn bucket_rejects_subsecond_width() {
        let (registry, snapshots) = stores();
        track(&registry, "abc123");
        let err = snapshots
            .bucket("abc123", t0(), t0(), Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidBucketWidth));
    }

    #[test]
    fn latest_picks_newest_sample() {
        let (registry, snapshots) = stores();
        track(&registry, "abc123");
        assert_eq!(snapshots.latest("abc123").unwrap(), None);
        snapshots.append("abc123", &snap(t0(), 10)).unwrap();
        snapshots
            .append("abc123", &snap(t0() + chrono::Duration::hours(1), 30))
            .unwrap();
        assert_eq!(snapshots.latest("abc123").unwrap().unwrap().counters.views, 30);
    }

    #[test]
    fn prune_drops_only_rows_before_cutoff() {
        let (registry, snapshots) = stores();
        track(&registry, "abc123");
        for h in 0..4 {
            snapshots
                .append("abc123", &snap(t0() + chrono::Duration::hours(h), h as u64))
                .unwrap();
        }
        let cutoff = t0() + chrono::Duration::hours(2);
        assert_eq!(snapshots.prune_before(cutoff).unwrap(), 2);
        let rows = snapshots
            .query("abc123", t0(), t0() + chrono::Duration::hours(4))
            .unwrap();
        assert_eq!(rows.first().unwrap().captured_at, cutoff);
    }

    #[test]
    fn remove_with_purge_clears_history() {
        let (registry, snapshots) = stores();
        track(&registry, "abc123");
        snapshots.append("abc123", &snap(t0(), 10)).unwrap();
        registry.remove("abc123", true).unwrap();

        track(&registry, "abc123");
        assert_eq!(
            snapshots
                .query("abc123", t0() - chrono::Duration::days(1), t0() + chrono::Duration::days(1))
                .unwrap(),
            vec![]
        );
    }
}
