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
use rusqlite::{
    params,
    OptionalExtension as _,
    Row,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    str::FromStr as _,
    sync::Arc,
};
use tracing::info;

/// Lifecycle status of a tracked video.
///
/// Videos are registered `Active` and flip to `Unavailable` when an
/// existence check no longer finds them upstream (deleted, private, region
/// blocked). A later successful check flips them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Active,
    Unavailable,
}

/// Static metadata fetched from upstream at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDetails {
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// One registry row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedVideo {
    pub video_id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub tracked_since: DateTime<Utc>,
    pub last_collected_at: Option<DateTime<Utc>>,
    pub status: VideoStatus,
    pub status_checked_at: Option<DateTime<Utc>>,
}

/// Durable table of tracked videos and their lifecycle state.
#[derive(Clone)]
pub struct VideoRegistry {
    db: Arc<Database>,
}

impl VideoRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert the video, or refresh its metadata if it is already tracked.
    ///
    /// Re-registration resets the status to [`VideoStatus::Active`] but keeps
    /// `tracked_since` and the collected history untouched. Never fails on
    /// duplicates.
    pub fn register(
        &self,
        video_id: &str,
        details: &VideoDetails,
        now: DateTime<Utc>,
    ) -> Result<TrackedVideo, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO videos (video_id, title, channel_id, channel_title, published_at, tracked_since, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active')
                 ON CONFLICT (video_id) DO UPDATE SET
                     title = excluded.title,
                     channel_id = excluded.channel_id,
                     channel_title = excluded.channel_title,
                     published_at = excluded.published_at,
                     status = 'active'",
                params![
                    video_id,
                    details.title,
                    details.channel_id,
                    details.channel_title,
                    details.published_at.map(to_unix),
                    to_unix(now),
                ],
            )?;
            Ok(())
        })?;
        info!(video_id, title = %details.title, "registered video");
        self.get(video_id)
    }

    pub fn get(&self, video_id: &str) -> Result<TrackedVideo, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM videos WHERE video_id = ?1"),
                [video_id],
                video_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::VideoNotFound(video_id.to_owned()))
        })
    }

    /// All videos eligible for collection sweeps. Unordered; a single
    /// statement, so the result is consistent at call time.
    pub fn list_active(&self) -> Result<Vec<TrackedVideo>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLUMNS} FROM videos WHERE status = 'active'"))?;
            let rows = stmt.query_map([], video_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Page through tracked videos, optionally filtered by status, ordered by
    /// registration time.
    pub fn list(
        &self,
        status: Option<VideoStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TrackedVideo>, StoreError> {
        self.db.with_conn(|conn| {
            let rows = match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLUMNS} FROM videos WHERE status = ?1
                         ORDER BY tracked_since, video_id LIMIT ?2 OFFSET ?3"
                    ))?;
                    let rows = stmt.query_map(params![status.to_string(), limit, offset], video_from_row)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLUMNS} FROM videos
                         ORDER BY tracked_since, video_id LIMIT ?1 OFFSET ?2"
                    ))?;
                    let rows = stmt.query_map(params![limit, offset], video_from_row)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
    }

    /// Record the outcome of an existence check. Idempotent; fails only when
    /// the video is not tracked.
    pub fn set_status(
        &self,
        video_id: &str,
        status: VideoStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE videos SET status = ?2, status_checked_at = ?3 WHERE video_id = ?1",
                params![video_id, status.to_string(), to_unix(checked_at)],
            )?;
            if changed == 0 {
                return Err(StoreError::VideoNotFound(video_id.to_owned()));
            }
            Ok(())
        })
    }

    /// Stamp a successful metrics collection.
    pub fn mark_collected(&self, video_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE videos SET last_collected_at = ?2 WHERE video_id = ?1",
                params![video_id, to_unix(at)],
            )?;
            if changed == 0 {
                return Err(StoreError::VideoNotFound(video_id.to_owned()));
            }
            Ok(())
        })
    }

    /// Stop tracking a video, optionally deleting its snapshot history in the
    /// same transaction.
    pub fn remove(&self, video_id: &str, purge_history: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            if purge_history {
                tx.execute("DELETE FROM snapshots WHERE video_id = ?1", [video_id])?;
            }
            let changed = tx.execute("DELETE FROM videos WHERE video_id = ?1", [video_id])?;
            if changed == 0 {
                return Err(StoreError::VideoNotFound(video_id.to_owned()));
            }
            tx.commit()?;
            info!(video_id, purge_history, "removed video from tracking");
            Ok(())
        })
    }
}

const COLUMNS: &str = "video_id, title, channel_id, channel_title, published_at, \
                       tracked_since, last_collected_at, status, status_checked_at";

fn video_from_row(row: &Row<'_>) -> rusqlite::Result<TrackedVideo> {
    let status: String = row.get(7)?;
    let status = VideoStatus::from_str(&status).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown video status {status:?}").into(),
        )
    })?;
    Ok(TrackedVideo {
        video_id: row.get(0)?,
        title: row.get(1)?,
        channel_id: row.get(2)?,
        channel_title: row.get(3)?,
        published_at: row.get::<_, Option<i64>>(4)?.map(from_unix),
        tracked_since: from_unix(row.get(5)?),
        last_collected_at: row.get::<_, Option<i64>>(6)?.map(from_unix),
        status,
        status_checked_at: row.get::<_, Option<i64>>(8)?.map(from_unix),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone as _;
    use pretty_assertions::assert_eq;

    fn registry() -> VideoRegistry {
        VideoRegistry::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn details(title: &str) -> VideoDetails {
        VideoDetails {
            title: title.to_owned(),
            channel_id: "UC123".to_owned(),
            channel_title: "Channel".to_owned(),
            published_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let registry = registry();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let video = registry.register("abc123", &details("First"), now).unwrap();
        assert_eq!(video.video_id, "abc123");
        assert_eq!(video.title, "First");
        assert_eq!(video.status, VideoStatus::Active);
        assert_eq!(video.tracked_since, now);
        assert_eq!(video.last_collected_at, None);
        assert_eq!(registry.get("abc123").unwrap(), video);
    }

    #[test]
    fn duplicate_registration_updates_in_place() {
        let registry = registry();
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::hours(2);
        registry.register("abc123", &details("Old title"), t0).unwrap();
        registry
            .set_status("abc123", VideoStatus::Unavailable, t0)
            .unwrap();

        let video = registry.register("abc123", &details("New title"), t1).unwrap();
        // One row, refreshed metadata, status reset, original tracked_since.
        assert_eq!(registry.list(None, 10, 0).unwrap().len(), 1);
        assert_eq!(video.title, "New title");
        assert_eq!(video.status, VideoStatus::Active);
        assert_eq!(video.tracked_since, t0);
    }

    #[test]
    fn get_unknown_video_is_not_found() {
        let err = registry().get("missing").unwrap_err();
        assert!(matches!(err, StoreError::VideoNotFound(id) if id == "missing"));
    }

    #[test]
    fn set_status_requires_registration() {
        let registry = registry();
        let err = registry
            .set_status("missing", VideoStatus::Unavailable, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::VideoNotFound(_)));
    }

    #[test]
    fn unavailable_videos_drop_out_of_active_listing() {
        let registry = registry();
        let now = Utc::now();
        registry.register("a", &details("A"), now).unwrap();
        registry.register("b", &details("B"), now).unwrap();
        registry.set_status("a", VideoStatus::Unavailable, now).unwrap();

        let active = registry.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].video_id, "b");
    }

    #[test]
    fn list_paginates_and_filters() {
        let registry = registry();
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            registry
                .register(id, &details(id), t0 + chrono::Duration::minutes(i as i64))
                .unwrap();
        }
        registry.set_status("d", VideoStatus::Unavailable, t0).unwrap();

        let page: Vec<_> = registry
            .list(None, 2, 1)
            .unwrap()
            .into_iter()
            .map(|v| v.video_id)
            .collect();
        assert_eq!(page, vec!["b", "c"]);

        let unavailable = registry.list(Some(VideoStatus::Unavailable), 10, 0).unwrap();
        assert_eq!(unavailable.len(), 1);
        assert_eq!(unavailable[0].video_id, "d");
    }

    #[test]
    fn remove_unknown_video_is_not_found() {
        let err = registry().remove("missing", false).unwrap_err();
        assert!(matches!(err, StoreError::VideoNotFound(_)));
    }

    #[test]
    fn survives_reopen_on_disk() {
        let dir = temp_dir::TempDir::new().unwrap();
        let path = dir.path().join("metrics.db");
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        {
            let registry = VideoRegistry::new(Arc::new(Database::open(&path).unwrap()));
            registry.register("abc123", &details("Persisted"), now).unwrap();
        }
        let registry = VideoRegistry::new(Arc::new(Database::open(&path).unwrap()));
        let video = registry.get("abc123").unwrap();
        assert_eq!(video.title, "Persisted");
        assert_eq!(video.tracked_since, now);
    }
}
