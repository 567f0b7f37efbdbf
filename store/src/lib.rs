//! Durable state for the metrics engine: the video registry and the
//! append-only snapshot store, both backed by a single SQLite database.
//!
//! Two tables:
//!
//! - **`videos`**: one row per tracked video, keyed by video ID. Owned by
//!   [`VideoRegistry`].
//! - **`snapshots`**: time-ordered counter readings keyed by
//!   `(video_id, captured_at)`. Owned by [`SnapshotStore`]. Rows are never
//!   updated; the only bulk mutation is retention pruning.
//!
//! All access goes through one connection behind a mutex, so writes for the
//! same video are serialized by construction.

mod db;
mod error;
mod registry;
mod snapshots;

pub use db::Database;
pub use error::StoreError;
pub use registry::{
    TrackedVideo,
    VideoDetails,
    VideoRegistry,
    VideoStatus,
};
pub use snapshots::{
    CounterSet,
    MetricSnapshot,
    SnapshotStore,
};
