#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The video has no registry row. Returned by registry operations that
    /// require an existing entry.
    #[error("video {0} is not tracked")]
    VideoNotFound(String),

    /// A snapshot was offered for a video that was never registered.
    #[error("video {0} is not registered, refusing to record snapshots for it")]
    UnknownVideo(String),

    /// Bucket widths below one second cannot be expressed in the store's
    /// second-granularity timestamps.
    #[error("bucket width must be at least one second")]
    InvalidBucketWidth,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
