use clap::Parser;
use std::path::PathBuf;

/// Video performance metrics daemon
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// API key for the upstream metrics service.
    #[clap(long, env = "VIDWATCH_API_KEY")]
    pub api_key: Option<String>,

    /// Base URL of the upstream metrics API.
    #[clap(long, env = "VIDWATCH_API_BASE_URL")]
    pub api_base_url: Option<String>,

    /// Path to the SQLite database. Defaults to the platform data directory.
    #[clap(long, env = "VIDWATCH_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Keep all state in memory; nothing is persisted across restarts.
    #[clap(long)]
    pub ephemeral: bool,

    /// Interval between metrics sweeps (e.g. "1h", "15m").
    #[clap(long)]
    pub metrics_interval: Option<String>,

    /// Interval between liveness sweeps (e.g. "24h").
    #[clap(long)]
    pub liveness_interval: Option<String>,

    /// Drop snapshots older than this (e.g. "90d"). Unset keeps everything.
    #[clap(long)]
    pub retention: Option<String>,

    /// Number of concurrent collection workers.
    #[clap(long)]
    pub workers: Option<usize>,

    /// Video IDs to register at startup. May be given multiple times.
    #[clap(long = "track")]
    pub track: Vec<String>,

    /// Enable verbose logging.
    #[clap(short, long)]
    pub verbose: bool,
}
