use clap::Parser;
use color_eyre::Result;
use eyre::Context as _;
use std::sync::Arc;
use tracing::{
    error,
    info,
};
use vidwatch::{
    logging::log_init,
    Args,
    MetricsService,
    Settings,
};
use vidwatch_collector::Scheduler;
use vidwatch_store::{
    Database,
    SnapshotStore,
    VideoRegistry,
};
use vidwatch_upstream::{
    ClientConfig,
    MetricsSource,
    QuotaTracker,
    UpstreamClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    log_init(args.verbose);
    color_eyre::install()?;

    let settings = Settings::load(&args).wrap_err("Failed to load configuration")?;
    if settings.api_key.is_empty() {
        eyre::bail!("no upstream API key configured; set VIDWATCH_API_KEY or api_key in config.yaml");
    }

    let database = if args.ephemeral {
        info!("running with an in-memory database, nothing will be persisted");
        Database::open_in_memory()?
    } else {
        let path = settings.database_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create data directory at {parent:?}"))?;
        }
        info!(?path, "opening metrics database");
        Database::open(&path)?
    };
    let database = Arc::new(database);
    let registry = VideoRegistry::new(database.clone());
    let snapshots = SnapshotStore::new(database);

    let quota = Arc::new(QuotaTracker::new());
    let client: Arc<dyn MetricsSource> = Arc::new(UpstreamClient::new(
        ClientConfig::new(settings.api_base_url.clone(), settings.api_key.clone()),
        quota.clone(),
    ));

    let (scheduler, scheduler_join) = Scheduler::spawn(
        registry.clone(),
        snapshots.clone(),
        client.clone(),
        quota,
        settings.scheduler_config()?,
    );

    let service = MetricsService::new(registry, snapshots, client, scheduler.clone());
    for video_id in &args.track {
        match service.register_video(video_id).await {
            Ok(video) => info!(video_id, title = %video.title, "tracking video"),
            Err(error) => error!(video_id, %error, "failed to register video"),
        }
    }

    shutdown_signal().await?;
    info!("shutdown signal received");
    scheduler.shutdown();
    scheduler_join.await?;
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{
            signal,
            SignalKind,
        };
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
