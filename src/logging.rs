/// Plain stderr logging for the daemon. `RUST_LOG` still wins when set.
pub fn log_init(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!(
            "vidwatch={log_level},vidwatch_store={log_level},vidwatch_upstream={log_level},\
             vidwatch_collector={log_level},vidwatch_analytics={log_level}"
        )
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
