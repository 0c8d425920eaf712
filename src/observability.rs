use tracing_subscriber::{
    fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Installs the global subscriber. `RUST_LOG` wins over `default_filter`.
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(ChronoLocal::rfc_3339())
                .with_thread_ids(true)
                .with_target(true),
        )
        .try_init();
}
