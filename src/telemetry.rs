use tracing_subscriber::{EnvFilter, fmt};

/// Install the crate's tracing subscriber. Intended for the embedding
/// application's startup path; harmless if a subscriber is already set.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,listbridge=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
