use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// JSON logs filtered by `RUST_LOG`, defaulting to `info`. Safe to call more
/// than once; later calls keep the first subscriber.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,stochastic_programs=info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .is_ok();
    if installed {
        debug!("tracing initialized");
    }
}

/// Human-readable logs captured by the test harness
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
        init_tracing();
        tracing::info!(check = true, "still logging");
    }
}
