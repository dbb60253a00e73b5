use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes tracing for embedders that have no subscriber of their
/// own. Safe to call more than once.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "messenger_core=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
