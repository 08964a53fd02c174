//! Logging setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (for example `"iceberg=info"`).
pub fn init(default_filter: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()?;
    Ok(())
}
