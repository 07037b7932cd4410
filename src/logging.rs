use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;
use crate::error::{Result, SearchlinkError};

/// Installs a formatting subscriber. `RUST_LOG` wins over the configured
/// filter. Calling this again after a subscriber is installed is a no-op.
pub fn init(settings: &LoggingSettings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.filter)
            .map_err(|e| SearchlinkError::Config(format!("invalid log filter '{}': {e}", settings.filter)))?,
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    Ok(())
}
