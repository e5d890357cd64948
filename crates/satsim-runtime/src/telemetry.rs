//! Telemetry and logging initialization.
//!
//! Sets up structured logging with tracing and optional JSON output.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging. Fails if a global subscriber is already installed.
pub fn init_telemetry(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.level)?;

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_telemetry_twice() {
        let config = LoggingConfig::default();
        let _ = init_telemetry(&config);
        // A global subscriber is already installed by now.
        assert!(init_telemetry(&config).is_err());
    }

    #[test]
    fn test_invalid_filter() {
        let config = LoggingConfig {
            level: "satsim=loud".to_string(),
            json: false,
        };
        assert!(init_telemetry(&config).is_err());
    }
}
