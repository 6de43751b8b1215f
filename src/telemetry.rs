//! Tracing setup
//!
//! The library itself only emits `tracing` events. Binaries and tests that
//! want them on stdout call [`init_tracing`] once at startup.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install a global fmt subscriber
///
/// `RUST_LOG` wins over `config.level` when set. Returns `false` if a global
/// subscriber was already installed, which makes repeated calls harmless.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
