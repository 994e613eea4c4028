//! Tracing setup for embedding applications.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to set tracing subscriber: {0}")]
    AlreadyInitialized(String),
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `level` (e.g. "info") is used,
/// falling back to INFO when it does not parse.
pub fn init_tracing(level: &str) -> Result<(), TelemetryError> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let _ = init_tracing("debug");
        assert!(matches!(
            init_tracing("info"),
            Err(TelemetryError::AlreadyInitialized(_))
        ));
    }
}
