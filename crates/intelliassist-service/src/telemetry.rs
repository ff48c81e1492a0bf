use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::settings::LoggingSettings;
use crate::{Error, Result};

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .map_err(|e| Error::Telemetry(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if settings.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| Error::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_error() {
        let settings = LoggingSettings::default();
        let _ = init_tracing(&settings);
        assert!(matches!(init_tracing(&settings), Err(Error::Telemetry(_))));
    }

    #[test]
    fn test_bad_filter_is_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let settings = LoggingSettings {
            filter: "intelliassist=loud".to_string(),
            json: false,
        };
        assert!(matches!(init_tracing(&settings), Err(Error::Telemetry(_))));
    }
}
