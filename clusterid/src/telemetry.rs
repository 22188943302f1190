//! Tracing subscriber setup for binaries embedding the cluster id service.

use clusterid_core::{ClusterIdResult, ConfigError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILTER_ENV: &str = "CLUSTERID_LOG";
const LOG_FORMAT_ENV: &str = "CLUSTERID_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// Parse a format name; anything other than `json` is pretty.
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives (e.g. "info,clusterid=debug")
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl TelemetryConfig {
    /// Create TelemetryConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `CLUSTERID_LOG`: filter directives (default: info)
    /// - `CLUSTERID_LOG_FORMAT`: `json` or `pretty` (default: pretty)
    pub fn from_env() -> Self {
        let filter = std::env::var(LOG_FILTER_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());

        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .map(|s| LogFormat::from_name(&s))
            .unwrap_or_default();

        Self { filter, format }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup; a second call fails.
pub fn init_tracing(config: &TelemetryConfig) -> ClusterIdResult<()> {
    let env_filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "CLUSTERID_LOG".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            field: "tracing".to_string(),
            value: format!("{:?}", config.format),
            reason: format!("Failed to init subscriber: {}", e),
        })?;

    tracing::info!(filter = %config.filter, format = ?config.format, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterid_core::ClusterIdError;

    /// Telemetry variables overridden for one test, restored on drop.
    struct TelemetryEnv {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl TelemetryEnv {
        /// Override `CLUSTERID_LOG` and `CLUSTERID_LOG_FORMAT`; `None` unsets.
        fn with(filter: Option<&str>, format: Option<&str>) -> Self {
            let saved = [(LOG_FILTER_ENV, filter), (LOG_FORMAT_ENV, format)]
                .into_iter()
                .map(|(name, value)| {
                    let previous = std::env::var(name).ok();
                    match value {
                        Some(v) => std::env::set_var(name, v),
                        None => std::env::remove_var(name),
                    }
                    (name, previous)
                })
                .collect();
            Self { saved }
        }
    }

    impl Drop for TelemetryEnv {
        fn drop(&mut self) {
            for (name, previous) in self.saved.drain(..).rev() {
                match previous {
                    Some(v) => std::env::set_var(name, v),
                    None => std::env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_log_format_from_name() {
        assert_eq!(LogFormat::from_name("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_name(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::from_name("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_name("anything"), LogFormat::Pretty);
    }

    #[test]
    fn test_from_env() {
        {
            let _env = TelemetryEnv::with(Some("clusterid=debug"), Some("json"));
            let config = TelemetryConfig::from_env();
            assert_eq!(config.filter, "clusterid=debug");
            assert_eq!(config.format, LogFormat::Json);
        }

        let _env = TelemetryEnv::with(Some("  "), None);
        assert_eq!(TelemetryConfig::from_env(), TelemetryConfig::default());
    }

    #[test]
    fn test_invalid_filter_is_config_error() {
        let config = TelemetryConfig {
            filter: "clusterid=notalevel".to_string(),
            format: LogFormat::Pretty,
        };
        assert!(matches!(
            init_tracing(&config),
            Err(ClusterIdError::Config(ConfigError::InvalidValue { .. }))
        ));
    }
}
