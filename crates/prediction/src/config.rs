//! Configuration management

use crate::errors::PredictionError;
use crate::types::PredictionConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use url::Url;

/// Configuration manager: environment detection, optional TOML file,
/// environment variable overrides.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: PredictionConfig,
    environment: Environment,
    logging: LoggingConfig,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
    Testing,
}

impl Environment {
    fn config_path(self) -> &'static str {
        match self {
            Environment::Production => "config/production.toml",
            Environment::Staging => "config/staging.toml",
            Environment::Testing => "config/testing.toml",
            Environment::Development => "config/development.toml",
        }
    }
}

impl ConfigManager {
    /// Detect the environment, load its file if present, apply overrides.
    pub fn new() -> Result<Self, PredictionError> {
        let environment = Self::detect_environment()?;
        let path = environment.config_path();
        let file = if Path::new(path).exists() {
            Self::read_file(path)?
        } else {
            ConfigFile::default()
        };
        Self::assemble(file, environment)
    }

    /// Load an explicit configuration file, then apply overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PredictionError> {
        let environment = Self::detect_environment()?;
        let file = Self::read_file(path)?;
        Self::assemble(file, environment)
    }

    pub fn get_config(&self) -> &PredictionConfig {
        &self.config
    }

    pub fn get_environment(&self) -> Environment {
        self.environment
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &str {
        &self.logging.level
    }

    fn assemble(file: ConfigFile, environment: Environment) -> Result<Self, PredictionError> {
        let mut config = file.prediction;
        Self::apply_overrides(&mut config, |key| env::var(key).ok());
        validate(&config)?;

        Ok(Self {
            config,
            environment,
            logging: file.logging,
        })
    }

    fn detect_environment() -> Result<Environment, PredictionError> {
        let env_str = env::var("READYTIME_ENV")
            .or_else(|_| env::var("ENVIRONMENT"))
            .unwrap_or_else(|_| "development".to_string());
        parse_environment(&env_str)
    }

    fn read_file(path: impl AsRef<Path>) -> Result<ConfigFile, PredictionError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PredictionError::Io(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| PredictionError::Config(format!("Failed to parse config file: {e}")))
    }

    /// Applies `PREDICTION_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(config: &mut PredictionConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = non_empty("PREDICTION_API_URL") {
            config.api.endpoint = value;
        }

        if let Some(parsed) = non_empty("PREDICTION_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.api.timeout_seconds = parsed;
        }

        if let Some(parsed) = non_empty("PREDICTION_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            config.api.max_retries = parsed;
        }

        if let Some(value) = non_empty("PREDICTION_WS_URL") {
            config.stream.endpoint = value;
        }

        if let Some(parsed) = non_empty("PREDICTION_WS_MAX_BACKOFF_MS").and_then(|v| v.parse().ok())
        {
            config.stream.max_backoff_ms = parsed;
        }

        if let Some(parsed) = non_empty("PREDICTION_WS_MAX_RECONNECTS").and_then(|v| v.parse().ok())
        {
            config.stream.max_reconnect_attempts = parsed;
        }

        if let Some(parsed) =
            non_empty("PREDICTION_WS_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok())
        {
            config.stream.connect_timeout_ms = parsed;
        }
    }
}

fn parse_environment(value: &str) -> Result<Environment, PredictionError> {
    match value.trim().to_lowercase().as_str() {
        "production" | "prod" => Ok(Environment::Production),
        "staging" | "stage" => Ok(Environment::Staging),
        "testing" | "test" => Ok(Environment::Testing),
        "development" | "dev" => Ok(Environment::Development),
        other => Err(PredictionError::Config(format!(
            "Unknown environment: {other}"
        ))),
    }
}

/// Checks both endpoints parse and can carry path segments.
pub fn validate(config: &PredictionConfig) -> Result<(), PredictionError> {
    let api = Url::parse(config.api.endpoint.trim())?;
    join_segments(&api, &["predict"])?;
    let stream = Url::parse(config.stream.endpoint.trim())?;
    join_segments(&stream, &["predictions"])?;
    if config.stream.initial_backoff_ms == 0 {
        return Err(PredictionError::Config(
            "stream.initial_backoff_ms must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Appends path segments to `base`, percent-encoding each one.
pub(crate) fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, PredictionError> {
    let mut url = base.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            PredictionError::Config(format!("endpoint {base} cannot carry a path"))
        })?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(flatten)]
    prediction: PredictionConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = PredictionConfig::default();
        ConfigManager::apply_overrides(
            &mut config,
            lookup(&[
                ("PREDICTION_API_URL", " http://ml:9000 "),
                ("PREDICTION_TIMEOUT_SECS", "3"),
                ("PREDICTION_MAX_RETRIES", "1"),
                ("PREDICTION_WS_URL", "wss://push.example.com"),
                ("PREDICTION_WS_MAX_RECONNECTS", "2"),
                ("PREDICTION_WS_CONNECT_TIMEOUT_MS", "2500"),
            ]),
        );

        assert_eq!(config.api.endpoint, "http://ml:9000");
        assert_eq!(config.api.timeout_seconds, 3);
        assert_eq!(config.api.max_retries, 1);
        assert_eq!(config.stream.endpoint, "wss://push.example.com");
        assert_eq!(config.stream.max_reconnect_attempts, 2);
        assert_eq!(config.stream.connect_timeout_ms, 2500);
        assert_eq!(config.stream.max_backoff_ms, 30_000);
    }

    #[test]
    fn blank_or_unparseable_overrides_are_ignored() {
        let mut config = PredictionConfig::default();
        ConfigManager::apply_overrides(
            &mut config,
            lookup(&[("PREDICTION_API_URL", "   "), ("PREDICTION_TIMEOUT_SECS", "soon")]),
        );
        assert_eq!(config, PredictionConfig::default());
    }

    #[test]
    fn environment_names_parse() {
        assert_eq!(parse_environment("PROD").unwrap(), Environment::Production);
        assert_eq!(parse_environment("test").unwrap(), Environment::Testing);
        assert!(parse_environment("moon").is_err());
    }

    #[test]
    fn validate_rejects_unusable_endpoints() {
        let mut config = PredictionConfig::default();
        assert!(validate(&config).is_ok());

        config.stream.endpoint = "mailto:ops@example.com".to_string();
        assert!(matches!(validate(&config), Err(PredictionError::Config(_))));
    }

    #[test]
    fn file_sections_are_optional() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content = r#"
[api]
endpoint = "http://ml.internal:8000"
timeout_seconds = 5

[logging]
level = "debug"
"#;
        write!(file, "{content}").unwrap();

        let parsed = ConfigManager::read_file(file.path()).unwrap();
        assert_eq!(parsed.prediction.api.endpoint, "http://ml.internal:8000");
        assert_eq!(parsed.prediction.api.timeout_seconds, 5);
        assert_eq!(parsed.prediction.api.max_retries, 0);
        assert_eq!(parsed.prediction.stream, crate::types::StreamConfig::default());
        assert_eq!(parsed.logging.level, "debug");
    }

    #[test]
    fn join_segments_escapes_vendor_ids() {
        let base = Url::parse("ws://localhost:5000").unwrap();
        let url = join_segments(&base, &["predictions", "north wing/2"]).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:5000/predictions/north%20wing%2F2");
    }
}
