use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use thiserror::Error;

use crate::kafka::KafkaConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] envconfig::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "HTTP_ADDR", default = "0.0.0.0:8080")]
    pub http_addr: String,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(from = "KAFKA_SOURCE_TOPIC", default = "raw-weather-reports")]
    pub source_topic: String,

    #[envconfig(from = "KAFKA_SINK_TOPIC", default = "transformed-weather-data")]
    pub sink_topic: String,

    #[envconfig(from = "KAFKA_GROUP_ID", default = "storm-etl")]
    pub group_id: String,

    #[envconfig(from = "KAFKA_OFFSET_RESET", default = "earliest")]
    pub offset_reset: String,

    // Upper bound on a single batch extract.
    #[envconfig(from = "BATCH_SIZE", default = "50")]
    pub batch_size: usize,

    // How long the extractor waits for a full batch before flushing a
    // partial one.
    #[envconfig(from = "BATCH_FLUSH_INTERVAL", default = "500ms")]
    pub batch_flush_interval: DurationSetting,

    #[envconfig(from = "SHUTDOWN_TIMEOUT", default = "10s")]
    pub shutdown_timeout: DurationSetting,

    // Geocoding defaults to on when a token is present; MAPBOX_ENABLED
    // overrides in either direction.
    #[envconfig(from = "MAPBOX_ENABLED")]
    pub mapbox_enabled: Option<bool>,

    #[envconfig(from = "MAPBOX_TOKEN", default = "")]
    pub mapbox_token: String,

    #[envconfig(from = "MAPBOX_TIMEOUT", default = "5s")]
    pub mapbox_timeout: DurationSetting,

    #[envconfig(from = "MAPBOX_CACHE_SIZE", default = "1000")]
    pub mapbox_cache_size: usize,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, ConfigError> {
        let config = Self::init_from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn geocoding_enabled(&self) -> bool {
        self.mapbox_enabled.unwrap_or(!self.mapbox_token.is_empty())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self
            .kafka
            .brokers
            .split(',')
            .all(|broker| broker.trim().is_empty())
        {
            return Err(ConfigError::Invalid("KAFKA_BROKERS is required".into()));
        }
        if self.source_topic.is_empty() {
            return Err(ConfigError::Invalid("KAFKA_SOURCE_TOPIC is required".into()));
        }
        if self.sink_topic.is_empty() {
            return Err(ConfigError::Invalid("KAFKA_SINK_TOPIC is required".into()));
        }
        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::Invalid(format!(
                "BATCH_SIZE must be within [1, 1000], got {}",
                self.batch_size
            )));
        }
        if self.shutdown_timeout.0.is_zero() {
            return Err(ConfigError::Invalid("SHUTDOWN_TIMEOUT must be positive".into()));
        }
        if self.mapbox_cache_size == 0 {
            return Err(ConfigError::Invalid("MAPBOX_CACHE_SIZE must be positive".into()));
        }
        if self.geocoding_enabled() && self.mapbox_token.is_empty() {
            return Err(ConfigError::Invalid(
                "MAPBOX_ENABLED is set but MAPBOX_TOKEN is empty".into(),
            ));
        }
        Ok(())
    }
}

/// Duration in Go-style notation: `500ms`, `5s`, `1m`, `2h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationSetting(pub Duration);

impl FromStr for DurationSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unit_start = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration {s:?}"))?;
        let (digits, unit) = s.split_at(unit_start);
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration {s:?}"))?;
        let duration = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(format!("unsupported duration unit {unit:?}")),
        };
        Ok(Self(duration))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = Config::init_from_hashmap(&map)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn duration_setting_parses_go_notation() {
        assert_eq!(
            "500ms".parse::<DurationSetting>().unwrap().0,
            Duration::from_millis(500)
        );
        assert_eq!(
            "5s".parse::<DurationSetting>().unwrap().0,
            Duration::from_secs(5)
        );
        assert_eq!(
            "2m".parse::<DurationSetting>().unwrap().0,
            Duration::from_secs(120)
        );
        assert_eq!(
            "1h".parse::<DurationSetting>().unwrap().0,
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn duration_setting_rejects_garbage() {
        assert!("".parse::<DurationSetting>().is_err());
        assert!("500".parse::<DurationSetting>().is_err());
        assert!("ms".parse::<DurationSetting>().is_err());
        assert!("5x".parse::<DurationSetting>().is_err());
        assert!("-5s".parse::<DurationSetting>().is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_flush_interval.0, Duration::from_millis(500));
        assert_eq!(config.shutdown_timeout.0, Duration::from_secs(10));
        assert_eq!(config.source_topic, "raw-weather-reports");
        assert_eq!(config.sink_topic, "transformed-weather-data");
        assert!(!config.geocoding_enabled());
    }

    #[test]
    fn batch_size_bounds_are_enforced() {
        assert!(config_from(&[("BATCH_SIZE", "0")]).is_err());
        assert!(config_from(&[("BATCH_SIZE", "1001")]).is_err());
        assert!(config_from(&[("BATCH_SIZE", "1000")]).is_ok());
        assert!(config_from(&[("BATCH_SIZE", "1")]).is_ok());
    }

    #[test]
    fn required_kafka_settings_cannot_be_blank() {
        assert!(config_from(&[("KAFKA_BROKERS", " , ,")]).is_err());
        assert!(config_from(&[("KAFKA_SOURCE_TOPIC", "")]).is_err());
        assert!(config_from(&[("KAFKA_SINK_TOPIC", "")]).is_err());
    }

    #[test]
    fn geocoding_enablement_follows_token_unless_overridden() {
        let with_token = config_from(&[("MAPBOX_TOKEN", "pk.test")]).unwrap();
        assert!(with_token.geocoding_enabled());

        let disabled =
            config_from(&[("MAPBOX_TOKEN", "pk.test"), ("MAPBOX_ENABLED", "false")]).unwrap();
        assert!(!disabled.geocoding_enabled());

        assert!(config_from(&[("MAPBOX_ENABLED", "true")]).is_err());
    }

    #[test]
    fn cache_size_must_be_positive() {
        assert!(config_from(&[("MAPBOX_CACHE_SIZE", "0")]).is_err());
    }
}
