use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Runtime settings, read from `DEVBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Compact the WAL once this many appends have accumulated.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            data_dir: lookup("DEVBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parse(&lookup, "DEVBOOK_METRICS_PORT")?,
            compact_threshold: parse(&lookup, "DEVBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parse_interval(&lookup, "DEVBOOK_COMPACT_INTERVAL_SECS")?
                .unwrap_or(defaults.compact_interval),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// Seconds, strictly positive: a zero period cannot drive a timer.
fn parse_interval(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match parse::<u64>(lookup, var)? {
        Some(0) => Err(ConfigError::Invalid {
            var,
            value: lookup(var).unwrap_or_default(),
        }),
        secs => Ok(secs.map(Duration::from_secs)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.wal_path(), PathBuf::from("./data/bookings.wal"));
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("DEVBOOK_DATA_DIR", "/var/lib/devbook"),
            ("DEVBOOK_METRICS_PORT", "9100"),
            ("DEVBOOK_COMPACT_THRESHOLD", "50"),
            ("DEVBOOK_COMPACT_INTERVAL_SECS", " 5 "),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/devbook"));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.compact_interval, Duration::from_secs(5));
    }

    #[test]
    fn zero_compact_interval_is_rejected() {
        let err = Config::from_lookup(lookup(&[("DEVBOOK_COMPACT_INTERVAL_SECS", "0")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "DEVBOOK_COMPACT_INTERVAL_SECS",
                value: "0".into()
            }
        );
    }

    #[test]
    fn malformed_number_is_an_error() {
        let err = Config::from_lookup(lookup(&[("DEVBOOK_METRICS_PORT", "ninety")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "DEVBOOK_METRICS_PORT",
                value: "ninety".into()
            }
        );
    }
}
