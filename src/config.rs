use std::{env, time::Duration};

use redis::IntoConnectionInfo;

use crate::error::SubscriberError;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

pub struct Config {
    pub redis_url: String,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub metrics_addr: Option<String>,
    pub stats_interval: Option<Duration>,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(10),
            metrics_addr: None,
            stats_interval: Some(Duration::from_secs(60)),
            log_json: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, SubscriberError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, SubscriberError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let redis_url = lookup("REDIS_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.redis_url);
        redis_url
            .as_str()
            .into_connection_info()
            .map_err(|e| SubscriberError::Config(format!("REDIS_URL {redis_url:?}: {e}")))?;

        let connect_timeout = parse_secs(lookup("CONNECT_TIMEOUT_SECS").as_deref())
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.connect_timeout);

        let response_timeout = parse_secs(lookup("RESPONSE_TIMEOUT_SECS").as_deref())
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.response_timeout);

        let metrics_addr = lookup("METRICS_ADDR")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let stats_interval = match parse_secs(lookup("STATS_INTERVAL_SECS").as_deref()) {
            Some(d) if d.is_zero() => None,
            Some(d) => Some(d),
            None => defaults.stats_interval,
        };

        let log_json = parse_bool(lookup("LOG_JSON").as_deref());

        Ok(Config {
            redis_url,
            connect_timeout,
            response_timeout,
            metrics_addr,
            stats_interval,
            log_json,
        })
    }
}

fn parse_secs(src: Option<&str>) -> Option<Duration> {
    src?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn parse_bool(src: Option<&str>) -> bool {
    match src.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref s) if s == "1" || s == "true" || s == "yes" || s == "on" => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, SubscriberError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.response_timeout, Duration::from_secs(10));
        assert!(cfg.metrics_addr.is_none());
        assert_eq!(cfg.stats_interval, Some(Duration::from_secs(60)));
        assert!(!cfg.log_json);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = from_pairs(&[
            ("REDIS_URL", "redis://cache:6380/2"),
            ("CONNECT_TIMEOUT_SECS", "3"),
            ("RESPONSE_TIMEOUT_SECS", "oops"),
            ("METRICS_ADDR", "0.0.0.0:9898"),
            ("STATS_INTERVAL_SECS", "0"),
            ("LOG_JSON", "Yes"),
        ])
        .unwrap();
        assert_eq!(cfg.redis_url, "redis://cache:6380/2");
        assert_eq!(cfg.connect_timeout, Duration::from_secs(3));
        assert_eq!(cfg.response_timeout, Duration::from_secs(10));
        assert_eq!(cfg.metrics_addr.as_deref(), Some("0.0.0.0:9898"));
        assert_eq!(cfg.stats_interval, None);
        assert!(cfg.log_json);
    }

    #[test]
    fn blank_url_uses_default() {
        let cfg = from_pairs(&[("REDIS_URL", "  ")]).unwrap();
        assert_eq!(cfg.redis_url, DEFAULT_REDIS_URL);
    }

    #[test]
    fn invalid_url_is_config_error() {
        let err = from_pairs(&[("REDIS_URL", "http://not-redis")]).err().unwrap();
        assert!(matches!(err, SubscriberError::Config(_)));
    }
}
