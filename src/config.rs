use crate::errors::ConfigError;
use crate::stats::WindowPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Binance,
    Bybit,
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "bybit" => Ok(Self::Bybit),
            other => Err(format!("unknown exchange {other}, expected binance or bybit")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub exchange: ExchangeKind,
    pub cache_path: PathBuf,
    pub api_port: u16,
    pub refresh_interval_mins: u64,
    pub cold_start_limit: usize,
    pub refresh_concurrency: usize,
    pub window_policy: WindowPolicy,
    /// Restricts the tracked instruments when non-empty.
    pub instruments: Vec<String>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeKind::Binance,
            cache_path: PathBuf::from("./data/perp_data.csv"),
            api_port: 3000,
            refresh_interval_mins: 15,
            cold_start_limit: 150,
            refresh_concurrency: 4,
            window_policy: WindowPolicy::Omit,
            instruments: Vec::new(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let exchange = parse_or(&lookup, "EXCHANGE", defaults.exchange)?;
        let cache_path = lookup("CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_path);
        let api_port = parse_or(&lookup, "API_PORT", defaults.api_port)?;
        let refresh_interval_mins =
            parse_or(&lookup, "REFRESH_INTERVAL_MINS", defaults.refresh_interval_mins)?;
        let cold_start_limit = parse_or(&lookup, "COLD_START_LIMIT", defaults.cold_start_limit)?;
        let refresh_concurrency =
            parse_or(&lookup, "REFRESH_CONCURRENCY", defaults.refresh_concurrency)?;
        let window_policy = parse_or(&lookup, "WINDOW_POLICY", defaults.window_policy)?;

        if refresh_interval_mins == 0 {
            return Err(invalid("REFRESH_INTERVAL_MINS", "0", "must be at least 1"));
        }
        if cold_start_limit == 0 {
            return Err(invalid("COLD_START_LIMIT", "0", "must be at least 1"));
        }
        if refresh_concurrency == 0 {
            return Err(invalid("REFRESH_CONCURRENCY", "0", "must be at least 1"));
        }

        // empty means "every perpetual the venue lists"
        let instruments = lookup("INSTRUMENTS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(invalid("LOG_FORMAT", other, "expected text or json")),
        };

        Ok(Self {
            exchange,
            cache_path,
            api_port,
            refresh_interval_mins,
            cold_start_limit,
            refresh_concurrency,
            window_policy,
            instruments,
            log_format,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
