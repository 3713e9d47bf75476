use chrono::Duration;
use std::str::FromStr;
use std::time::Duration as StdDuration;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_HOST: [u8; 4] = [127, 0, 0, 1];
const DEFAULT_PORT: u16 = 9500;
const DEFAULT_WINDOW_MINUTES: i64 = 30;
const DEFAULT_PAGE_LIMIT: i64 = 10;
const DEFAULT_MAX_PAGE_LIMIT: i64 = 100;
const DEFAULT_PAGE: i64 = 1;
const DEFAULT_KEEP_ALIVE_SECONDS: u64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Aggregation and pagination knobs shared by the engine and the service.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub aggregation_window: Duration,
    pub default_limit: i64,
    pub max_limit: i64,
    pub default_page: i64,
    pub stream_keep_alive: StdDuration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            aggregation_window: Duration::minutes(DEFAULT_WINDOW_MINUTES),
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: DEFAULT_MAX_PAGE_LIMIT,
            default_page: DEFAULT_PAGE,
            stream_keep_alive: StdDuration::from_secs(DEFAULT_KEEP_ALIVE_SECONDS),
        }
    }
}

/// Process configuration, read from the environment after `.env` is loaded
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub max_connections: u32,
    pub host: [u8; 4],
    pub port: u16,
    pub notifications: NotificationConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup, so tests don't have to touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = match non_empty("SERVER_HOST") {
            Some(raw) => parse_host(&raw)?,
            None => DEFAULT_HOST,
        };

        let window_minutes: i64 = parse_or(
            &lookup,
            "NOTIFICATION_WINDOW_MINUTES",
            DEFAULT_WINDOW_MINUTES,
        )?;
        if window_minutes <= 0 {
            return Err(ConfigError::Invalid {
                key: "NOTIFICATION_WINDOW_MINUTES",
                value: window_minutes.to_string(),
            });
        }

        let default_limit: i64 =
            parse_or(&lookup, "NOTIFICATION_DEFAULT_LIMIT", DEFAULT_PAGE_LIMIT)?;
        let max_limit: i64 = parse_or(&lookup, "NOTIFICATION_MAX_LIMIT", DEFAULT_MAX_PAGE_LIMIT)?;
        if default_limit <= 0 || max_limit < default_limit {
            return Err(ConfigError::Invalid {
                key: "NOTIFICATION_DEFAULT_LIMIT",
                value: default_limit.to_string(),
            });
        }

        let default_page: i64 = parse_or(&lookup, "NOTIFICATION_DEFAULT_PAGE", DEFAULT_PAGE)?;
        let keep_alive_seconds: u64 = parse_or(
            &lookup,
            "STREAM_KEEP_ALIVE_SECONDS",
            DEFAULT_KEEP_ALIVE_SECONDS,
        )?;
        if default_page < 1 {
            return Err(ConfigError::Invalid {
                key: "NOTIFICATION_DEFAULT_PAGE",
                value: default_page.to_string(),
            });
        }

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            redis_url: non_empty("REDIS_URL"),
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            host,
            port: parse_or(&lookup, "SERVER_PORT", DEFAULT_PORT)?,
            notifications: NotificationConfig {
                aggregation_window: Duration::minutes(window_minutes),
                default_limit,
                max_limit,
                default_page,
                stream_keep_alive: StdDuration::from_secs(keep_alive_seconds),
            },
        })
    }

    /// The database URL is mandatory outside of the in-memory development mode.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
        }),
        None => Ok(default),
    }
}

fn parse_host(raw: &str) -> Result<[u8; 4], ConfigError> {
    let addr: std::net::Ipv4Addr = raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key: "SERVER_HOST",
        value: raw.to_string(),
    })?;
    Ok(addr.octets())
}
