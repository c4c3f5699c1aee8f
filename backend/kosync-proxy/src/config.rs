/// Configuration management for the KoSync proxy
///
/// Every setting comes from the environment (a `.env` file is honoured) and
/// has a default, so an empty environment yields a working configuration.
use chrono::FixedOffset;
use db_pool::env_utils::{env_value, parse_env_flag, parse_env_strict};
use db_pool::DbConfig;
use std::time::Duration;

use crate::error::ConfigError;

pub const SERVICE_NAME: &str = "kosync-proxy";

const DEFAULT_UPSTREAM_URL: &str = "http://booklore:6060/api/kosync";
const MAX_DECIMAL_PLACES: u32 = 6;
const MAX_SWEEP_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub sessions: SessionConfig,
    pub logging: LoggingConfig,
    pub database: DbConfig,
    /// Create the `reading_sessions` table on startup when missing
    pub run_migrations: bool,
}

/// HTTP listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream KoSync server
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL every inbound path is appended to
    pub base_url: String,
    pub timeout: Duration,
}

/// Session tracking rules
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub timeout_minutes: u64,
    pub min_duration_seconds: u64,
    pub sweep_interval_seconds: u64,
    /// Drop sessions whose start and end progress are equal
    pub require_progress_change: bool,
    /// Decimal places kept when progress is stored as a percentage
    pub progress_decimal_places: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Offset used when session timestamps are rendered in logs
    pub display_timezone: FixedOffset,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 10,
            min_duration_seconds: 10,
            sweep_interval_seconds: 300,
            require_progress_change: false,
            progress_decimal_places: 1,
        }
    }
}

impl SessionConfig {
    /// Inactivity timeout, or `Invalid` when it does not fit a signed duration
    pub fn session_timeout(&self) -> Result<chrono::Duration, ConfigError> {
        self.timeout_minutes
            .checked_mul(60)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| ConfigError::Invalid {
                key: "SESSION_TIMEOUT_MINUTES",
                reason: format!("{} minutes is out of range", self.timeout_minutes),
            })
    }

    /// Minimum session length in seconds, as compared against session durations
    pub fn min_duration(&self) -> Result<i64, ConfigError> {
        i64::try_from(self.min_duration_seconds).map_err(|_| ConfigError::Invalid {
            key: "SESSION_MIN_DURATION_SECONDS",
            reason: format!("{} seconds is out of range", self.min_duration_seconds),
        })
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let server = ServerConfig {
            host: env_value("HTTP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_env_strict("HTTP_PORT")?.unwrap_or(5000),
        };

        let base_url = env_value("KOSYNC_UPSTREAM_URL")
            .or_else(|| env_value("BOOKLORE_KOSYNC_URL"))
            .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "KOSYNC_UPSTREAM_URL",
                reason: format!("{} is not an http(s) URL", base_url),
            });
        }
        let upstream = UpstreamConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(
                parse_env_strict("UPSTREAM_TIMEOUT_SECONDS")?.unwrap_or(10),
            ),
        };

        let sessions = Self::sessions_from_env()?;

        let logging = LoggingConfig {
            level: env_value("LOG_LEVEL")
                .unwrap_or_else(|| "info".to_string())
                .to_lowercase(),
            format: match env_value("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            display_timezone: parse_timezone(env_value("DISPLAY_TIMEZONE").as_deref())?,
        };

        Ok(Self {
            server,
            upstream,
            sessions,
            logging,
            database: DbConfig::from_env(SERVICE_NAME),
            run_migrations: parse_env_flag("RUN_MIGRATIONS")?.unwrap_or(true),
        })
    }

    fn sessions_from_env() -> Result<SessionConfig, ConfigError> {
        let defaults = SessionConfig::default();

        let timeout_minutes: u64 =
            parse_env_strict("SESSION_TIMEOUT_MINUTES")?.unwrap_or(defaults.timeout_minutes);
        if timeout_minutes == 0 {
            return Err(ConfigError::Invalid {
                key: "SESSION_TIMEOUT_MINUTES",
                reason: "must be at least 1".to_string(),
            });
        }

        let timeout = SessionConfig {
            timeout_minutes,
            ..defaults.clone()
        }
        .session_timeout()?;

        // Half the timeout bounds how long an idle session lingers past it
        let sweep_interval_seconds = parse_env_strict("SESSION_SWEEP_INTERVAL_SECONDS")?
            .unwrap_or(
                (timeout.num_seconds().unsigned_abs() / 2).clamp(1, MAX_SWEEP_INTERVAL_SECONDS),
            );
        if sweep_interval_seconds == 0 || sweep_interval_seconds > MAX_SWEEP_INTERVAL_SECONDS {
            return Err(ConfigError::Invalid {
                key: "SESSION_SWEEP_INTERVAL_SECONDS",
                reason: format!("must be between 1 and {}", MAX_SWEEP_INTERVAL_SECONDS),
            });
        }

        let progress_decimal_places: u32 = parse_env_strict("PROGRESS_DECIMAL_PLACES")?
            .unwrap_or(defaults.progress_decimal_places);
        if progress_decimal_places > MAX_DECIMAL_PLACES {
            return Err(ConfigError::Invalid {
                key: "PROGRESS_DECIMAL_PLACES",
                reason: format!("must be at most {}", MAX_DECIMAL_PLACES),
            });
        }

        let sessions = SessionConfig {
            timeout_minutes,
            min_duration_seconds: parse_env_strict("SESSION_MIN_DURATION_SECONDS")?
                .unwrap_or(defaults.min_duration_seconds),
            sweep_interval_seconds,
            require_progress_change: parse_env_flag("SESSION_REQUIRE_PROGRESS_CHANGE")?
                .unwrap_or(defaults.require_progress_change),
            progress_decimal_places,
        };
        sessions.min_duration()?;

        Ok(sessions)
    }
}

/// Accepts `UTC`, `Z` or a fixed offset such as `+02:00`
pub fn parse_timezone(value: Option<&str>) -> Result<FixedOffset, ConfigError> {
    let utc = FixedOffset::east_opt(0).ok_or_else(|| ConfigError::Invalid {
        key: "DISPLAY_TIMEZONE",
        reason: "UTC offset unavailable".to_string(),
    })?;

    match value {
        None => Ok(utc),
        Some(v) if v.eq_ignore_ascii_case("utc") || v == "Z" => Ok(utc),
        Some(v) => v.parse::<FixedOffset>().map_err(|_| ConfigError::Invalid {
            key: "DISPLAY_TIMEZONE",
            reason: format!("{} is not UTC or a +HH:MM offset", v),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 12] = [
        "HTTP_PORT",
        "KOSYNC_UPSTREAM_URL",
        "BOOKLORE_KOSYNC_URL",
        "UPSTREAM_TIMEOUT_SECONDS",
        "SESSION_TIMEOUT_MINUTES",
        "SESSION_MIN_DURATION_SECONDS",
        "SESSION_SWEEP_INTERVAL_SECONDS",
        "SESSION_REQUIRE_PROGRESS_CHANGE",
        "PROGRESS_DECIMAL_PLACES",
        "LOG_FORMAT",
        "DISPLAY_TIMEZONE",
        "RUN_MIGRATIONS",
    ];

    fn clear_env() {
        for key in VARS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_defaults() {
        clear_env();

        let config = Config::from_env().unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.upstream.base_url, "http://booklore:6060/api/kosync");
        assert_eq!(config.upstream.timeout, Duration::from_secs(10));
        assert_eq!(config.sessions.timeout_minutes, 10);
        assert_eq!(config.sessions.min_duration_seconds, 10);
        assert_eq!(config.sessions.sweep_interval_seconds, 300);
        assert_eq!(config.sessions.progress_decimal_places, 1);
        assert!(!config.sessions.require_progress_change);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.logging.display_timezone.local_minus_utc(), 0);
        assert!(config.run_migrations);
    }

    #[test]
    #[serial_test::serial]
    fn test_session_overrides() {
        clear_env();
        std::env::set_var("SESSION_TIMEOUT_MINUTES", "4");
        std::env::set_var("SESSION_MIN_DURATION_SECONDS", "30");
        std::env::set_var("SESSION_REQUIRE_PROGRESS_CHANGE", "true");
        std::env::set_var("KOSYNC_UPSTREAM_URL", "https://sync.example.org/kosync/");

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.sessions.session_timeout().unwrap(),
            chrono::Duration::minutes(4)
        );
        assert_eq!(config.sessions.sweep_interval(), Duration::from_secs(120));
        assert_eq!(config.sessions.min_duration_seconds, 30);
        assert!(config.sessions.require_progress_change);
        assert_eq!(config.upstream.base_url, "https://sync.example.org/kosync");

        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn test_invalid_values_are_rejected() {
        clear_env();
        std::env::set_var("SESSION_TIMEOUT_MINUTES", "ten");
        assert!(matches!(Config::from_env(), Err(ConfigError::Parse(_))));

        std::env::set_var("SESSION_TIMEOUT_MINUTES", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { key: "SESSION_TIMEOUT_MINUTES", .. })
        ));

        clear_env();
        std::env::set_var("KOSYNC_UPSTREAM_URL", "booklore:6060");
        assert!(Config::from_env().is_err());

        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn test_out_of_range_durations_are_rejected() {
        clear_env();
        std::env::set_var("SESSION_TIMEOUT_MINUTES", "1000000000000000000");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { key: "SESSION_TIMEOUT_MINUTES", .. })
        ));

        clear_env();
        std::env::set_var("SESSION_MIN_DURATION_SECONDS", u64::MAX.to_string());
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { key: "SESSION_MIN_DURATION_SECONDS", .. })
        ));

        clear_env();
        std::env::set_var("SESSION_SWEEP_INTERVAL_SECONDS", u64::MAX.to_string());
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { key: "SESSION_SWEEP_INTERVAL_SECONDS", .. })
        ));

        clear_env();
    }

    #[test]
    fn test_session_conversions_never_wrap() {
        let sessions = SessionConfig {
            timeout_minutes: u64::MAX,
            min_duration_seconds: u64::MAX,
            ..SessionConfig::default()
        };
        assert!(sessions.session_timeout().is_err());
        assert!(sessions.min_duration().is_err());

        let defaults = SessionConfig::default();
        assert_eq!(defaults.session_timeout().unwrap(), chrono::Duration::minutes(10));
        assert_eq!(defaults.min_duration().unwrap(), 10);
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone(Some("UTC")).unwrap().local_minus_utc(), 0);
        assert_eq!(
            parse_timezone(Some("+02:00")).unwrap().local_minus_utc(),
            7200
        );
        assert_eq!(
            parse_timezone(Some("-05:30")).unwrap().local_minus_utc(),
            -19800
        );
        assert!(parse_timezone(Some("Europe/Berlin")).is_err());
    }
}
