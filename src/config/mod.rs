use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::mailer::SmtpSettings;
use crate::middleware::RateLimiterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub env: String,
    pub storage: StorageBackend,
    pub database_url: Option<String>,
    pub db_max_open_conns: u32,
    pub db_max_idle_time_secs: u64,
    pub limiter_enabled: bool,
    pub limiter_burst: u32,
    pub limiter_rps: f64,
    pub limiter_trust_proxy: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_sender: String,
    pub shutdown_grace_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_host: "0.0.0.0".to_string(),
            server_port: 4000,
            env: "development".to_string(),
            storage: StorageBackend::Postgres,
            database_url: None,
            db_max_open_conns: 25,
            db_max_idle_time_secs: 900,
            limiter_enabled: true,
            limiter_burst: 4,
            limiter_rps: 2.0,
            limiter_trust_proxy: false,
            smtp_host: None,
            smtp_port: 2525,
            smtp_username: None,
            smtp_password: None,
            smtp_sender: "Marquee <no-reply@marquee.local>".to_string(),
            shutdown_grace_secs: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup, falling back
    /// to the defaults for anything unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let storage = match lookup("STORAGE_BACKEND") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::invalid("STORAGE_BACKEND", &value))?,
            None => defaults.storage,
        };

        let config = Config {
            server_host: lookup("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_or(&lookup, "PORT", defaults.server_port)?,
            env: lookup("APP_ENV").unwrap_or(defaults.env),
            storage,
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            db_max_open_conns: parse_or(&lookup, "DB_MAX_OPEN_CONNS", defaults.db_max_open_conns)?,
            db_max_idle_time_secs: parse_or(
                &lookup,
                "DB_MAX_IDLE_TIME_SECS",
                defaults.db_max_idle_time_secs,
            )?,
            limiter_enabled: parse_or(&lookup, "LIMITER_ENABLED", defaults.limiter_enabled)?,
            limiter_burst: parse_or(&lookup, "LIMITER_BURST", defaults.limiter_burst)?,
            limiter_rps: parse_or(&lookup, "LIMITER_RPS", defaults.limiter_rps)?,
            limiter_trust_proxy: parse_or(
                &lookup,
                "LIMITER_TRUST_PROXY",
                defaults.limiter_trust_proxy,
            )?,
            smtp_host: lookup("SMTP_HOST").filter(|host| !host.is_empty()),
            smtp_port: parse_or(&lookup, "SMTP_PORT", defaults.smtp_port)?,
            smtp_username: lookup("SMTP_USERNAME").filter(|user| !user.is_empty()),
            smtp_password: lookup("SMTP_PASSWORD"),
            smtp_sender: lookup("SMTP_SENDER").unwrap_or(defaults.smtp_sender),
            shutdown_grace_secs: match lookup("SHUTDOWN_GRACE_SECS") {
                Some(value) => Some(
                    value
                        .parse()
                        .map_err(|_| ConfigError::invalid("SHUTDOWN_GRACE_SECS", &value))?,
                ),
                None => None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limiter_burst < 1 {
            return Err(ConfigError::invalid(
                "LIMITER_BURST",
                &self.limiter_burst.to_string(),
            ));
        }
        if !(self.limiter_rps > 0.0 && self.limiter_rps.is_finite()) {
            return Err(ConfigError::invalid("LIMITER_RPS", &self.limiter_rps.to_string()));
        }
        if self.storage == StorageBackend::Postgres && self.database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        Ok(())
    }

    pub fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            enabled: self.limiter_enabled,
            burst: self.limiter_burst,
            requests_per_second: self.limiter_rps,
            trust_proxy_headers: self.limiter_trust_proxy,
            ..RateLimiterConfig::default()
        }
    }

    /// SMTP delivery settings, or `None` when no host is configured.
    pub fn smtp(&self) -> Option<SmtpSettings> {
        self.smtp_host.as_ref().map(|host| SmtpSettings {
            host: host.clone(),
            port: self.smtp_port,
            username: self.smtp_username.clone(),
            password: self.smtp_password.clone(),
        })
    }

    pub fn db_max_idle_time(&self) -> Duration {
        Duration::from_secs(self.db_max_idle_time_secs)
    }

    pub fn shutdown_grace(&self) -> Option<Duration> {
        self.shutdown_grace_secs.map(Duration::from_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(key, &value)),
        None => Ok(default),
    }
}
