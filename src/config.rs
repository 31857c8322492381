use serde::Deserialize;
use time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub max_lifetime_secs: u64,
    pub acquire_timeout_secs: u64,
}

/// Lifetimes for issued bearer tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub login_ttl_minutes: i64,
    pub service_ttl_minutes: i64,
    /// Expired rows are only swept when this is set.
    pub sweep_interval_secs: Option<u64>,
}

/// Upper bound for either TTL: one year.
pub const MAX_TOKEN_TTL_MINUTES: i64 = 365 * 24 * 60;

impl TokenConfig {
    pub fn check(&self) -> anyhow::Result<()> {
        for (name, minutes) in [
            ("TOKEN_LOGIN_TTL_MINUTES", self.login_ttl_minutes),
            ("TOKEN_SERVICE_TTL_MINUTES", self.service_ttl_minutes),
        ] {
            anyhow::ensure!(
                (1..=MAX_TOKEN_TTL_MINUTES).contains(&minutes),
                "{name} must be between 1 and {MAX_TOKEN_TTL_MINUTES}, got {minutes}"
            );
        }
        Ok(())
    }

    pub fn login_ttl(&self) -> Duration {
        Duration::minutes(self.login_ttl_minutes)
    }

    pub fn service_ttl(&self) -> Duration {
        Duration::minutes(self.service_ttl_minutes)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub static_dir: String,
    pub database: DbConfig,
    pub tokens: TokenConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DbConfig {
            url: std::env::var("DATABASE_URL")?,
            max_connections: env_or("DB_MAX_CONNECTIONS", 5),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 5 * 60),
            acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", 5),
        };
        let tokens = TokenConfig {
            login_ttl_minutes: env_or("TOKEN_LOGIN_TTL_MINUTES", 24 * 60),
            service_ttl_minutes: env_or("TOKEN_SERVICE_TTL_MINUTES", 60),
            sweep_interval_secs: std::env::var("TOKEN_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0),
        };
        tokens.check()?;

        Ok(Self {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("APP_PORT", 8080),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            static_dir: std::env::var("STATIC_DIR").unwrap_or_else(|_| "./static".into()),
            database,
            tokens,
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
