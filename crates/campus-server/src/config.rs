use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::warn;

use campus_types::pagination::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT, MIN_HISTORY_LIMIT};

/// Placeholder JWT secrets that must not reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Page size used when a history request does not name one.
    pub history_default_limit: u32,
}

impl Config {
    /// Read configuration from `CAMPUS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("CAMPUS_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into());
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("CAMPUS_JWT_SECRET is unset or a placeholder; do not run like this in production");
        }

        let db_path = get("CAMPUS_DB_PATH").unwrap_or_else(|| "campus.db".into()).into();
        let host = get("CAMPUS_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("CAMPUS_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("CAMPUS_PORT must be a port number")?;

        let history_default_limit = match get("CAMPUS_HISTORY_DEFAULT_LIMIT") {
            Some(raw) => raw
                .parse::<u32>()
                .context("CAMPUS_HISTORY_DEFAULT_LIMIT must be an integer")?,
            None => DEFAULT_HISTORY_LIMIT,
        };
        if !(MIN_HISTORY_LIMIT..=MAX_HISTORY_LIMIT).contains(&history_default_limit) {
            bail!(
                "CAMPUS_HISTORY_DEFAULT_LIMIT must be between {} and {}, got {}",
                MIN_HISTORY_LIMIT,
                MAX_HISTORY_LIMIT,
                history_default_limit
            );
        }

        Ok(Self {
            jwt_secret,
            db_path,
            host,
            port,
            history_default_limit,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
