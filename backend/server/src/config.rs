use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Result, anyhow};
use tracing::{info, warn};

const DEFAULT_RATING_SALT: &str = "campus_crush_salt_2024";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    Redis,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "redis" => Ok(StorageKind::Redis),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub storage: StorageKind,
    pub redis_url: String,
    pub rating_salt: String,
    pub session_ttl: Duration,
    pub secure_cookies: bool,
    pub uploads_dir: PathBuf,
    pub cors_origin: String,
    pub admin_emails: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let session_hours: u64 = try_load("SESSION_TTL_HOURS", "168")?;

        let config = Self {
            port: try_load("RUST_PORT", "5000")?,
            storage: try_load("STORAGE", "redis")?,
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379")?,
            rating_salt: read_secret("RATING_SALT").unwrap_or_else(|| {
                warn!("RATING_SALT not provided, falling back to the built-in salt");
                DEFAULT_RATING_SALT.to_string()
            }),
            session_ttl: Duration::from_secs(session_hours * 60 * 60),
            secure_cookies: try_load("SECURE_COOKIES", "false")?,
            uploads_dir: PathBuf::from(try_load::<String>("UPLOADS_DIR", "uploads")?),
            cors_origin: try_load("CORS_ORIGIN", "http://localhost:5173")?,
            admin_emails: split_list(&try_load::<String>("ADMIN_EMAILS", "")?),
        };

        if config.session_ttl.is_zero() {
            return Err(anyhow!("SESSION_TTL_HOURS must be greater than zero"));
        }

        if config.admin_emails.is_empty() {
            warn!("ADMIN_EMAILS is empty, every signed-in user can reach admin routes");
        }

        Ok(config)
    }

    /// Settings for tests and local runs without any environment.
    pub fn local() -> Self {
        Self {
            port: 5000,
            storage: StorageKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            rating_salt: DEFAULT_RATING_SALT.to_string(),
            session_ttl: Duration::from_secs(168 * 60 * 60),
            secure_cookies: false,
            uploads_dir: PathBuf::from("uploads"),
            cors_origin: "http://localhost:5173".to_string(),
            admin_emails: Vec::new(),
        }
    }

    pub fn is_admin(&self, email: Option<&str>) -> bool {
        if self.admin_emails.is_empty() {
            return true;
        }

        email.is_some_and(|email| self.admin_emails.iter().any(|admin| admin == email))
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| anyhow!("Invalid {key} value '{raw}': {e}"))
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(secret) => Some(secret.trim().to_string()),
        Err(e) => {
            info!("Secret {secret_name} not mounted ({e}), checking environment");
            var(secret_name)
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}
