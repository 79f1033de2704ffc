use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_DAILY_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" | "inmem" => Ok(StoreBackend::Memory),
            _ => anyhow::bail!("unsupported store backend {s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtAlgorithm {
    HS256,
    HS384,
    HS512,
}

impl FromStr for JwtAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HS256" => Ok(JwtAlgorithm::HS256),
            "HS384" => Ok(JwtAlgorithm::HS384),
            "HS512" => Ok(JwtAlgorithm::HS512),
            _ => anyhow::bail!("unsupported JWT algorithm: {s}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadQuotaConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub store_backend: StoreBackend,
    pub daily_limit: u32,
    /// Zero (the default) disables expiry: a reserved slot stays consumed for
    /// the day. A positive TTL lets abandoned reservations return their slot.
    pub reservation_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub transaction_timeout_ms: u64,
    pub max_transaction_retries: u32,
    pub request_timeout_secs: u64,
    pub enable_jwt: bool,
    pub jwt_secret: Option<String>,
    pub jwt_algorithm: JwtAlgorithm,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub log_level: String,
}

impl Default for UploadQuotaConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8184,
            data_dir: PathBuf::from("data/upload-quota"),
            store_backend: StoreBackend::Sqlite,
            daily_limit: DEFAULT_DAILY_LIMIT,
            reservation_ttl_secs: 0,
            sweep_interval_secs: 60,
            transaction_timeout_ms: 5_000,
            max_transaction_retries: 5,
            request_timeout_secs: 30,
            enable_jwt: false,
            jwt_secret: None,
            jwt_algorithm: JwtAlgorithm::HS256,
            jwt_issuer: None,
            jwt_audience: None,
            log_level: "info".to_string(),
        }
    }
}

impl UploadQuotaConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(host) = env::var("UPLOAD_QUOTA_HOST") {
            if !host.trim().is_empty() {
                cfg.server_host = host;
            }
        }
        if let Ok(port) = env::var("UPLOAD_QUOTA_PORT") {
            cfg.server_port = port
                .parse()
                .context("UPLOAD_QUOTA_PORT must be a valid u16")?;
        }
        if let Ok(dir) = env::var("UPLOAD_QUOTA_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(backend) = env::var("QUOTA_STORE") {
            cfg.store_backend = backend.parse().context("QUOTA_STORE is invalid")?;
        }
        if let Ok(limit) = env::var("DAILY_UPLOAD_LIMIT") {
            cfg.daily_limit = limit
                .parse()
                .context("DAILY_UPLOAD_LIMIT must be a positive integer")?;
        }
        if let Ok(ttl) = env::var("RESERVATION_TTL_SECS") {
            cfg.reservation_ttl_secs = ttl
                .parse()
                .context("RESERVATION_TTL_SECS must be a non-negative integer")?;
        }
        if let Ok(interval) = env::var("SWEEP_INTERVAL_SECS") {
            cfg.sweep_interval_secs = interval
                .parse()
                .context("SWEEP_INTERVAL_SECS must be a positive integer")?;
        }
        if let Ok(timeout) = env::var("TRANSACTION_TIMEOUT_MS") {
            cfg.transaction_timeout_ms = timeout
                .parse()
                .context("TRANSACTION_TIMEOUT_MS must be a positive integer")?;
        }
        if let Ok(retries) = env::var("TRANSACTION_MAX_RETRIES") {
            cfg.max_transaction_retries = retries
                .parse()
                .context("TRANSACTION_MAX_RETRIES must be a non-negative integer")?;
        }
        if let Ok(timeout) = env::var("REQUEST_TIMEOUT_SECS") {
            cfg.request_timeout_secs = timeout
                .parse()
                .context("REQUEST_TIMEOUT_SECS must be a positive integer")?;
        }
        if let Ok(flag) = env::var("ENABLE_JWT") {
            cfg.enable_jwt =
                parse_bool(&flag).with_context(|| format!("ENABLE_JWT is invalid: {flag}"))?;
        }
        cfg.jwt_secret = non_empty_var("JWT_SECRET");
        if let Ok(algorithm) = env::var("JWT_ALGORITHM") {
            cfg.jwt_algorithm = algorithm.parse()?;
        }
        cfg.jwt_issuer = non_empty_var("JWT_ISSUER");
        cfg.jwt_audience = non_empty_var("JWT_AUDIENCE");
        if let Ok(level) = env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.daily_limit == 0 {
            anyhow::bail!("DAILY_UPLOAD_LIMIT must be greater than zero");
        }
        if self.transaction_timeout_ms == 0 {
            anyhow::bail!("TRANSACTION_TIMEOUT_MS must be greater than zero");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
        }
        if self.reservation_ttl_secs > 0 && self.sweep_interval_secs == 0 {
            anyhow::bail!("SWEEP_INTERVAL_SECS must be greater than zero when expiry is enabled");
        }
        if self.enable_jwt && self.jwt_secret.is_none() {
            anyhow::bail!("JWT_SECRET is required when ENABLE_JWT is set");
        }
        if self.store_backend == StoreBackend::Sqlite {
            ensure_directory(&self.data_dir)?;
        }

        Ok(())
    }

    pub fn reservation_ttl(&self) -> Option<Duration> {
        (self.reservation_ttl_secs > 0).then(|| Duration::from_secs(self.reservation_ttl_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => anyhow::bail!("invalid boolean value {value}"),
    }
}
