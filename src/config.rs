//! Configuration management

use std::path::PathBuf;

use anyhow::{self, Context, Result};

use crate::defaults::{DEFAULT_IMPORT_WORKERS, DEFAULT_MAX_ATTEMPTS, DEFAULT_UPLOAD_DIR};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// JWT secret key for token validation
    pub jwt_secret: String,

    /// Root for uploaded files; temp uploads go to `<upload_dir>/temp`
    pub upload_dir: PathBuf,

    /// Schema file overriding the embedded `config/imports.json`
    pub import_schema_path: Option<PathBuf>,

    /// Size of the import worker pool
    pub import_workers: usize,

    /// Deliveries per import job (JetStream `max_deliver`)
    pub import_max_attempts: u32,

    /// Resend API key; e-mails are only logged when absent
    pub resend_api_key: Option<String>,

    pub email_from_address: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url = std::env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set")?;

        let jwt_secret = std::env::var("JWT_SECRET")
            .context("JWT_SECRET must be set; generate one with: openssl rand -base64 48")?;

        if jwt_secret.len() < 32 {
            anyhow::bail!(
                "JWT_SECRET must be at least 32 bytes (current: {} bytes). Generate one with: openssl rand -base64 48",
                jwt_secret.len()
            );
        }

        let upload_dir = std::env::var("UPLOAD_DIR")
            .unwrap_or_else(|_| DEFAULT_UPLOAD_DIR.to_string())
            .into();

        let import_schema_path = std::env::var("IMPORT_SCHEMA_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let import_workers = parse_env("IMPORT_WORKERS", DEFAULT_IMPORT_WORKERS)?;
        if import_workers == 0 {
            anyhow::bail!("IMPORT_WORKERS must be at least 1");
        }

        let import_max_attempts = parse_env("IMPORT_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if import_max_attempts == 0 {
            anyhow::bail!("IMPORT_MAX_ATTEMPTS must be at least 1");
        }

        let resend_api_key = std::env::var("RESEND_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());

        let email_from_address = std::env::var("EMAIL_FROM_ADDRESS")
            .unwrap_or_else(|_| "noreply@dataport.local".to_string());

        Ok(Self {
            nats_url,
            database_url,
            jwt_secret,
            upload_dir,
            import_schema_path,
            import_workers,
            import_max_attempts,
            resend_api_key,
            email_from_address,
        })
    }

    /// Directory queued uploads wait in until their job runs
    pub fn temp_upload_dir(&self) -> PathBuf {
        self.upload_dir.join("temp")
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a positive number, got '{}'", name, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_uses_default_when_unset() {
        std::env::remove_var("DATAPORT_TEST_UNSET_VALUE");
        let value: usize = parse_env("DATAPORT_TEST_UNSET_VALUE", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_parse_env_reads_value() {
        std::env::set_var("DATAPORT_TEST_WORKERS", "12");
        let value: usize = parse_env("DATAPORT_TEST_WORKERS", 4).unwrap();
        assert_eq!(value, 12);
        std::env::remove_var("DATAPORT_TEST_WORKERS");
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        std::env::set_var("DATAPORT_TEST_ATTEMPTS", "three");
        let result: Result<u32> = parse_env("DATAPORT_TEST_ATTEMPTS", 3);
        assert!(result.is_err());
        std::env::remove_var("DATAPORT_TEST_ATTEMPTS");
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_upload_dir_defaults() {
        std::env::remove_var("UPLOAD_DIR");
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef");

        let config = Config::from_env().unwrap();
        assert_eq!(config.upload_dir, PathBuf::from(DEFAULT_UPLOAD_DIR));
        assert_eq!(config.temp_upload_dir(), PathBuf::from(DEFAULT_UPLOAD_DIR).join("temp"));
    }
}
