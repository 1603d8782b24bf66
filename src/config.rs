use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Test,
    /// Unset or unrecognised `APP_ENV`. Neither development nor production.
    Unspecified,
}

impl Environment {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub http_port: u16,
    pub https_port: u16,
    pub tls: TlsConfig,
    pub cors_origin: String,
    pub environment: Environment,
    pub csrf_secret: Vec<u8>,
    pub seed_sample_data: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a valid port number, got {value:?}")]
    InvalidPort { name: &'static str, value: String },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_port = match std::env::var("HTTP_PORT").or_else(|_| std::env::var("PORT")) {
            Ok(v) => parse_port("HTTP_PORT", v)?,
            Err(_) => 4000,
        };
        let https_port = match std::env::var("HTTPS_PORT") {
            Ok(v) => parse_port("HTTPS_PORT", v)?,
            Err(_) => 8444,
        };

        // Tokens only need to outlive the process unless a secret is pinned.
        let csrf_secret = std::env::var("CSRF_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(String::into_bytes)
            .unwrap_or_else(|| rand::random::<[u8; 32]>().to_vec());

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://contacts.db?mode=rwc".into()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            http_port,
            https_port,
            tls: TlsConfig {
                cert_path: std::env::var("SSL_CERT_PATH")
                    .unwrap_or_else(|_| "/server.crt".into())
                    .into(),
                key_path: std::env::var("SSL_KEY_PATH")
                    .unwrap_or_else(|_| "/privatekey.pem".into())
                    .into(),
            },
            cors_origin: std::env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "https://localhost:8443".into()),
            environment: std::env::var("APP_ENV")
                .map(|v| Environment::parse(&v))
                .unwrap_or(Environment::Unspecified),
            csrf_secret,
            seed_sample_data: std::env::var("SEED_SAMPLE_DATA")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Configuration used by router tests: in-memory store, fixed secret.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            http_port: 0,
            https_port: 0,
            tls: TlsConfig {
                cert_path: "/nonexistent/server.crt".into(),
                key_path: "/nonexistent/privatekey.pem".into(),
            },
            cors_origin: "https://app.example.com".into(),
            environment: Environment::Test,
            csrf_secret: b"test-csrf-secret".to_vec(),
            seed_sample_data: false,
        }
    }
}

fn parse_port(name: &'static str, value: String) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidPort { name, value })
}
