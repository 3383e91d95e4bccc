use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub app: ApplicationConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub files: FilesConfig,
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub mount_path: String,
    pub server_url: String,
    pub public_server_url: String,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub app_id: String,
    pub app_name: String,
    pub master_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub backend: StoreBackend,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub session_secret: String,
    pub session_expiry_hours: u64,
    pub otp_expiry_minutes: i64,
    /// Code accepted for any mobile number. Never set in production.
    pub otp_bypass_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    pub directory: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    pub super_username: String,
    pub super_password: String,
    pub super_email: String,
    pub fixture_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    #[error("Insecure configuration: {0}")]
    Insecure(&'static str),
}

const DEV_SESSION_SECRET: &str = "dev-session-secret-change-me";

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        if let Ok(v) = env::var("PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Ok(v) = env::var("PARSE_MOUNT").or_else(|_| env::var("MOUNT_PATH")) {
            self.server.mount_path = normalize_mount_path(&v);
        }
        if let Ok(v) = env::var("SERVER_URL") {
            self.server.server_url = v;
        }
        if let Ok(v) = env::var("PUBLIC_SERVER_URL") {
            self.server.public_server_url = v;
        }
        if let Ok(v) = env::var("MAX_BODY_BYTES") {
            self.server.max_body_bytes = v.parse().unwrap_or(self.server.max_body_bytes);
        }

        // Application overrides
        if let Ok(v) = env::var("APP_ID") {
            self.app.app_id = v;
        }
        if let Ok(v) = env::var("APP_NAME") {
            self.app.app_name = v;
        }
        if let Ok(v) = env::var("MASTER_KEY") {
            self.app.master_key = v;
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL").or_else(|_| env::var("DATABASE_URI")) {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("STORE_BACKEND") {
            self.database.backend = match v.to_ascii_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "postgres" | "postgresql" => StoreBackend::Postgres,
                _ => self.database.backend,
            };
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Security overrides
        if let Ok(v) = env::var("SESSION_SECRET") {
            self.security.session_secret = v;
        }
        if let Ok(v) = env::var("SESSION_EXPIRY_HOURS") {
            self.security.session_expiry_hours = v.parse().unwrap_or(self.security.session_expiry_hours);
        }
        if let Ok(v) = env::var("OTP_EXPIRY_MIN") {
            self.security.otp_expiry_minutes = v.parse().unwrap_or(self.security.otp_expiry_minutes);
        }
        if let Ok(v) = env::var("OTP_BYPASS_CODE") {
            self.security.otp_bypass_code = if v.trim().is_empty() { None } else { Some(v) };
        }

        // Files overrides
        if let Ok(v) = env::var("FILES_DIR") {
            self.files.directory = PathBuf::from(v);
        }
        if let Ok(v) = env::var("MAX_UPLOAD_SIZE_BYTES") {
            self.files.max_upload_bytes = v.parse().unwrap_or(self.files.max_upload_bytes);
        }

        // Seed overrides
        if let Ok(v) = env::var("SEED_SUPER_USERNAME") {
            self.seed.super_username = v;
        }
        if let Ok(v) = env::var("SEED_SUPER_PASSWORD") {
            self.seed.super_password = v;
        }
        if let Ok(v) = env::var("SEED_SUPER_EMAIL") {
            self.seed.super_email = v;
        }
        if let Ok(v) = env::var("SEED_FIXTURE_FILE") {
            self.seed.fixture_file = Some(PathBuf::from(v));
        }

        self
    }

    /// Reject settings that must never reach a live deployment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.master_key.is_empty() {
            return Err(ConfigError::Missing("MASTER_KEY"));
        }
        if self.security.session_secret.is_empty() {
            return Err(ConfigError::Missing("SESSION_SECRET"));
        }
        if self.database.backend == StoreBackend::Postgres && self.database.url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        if self.environment == Environment::Production {
            if self.security.session_secret == DEV_SESSION_SECRET {
                return Err(ConfigError::Insecure("SESSION_SECRET uses the development default"));
            }
            if self.security.otp_bypass_code.is_some() {
                return Err(ConfigError::Insecure("OTP_BYPASS_CODE is set in production"));
            }
        }
        Ok(())
    }

    /// Public base URL of the mounted API, without a trailing slash.
    pub fn public_api_url(&self) -> String {
        format!(
            "{}{}",
            self.server.public_server_url.trim_end_matches('/'),
            self.server.mount_path
        )
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 1337,
                mount_path: "/api".to_string(),
                server_url: "http://localhost:1337/api".to_string(),
                public_server_url: "http://localhost:1337".to_string(),
                max_body_bytes: 10 * 1024 * 1024, // 10MB
            },
            app: ApplicationConfig {
                app_id: "ayn".to_string(),
                app_name: "Ayn".to_string(),
                master_key: "dev-master-key".to_string(),
            },
            database: DatabaseConfig {
                url: None,
                backend: StoreBackend::Memory,
                max_connections: 10,
                connection_timeout: 30,
            },
            security: SecurityConfig {
                session_secret: DEV_SESSION_SECRET.to_string(),
                session_expiry_hours: 24 * 30,
                otp_expiry_minutes: 5,
                otp_bypass_code: Some("000000".to_string()),
            },
            files: FilesConfig {
                directory: PathBuf::from("./files"),
                max_upload_bytes: 10 * 1024 * 1024,
            },
            seed: SeedConfig {
                super_username: "super".to_string(),
                super_password: "super".to_string(),
                super_email: "admin@test.com".to_string(),
                fixture_file: None,
            },
        }
    }

    pub fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.database.backend = StoreBackend::Postgres;
        config.database.max_connections = 20;
        config.database.connection_timeout = 10;
        config.security.session_expiry_hours = 24 * 7;
        config
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                port: 1337,
                mount_path: "/api".to_string(),
                server_url: "http://localhost:1337/api".to_string(),
                public_server_url: "http://localhost:1337".to_string(),
                max_body_bytes: 10 * 1024 * 1024,
            },
            app: ApplicationConfig {
                app_id: "ayn".to_string(),
                app_name: "Ayn".to_string(),
                master_key: String::new(),
            },
            database: DatabaseConfig {
                url: None,
                backend: StoreBackend::Postgres,
                max_connections: 50,
                connection_timeout: 5,
            },
            security: SecurityConfig {
                session_secret: String::new(),
                session_expiry_hours: 24 * 7,
                otp_expiry_minutes: 5,
                otp_bypass_code: None,
            },
            files: FilesConfig {
                directory: PathBuf::from("/var/lib/ayn/files"),
                max_upload_bytes: 10 * 1024 * 1024,
            },
            seed: SeedConfig {
                super_username: "super".to_string(),
                super_password: String::new(),
                super_email: "admin@test.com".to_string(),
                fixture_file: None,
            },
        }
    }
}

fn normalize_mount_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.server.port, 1337);
        assert_eq!(config.server.mount_path, "/api");
        assert_eq!(config.database.backend, StoreBackend::Memory);
        assert_eq!(config.security.otp_bypass_code.as_deref(), Some("000000"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.database.backend, StoreBackend::Postgres);
        assert!(config.security.otp_bypass_code.is_none());
        assert!(matches!(config.validate(), Err(ConfigError::Missing("MASTER_KEY"))));
    }

    #[test]
    fn production_rejects_bypass_code() {
        let mut config = AppConfig::production();
        config.app.master_key = "m".to_string();
        config.security.session_secret = "s".to_string();
        config.database.url = Some("postgres://localhost/ayn".to_string());
        assert!(config.validate().is_ok());

        config.security.otp_bypass_code = Some("000000".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Insecure(_))));
    }

    #[test]
    fn mount_path_is_normalized() {
        assert_eq!(normalize_mount_path("parse/"), "/parse");
        assert_eq!(normalize_mount_path("/api"), "/api");
        assert_eq!(normalize_mount_path("/"), "");
    }

    #[test]
    fn public_api_url_joins_mount() {
        let config = AppConfig::development();
        assert_eq!(config.public_api_url(), "http://localhost:1337/api");
    }
}
