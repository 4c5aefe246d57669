use std::env;
use std::str::FromStr;

use crate::error::{RecordStoreError, Result};

pub const DEFAULT_COLLECTION_NAME: &str = "vector_records";

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        PostgresConfig {
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
        }
    }
}

impl PostgresConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        PostgresConfig {
            host: env::var("POSTGRES_HOST").ok(),
            port: env_parse("POSTGRES_PORT"),
            username: env::var("POSTGRES_USERNAME").ok(),
            password: env::var("POSTGRES_PASSWORD").ok(),
            database: env::var("POSTGRES_DATABASE").ok(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_connection_info(
        mut self,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self.database = Some(database.into());
        self
    }
}

/// Bounds applied during validation and pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitsConfig {
    pub min_dimensions: usize,
    pub max_dimensions: usize,
    pub max_batch_size: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub default_search_limit: usize,
    pub max_search_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            min_dimensions: 100,
            max_dimensions: 4096,
            max_batch_size: 100,
            default_page_size: 10,
            max_page_size: 100,
            default_search_limit: 10,
            max_search_limit: 100,
        }
    }
}

impl LimitsConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        LimitsConfig {
            min_dimensions: env_parse("VECTOR_MIN_DIMENSIONS").unwrap_or(defaults.min_dimensions),
            max_dimensions: env_parse("VECTOR_MAX_DIMENSIONS").unwrap_or(defaults.max_dimensions),
            max_batch_size: env_parse("VECTOR_MAX_BATCH_SIZE").unwrap_or(defaults.max_batch_size),
            default_page_size: env_parse("PAGE_SIZE_DEFAULT")
                .unwrap_or(defaults.default_page_size),
            max_page_size: env_parse("PAGE_SIZE_MAX").unwrap_or(defaults.max_page_size),
            default_search_limit: env_parse("SEARCH_LIMIT_DEFAULT")
                .unwrap_or(defaults.default_search_limit),
            max_search_limit: env_parse("SEARCH_LIMIT_MAX").unwrap_or(defaults.max_search_limit),
        }
    }

    pub fn with_dimension_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_dimensions = min;
        self.max_dimensions = max;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_dimensions == 0 || self.min_dimensions > self.max_dimensions {
            return Err(RecordStoreError::ConfigError(format!(
                "invalid dimension bounds [{}, {}]",
                self.min_dimensions, self.max_dimensions
            )));
        }
        if self.max_batch_size == 0 {
            return Err(RecordStoreError::ConfigError(
                "max batch size must be at least 1".into(),
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(RecordStoreError::ConfigError(format!(
                "default page size {} must be within [1, {}]",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.default_search_limit == 0 || self.default_search_limit > self.max_search_limit {
            return Err(RecordStoreError::ConfigError(format!(
                "default search limit {} must be within [1, {}]",
                self.default_search_limit, self.max_search_limit
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: Option<u16>,
    pub collection_name: String,
    pub backend: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub limits: LimitsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: None,
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            backend: StorageBackend::Memory,
            postgres: None,
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let use_psql = env::var("USE_PSQL").ok().map_or(false, |val| val == "true");
        let (backend, postgres) = if use_psql {
            (StorageBackend::Postgres, Some(PostgresConfig::from_env()))
        } else {
            (StorageBackend::Memory, None)
        };

        Config {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_parse("PORT"),
            collection_name: env::var("COLLECTION_NAME")
                .unwrap_or_else(|_| DEFAULT_COLLECTION_NAME.to_string()),
            backend,
            postgres,
            limits: LimitsConfig::from_env(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_collection(mut self, name: impl Into<String>) -> Self {
        self.collection_name = name.into();
        self
    }

    pub fn with_postgres(mut self, config: PostgresConfig) -> Self {
        self.postgres = Some(config);
        self.backend = StorageBackend::Postgres;
        self
    }

    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection_name.trim().is_empty() {
            return Err(RecordStoreError::ConfigError(
                "collection name cannot be empty".into(),
            ));
        }
        if self.backend == StorageBackend::Postgres && self.postgres.is_none() {
            return Err(RecordStoreError::ConfigError(
                "PostgreSQL config required".into(),
            ));
        }
        self.limits.validate()
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_documented_bounds() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.min_dimensions, 100);
        assert_eq!(limits.max_dimensions, 4096);
        assert_eq!(limits.max_batch_size, 100);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn inverted_dimension_bounds_are_rejected() {
        let limits = LimitsConfig::default().with_dimension_bounds(500, 200);
        assert!(matches!(
            limits.validate(),
            Err(RecordStoreError::ConfigError(_))
        ));
    }

    #[test]
    fn postgres_backend_requires_settings() {
        let mut config = Config::new();
        config.backend = StorageBackend::Postgres;
        assert!(config.validate().is_err());

        let config = Config::new().with_postgres(
            PostgresConfig::new()
                .with_connection_info("localhost", 5432, "vectors")
                .with_credentials("app", "secret"),
        );
        assert_eq!(config.backend, StorageBackend::Postgres);
        assert!(config.validate().is_ok());
    }
}
