//! Configuration for the data store
//!
//! Provides a builder pattern for configuring the store, and loading from the
//! database credential environment variables.

use sqlx::postgres::PgConnectOptions;

use crate::error::{DataAccessError, Result};
use crate::schema::ID_FIELD;

/// Credential variables read by [`StoreConfig::from_env`] when `DATABASE_URL`
/// is not set
pub const ENV_HOST: &str = "DB_SECRET_HOST";
pub const ENV_PORT: &str = "DB_SECRET_PORT";
pub const ENV_DATABASE: &str = "DB_SECRET_DATABASE_NAME";
pub const ENV_USERNAME: &str = "DB_SECRET_USERNAME";
pub const ENV_PASSWORD: &str = "DB_SECRET_PASSWORD";

/// Configuration for the data store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL database URL; empty when `connect_options` is set
    pub database_url: String,
    /// Explicit connection options, used instead of `database_url`
    pub connect_options: Option<PgConnectOptions>,
    /// Maximum pool size (default: 5)
    pub max_connections: u32,
    /// Identifier column of every tenant table (default: "id")
    pub id_column: String,
    /// Organization metadata table (default: "organizations")
    pub organizations_table: String,
    /// Object metadata table (default: "objects")
    pub objects_table: String,
    /// Field metadata table (default: "object_fields")
    pub object_fields_table: String,
}

impl StoreConfig {
    /// Create a new configuration builder
    pub fn builder(database_url: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(database_url)
    }

    /// Configuration from the process environment
    ///
    /// Uses `DATABASE_URL` when set, otherwise connects with the
    /// `DB_SECRET_*` credential variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup("DATABASE_URL").filter(|url| !url.is_empty()) {
            return Ok(Self::builder(url).build());
        }

        let required = |key: &str| {
            lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| {
                DataAccessError::Connection(format!("Database {} is not set", key))
            })
        };
        let host = required(ENV_HOST)?;
        let port = required(ENV_PORT)?;
        let database = required(ENV_DATABASE)?;
        let username = required(ENV_USERNAME)?;
        let password = required(ENV_PASSWORD)?;

        let port: u16 = port.parse().map_err(|_| {
            DataAccessError::Connection(format!("Database port '{}' is not a number", port))
        })?;

        let options = PgConnectOptions::new()
            .host(&host)
            .port(port)
            .database(&database)
            .username(&username)
            .password(&password);
        Ok(StoreConfigBuilder::new(String::new())
            .connect_options(options)
            .build())
    }

    /// Options the pool connects with
    pub fn pg_connect_options(&self) -> Result<PgConnectOptions> {
        match &self.connect_options {
            Some(options) => Ok(options.clone()),
            None => self.database_url.parse::<PgConnectOptions>().map_err(|e| {
                DataAccessError::Connection(format!("Invalid database URL: {}", e))
            }),
        }
    }
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    database_url: String,
    connect_options: Option<PgConnectOptions>,
    max_connections: u32,
    id_column: String,
    organizations_table: String,
    objects_table: String,
    object_fields_table: String,
}

impl StoreConfigBuilder {
    /// Create a new builder with the database URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            connect_options: None,
            max_connections: 5,
            id_column: ID_FIELD.to_string(),
            organizations_table: "organizations".to_string(),
            objects_table: "objects".to_string(),
            object_fields_table: "object_fields".to_string(),
        }
    }

    /// Connect with explicit options instead of the URL
    pub fn connect_options(mut self, options: PgConnectOptions) -> Self {
        self.connect_options = Some(options);
        self
    }

    /// Set the maximum pool size (default: 5)
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the identifier column (default: "id")
    pub fn id_column(mut self, name: impl Into<String>) -> Self {
        self.id_column = name.into();
        self
    }

    /// Set the organization metadata table (default: "organizations")
    pub fn organizations_table(mut self, name: impl Into<String>) -> Self {
        self.organizations_table = name.into();
        self
    }

    /// Set the object metadata table (default: "objects")
    pub fn objects_table(mut self, name: impl Into<String>) -> Self {
        self.objects_table = name.into();
        self
    }

    /// Set the field metadata table (default: "object_fields")
    pub fn object_fields_table(mut self, name: impl Into<String>) -> Self {
        self.object_fields_table = name.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            database_url: self.database_url,
            connect_options: self.connect_options,
            max_connections: self.max_connections,
            id_column: self.id_column,
            organizations_table: self.organizations_table,
            objects_table: self.objects_table,
            object_fields_table: self.object_fields_table,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn credentials() -> Vec<(&'static str, &'static str)> {
        vec![
            (ENV_HOST, "db.internal"),
            (ENV_PORT, "5432"),
            (ENV_DATABASE, "tenants"),
            (ENV_USERNAME, "app"),
            (ENV_PASSWORD, "p@ss:word"),
        ]
    }

    // =========================================================================
    // Builder
    // =========================================================================

    #[test]
    fn test_builder_defaults() {
        let config = StoreConfig::builder("postgres://localhost/test").build();
        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.id_column, "id");
        assert_eq!(config.organizations_table, "organizations");
        assert_eq!(config.objects_table, "objects");
        assert_eq!(config.object_fields_table, "object_fields");
    }

    #[test]
    fn test_builder_custom() {
        let config = StoreConfig::builder("postgres://localhost/test")
            .max_connections(20)
            .id_column("record_id")
            .organizations_table("orgs")
            .objects_table("tenant_objects")
            .object_fields_table("tenant_fields")
            .build();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.id_column, "record_id");
        assert_eq!(config.organizations_table, "orgs");
        assert_eq!(config.objects_table, "tenant_objects");
        assert_eq!(config.object_fields_table, "tenant_fields");
    }

    // =========================================================================
    // Environment
    // =========================================================================

    #[test]
    fn test_database_url_wins() {
        let mut pairs = credentials();
        pairs.push(("DATABASE_URL", "postgres://direct/db"));
        let config = StoreConfig::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.database_url, "postgres://direct/db");
        assert!(config.connect_options.is_none());
    }

    #[test]
    fn test_options_from_credentials() {
        let config = StoreConfig::from_lookup(env(&credentials())).unwrap();
        assert!(config.database_url.is_empty());
        let options = config.pg_connect_options().unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_database(), Some("tenants"));
        assert_eq!(options.get_username(), "app");
    }

    #[test]
    fn test_options_from_url() {
        let config = StoreConfig::builder("postgres://app@localhost:5433/test").build();
        let options = config.pg_connect_options().unwrap();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("test"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = StoreConfig::builder("not a url").build();
        assert!(matches!(
            config.pg_connect_options(),
            Err(DataAccessError::Connection(_))
        ));
    }

    #[test]
    fn test_missing_credential_named() {
        let pairs: Vec<_> = credentials()
            .into_iter()
            .filter(|(k, _)| *k != ENV_PASSWORD)
            .collect();
        let err = StoreConfig::from_lookup(env(&pairs)).unwrap_err();
        assert!(matches!(err, DataAccessError::Connection(_)));
        assert!(err.to_string().contains(ENV_PASSWORD));
    }

    #[test]
    fn test_empty_credential_rejected() {
        let mut pairs = credentials();
        pairs[0] = (ENV_HOST, "");
        assert!(StoreConfig::from_lookup(env(&pairs)).is_err());
    }

    #[test]
    fn test_bad_port_rejected() {
        let mut pairs = credentials();
        pairs[1] = (ENV_PORT, "fifty");
        assert!(StoreConfig::from_lookup(env(&pairs)).is_err());
    }
}
