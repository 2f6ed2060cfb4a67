//! Configuration for TableStore
//!
//! Provides a builder pattern for configuring the store, plus loading from the
//! process environment or a TOML document.

use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{Result, TableStoreError};

/// Page size used when a caller does not ask for one and none is configured
pub const FALLBACK_PAGE_SIZE: i64 = 50;

/// Upper bound on a page when no maximum is configured
pub const FALLBACK_MAX_PAGE_SIZE: i64 = 100;

/// Placeholders accepted in a tenant DSN template
pub const TENANT_PLACEHOLDERS: [&str; 2] = ["{tenant}", "%s"];

/// How tenants map onto databases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantMode {
    /// One shared database; the tenant selector is ignored
    Single,
    /// One database per tenant, created on first use
    Multi,
}

impl std::str::FromStr for TenantMode {
    type Err = TableStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(TenantMode::Single),
            "multi" => Ok(TenantMode::Multi),
            other => Err(TableStoreError::config(format!(
                "invalid tenant mode {:?} (expected \"single\" or \"multi\")",
                other
            ))),
        }
    }
}

/// Connection pool bounds applied to every pool the store opens
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Maximum lifetime of an individual connection
    pub max_lifetime: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            max_lifetime: Duration::from_secs(60 * 60),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Page size bounds for `list_rows`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowLimits {
    /// Page size used when the request does not specify a positive one
    pub default_page_size: Option<i64>,
    /// Hard upper bound on a page
    pub max_page_size: Option<i64>,
}

impl RowLimits {
    /// Resolve the page size for a request
    ///
    /// A non-positive request falls back to the default page size (or the
    /// configured maximum when no default is set); the result never exceeds the
    /// configured maximum.
    pub fn effective_page_size(&self, requested: i64) -> i64 {
        let cap = self.max_page_size.unwrap_or(FALLBACK_MAX_PAGE_SIZE);
        let size = if requested > 0 {
            requested
        } else {
            self.default_page_size
                .or(self.max_page_size)
                .unwrap_or(FALLBACK_PAGE_SIZE)
        };
        size.min(cap)
    }
}

/// Configuration for the table store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub tenant_mode: TenantMode,
    /// Data database DSN in single-tenant mode
    pub database_url: Option<String>,
    /// Administrative DSN; in single-tenant mode it is used to create the data database
    pub admin_database_url: Option<String>,
    /// Per-tenant DSN template with one `{tenant}` (or `%s`) placeholder
    pub tenant_dsn_template: Option<String>,
    /// Database the multi-tenant admin pool connects to (default: "postgres")
    pub tenant_admin_db: String,
    /// Prefix of the catalog tables (default: "lc_")
    pub catalog_prefix: String,
    /// Physical schema for tables created without one (default: "public")
    pub default_schema: String,
    pub rows: RowLimits,
    pub pool: PoolSettings,
}

impl StoreConfig {
    /// Start a single-tenant configuration against the given data database
    pub fn single(database_url: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(TenantMode::Single).database_url(database_url)
    }

    /// Start a multi-tenant configuration from a DSN template
    pub fn multi(tenant_dsn_template: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(TenantMode::Multi).tenant_dsn_template(tenant_dsn_template)
    }

    /// Load configuration from environment variables
    ///
    /// Reads `TENANT_MODE`, `DATABASE_URL`, `SINGLE_DATABASE_URL`,
    /// `TENANT_DSN_TEMPLATE`, `TENANT_ADMIN_DB`, `MAX_ROW` and `DEFAULT_PAGE_SIZE`.
    pub fn from_env() -> Result<Self> {
        let settings: RawSettings = Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.into_config()
    }

    /// Load configuration from a TOML document using the same keys as the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings: RawSettings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.into_config()
    }

    /// Check that the configuration is usable for its tenant mode
    pub fn validate(&self) -> Result<()> {
        match self.tenant_mode {
            TenantMode::Single => {
                if self.data_database_url().is_none() {
                    return Err(TableStoreError::config(
                        "single tenant mode requires SINGLE_DATABASE_URL or DATABASE_URL",
                    ));
                }
            }
            TenantMode::Multi => {
                let template = self.tenant_dsn_template.as_deref().ok_or_else(|| {
                    TableStoreError::config("multi tenant mode requires TENANT_DSN_TEMPLATE")
                })?;
                let placeholders: usize = TENANT_PLACEHOLDERS
                    .iter()
                    .map(|p| template.matches(p).count())
                    .sum();
                if placeholders != 1 {
                    return Err(TableStoreError::config(format!(
                        "TENANT_DSN_TEMPLATE must contain exactly one tenant placeholder, found {}",
                        placeholders
                    )));
                }
                if self.tenant_admin_db.trim().is_empty() {
                    return Err(TableStoreError::config("TENANT_ADMIN_DB cannot be empty"));
                }
            }
        }

        if self.catalog_prefix.is_empty() {
            return Err(TableStoreError::config("catalog prefix cannot be empty"));
        }
        for (name, value) in [
            ("default page size", self.rows.default_page_size),
            ("max page size", self.rows.max_page_size),
        ] {
            if matches!(value, Some(n) if n <= 0) {
                return Err(TableStoreError::config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    /// DSN of the single-tenant data database (falls back to the admin DSN)
    pub fn data_database_url(&self) -> Option<&str> {
        self.database_url
            .as_deref()
            .or(self.admin_database_url.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Render the tenant DSN template for a tenant (or admin) database name
    pub fn tenant_dsn(&self, database: &str) -> Option<String> {
        let template = self.tenant_dsn_template.as_deref()?;
        TENANT_PLACEHOLDERS
            .iter()
            .find(|p| template.contains(*p))
            .map(|p| template.replacen(p, database, 1))
    }
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Create a new builder for the given tenant mode with default settings
    pub fn new(tenant_mode: TenantMode) -> Self {
        Self {
            config: StoreConfig {
                tenant_mode,
                database_url: None,
                admin_database_url: None,
                tenant_dsn_template: None,
                tenant_admin_db: "postgres".to_string(),
                catalog_prefix: "lc_".to_string(),
                default_schema: "public".to_string(),
                rows: RowLimits::default(),
                pool: PoolSettings::default(),
            },
        }
    }

    /// Set the single-tenant data database DSN
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    /// Set the administrative DSN
    pub fn admin_database_url(mut self, url: impl Into<String>) -> Self {
        self.config.admin_database_url = Some(url.into());
        self
    }

    /// Set the per-tenant DSN template
    pub fn tenant_dsn_template(mut self, template: impl Into<String>) -> Self {
        self.config.tenant_dsn_template = Some(template.into());
        self
    }

    /// Set the database used by the multi-tenant admin pool (default: "postgres")
    pub fn tenant_admin_db(mut self, name: impl Into<String>) -> Self {
        self.config.tenant_admin_db = name.into();
        self
    }

    /// Set the catalog table prefix (default: "lc_")
    pub fn catalog_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.catalog_prefix = prefix.into();
        self
    }

    /// Set the default physical schema (default: "public")
    pub fn default_schema(mut self, schema: impl Into<String>) -> Self {
        self.config.default_schema = schema.into();
        self
    }

    /// Set the page size used when a request does not specify one
    pub fn default_page_size(mut self, size: i64) -> Self {
        self.config.rows.default_page_size = Some(size);
        self
    }

    /// Set the maximum page size
    pub fn max_page_size(mut self, size: i64) -> Self {
        self.config.rows.max_page_size = Some(size);
        self
    }

    /// Set the maximum number of connections per pool (default: 10)
    pub fn max_connections(mut self, n: u32) -> Self {
        self.config.pool.max_connections = n;
        self
    }

    /// Set the minimum number of idle connections per pool (default: 1)
    pub fn min_connections(mut self, n: u32) -> Self {
        self.config.pool.min_connections = n;
        self
    }

    /// Set the maximum lifetime of a pooled connection (default: 1 hour)
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.pool.max_lifetime = lifetime;
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        self.config
    }
}

/// Flat key/value view of the configuration, as it appears in the environment
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    tenant_mode: Option<String>,
    database_url: Option<String>,
    single_database_url: Option<String>,
    tenant_dsn_template: Option<String>,
    tenant_admin_db: Option<String>,
    max_row: Option<i64>,
    default_page_size: Option<i64>,
    catalog_prefix: Option<String>,
    default_schema: Option<String>,
}

impl RawSettings {
    fn into_config(self) -> Result<StoreConfig> {
        let mode = match non_empty(self.tenant_mode) {
            Some(mode) => mode.parse()?,
            None => TenantMode::Single,
        };

        let mut builder = StoreConfigBuilder::new(mode);
        let admin_url = non_empty(self.database_url);
        if let Some(url) = non_empty(self.single_database_url).or_else(|| admin_url.clone()) {
            builder = builder.database_url(url);
        }
        if let Some(url) = admin_url {
            builder = builder.admin_database_url(url);
        }
        if let Some(template) = non_empty(self.tenant_dsn_template) {
            builder = builder.tenant_dsn_template(template);
        }
        if let Some(db) = non_empty(self.tenant_admin_db) {
            builder = builder.tenant_admin_db(db);
        }
        if let Some(prefix) = non_empty(self.catalog_prefix) {
            builder = builder.catalog_prefix(prefix);
        }
        if let Some(schema) = non_empty(self.default_schema) {
            builder = builder.default_schema(schema);
        }
        // Non-positive values mean "use the built-in defaults"
        if let Some(max) = self.max_row.filter(|n| *n > 0) {
            builder = builder.max_page_size(max);
        }
        if let Some(size) = self.default_page_size.filter(|n| *n > 0) {
            builder = builder.default_page_size(size);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Builder Tests
    // =========================================================================

    #[test]
    fn test_single_defaults() {
        let config = StoreConfig::single("postgres://localhost/tables").build();

        assert_eq!(config.tenant_mode, TenantMode::Single);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/tables"));
        assert_eq!(config.tenant_admin_db, "postgres");
        assert_eq!(config.catalog_prefix, "lc_");
        assert_eq!(config.default_schema, "public");
        assert_eq!(config.pool, PoolSettings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_defaults() {
        let pool = PoolSettings::default();
        assert_eq!(pool.max_connections, 10);
        assert_eq!(pool.min_connections, 1);
        assert_eq!(pool.max_lifetime, Duration::from_secs(3600));
    }

    #[test]
    fn test_builder_overrides() {
        let config = StoreConfig::multi("postgres://u:p@db:5432/{tenant}")
            .tenant_admin_db("template1")
            .catalog_prefix("meta_")
            .default_schema("app")
            .default_page_size(20)
            .max_page_size(200)
            .max_connections(4)
            .build();

        assert_eq!(config.tenant_mode, TenantMode::Multi);
        assert_eq!(config.tenant_admin_db, "template1");
        assert_eq!(config.catalog_prefix, "meta_");
        assert_eq!(config.default_schema, "app");
        assert_eq!(config.rows.default_page_size, Some(20));
        assert_eq!(config.rows.max_page_size, Some(200));
        assert_eq!(config.pool.max_connections, 4);
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_single_requires_database_url() {
        let config = StoreConfigBuilder::new(TenantMode::Single).build();
        assert!(matches!(config.validate(), Err(TableStoreError::Config(_))));
    }

    #[test]
    fn test_single_falls_back_to_admin_url() {
        let config = StoreConfigBuilder::new(TenantMode::Single)
            .admin_database_url("postgres://localhost/postgres")
            .build();
        assert_eq!(config.data_database_url(), Some("postgres://localhost/postgres"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_multi_requires_template() {
        let config = StoreConfigBuilder::new(TenantMode::Multi).build();
        assert!(matches!(config.validate(), Err(TableStoreError::Config(_))));
    }

    #[test]
    fn test_multi_template_needs_exactly_one_placeholder() {
        let none = StoreConfig::multi("postgres://db/fixed").build();
        assert!(none.validate().is_err());

        let two = StoreConfig::multi("postgres://{tenant}@db/{tenant}").build();
        assert!(two.validate().is_err());

        let mixed = StoreConfig::multi("postgres://%s@db/{tenant}").build();
        assert!(mixed.validate().is_err());

        let printf = StoreConfig::multi("postgres://db:5432/%s").build();
        assert!(printf.validate().is_ok());
    }

    #[test]
    fn test_page_sizes_must_be_positive() {
        let config = StoreConfig::single("postgres://localhost/t")
            .max_page_size(0)
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tenant_dsn_rendering() {
        let config = StoreConfig::multi("postgres://u:p@db:5432/{tenant}?sslmode=disable").build();
        assert_eq!(
            config.tenant_dsn("acme").as_deref(),
            Some("postgres://u:p@db:5432/acme?sslmode=disable")
        );

        let printf = StoreConfig::multi("postgres://db/%s").build();
        assert_eq!(printf.tenant_dsn("postgres").as_deref(), Some("postgres://db/postgres"));

        let single = StoreConfig::single("postgres://db/x").build();
        assert!(single.tenant_dsn("acme").is_none());
    }

    #[test]
    fn test_tenant_mode_parse() {
        assert_eq!("single".parse::<TenantMode>().unwrap(), TenantMode::Single);
        assert_eq!(" MULTI ".parse::<TenantMode>().unwrap(), TenantMode::Multi);
        assert!("both".parse::<TenantMode>().is_err());
    }

    // =========================================================================
    // Page Size Tests
    // =========================================================================

    #[test]
    fn test_page_size_fallbacks_when_unconfigured() {
        let limits = RowLimits::default();
        assert_eq!(limits.effective_page_size(0), FALLBACK_PAGE_SIZE);
        assert_eq!(limits.effective_page_size(-5), FALLBACK_PAGE_SIZE);
        assert_eq!(limits.effective_page_size(10), 10);
        assert_eq!(limits.effective_page_size(1_000), FALLBACK_MAX_PAGE_SIZE);
    }

    #[test]
    fn test_page_size_max_acts_as_default() {
        let limits = RowLimits {
            default_page_size: None,
            max_page_size: Some(25),
        };
        assert_eq!(limits.effective_page_size(0), 25);
        assert_eq!(limits.effective_page_size(30), 25);
        assert_eq!(limits.effective_page_size(7), 7);
    }

    #[test]
    fn test_page_size_default_is_clamped() {
        let limits = RowLimits {
            default_page_size: Some(500),
            max_page_size: Some(100),
        };
        assert_eq!(limits.effective_page_size(0), 100);

        let limits = RowLimits {
            default_page_size: Some(20),
            max_page_size: Some(100),
        };
        assert_eq!(limits.effective_page_size(0), 20);
        assert_eq!(limits.effective_page_size(101), 100);
    }

    // =========================================================================
    // Loading Tests
    // =========================================================================

    #[test]
    fn test_load_single_from_toml() {
        let config = StoreConfig::from_toml_str(
            r#"
            tenant_mode = "single"
            database_url = "postgres://admin@localhost/postgres"
            single_database_url = "postgres://admin@localhost/tables"
            max_row = 40
            "#,
        )
        .unwrap();

        assert_eq!(config.tenant_mode, TenantMode::Single);
        assert_eq!(config.database_url.as_deref(), Some("postgres://admin@localhost/tables"));
        assert_eq!(
            config.admin_database_url.as_deref(),
            Some("postgres://admin@localhost/postgres")
        );
        assert_eq!(config.rows.max_page_size, Some(40));
        assert_eq!(config.rows.effective_page_size(0), 40);
    }

    #[test]
    fn test_load_single_database_url_fallback() {
        let config = StoreConfig::from_toml_str(
            r#"
            database_url = "postgres://localhost/tables"
            "#,
        )
        .unwrap();

        assert_eq!(config.tenant_mode, TenantMode::Single);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/tables"));
    }

    #[test]
    fn test_load_multi_from_toml() {
        let config = StoreConfig::from_toml_str(
            r#"
            tenant_mode = "multi"
            tenant_dsn_template = "postgres://u:p@db:5432/%s"
            "#,
        )
        .unwrap();

        assert_eq!(config.tenant_mode, TenantMode::Multi);
        assert_eq!(config.tenant_admin_db, "postgres");
        assert_eq!(config.rows, RowLimits::default());
    }

    #[test]
    fn test_load_rejects_invalid_mode() {
        let result = StoreConfig::from_toml_str(
            r#"
            tenant_mode = "sharded"
            database_url = "postgres://localhost/tables"
            "#,
        );
        assert!(matches!(result, Err(TableStoreError::Config(_))));
    }

    #[test]
    fn test_load_multi_without_template_fails() {
        let result = StoreConfig::from_toml_str(r#"tenant_mode = "multi""#);
        assert!(matches!(result, Err(TableStoreError::Config(_))));
    }

    #[test]
    fn test_load_ignores_non_positive_max_row() {
        let config = StoreConfig::from_toml_str(
            r#"
            database_url = "postgres://localhost/tables"
            max_row = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.rows.max_page_size, None);
    }
}
