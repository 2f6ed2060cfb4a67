//! DDL Generation for Dynamic Schema Management
//!
//! Generates PostgreSQL DDL statements that keep physical tables, columns and
//! indexes in step with the catalog. Physical names are generated here and
//! never derived from logical names.

use uuid::Uuid;

use crate::config::StoreConfig;
use crate::sql::sanitize::{qualified_name, quote_identifier};

/// Prefix of generated physical table names
pub const TABLE_PREFIX: &str = "lc_t_";
/// Prefix of generated physical column names
pub const COLUMN_PREFIX: &str = "c_";
/// Prefix of placeholder names recorded for virtual columns
pub const VIRTUAL_PREFIX: &str = "v_";
/// Prefix of generated physical index names
pub const INDEX_PREFIX: &str = "lc_idx_";

/// Name of the system primary key column on every physical table
pub const ID_COLUMN: &str = "id";

/// Fresh physical table name, e.g. `lc_t_3f2a...`
pub fn new_table_name() -> String {
    generated_name(TABLE_PREFIX)
}

/// Fresh physical column name
pub fn new_column_name() -> String {
    generated_name(COLUMN_PREFIX)
}

/// Fresh placeholder name for a virtual column
///
/// Drawn from a prefix no physical column uses, so a placeholder can never
/// alias a real column.
pub fn new_virtual_column_name() -> String {
    generated_name(VIRTUAL_PREFIX)
}

/// Fresh physical index name
pub fn new_index_name() -> String {
    generated_name(INDEX_PREFIX)
}

fn generated_name(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple())
}

/// DDL Generator for dynamic tables
pub struct DdlGenerator<'a> {
    config: &'a StoreConfig,
}

impl<'a> DdlGenerator<'a> {
    /// Create a new DDL generator with the given configuration
    pub fn new(config: &'a StoreConfig) -> Self {
        Self { config }
    }

    /// Physical schema for a new table: the requested one or the configured default
    pub fn table_schema<'b>(&'b self, requested: Option<&'b str>) -> &'b str {
        match requested {
            Some(schema) if !schema.is_empty() => schema,
            _ => &self.config.default_schema,
        }
    }

    /// Generate CREATE SCHEMA IF NOT EXISTS statement
    pub fn generate_create_schema(&self, schema: &str) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema))
    }

    /// Generate CREATE TABLE statement
    ///
    /// The new table has only the system id column; data columns are added one
    /// at a time as the catalog gains columns.
    pub fn generate_create_table(&self, schema: &str, table: &str) -> String {
        format!(
            "CREATE TABLE {} ({} UUID PRIMARY KEY DEFAULT gen_random_uuid())",
            qualified_name(schema, table),
            ID_COLUMN
        )
    }

    /// Generate DROP TABLE statement, tolerating an already-missing table
    pub fn generate_drop_table(&self, schema: &str, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", qualified_name(schema, table))
    }

    /// Generate ALTER TABLE ADD COLUMN statement
    ///
    /// `backend_type` is interpolated as-is and must already be validated.
    pub fn generate_add_column(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        backend_type: &str,
        nullable: bool,
    ) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {} {}",
            qualified_name(schema, table),
            quote_identifier(column),
            backend_type,
            if nullable { "NULL" } else { "NOT NULL" }
        )
    }

    /// Generate ALTER TABLE DROP COLUMN statement, tolerating an already-missing column
    pub fn generate_drop_column(&self, schema: &str, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
            qualified_name(schema, table),
            quote_identifier(column)
        )
    }

    /// Generate CREATE INDEX statement
    pub fn generate_create_index(
        &self,
        schema: &str,
        table: &str,
        index: &str,
        columns: &[&str],
        unique: bool,
    ) -> String {
        let quoted_columns: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
        let unique_clause = if unique { "UNIQUE " } else { "" };

        format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique_clause,
            quote_identifier(index),
            qualified_name(schema, table),
            quoted_columns.join(", ")
        )
    }

    /// Generate DROP INDEX statement, tolerating an already-missing index
    ///
    /// Indexes live in their table's schema, so the name is schema-qualified.
    pub fn generate_drop_index(&self, schema: &str, index: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", qualified_name(schema, index))
    }

    /// Generate CREATE DATABASE statement
    pub fn generate_create_database(&self, database: &str) -> String {
        format!("CREATE DATABASE {}", quote_identifier(database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Test Configuration Helpers ====================

    fn config() -> StoreConfig {
        StoreConfig::single("postgres://localhost/test").build()
    }

    fn config_with_schema(schema: &str) -> StoreConfig {
        StoreConfig::single("postgres://localhost/test")
            .default_schema(schema)
            .build()
    }

    // ==================== Generated Name Tests ====================

    #[test]
    fn test_generated_names_use_distinct_prefixes() {
        let table = new_table_name();
        let column = new_column_name();
        let placeholder = new_virtual_column_name();
        let index = new_index_name();

        assert!(table.starts_with("lc_t_"));
        assert!(column.starts_with("c_"));
        assert!(placeholder.starts_with("v_"));
        assert!(index.starts_with("lc_idx_"));
        assert_eq!(column.len(), 2 + 32);
        assert!(index.len() <= crate::sql::sanitize::MAX_IDENTIFIER_LEN);
    }

    #[test]
    fn test_virtual_and_physical_names_never_collide() {
        let mut physical = std::collections::HashSet::new();
        let mut placeholders = std::collections::HashSet::new();
        for _ in 0..200 {
            assert!(physical.insert(new_column_name()));
            assert!(placeholders.insert(new_virtual_column_name()));
        }
        assert!(physical.is_disjoint(&placeholders));
    }

    // ==================== Schema Tests ====================

    #[test]
    fn test_table_schema_default() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(ddl.table_schema(None), "public");
        assert_eq!(ddl.table_schema(Some("")), "public");
        assert_eq!(ddl.table_schema(Some("sales")), "sales");
    }

    #[test]
    fn test_table_schema_configured_default() {
        let config = config_with_schema("app");
        let ddl = DdlGenerator::new(&config);
        assert_eq!(ddl.table_schema(None), "app");
    }

    #[test]
    fn test_generate_create_schema() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(
            ddl.generate_create_schema("sales"),
            "CREATE SCHEMA IF NOT EXISTS \"sales\""
        );
    }

    // ==================== CREATE / DROP TABLE Tests ====================

    #[test]
    fn test_generate_create_table() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(
            ddl.generate_create_table("public", "lc_t_1"),
            "CREATE TABLE \"public\".\"lc_t_1\" (id UUID PRIMARY KEY DEFAULT gen_random_uuid())"
        );
    }

    #[test]
    fn test_generate_drop_table() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(
            ddl.generate_drop_table("public", "lc_t_1"),
            "DROP TABLE IF EXISTS \"public\".\"lc_t_1\" CASCADE"
        );
    }

    #[test]
    fn test_generate_drop_table_special_schema() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        let sql = ddl.generate_drop_table("my\"schema", "t");
        assert_eq!(sql, "DROP TABLE IF EXISTS \"my\"\"schema\".\"t\" CASCADE");
    }

    // ==================== Column Tests ====================

    #[test]
    fn test_generate_add_column_nullable() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(
            ddl.generate_add_column("public", "lc_t_1", "c_1", "numeric", true),
            "ALTER TABLE \"public\".\"lc_t_1\" ADD COLUMN \"c_1\" numeric NULL"
        );
    }

    #[test]
    fn test_generate_add_column_not_null() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(
            ddl.generate_add_column("public", "lc_t_1", "c_1", "timestamp with time zone", false),
            "ALTER TABLE \"public\".\"lc_t_1\" ADD COLUMN \"c_1\" timestamp with time zone NOT NULL"
        );
    }

    #[test]
    fn test_generate_drop_column() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(
            ddl.generate_drop_column("public", "lc_t_1", "c_1"),
            "ALTER TABLE \"public\".\"lc_t_1\" DROP COLUMN IF EXISTS \"c_1\""
        );
    }

    // ==================== Index Tests ====================

    #[test]
    fn test_generate_create_index() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(
            ddl.generate_create_index("public", "lc_t_1", "lc_idx_1", &["c_1"], false),
            "CREATE INDEX \"lc_idx_1\" ON \"public\".\"lc_t_1\" (\"c_1\")"
        );
    }

    #[test]
    fn test_generate_create_unique_multi_column_index() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(
            ddl.generate_create_index("s", "t", "i", &["c_a", "c_b"], true),
            "CREATE UNIQUE INDEX \"i\" ON \"s\".\"t\" (\"c_a\", \"c_b\")"
        );
    }

    #[test]
    fn test_generate_drop_index() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(
            ddl.generate_drop_index("public", "lc_idx_1"),
            "DROP INDEX IF EXISTS \"public\".\"lc_idx_1\""
        );
    }

    // ==================== Database Tests ====================

    #[test]
    fn test_generate_create_database() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(ddl.generate_create_database("acme"), "CREATE DATABASE \"acme\"");
        assert_eq!(ddl.generate_create_database("Acme-Corp"), "CREATE DATABASE \"Acme-Corp\"");
    }
}
