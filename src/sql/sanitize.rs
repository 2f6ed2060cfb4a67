//! SQL Identifier Sanitization Utilities
//!
//! Every identifier interpolated into generated SQL goes through
//! [`quote_identifier`]. Values that cannot be quoted (backend type names, tenant
//! ids used in connection strings) are validated against a strict grammar instead.

use std::sync::LazyLock;

use regex::Regex;

/// PostgreSQL truncates identifiers longer than this many bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

static TENANT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]{0,62}$").expect("valid regex"));

// A type name, optional numeric modifiers, optional trailing words
// ("with time zone") and optional array brackets.
static BACKEND_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z][A-Za-z0-9_]*( [A-Za-z][A-Za-z0-9_]*)*( ?\( ?[0-9]+ ?(, ?[0-9]+ ?)?\))?( [A-Za-z]+)*(\[\])*$",
    )
    .expect("valid regex")
});

/// Quote a SQL identifier to make it safe for use in queries
///
/// Total for any input: the identifier is wrapped in double quotes and any
/// embedded double quote is doubled. Case and content are preserved.
///
/// # Example
/// ```
/// use runtara_table_store::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("my_table"), "\"my_table\"");
/// assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Quote a schema-qualified name, e.g. `"public"."lc_t_ab12"`
pub fn qualified_name(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(name))
}

/// Validate a tenant id before it is used as a database name or substituted into a DSN
///
/// Rules:
/// - 1 to 63 characters
/// - ASCII letters, digits, underscores and hyphens
/// - Cannot start with a hyphen
pub fn validate_tenant_id(tenant_id: &str) -> Result<(), String> {
    if tenant_id.is_empty() {
        return Err("Tenant id cannot be empty".to_string());
    }
    if !TENANT_ID.is_match(tenant_id) {
        return Err(format!(
            "Tenant id '{}' is invalid. Use up to 63 letters, digits, underscores or hyphens, not starting with a hyphen.",
            tenant_id
        ));
    }
    Ok(())
}

/// Validate a backend type name before it is interpolated into DDL or a cast
///
/// Accepts forms such as `text`, `numeric(10,2)`, `character varying(64)`,
/// `timestamp with time zone` and `text[]`.
///
/// # Example
/// ```
/// use runtara_table_store::sql::validate_backend_type;
///
/// assert!(validate_backend_type("numeric(12, 2)").is_ok());
/// assert!(validate_backend_type("text; drop table x").is_err());
/// ```
pub fn validate_backend_type(backend_type: &str) -> Result<(), String> {
    if backend_type.trim().is_empty() {
        return Err("Backend type cannot be empty".to_string());
    }
    if backend_type.len() > MAX_IDENTIFIER_LEN || !BACKEND_TYPE.is_match(backend_type) {
        return Err(format!(
            "Backend type '{}' is not a recognizable type name",
            backend_type
        ));
    }
    Ok(())
}

/// Validate a physical schema name
///
/// Any content is quotable; this only rejects names PostgreSQL itself refuses.
pub fn validate_schema_name(schema: &str) -> Result<(), String> {
    if schema.is_empty() {
        return Err("Schema name cannot be empty".to_string());
    }
    if schema.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "Schema name '{}' exceeds {} bytes",
            schema, MAX_IDENTIFIER_LEN
        ));
    }
    if schema.to_lowercase().starts_with("pg_") {
        return Err(format!(
            "Schema name '{}' uses the reserved 'pg_' prefix",
            schema
        ));
    }
    Ok(())
}
