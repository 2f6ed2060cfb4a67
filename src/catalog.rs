//! Metadata catalog access
//!
//! The catalog is four tables (types, tables, columns, indexes) plus the
//! migration ledger, all named with a configurable prefix. Every query takes an
//! executor so it can run on the pool or inside a transaction.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::{Result, TableStoreError};
use crate::schema::{Column, Index, Table, UpdateColumnRequest};
use crate::sql::dml::{DataColumn, DataTable};
use crate::sql::sanitize::quote_identifier;
use crate::types::{ColumnKind, ScalarType};

const TYPE_FIELDS: &str = "id, name, pg_type, config, created_at, updated_at";
const TABLE_FIELDS: &str = "id, name, schema_name, table_name, created_at, updated_at";
const COLUMN_FIELDS: &str = "id, table_id, name, type_id, pg_column, is_nullable, position, config, kind, created_at, updated_at";
const INDEX_FIELDS: &str =
    "id, table_id, name, pg_index, column_ids, is_unique, created_at, updated_at";

/// Quoted names of the catalog tables for one prefix
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTables {
    pub types: String,
    pub tables: String,
    pub columns: String,
    pub indexes: String,
    pub migrations: String,
}

impl CatalogTables {
    pub fn new(prefix: &str) -> Self {
        let name = |suffix: &str| quote_identifier(&format!("{}{}", prefix, suffix));
        Self {
            types: name("types"),
            tables: name("tables"),
            columns: name("columns"),
            indexes: name("indexes"),
            migrations: name("schema_migrations"),
        }
    }
}

/// Values for a new column row
#[derive(Debug, Clone)]
pub struct NewColumn<'a> {
    pub table_id: Uuid,
    pub name: &'a str,
    pub type_id: Uuid,
    pub physical_name: &'a str,
    pub nullable: bool,
    pub position: i32,
    pub config: &'a serde_json::Value,
    pub kind: ColumnKind,
}

/// Values for a new index row
#[derive(Debug, Clone)]
pub struct NewIndex<'a> {
    pub table_id: Uuid,
    pub name: &'a str,
    pub physical_name: &'a str,
    pub column_ids: &'a [Uuid],
    pub unique: bool,
}

/// Catalog queries for one set of catalog tables
#[derive(Debug, Clone)]
pub struct Catalog {
    tables: CatalogTables,
}

impl Catalog {
    pub fn new(prefix: &str) -> Self {
        Self {
            tables: CatalogTables::new(prefix),
        }
    }

    pub fn tables(&self) -> &CatalogTables {
        &self.tables
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// Find a type by id, or by unique name when `type_ref` is not a UUID
    pub async fn find_type<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        type_ref: &str,
    ) -> Result<Option<ScalarType>> {
        let ty = match Uuid::parse_str(type_ref) {
            Ok(id) => {
                let sql = format!("SELECT {} FROM {} WHERE id = $1", TYPE_FIELDS, self.tables.types);
                sqlx::query_as::<_, ScalarType>(&sql)
                    .bind(id)
                    .fetch_optional(exec)
                    .await?
            }
            Err(_) => {
                let sql = format!(
                    "SELECT {} FROM {} WHERE name = $1",
                    TYPE_FIELDS, self.tables.types
                );
                sqlx::query_as::<_, ScalarType>(&sql)
                    .bind(type_ref)
                    .fetch_optional(exec)
                    .await?
            }
        };
        Ok(ty)
    }

    pub async fn list_types<'e, E: PgExecutor<'e>>(&self, exec: E) -> Result<Vec<ScalarType>> {
        let sql = format!("SELECT {} FROM {} ORDER BY name", TYPE_FIELDS, self.tables.types);
        Ok(sqlx::query_as::<_, ScalarType>(&sql).fetch_all(exec).await?)
    }

    pub async fn insert_type<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        name: &str,
        backend_type: &str,
        config: &serde_json::Value,
    ) -> Result<ScalarType> {
        let sql = format!(
            "INSERT INTO {} (name, pg_type, config) VALUES ($1, $2, $3) RETURNING {}",
            self.tables.types, TYPE_FIELDS
        );
        sqlx::query_as::<_, ScalarType>(&sql)
            .bind(name)
            .bind(backend_type)
            .bind(config)
            .fetch_one(exec)
            .await
            .map_err(TableStoreError::interpret)
    }

    /// Delete a type row; a type still referenced by a column is a `Conflict`
    pub async fn delete_type<'e, E: PgExecutor<'e>>(&self, exec: E, id: Uuid) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.tables.types);
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(exec)
            .await
            .map_err(TableStoreError::interpret)?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Tables
    // =========================================================================

    pub async fn find_table<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        id: Uuid,
    ) -> Result<Option<Table>> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", TABLE_FIELDS, self.tables.tables);
        Ok(sqlx::query_as::<_, Table>(&sql)
            .bind(id)
            .fetch_optional(exec)
            .await?)
    }

    pub async fn list_tables<'e, E: PgExecutor<'e>>(&self, exec: E) -> Result<Vec<Table>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY created_at, id",
            TABLE_FIELDS, self.tables.tables
        );
        Ok(sqlx::query_as::<_, Table>(&sql).fetch_all(exec).await?)
    }

    pub async fn insert_table<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        name: &str,
        schema_name: &str,
        physical_name: &str,
    ) -> Result<Table> {
        let sql = format!(
            "INSERT INTO {} (name, schema_name, table_name) VALUES ($1, $2, $3) RETURNING {}",
            self.tables.tables, TABLE_FIELDS
        );
        sqlx::query_as::<_, Table>(&sql)
            .bind(name)
            .bind(schema_name)
            .bind(physical_name)
            .fetch_one(exec)
            .await
            .map_err(TableStoreError::interpret)
    }

    /// Delete a table row; its columns and indexes cascade
    pub async fn delete_table<'e, E: PgExecutor<'e>>(&self, exec: E, id: Uuid) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.tables.tables);
        Ok(sqlx::query(&sql).bind(id).execute(exec).await?.rows_affected())
    }

    // =========================================================================
    // Columns
    // =========================================================================

    pub async fn find_column<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        id: Uuid,
    ) -> Result<Option<Column>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            COLUMN_FIELDS, self.tables.columns
        );
        Ok(sqlx::query_as::<_, Column>(&sql)
            .bind(id)
            .fetch_optional(exec)
            .await?)
    }

    /// All columns of a table, ordered by position
    pub async fn list_columns<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        table_id: Uuid,
    ) -> Result<Vec<Column>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE table_id = $1 ORDER BY position, created_at",
            COLUMN_FIELDS, self.tables.columns
        );
        Ok(sqlx::query_as::<_, Column>(&sql)
            .bind(table_id)
            .fetch_all(exec)
            .await?)
    }

    /// Position after the table's last column
    pub async fn next_position<'e, E: PgExecutor<'e>>(&self, exec: E, table_id: Uuid) -> Result<i32> {
        let sql = format!(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM {} WHERE table_id = $1",
            self.tables.columns
        );
        Ok(sqlx::query_scalar::<_, i32>(&sql)
            .bind(table_id)
            .fetch_one(exec)
            .await?)
    }

    pub async fn insert_column<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        column: &NewColumn<'_>,
    ) -> Result<Column> {
        let sql = format!(
            r#"
            INSERT INTO {} (table_id, name, type_id, pg_column, is_nullable, position, config, kind)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            self.tables.columns, COLUMN_FIELDS
        );
        sqlx::query_as::<_, Column>(&sql)
            .bind(column.table_id)
            .bind(column.name)
            .bind(column.type_id)
            .bind(column.physical_name)
            .bind(column.nullable)
            .bind(column.position)
            .bind(column.config)
            .bind(column.kind.as_str())
            .fetch_one(exec)
            .await
            .map_err(TableStoreError::interpret)
    }

    /// Apply a metadata-only update; `None` if the column does not exist
    pub async fn update_column<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        id: Uuid,
        update: &UpdateColumnRequest,
    ) -> Result<Option<Column>> {
        let sql = format!(
            r#"
            UPDATE {}
            SET name = COALESCE($2, name),
                is_nullable = COALESCE($3, is_nullable),
                position = COALESCE($4, position),
                config = COALESCE($5, config),
                updated_at = now()
            WHERE id = $1
            RETURNING {}
            "#,
            self.tables.columns, COLUMN_FIELDS
        );
        sqlx::query_as::<_, Column>(&sql)
            .bind(id)
            .bind(update.name.as_deref())
            .bind(update.nullable)
            .bind(update.position)
            .bind(update.config.as_ref())
            .fetch_optional(exec)
            .await
            .map_err(TableStoreError::interpret)
    }

    pub async fn delete_column<'e, E: PgExecutor<'e>>(&self, exec: E, id: Uuid) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.tables.columns);
        Ok(sqlx::query(&sql).bind(id).execute(exec).await?.rows_affected())
    }

    /// Relationship columns of a table among the requested ids
    pub async fn relationship_columns<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        table_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<Column>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE table_id = $1 AND id = ANY($2) AND kind = $3 ORDER BY position, created_at",
            COLUMN_FIELDS, self.tables.columns
        );
        Ok(sqlx::query_as::<_, Column>(&sql)
            .bind(table_id)
            .bind(ids)
            .bind(ColumnKind::Relationship.as_str())
            .fetch_all(exec)
            .await?)
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    pub async fn find_index<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        id: Uuid,
    ) -> Result<Option<Index>> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", INDEX_FIELDS, self.tables.indexes);
        Ok(sqlx::query_as::<_, Index>(&sql)
            .bind(id)
            .fetch_optional(exec)
            .await?)
    }

    pub async fn list_indexes<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        table_id: Uuid,
    ) -> Result<Vec<Index>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE table_id = $1 ORDER BY created_at, id",
            INDEX_FIELDS, self.tables.indexes
        );
        Ok(sqlx::query_as::<_, Index>(&sql)
            .bind(table_id)
            .fetch_all(exec)
            .await?)
    }

    pub async fn insert_index<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        index: &NewIndex<'_>,
    ) -> Result<Index> {
        let sql = format!(
            r#"
            INSERT INTO {} (table_id, name, pg_index, column_ids, is_unique)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            self.tables.indexes, INDEX_FIELDS
        );
        sqlx::query_as::<_, Index>(&sql)
            .bind(index.table_id)
            .bind(index.name)
            .bind(index.physical_name)
            .bind(index.column_ids)
            .bind(index.unique)
            .fetch_one(exec)
            .await
            .map_err(TableStoreError::interpret)
    }

    pub async fn delete_index<'e, E: PgExecutor<'e>>(&self, exec: E, id: Uuid) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.tables.indexes);
        Ok(sqlx::query(&sql).bind(id).execute(exec).await?.rows_affected())
    }

    // =========================================================================
    // Row mapping
    // =========================================================================

    /// Physical location and physical columns of a table, ordered by position
    ///
    /// Fails with `TableNotFound` when the table is not in the catalog; a table
    /// without physical columns yields an empty column list.
    pub async fn load_data_table<'e, E: PgExecutor<'e>>(
        &self,
        exec: E,
        table_id: Uuid,
    ) -> Result<DataTable> {
        let sql = format!(
            r#"
            SELECT t.schema_name, t.table_name, c.id, c.pg_column, ty.pg_type
            FROM {tables} t
            LEFT JOIN {columns} c ON c.table_id = t.id AND c.kind = $2
            LEFT JOIN {types} ty ON ty.id = c.type_id
            WHERE t.id = $1
            ORDER BY c.position, c.created_at
            "#,
            tables = self.tables.tables,
            columns = self.tables.columns,
            types = self.tables.types,
        );
        let rows: Vec<(String, String, Option<Uuid>, Option<String>, Option<String>)> =
            sqlx::query_as(&sql)
                .bind(table_id)
                .bind(ColumnKind::Physical.as_str())
                .fetch_all(exec)
                .await?;

        let Some((schema_name, physical_name, ..)) = rows.first().cloned() else {
            return Err(TableStoreError::table_not_found(table_id));
        };

        let columns = rows
            .into_iter()
            .filter_map(|(_, _, id, column, backend_type)| {
                Some(DataColumn::new(id?, column?, backend_type?))
            })
            .collect();

        Ok(DataTable {
            table_id,
            schema_name,
            physical_name,
            columns,
        })
    }
}
