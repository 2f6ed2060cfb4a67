//! TableStore - Main entry point for runtime-defined tables
//!
//! This module provides the `TableStore` struct. Schema operations keep the
//! catalog and the physical objects in step: each one changes both inside a
//! single transaction, so a failure leaves neither half applied.

use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::{Catalog, NewColumn, NewIndex};
use crate::config::{StoreConfig, TenantMode};
use crate::error::{Result, TableStoreError};
use crate::schema::{
    AddColumnRequest, Column, CreateIndexRequest, CreateTableRequest, CreateTypeRequest, Index,
    Table, TableSchema, UpdateColumnRequest,
};
use crate::sql::ddl::{self, DdlGenerator};
use crate::sql::sanitize::{validate_backend_type, validate_schema_name};
use crate::tenant::{TenantContext, TenantPoolManager, TenantState};
use crate::types::{ColumnKind, ScalarType};

/// Runtime-defined tables on PostgreSQL, one catalog per tenant database
///
/// Every operation takes the caller's [`TenantContext`]. In single-tenant mode
/// the context is ignored; in multi-tenant mode it selects (and on first use
/// provisions) the tenant's database.
pub struct TableStore {
    /// Tenant pools
    pub(crate) manager: TenantPoolManager,
    /// Catalog queries for the configured prefix
    pub(crate) catalog: Catalog,
}

impl TableStore {
    /// Connect and bootstrap according to the configuration
    ///
    /// In single-tenant mode this creates (if needed) and migrates the data
    /// database before returning.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let catalog = Catalog::new(&config.catalog_prefix);
        let manager = TenantPoolManager::connect(config).await?;
        Ok(Self { manager, catalog })
    }

    /// Build a store around an existing pool manager
    pub fn from_manager(manager: TenantPoolManager) -> Self {
        let catalog = Catalog::new(&manager.config().catalog_prefix);
        Self { manager, catalog }
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &StoreConfig {
        self.manager.config()
    }

    pub fn manager(&self) -> &TenantPoolManager {
        &self.manager
    }

    /// Close every pool
    pub async fn close(&self) {
        self.manager.close().await;
    }

    // =========================================================================
    // Tenant Operations
    // =========================================================================

    /// Create a tenant database and bootstrap its catalog (multi-tenant mode only)
    pub async fn create_tenant(&self, tenant_id: &str) -> Result<()> {
        self.manager.create_tenant(tenant_id).await
    }

    pub async fn tenant_state(&self, tenant_id: &str) -> TenantState {
        self.manager.tenant_state(tenant_id).await
    }

    pub fn tenant_mode(&self) -> TenantMode {
        self.manager.mode()
    }

    // =========================================================================
    // Type Operations
    // =========================================================================

    /// Register a scalar type
    ///
    /// The backend type name is checked against a conservative grammar because
    /// it is later interpolated into ADD COLUMN statements. A `kind` of
    /// `formula` or `relationship` in the config makes the type virtual.
    pub async fn create_type(
        &self,
        ctx: &TenantContext,
        request: CreateTypeRequest,
    ) -> Result<ScalarType> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(TableStoreError::validation("type name is required"));
        }
        validate_backend_type(&request.backend_type).map_err(TableStoreError::validation)?;

        let config = request
            .config
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

        let pool = self.manager.pool_for(ctx).await?;
        let ty = self
            .catalog
            .insert_type(&pool, name, &request.backend_type, &config)
            .await?;

        info!(type_id = %ty.id, name = %ty.name, kind = %ty.kind(), "Created type");
        Ok(ty)
    }

    pub async fn list_types(&self, ctx: &TenantContext) -> Result<Vec<ScalarType>> {
        let pool = self.manager.pool_for(ctx).await?;
        self.catalog.list_types(&pool).await
    }

    /// Delete a type by id or name
    ///
    /// Deleting a missing type succeeds. A type still used by a column is a
    /// `Conflict`.
    pub async fn delete_type(&self, ctx: &TenantContext, type_ref: &str) -> Result<()> {
        let pool = self.manager.pool_for(ctx).await?;
        let Some(ty) = self.catalog.find_type(&pool, type_ref).await? else {
            debug!(type_ref, "Type already deleted");
            return Ok(());
        };

        self.catalog.delete_type(&pool, ty.id).await?;
        info!(type_id = %ty.id, name = %ty.name, "Deleted type");
        Ok(())
    }

    // =========================================================================
    // Table Operations
    // =========================================================================

    /// Create a logical table and its physical table
    ///
    /// This will, in one transaction:
    /// 1. Create the physical schema if missing
    /// 2. Create the physical table with only the `id` column
    /// 3. Insert the catalog row
    pub async fn create_table(
        &self,
        ctx: &TenantContext,
        request: CreateTableRequest,
    ) -> Result<Table> {
        if request.name.trim().is_empty() {
            return Err(TableStoreError::validation("table name is required"));
        }

        let ddl = DdlGenerator::new(self.config());
        let schema_name = ddl.table_schema(request.schema_name.as_deref()).to_string();
        validate_schema_name(&schema_name).map_err(TableStoreError::validation)?;
        let physical_name = ddl::new_table_name();

        let pool = self.manager.pool_for(ctx).await?;
        let mut tx = pool.begin().await?;

        sqlx::query(&ddl.generate_create_schema(&schema_name))
            .execute(&mut *tx)
            .await?;
        let create_sql = ddl.generate_create_table(&schema_name, &physical_name);
        debug!(sql = %create_sql, "Creating physical table");
        sqlx::query(&create_sql).execute(&mut *tx).await?;

        let table = self
            .catalog
            .insert_table(&mut *tx, &request.name, &schema_name, &physical_name)
            .await?;
        tx.commit().await?;

        info!(table_id = %table.id, name = %table.name, physical = %table.physical_name, "Created table");
        Ok(table)
    }

    /// Drop a table's physical table and catalog entries
    ///
    /// A table that does not exist counts as already deleted.
    pub async fn delete_table(&self, ctx: &TenantContext, table_id: Uuid) -> Result<()> {
        let pool = self.manager.pool_for(ctx).await?;
        let Some(table) = self.catalog.find_table(&pool, table_id).await? else {
            debug!(%table_id, "Table already deleted");
            return Ok(());
        };

        let ddl = DdlGenerator::new(self.config());
        let mut tx = pool.begin().await?;
        sqlx::query(&ddl.generate_drop_table(&table.schema_name, &table.physical_name))
            .execute(&mut *tx)
            .await?;
        self.catalog.delete_table(&mut *tx, table.id).await?;
        tx.commit().await?;

        info!(%table_id, physical = %table.physical_name, "Dropped table");
        Ok(())
    }

    pub async fn list_tables(&self, ctx: &TenantContext) -> Result<Vec<Table>> {
        let pool = self.manager.pool_for(ctx).await?;
        self.catalog.list_tables(&pool).await
    }

    /// A table with its columns and indexes
    pub async fn get_table_schema(
        &self,
        ctx: &TenantContext,
        table_id: Uuid,
    ) -> Result<TableSchema> {
        let pool = self.manager.pool_for(ctx).await?;
        let table = self
            .catalog
            .find_table(&pool, table_id)
            .await?
            .ok_or_else(|| TableStoreError::table_not_found(table_id))?;
        let columns = self.catalog.list_columns(&pool, table_id).await?;
        let indexes = self.catalog.list_indexes(&pool, table_id).await?;

        Ok(TableSchema {
            table,
            columns,
            indexes,
        })
    }

    // =========================================================================
    // Column Operations
    // =========================================================================

    /// Add a column to a table
    ///
    /// Virtual columns (formula, relationship) get a `v_` placeholder name and
    /// no physical column. Physical columns are added with ALTER TABLE in the
    /// same transaction as the catalog insert.
    pub async fn add_column(&self, ctx: &TenantContext, request: AddColumnRequest) -> Result<Column> {
        if request.name.trim().is_empty() {
            return Err(TableStoreError::validation("column name is required"));
        }

        let pool = self.manager.pool_for(ctx).await?;
        let mut tx = pool.begin().await?;

        let table = self
            .catalog
            .find_table(&mut *tx, request.table_id)
            .await?
            .ok_or_else(|| TableStoreError::table_not_found(request.table_id))?;
        let ty = self
            .catalog
            .find_type(&mut *tx, &request.type_ref)
            .await?
            .ok_or_else(|| TableStoreError::type_not_found(&request.type_ref))?;
        let kind = ty.kind();

        let physical_name = if kind.is_virtual() {
            ddl::new_virtual_column_name()
        } else {
            validate_backend_type(&ty.backend_type).map_err(TableStoreError::validation)?;
            let name = ddl::new_column_name();
            let alter = DdlGenerator::new(self.config()).generate_add_column(
                &table.schema_name,
                &table.physical_name,
                &name,
                &ty.backend_type,
                request.nullable,
            );
            debug!(sql = %alter, "Adding physical column");
            sqlx::query(&alter).execute(&mut *tx).await?;
            name
        };

        let position = match request.position {
            Some(position) => position,
            None => self.catalog.next_position(&mut *tx, table.id).await?,
        };
        let config = request
            .config
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

        let column = self
            .catalog
            .insert_column(
                &mut *tx,
                &NewColumn {
                    table_id: table.id,
                    name: &request.name,
                    type_id: ty.id,
                    physical_name: &physical_name,
                    nullable: request.nullable,
                    position,
                    config: &config,
                    kind,
                },
            )
            .await?;
        tx.commit().await?;

        info!(
            column_id = %column.id,
            table_id = %table.id,
            name = %column.name,
            %kind,
            "Added column"
        );
        Ok(column)
    }

    pub async fn list_columns(&self, ctx: &TenantContext, table_id: Uuid) -> Result<Vec<Column>> {
        let pool = self.manager.pool_for(ctx).await?;
        self.catalog.list_columns(&pool, table_id).await
    }

    /// Remove a column; a missing column counts as already deleted
    pub async fn delete_column(&self, ctx: &TenantContext, column_id: Uuid) -> Result<()> {
        let pool = self.manager.pool_for(ctx).await?;
        let mut tx = pool.begin().await?;

        let Some(column) = self.catalog.find_column(&mut *tx, column_id).await? else {
            debug!(%column_id, "Column already deleted");
            return Ok(());
        };

        if column.kind == ColumnKind::Physical {
            if let Some(table) = self.catalog.find_table(&mut *tx, column.table_id).await? {
                let drop = DdlGenerator::new(self.config()).generate_drop_column(
                    &table.schema_name,
                    &table.physical_name,
                    &column.physical_name,
                );
                debug!(sql = %drop, "Dropping physical column");
                sqlx::query(&drop).execute(&mut *tx).await?;
            }
        }
        self.catalog.delete_column(&mut *tx, column_id).await?;
        tx.commit().await?;

        info!(%column_id, table_id = %column.table_id, "Deleted column");
        Ok(())
    }

    /// Update column metadata; the physical column is never renamed or retyped
    pub async fn update_column(
        &self,
        ctx: &TenantContext,
        column_id: Uuid,
        update: UpdateColumnRequest,
    ) -> Result<Column> {
        if update.is_empty() {
            return Err(TableStoreError::validation("no column fields to update"));
        }
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(TableStoreError::validation("column name must not be empty"));
        }

        let pool = self.manager.pool_for(ctx).await?;
        self.catalog
            .update_column(&pool, column_id, &update)
            .await?
            .ok_or_else(|| TableStoreError::column_not_found(column_id))
    }

    // =========================================================================
    // Index Operations
    // =========================================================================

    /// Create a physical index and its catalog row
    ///
    /// Only requested ids that name physical columns of the table are indexed,
    /// in request order; at least one must resolve.
    pub async fn create_index(&self, ctx: &TenantContext, request: CreateIndexRequest) -> Result<Index> {
        if request.name.trim().is_empty() {
            return Err(TableStoreError::validation("index name is required"));
        }

        let pool = self.manager.pool_for(ctx).await?;
        let mut tx = pool.begin().await?;

        let data = self.catalog.load_data_table(&mut *tx, request.table_id).await?;
        let resolved: Vec<_> = request
            .column_ids
            .iter()
            .filter_map(|id| data.column(*id))
            .collect();
        if resolved.is_empty() {
            return Err(TableStoreError::validation(
                "index requires at least one physical column of the table",
            ));
        }

        let column_ids: Vec<Uuid> = resolved.iter().map(|c| c.id).collect();
        let column_names: Vec<&str> = resolved.iter().map(|c| c.physical_name.as_str()).collect();
        let physical_name = ddl::new_index_name();

        let create = DdlGenerator::new(self.config()).generate_create_index(
            &data.schema_name,
            &data.physical_name,
            &physical_name,
            &column_names,
            request.unique,
        );
        debug!(sql = %create, "Creating index");
        sqlx::query(&create).execute(&mut *tx).await?;

        let index = self
            .catalog
            .insert_index(
                &mut *tx,
                &NewIndex {
                    table_id: data.table_id,
                    name: &request.name,
                    physical_name: &physical_name,
                    column_ids: &column_ids,
                    unique: request.unique,
                },
            )
            .await?;
        tx.commit().await?;

        info!(index_id = %index.id, table_id = %index.table_id, unique = index.unique, "Created index");
        Ok(index)
    }

    /// Drop an index; a missing index counts as already deleted
    pub async fn delete_index(&self, ctx: &TenantContext, index_id: Uuid) -> Result<()> {
        let pool = self.manager.pool_for(ctx).await?;
        let mut tx = pool.begin().await?;

        let Some(index) = self.catalog.find_index(&mut *tx, index_id).await? else {
            debug!(%index_id, "Index already deleted");
            return Ok(());
        };

        if let Some(table) = self.catalog.find_table(&mut *tx, index.table_id).await? {
            let drop = DdlGenerator::new(self.config())
                .generate_drop_index(&table.schema_name, &index.physical_name);
            sqlx::query(&drop).execute(&mut *tx).await?;
        }
        self.catalog.delete_index(&mut *tx, index_id).await?;
        tx.commit().await?;

        info!(%index_id, table_id = %index.table_id, "Dropped index");
        Ok(())
    }

    pub async fn list_indexes(&self, ctx: &TenantContext, table_id: Uuid) -> Result<Vec<Index>> {
        let pool = self.manager.pool_for(ctx).await?;
        self.catalog.list_indexes(&pool, table_id).await
    }
}
