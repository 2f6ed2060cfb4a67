//! Row Operations
//!
//! Row reads and writes against a table's physical columns. Cells are keyed by
//! logical column id; cells for unknown or virtual columns are dropped.

use sqlx::Row as _;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, TableStoreError};
use crate::relationship::RelationResolver;
use crate::row::{BulkUpsertItem, Cells, ListRowsRequest, Row, RowPage};
use crate::sql::dml::DataTable;
use crate::store::TableStore;
use crate::tenant::TenantContext;

impl TableStore {
    /// Insert a row
    ///
    /// Returns the generated id with the cells as supplied; the row is not
    /// read back.
    pub async fn create_row(&self, ctx: &TenantContext, table_id: Uuid, cells: Cells) -> Result<Row> {
        if cells.is_empty() {
            return Err(TableStoreError::validation("cells is empty"));
        }

        let pool = self.manager.pool_for(ctx).await?;
        let data = self.catalog.load_data_table(&pool, table_id).await?;
        let stmt = data
            .insert(&cells)
            .ok_or_else(|| no_matching_cells(&data))?;

        debug!(sql = stmt.sql(), "Inserting row");
        let row = stmt
            .query()
            .fetch_one(&pool)
            .await
            .map_err(TableStoreError::interpret)?;
        let id: Uuid = row.try_get(0)?;

        Ok(Row::new(id, cells))
    }

    /// Update cells of one row by id
    pub async fn update_row(
        &self,
        ctx: &TenantContext,
        table_id: Uuid,
        row_id: Uuid,
        cells: Cells,
    ) -> Result<Row> {
        if cells.is_empty() {
            return Err(TableStoreError::validation("cells is empty"));
        }

        let pool = self.manager.pool_for(ctx).await?;
        let data = self.catalog.load_data_table(&pool, table_id).await?;
        let stmt = data
            .update(row_id, &cells)
            .ok_or_else(|| no_matching_cells(&data))?;

        debug!(sql = stmt.sql(), "Updating row");
        let result = stmt
            .query()
            .execute(&pool)
            .await
            .map_err(TableStoreError::interpret)?;
        if result.rows_affected() == 0 {
            return Err(TableStoreError::row_not_found(row_id));
        }

        Ok(Row::new(row_id, cells))
    }

    /// Delete one row by id; deleting a missing row or table is not an error
    pub async fn delete_row(&self, ctx: &TenantContext, table_id: Uuid, row_id: Uuid) -> Result<()> {
        let pool = self.manager.pool_for(ctx).await?;
        let data = match self.catalog.load_data_table(&pool, table_id).await {
            Ok(data) => data,
            Err(TableStoreError::TableNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let result = data.delete(row_id).query().execute(&pool).await?;
        debug!(%table_id, %row_id, deleted = result.rows_affected(), "Deleted row");
        Ok(())
    }

    /// First page of rows ordered by id, with optional relationship expansion
    ///
    /// Page tokens are not interpreted: every call returns the first page and
    /// `next_page_token` is always `None`.
    pub async fn list_rows(&self, ctx: &TenantContext, request: ListRowsRequest) -> Result<RowPage> {
        let pool = self.manager.pool_for(ctx).await?;
        let data = self.catalog.load_data_table(&pool, request.table_id).await?;
        if !data.has_columns() {
            return Ok(RowPage::default());
        }

        if let Some(token) = request.page_token.as_deref() {
            debug!(token, "Ignoring page token; returning the first page");
        }
        let limit = self.config().rows.effective_page_size(request.page_size);

        let fetched = data.select_page(limit).query().fetch_all(&pool).await?;
        let mut rows = fetched
            .iter()
            .map(|r| data.decode_row(r))
            .collect::<Result<Vec<_>>>()?;

        let resolver =
            RelationResolver::load(&self.catalog, &pool, request.table_id, &request.expand).await?;
        if !resolver.is_empty() {
            for row in rows.iter_mut() {
                resolver.expand(&pool, row).await?;
            }
        }

        Ok(RowPage {
            rows,
            next_page_token: None,
        })
    }

    /// Insert or update many rows in one transaction
    ///
    /// Items without a row id are inserted, items with one are updated. Items
    /// with no cell for a data column are skipped. Any failing statement rolls
    /// back the whole batch. Returns the rows written, in item order.
    pub async fn bulk_upsert_rows(
        &self,
        ctx: &TenantContext,
        table_id: Uuid,
        items: Vec<BulkUpsertItem>,
    ) -> Result<Vec<Row>> {
        let pool = self.manager.pool_for(ctx).await?;
        let data = self.catalog.load_data_table(&pool, table_id).await?;
        if !data.has_columns() {
            return Err(no_matching_cells(&data));
        }

        let mut tx = pool.begin().await?;
        let mut written = Vec::with_capacity(items.len());

        for (i, item) in items.into_iter().enumerate() {
            match item.row_id {
                None => {
                    let Some(stmt) = data.insert(&item.cells) else {
                        debug!(item = i, "Skipping bulk insert without matching cells");
                        continue;
                    };
                    let row = stmt
                        .query()
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(TableStoreError::interpret)?;
                    let id: Uuid = row.try_get(0)?;
                    written.push(Row::new(id, item.cells));
                }
                Some(row_id) => {
                    let Some(stmt) = data.update(row_id, &item.cells) else {
                        debug!(item = i, %row_id, "Skipping bulk update without matching cells");
                        continue;
                    };
                    stmt.query()
                        .execute(&mut *tx)
                        .await
                        .map_err(TableStoreError::interpret)?;
                    written.push(Row::new(row_id, item.cells));
                }
            }
        }

        tx.commit().await?;
        debug!(%table_id, written = written.len(), "Bulk upsert committed");
        Ok(written)
    }

    /// Delete many rows by id in one statement
    ///
    /// An empty id list and a missing table both delete nothing.
    pub async fn bulk_delete_rows(
        &self,
        ctx: &TenantContext,
        table_id: Uuid,
        row_ids: &[Uuid],
    ) -> Result<u64> {
        if row_ids.is_empty() {
            return Ok(0);
        }

        let pool = self.manager.pool_for(ctx).await?;
        let data = match self.catalog.load_data_table(&pool, table_id).await {
            Ok(data) => data,
            Err(TableStoreError::TableNotFound(_)) => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut tx = pool.begin().await?;
        let result = data.delete_many(row_ids).query().execute(&mut *tx).await?;
        tx.commit().await?;

        debug!(%table_id, deleted = result.rows_affected(), "Bulk delete committed");
        Ok(result.rows_affected())
    }
}

fn no_matching_cells(data: &DataTable) -> TableStoreError {
    if data.has_columns() {
        TableStoreError::validation("no valid cells for known columns")
    } else {
        TableStoreError::validation(format!("table {} has no data columns", data.table_id))
    }
}
