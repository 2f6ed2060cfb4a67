//! Relationship expansion
//!
//! A relationship column stores link metadata instead of data. Expanding it on
//! a row runs one extra query against the target table and stores the related
//! rows under the column id as `{"rows": [{"id", "cells"}, ...]}`.

use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::{Result, TableStoreError};
use crate::row::{LinkDirection, Row};
use crate::sql::dml::{DataColumn, DataTable};
use crate::types::CellValue;

/// Key of the related-row list inside an expanded cell
pub const ROWS_KEY: &str = "rows";

/// How one requested relationship column is resolved
#[derive(Debug, Clone)]
enum Plan {
    /// Target rows whose link column holds the current row id
    Children { target: DataTable, link: DataColumn },
    /// The target row whose id is stored in `source_column` of the current row
    Parent {
        target: DataTable,
        source_column: Uuid,
    },
    /// Unusable link metadata or missing target; always expands to no rows
    Empty,
}

#[derive(Debug, Clone)]
struct Expansion {
    column_id: Uuid,
    plan: Plan,
}

/// Relationship columns of one table, resolved once per list call
#[derive(Debug, Clone, Default)]
pub struct RelationResolver {
    expansions: Vec<Expansion>,
}

impl RelationResolver {
    /// Resolve the requested ids that are relationship columns of `table_id`
    ///
    /// Ids that are not relationship columns of the table are ignored.
    pub async fn load(
        catalog: &Catalog,
        pool: &PgPool,
        table_id: Uuid,
        requested: &[Uuid],
    ) -> Result<Self> {
        if requested.is_empty() {
            return Ok(Self::default());
        }

        let columns = catalog
            .relationship_columns(pool, table_id, requested)
            .await?;

        let mut expansions = Vec::with_capacity(columns.len());
        for column in columns {
            let link = column.relationship().unwrap_or_default();
            let plan = match (link.target_table_id, link.direction()) {
                (Some(target_table_id), Some(direction)) => {
                    match load_target(catalog, pool, target_table_id).await? {
                        Some(target) => plan_for(target, direction),
                        None => {
                            debug!(column_id = %column.id, %target_table_id, "Relationship target table not found");
                            Plan::Empty
                        }
                    }
                }
                _ => {
                    warn!(
                        column_id = %column.id,
                        "Relationship column needs a target table and exactly one of link_column_id or target_column_id"
                    );
                    Plan::Empty
                }
            };
            expansions.push(Expansion {
                column_id: column.id,
                plan,
            });
        }

        Ok(Self { expansions })
    }

    pub fn is_empty(&self) -> bool {
        self.expansions.is_empty()
    }

    /// Attach every expansion to the row's cells
    ///
    /// Related-id lookups read the row's cells as fetched, before any
    /// expansion is attached.
    pub async fn expand(&self, pool: &PgPool, row: &mut Row) -> Result<()> {
        let mut expanded = Vec::with_capacity(self.expansions.len());
        for expansion in &self.expansions {
            let related = match &expansion.plan {
                Plan::Children { target, link } => {
                    let stmt = target.select_by_link(link, row.id);
                    fetch_rows(pool, target, stmt).await?
                }
                Plan::Parent {
                    target,
                    source_column,
                } => match related_id(row.cell(*source_column)) {
                    Some(id) => fetch_rows(pool, target, target.select_by_id(id)).await?,
                    None => Vec::new(),
                },
                Plan::Empty => Vec::new(),
            };
            expanded.push((expansion.column_id, rows_cell(&related)));
        }

        row.cells.extend(expanded);
        Ok(())
    }
}

async fn load_target(catalog: &Catalog, pool: &PgPool, table_id: Uuid) -> Result<Option<DataTable>> {
    match catalog.load_data_table(pool, table_id).await {
        Ok(table) => Ok(Some(table)),
        Err(TableStoreError::TableNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn plan_for(target: DataTable, direction: LinkDirection) -> Plan {
    if !target.has_columns() {
        return Plan::Empty;
    }
    match direction {
        LinkDirection::OneToMany { link_column_id } => match target.column(link_column_id).cloned() {
            Some(link) => Plan::Children { target, link },
            None => {
                debug!(%link_column_id, "Link column is not a data column of the target table");
                Plan::Empty
            }
        },
        LinkDirection::ManyToOne { target_column_id } => Plan::Parent {
            target,
            source_column: target_column_id,
        },
    }
}

/// Related row id held in a cell; only non-empty string UUIDs count
fn related_id(cell: Option<&CellValue>) -> Option<Uuid> {
    let raw = cell?.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    Uuid::parse_str(raw).ok()
}

async fn fetch_rows(
    pool: &PgPool,
    table: &DataTable,
    stmt: crate::sql::Statement,
) -> Result<Vec<Row>> {
    let rows = stmt.query().fetch_all(pool).await?;
    rows.iter().map(|r| table.decode_row(r)).collect()
}

/// The expanded cell value: `{"rows": [...]}`, never null
pub fn rows_cell(rows: &[Row]) -> CellValue {
    let mut doc = serde_json::Map::new();
    doc.insert(
        ROWS_KEY.to_string(),
        serde_json::Value::Array(rows.iter().map(Row::to_json).collect()),
    );
    CellValue::Json(doc)
}
