//! Row statement builder
//!
//! Builds parameterized INSERT/UPDATE/DELETE/SELECT statements against a
//! table's physical columns. Identifiers always go through the sanitizer and
//! values are always bound, never interpolated.

use sqlx::Row as _;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::error::Result;
use crate::row::{Cells, Row};
use crate::sql::ddl::ID_COLUMN;
use crate::sql::sanitize::{qualified_name, quote_identifier, validate_backend_type};
use crate::sql::value::{self, PgQuery};
use crate::types::{CellValue, ScalarKind};

/// A physical (non-virtual) column as the row mapper sees it
#[derive(Debug, Clone, PartialEq)]
pub struct DataColumn {
    /// Logical column id
    pub id: Uuid,
    pub physical_name: String,
    pub backend_type: String,
    pub scalar: ScalarKind,
}

impl DataColumn {
    pub fn new(id: Uuid, physical_name: impl Into<String>, backend_type: impl Into<String>) -> Self {
        let backend_type = backend_type.into();
        Self {
            id,
            physical_name: physical_name.into(),
            scalar: ScalarKind::from_backend_type(&backend_type),
            backend_type,
        }
    }

    /// Placeholder `$n`, cast to the column's backend type when that type name is safe
    fn placeholder(&self, n: usize) -> String {
        match validate_backend_type(&self.backend_type) {
            Ok(()) => format!("${}::{}", n, self.backend_type),
            Err(_) => format!("${}", n),
        }
    }

    fn select_expr(&self) -> String {
        let quoted = quote_identifier(&self.physical_name);
        if self.scalar.reads_as_text() {
            format!("{}::text AS {}", quoted, quoted)
        } else {
            quoted
        }
    }
}

/// A table's physical location and its data columns ordered by position
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    pub table_id: Uuid,
    pub schema_name: String,
    pub physical_name: String,
    pub columns: Vec<DataColumn>,
}

/// A bound statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Cell(CellValue),
    Id(Uuid),
    Ids(Vec<Uuid>),
    Text(String),
    Limit(i64),
}

/// SQL text plus the parameters it binds, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Param>,
}

impl Statement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// A query with every parameter bound
    pub fn query(&self) -> PgQuery<'_> {
        self.params
            .iter()
            .fold(sqlx::query(&self.sql), value::bind_param)
    }
}

impl DataTable {
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.schema_name, &self.physical_name)
    }

    pub fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn column(&self, id: Uuid) -> Option<&DataColumn> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// Columns with a supplied cell, in position order
    fn matching<'a>(&'a self, cells: &'a Cells) -> Vec<(&'a DataColumn, &'a CellValue)> {
        self.columns
            .iter()
            .filter_map(|c| cells.get(&c.id).map(|v| (c, v)))
            .collect()
    }

    /// INSERT of the matching cells returning the generated id; `None` if no cell matches
    pub fn insert(&self, cells: &Cells) -> Option<Statement> {
        let matching = self.matching(cells);
        if matching.is_empty() {
            return None;
        }

        let names: Vec<String> = matching
            .iter()
            .map(|(c, _)| quote_identifier(&c.physical_name))
            .collect();
        let placeholders: Vec<String> = matching
            .iter()
            .enumerate()
            .map(|(i, (c, _))| c.placeholder(i + 1))
            .collect();

        Some(Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                self.qualified_name(),
                names.join(", "),
                placeholders.join(", "),
                ID_COLUMN
            ),
            params: matching
                .into_iter()
                .map(|(_, v)| Param::Cell(v.clone()))
                .collect(),
        })
    }

    /// UPDATE of the matching cells by id; `None` if no cell matches
    pub fn update(&self, id: Uuid, cells: &Cells) -> Option<Statement> {
        let matching = self.matching(cells);
        if matching.is_empty() {
            return None;
        }

        let assignments: Vec<String> = matching
            .iter()
            .enumerate()
            .map(|(i, (c, _))| {
                format!("{} = {}", quote_identifier(&c.physical_name), c.placeholder(i + 1))
            })
            .collect();

        let mut params: Vec<Param> = matching
            .into_iter()
            .map(|(_, v)| Param::Cell(v.clone()))
            .collect();
        params.push(Param::Id(id));

        Some(Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE {} = ${}",
                self.qualified_name(),
                assignments.join(", "),
                ID_COLUMN,
                params.len()
            ),
            params,
        })
    }

    pub fn delete(&self, id: Uuid) -> Statement {
        Statement {
            sql: format!("DELETE FROM {} WHERE {} = $1", self.qualified_name(), ID_COLUMN),
            params: vec![Param::Id(id)],
        }
    }

    /// DELETE of every listed id in one statement
    pub fn delete_many(&self, ids: &[Uuid]) -> Statement {
        Statement {
            sql: format!(
                "DELETE FROM {} WHERE {} = ANY($1)",
                self.qualified_name(),
                ID_COLUMN
            ),
            params: vec![Param::Ids(ids.to_vec())],
        }
    }

    fn select_list(&self) -> String {
        std::iter::once(ID_COLUMN.to_string())
            .chain(self.columns.iter().map(DataColumn::select_expr))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// First `limit` rows ordered by id
    pub fn select_page(&self, limit: i64) -> Statement {
        Statement {
            sql: format!(
                "SELECT {} FROM {} ORDER BY {} LIMIT $1",
                self.select_list(),
                self.qualified_name(),
                ID_COLUMN
            ),
            params: vec![Param::Limit(limit)],
        }
    }

    pub fn select_by_id(&self, id: Uuid) -> Statement {
        Statement {
            sql: format!(
                "SELECT {} FROM {} WHERE {} = $1",
                self.select_list(),
                self.qualified_name(),
                ID_COLUMN
            ),
            params: vec![Param::Id(id)],
        }
    }

    /// Rows whose `link` column holds `parent_id`, ordered by id
    ///
    /// The comparison is textual so link columns of any backend type work.
    pub fn select_by_link(&self, link: &DataColumn, parent_id: Uuid) -> Statement {
        Statement {
            sql: format!(
                "SELECT {} FROM {} WHERE {}::text = $1 ORDER BY {}",
                self.select_list(),
                self.qualified_name(),
                quote_identifier(&link.physical_name),
                ID_COLUMN
            ),
            params: vec![Param::Text(parent_id.to_string())],
        }
    }

    /// Decode a row selected with this table's select list; NULL cells are omitted
    pub fn decode_row(&self, row: &PgRow) -> Result<Row> {
        let id: Uuid = row.try_get(0)?;
        let mut cells = Cells::with_capacity(self.columns.len());
        for (i, column) in self.columns.iter().enumerate() {
            if let Some(cell) = value::decode_cell(row, i + 1, column.scalar)? {
                cells.insert(column.id, cell);
            }
        }
        Ok(Row::new(id, cells))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (DataTable, Uuid, Uuid, Uuid) {
        let name = Uuid::from_u128(1);
        let price = Uuid::from_u128(2);
        let addr = Uuid::from_u128(3);
        let table = DataTable {
            table_id: Uuid::from_u128(100),
            schema_name: "public".to_string(),
            physical_name: "lc_t_1".to_string(),
            columns: vec![
                DataColumn::new(name, "c_name", "text"),
                DataColumn::new(price, "c_price", "numeric(10,2)"),
                DataColumn::new(addr, "c_addr", "inet"),
            ],
        };
        (table, name, price, addr)
    }

    // =========================================================================
    // INSERT Tests
    // =========================================================================

    #[test]
    fn test_insert_only_known_columns() {
        let (table, name, price, _) = table();
        let mut cells = Cells::new();
        cells.insert(price, CellValue::Number(9.5));
        cells.insert(name, CellValue::from("widget"));
        cells.insert(Uuid::from_u128(999), CellValue::from("dropped"));

        let stmt = table.insert(&cells).unwrap();
        assert_eq!(
            stmt.sql(),
            "INSERT INTO \"public\".\"lc_t_1\" (\"c_name\", \"c_price\") VALUES ($1::text, $2::numeric(10,2)) RETURNING id"
        );
        assert_eq!(
            stmt.params(),
            &[
                Param::Cell(CellValue::from("widget")),
                Param::Cell(CellValue::Number(9.5)),
            ]
        );
    }

    #[test]
    fn test_insert_without_matching_cells() {
        let (table, ..) = table();
        let mut cells = Cells::new();
        cells.insert(Uuid::from_u128(999), CellValue::from("x"));
        assert!(table.insert(&cells).is_none());
        assert!(table.insert(&Cells::new()).is_none());
    }

    #[test]
    fn test_placeholder_without_cast_for_unsafe_type() {
        let id = Uuid::from_u128(7);
        let table = DataTable {
            table_id: Uuid::nil(),
            schema_name: "public".to_string(),
            physical_name: "t".to_string(),
            columns: vec![DataColumn::new(id, "c_x", "text; drop table t")],
        };
        let mut cells = Cells::new();
        cells.insert(id, CellValue::Null);

        let stmt = table.insert(&cells).unwrap();
        assert_eq!(
            stmt.sql(),
            "INSERT INTO \"public\".\"t\" (\"c_x\") VALUES ($1) RETURNING id"
        );
    }

    // =========================================================================
    // UPDATE / DELETE Tests
    // =========================================================================

    #[test]
    fn test_update_by_id() {
        let (table, name, ..) = table();
        let row_id = Uuid::from_u128(42);
        let mut cells = Cells::new();
        cells.insert(name, CellValue::from("y"));

        let stmt = table.update(row_id, &cells).unwrap();
        assert_eq!(
            stmt.sql(),
            "UPDATE \"public\".\"lc_t_1\" SET \"c_name\" = $1::text WHERE id = $2"
        );
        assert_eq!(stmt.params().last(), Some(&Param::Id(row_id)));
    }

    #[test]
    fn test_update_without_matching_cells() {
        let (table, ..) = table();
        assert!(table.update(Uuid::from_u128(1), &Cells::new()).is_none());
    }

    #[test]
    fn test_delete_statements() {
        let (table, ..) = table();
        let id = Uuid::from_u128(5);
        assert_eq!(
            table.delete(id).sql(),
            "DELETE FROM \"public\".\"lc_t_1\" WHERE id = $1"
        );

        let many = table.delete_many(&[id, Uuid::from_u128(6)]);
        assert_eq!(
            many.sql(),
            "DELETE FROM \"public\".\"lc_t_1\" WHERE id = ANY($1)"
        );
        assert_eq!(many.params(), &[Param::Ids(vec![id, Uuid::from_u128(6)])]);
    }

    // =========================================================================
    // SELECT Tests
    // =========================================================================

    #[test]
    fn test_select_page_reads_unknown_types_as_text() {
        let (table, ..) = table();
        let stmt = table.select_page(25);
        assert_eq!(
            stmt.sql(),
            "SELECT id, \"c_name\", \"c_price\", \"c_addr\"::text AS \"c_addr\" FROM \"public\".\"lc_t_1\" ORDER BY id LIMIT $1"
        );
        assert_eq!(stmt.params(), &[Param::Limit(25)]);
    }

    #[test]
    fn test_select_by_id() {
        let (table, ..) = table();
        let id = Uuid::from_u128(8);
        let stmt = table.select_by_id(id);
        assert!(stmt.sql().ends_with("FROM \"public\".\"lc_t_1\" WHERE id = $1"));
        assert_eq!(stmt.params(), &[Param::Id(id)]);
    }

    #[test]
    fn test_select_by_link() {
        let (table, ..) = table();
        let link = DataColumn::new(Uuid::from_u128(9), "c_parent", "uuid");
        let parent = Uuid::from_u128(10);

        let stmt = table.select_by_link(&link, parent);
        assert!(stmt
            .sql()
            .ends_with("WHERE \"c_parent\"::text = $1 ORDER BY id"));
        assert_eq!(stmt.params(), &[Param::Text(parent.to_string())]);
    }

    #[test]
    fn test_select_with_no_columns() {
        let table = DataTable {
            table_id: Uuid::nil(),
            schema_name: "s".to_string(),
            physical_name: "t".to_string(),
            columns: Vec::new(),
        };
        assert!(!table.has_columns());
        assert_eq!(
            table.select_page(1).sql(),
            "SELECT id FROM \"s\".\"t\" ORDER BY id LIMIT $1"
        );
    }

    #[test]
    fn test_column_lookup() {
        let (table, name, ..) = table();
        assert_eq!(table.column(name).unwrap().physical_name, "c_name");
        assert_eq!(table.column(name).unwrap().scalar, ScalarKind::Text);
        assert!(table.column(Uuid::from_u128(404)).is_none());
    }
}
