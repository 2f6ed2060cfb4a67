//! Schema-related types for Table Store
//!
//! Includes the catalog entities (Table, Column, Index) and the requests that
//! create or change them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::row::RelationshipLink;
use crate::types::ColumnKind;

/// A logical table and the physical table backing it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: Uuid,
    /// Display name chosen by the caller; not unique and never used in DDL
    pub name: String,
    /// Physical schema holding the table
    pub schema_name: String,
    /// Generated physical table name
    #[sqlx(rename = "table_name")]
    pub physical_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A logical column on a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: Uuid,
    pub table_id: Uuid,
    pub name: String,
    pub type_id: Uuid,
    /// Physical column name; a never-dereferenced placeholder for virtual columns
    #[sqlx(rename = "pg_column")]
    pub physical_name: String,
    #[sqlx(rename = "is_nullable")]
    pub nullable: bool,
    pub position: i32,
    pub config: serde_json::Value,
    #[sqlx(try_from = "String")]
    pub kind: ColumnKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Column {
    pub fn is_virtual(&self) -> bool {
        self.kind.is_virtual()
    }

    /// Link metadata of a relationship column
    pub fn relationship(&self) -> Option<RelationshipLink> {
        match self.kind {
            ColumnKind::Relationship => Some(RelationshipLink::from_config(&self.config)),
            _ => None,
        }
    }
}

/// A physical index over columns of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub id: Uuid,
    pub table_id: Uuid,
    pub name: String,
    #[sqlx(rename = "pg_index")]
    pub physical_name: String,
    /// Indexed columns, in index order
    pub column_ids: Vec<Uuid>,
    #[sqlx(rename = "is_unique")]
    pub unique: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A table together with all of its columns and indexes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: Table,
    /// Columns ordered by position
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
}

impl TableSchema {
    /// Find a column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Request to create a new scalar type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTypeRequest {
    pub name: String,
    /// Backend-native type name, e.g. "varchar(64)"
    pub backend_type: String,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

impl CreateTypeRequest {
    pub fn new(name: impl Into<String>, backend_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend_type: backend_type.into(),
            config: None,
        }
    }

    /// Set the type configuration
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }
}

/// Request to create a new table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTableRequest {
    pub name: String,
    /// Physical schema (defaults to the configured default schema)
    #[serde(default)]
    pub schema_name: Option<String>,
}

impl CreateTableRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_name: None,
        }
    }

    /// Place the physical table in a specific schema
    pub fn in_schema(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = Some(schema_name.into());
        self
    }
}

/// Request to add a column to a table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddColumnRequest {
    pub table_id: Uuid,
    pub name: String,
    /// Type id or unique type name
    pub type_ref: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Ordinal position (defaults to after the last column)
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

fn default_nullable() -> bool {
    true
}

impl AddColumnRequest {
    pub fn new(table_id: Uuid, name: impl Into<String>, type_ref: impl ToString) -> Self {
        Self {
            table_id,
            name: name.into(),
            type_ref: type_ref.to_string(),
            nullable: true,
            position: None,
            config: None,
        }
    }

    /// Mark the column NOT NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn position(mut self, position: i32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Configure the column as a link to another table
    pub fn with_relationship(self, link: RelationshipLink) -> Self {
        self.with_config(link.to_config())
    }
}

/// Metadata-only column update; the physical column is never renamed or retyped
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateColumnRequest {
    pub name: Option<String>,
    pub nullable: Option<bool>,
    pub position: Option<i32>,
    pub config: Option<serde_json::Value>,
}

impl UpdateColumnRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.nullable.is_none()
            && self.position.is_none()
            && self.config.is_none()
    }
}

/// Request to create an index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIndexRequest {
    pub table_id: Uuid,
    pub name: String,
    /// Columns to index, in order; ids that do not belong to the table are ignored
    pub column_ids: Vec<Uuid>,
    #[serde(default)]
    pub unique: bool,
}

impl CreateIndexRequest {
    pub fn new(table_id: Uuid, name: impl Into<String>, column_ids: Vec<Uuid>) -> Self {
        Self {
            table_id,
            name: name.into(),
            column_ids,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(kind: ColumnKind, config: serde_json::Value) -> Column {
        Column {
            id: Uuid::new_v4(),
            table_id: Uuid::new_v4(),
            name: "owner".to_string(),
            type_id: Uuid::new_v4(),
            physical_name: "v_00".to_string(),
            nullable: true,
            position: 1,
            config,
            kind,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_add_column_request_builder() {
        let table_id = Uuid::new_v4();
        let req = AddColumnRequest::new(table_id, "title", "text")
            .not_null()
            .position(3);

        assert_eq!(req.table_id, table_id);
        assert_eq!(req.type_ref, "text");
        assert!(!req.nullable);
        assert_eq!(req.position, Some(3));
        assert!(req.config.is_none());
    }

    #[test]
    fn test_add_column_request_defaults_nullable_from_json() {
        let req: AddColumnRequest = serde_json::from_value(json!({
            "tableId": Uuid::nil(),
            "name": "title",
            "typeRef": "text"
        }))
        .unwrap();
        assert!(req.nullable);
        assert!(req.position.is_none());
    }

    #[test]
    fn test_relationship_config_on_request() {
        let target = Uuid::new_v4();
        let link = Uuid::new_v4();
        let req = AddColumnRequest::new(Uuid::new_v4(), "children", "relationship")
            .with_relationship(RelationshipLink::one_to_many(target, link));

        let config = req.config.unwrap();
        assert_eq!(config["target_table_id"], json!(target.to_string()));
        assert_eq!(config["link_column_id"], json!(link.to_string()));
    }

    #[test]
    fn test_column_relationship_only_for_relationship_kind() {
        let target = Uuid::new_v4();
        let config = json!({"target_table_id": target.to_string()});

        let rel = column(ColumnKind::Relationship, config.clone());
        assert_eq!(rel.relationship().unwrap().target_table_id, Some(target));

        let physical = column(ColumnKind::Physical, config);
        assert!(physical.relationship().is_none());
        assert!(!physical.is_virtual());
    }

    #[test]
    fn test_update_column_request_is_empty() {
        assert!(UpdateColumnRequest::default().is_empty());
        let req = UpdateColumnRequest {
            nullable: Some(false),
            ..Default::default()
        };
        assert!(!req.is_empty());
    }

    #[test]
    fn test_create_requests() {
        let table = CreateTableRequest::new("Orders").in_schema("sales");
        assert_eq!(table.schema_name.as_deref(), Some("sales"));

        let index = CreateIndexRequest::new(Uuid::new_v4(), "by_email", vec![Uuid::new_v4()]).unique();
        assert!(index.unique);

        let ty = CreateTypeRequest::new("email", "varchar(320)").with_config(json!({"format": "email"}));
        assert_eq!(ty.config, Some(json!({"format": "email"})));
    }
}
