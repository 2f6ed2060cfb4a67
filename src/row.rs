//! Row-related types for Table Store
//!
//! Includes Row, list/bulk requests, and relationship link metadata.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::CellValue;

/// Cells keyed by logical column id
pub type Cells = HashMap<Uuid, CellValue>;

/// A row of a dynamic table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// System-generated primary key
    pub id: Uuid,
    pub cells: Cells,
}

impl Row {
    pub fn new(id: Uuid, cells: Cells) -> Self {
        Self { id, cells }
    }

    /// Cell for a column, if present
    pub fn cell(&self, column_id: Uuid) -> Option<&CellValue> {
        self.cells.get(&column_id)
    }

    /// Render as the nested `{id, cells}` document used in expanded relations
    pub fn to_json(&self) -> serde_json::Value {
        let cells: serde_json::Map<String, serde_json::Value> = self
            .cells
            .iter()
            .map(|(column_id, value)| (column_id.to_string(), value.to_json()))
            .collect();
        serde_json::json!({
            "id": self.id.to_string(),
            "cells": cells,
        })
    }
}

/// Request to list rows of a table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRowsRequest {
    pub table_id: Uuid,
    /// Requested page size; non-positive means "use the default"
    #[serde(default)]
    pub page_size: i64,
    /// Accepted but not interpreted: every call returns the first page
    #[serde(default)]
    pub page_token: Option<String>,
    /// Relationship column ids to expand on every returned row
    #[serde(default)]
    pub expand: Vec<Uuid>,
}

impl ListRowsRequest {
    pub fn new(table_id: Uuid) -> Self {
        Self {
            table_id,
            page_size: 0,
            page_token: None,
            expand: Vec::new(),
        }
    }

    pub fn page_size(mut self, size: i64) -> Self {
        self.page_size = size;
        self
    }

    pub fn page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }

    /// Expand a relationship column on every returned row
    pub fn expand(mut self, column_id: Uuid) -> Self {
        self.expand.push(column_id);
        self
    }
}

/// One page of rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowPage {
    pub rows: Vec<Row>,
    /// Always `None`; pagination past the first page is not supported
    pub next_page_token: Option<String>,
}

/// One item of a bulk upsert: an insert without `row_id`, an update with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpsertItem {
    #[serde(default)]
    pub row_id: Option<Uuid>,
    pub cells: Cells,
}

impl BulkUpsertItem {
    pub fn insert(cells: Cells) -> Self {
        Self { row_id: None, cells }
    }

    pub fn update(row_id: Uuid, cells: Cells) -> Self {
        Self {
            row_id: Some(row_id),
            cells,
        }
    }
}

// ============================================================================
// Relationship Links
// ============================================================================

/// Link metadata stored in a relationship column's configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationshipLink {
    pub target_table_id: Option<Uuid>,
    /// Column on the target table holding this row's id (one-to-many)
    pub link_column_id: Option<Uuid>,
    /// Column on this table holding the related row's id (many-to-one)
    pub target_column_id: Option<Uuid>,
}

/// How a relationship column finds its related rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// Target rows whose link column equals the current row id
    OneToMany { link_column_id: Uuid },
    /// The single target row whose id is stored in the current row's column
    ManyToOne { target_column_id: Uuid },
}

impl RelationshipLink {
    pub fn one_to_many(target_table_id: Uuid, link_column_id: Uuid) -> Self {
        Self {
            target_table_id: Some(target_table_id),
            link_column_id: Some(link_column_id),
            target_column_id: None,
        }
    }

    pub fn many_to_one(target_table_id: Uuid, target_column_id: Uuid) -> Self {
        Self {
            target_table_id: Some(target_table_id),
            link_column_id: None,
            target_column_id: Some(target_column_id),
        }
    }

    /// Read link ids from a column configuration; malformed ids count as absent
    pub fn from_config(config: &serde_json::Value) -> Self {
        let id = |key: &str| {
            config
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
        };
        Self {
            target_table_id: id("target_table_id"),
            link_column_id: id("link_column_id"),
            target_column_id: id("target_column_id"),
        }
    }

    pub fn to_config(&self) -> serde_json::Value {
        let mut config = serde_json::Map::new();
        for (key, value) in [
            ("target_table_id", self.target_table_id),
            ("link_column_id", self.link_column_id),
            ("target_column_id", self.target_column_id),
        ] {
            if let Some(id) = value {
                config.insert(key.to_string(), serde_json::Value::String(id.to_string()));
            }
        }
        serde_json::Value::Object(config)
    }

    /// The usable direction; `None` unless exactly one link is configured
    pub fn direction(&self) -> Option<LinkDirection> {
        match (self.link_column_id, self.target_column_id) {
            (Some(link_column_id), None) => Some(LinkDirection::OneToMany { link_column_id }),
            (None, Some(target_column_id)) => Some(LinkDirection::ManyToOne { target_column_id }),
            _ => None,
        }
    }
}
