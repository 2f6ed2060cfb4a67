//! SQL utilities for Table Store
//!
//! Provides DDL generation, the row statement builder, value conversion and
//! identifier sanitization.

pub mod ddl;
pub mod dml;
pub mod sanitize;
pub mod value;

pub use ddl::DdlGenerator;
pub use dml::{DataColumn, DataTable, Statement};
pub use sanitize::{
    qualified_name, quote_identifier, validate_backend_type, validate_schema_name,
    validate_tenant_id,
};
