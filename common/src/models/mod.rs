//! Shared data models for the catalog core and the service.

pub mod catalog;
pub mod ddl;

// Re-export commonly used types
pub use catalog::{ColumnItem, DataTypeItem, DatabaseItem, ObjectKind, SchemaItem, TableItem};
pub use ddl::{ColumnEditRequest, CreateColumnRequest, DdlResult, PersistActionItem};
