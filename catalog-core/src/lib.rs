//! In-memory mirror of a PostgreSQL catalog with column DDL synthesis.
//!
//! The catalog is populated lazily: every container (instance, database,
//! schema, table) owns an [`cache::ObjectCache`] of its children that is
//! fetched on first access through the [`transport`] collaborators. Column
//! edits are recorded in an [`edit::CommandContext`] and flushed as ordered
//! `ALTER TABLE` statements produced by [`ddl`].

pub mod cache;
pub mod ddl;
pub mod edit;
pub mod filter;
pub mod model;
pub mod progress;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{ObjectCache, PopulationState};
pub use ddl::{ColumnChange, PersistAction, TableRef};
pub use edit::{ColumnKey, CommandContext, EditState, FlushReport};
pub use filter::{FilterSource, ObjectFilter};
pub use model::{
    CatalogNode, CatalogObject, ColumnDefinition, DataKind, DataType, Database, Instance, Schema,
    Table, TableColumn, TypeRegistry,
};
pub use progress::{CancellationMonitor, NullMonitor, ProgressMonitor};
pub use transport::{
    CatalogQuery, ConnectionProvider, DdlExecutor, QueryExecutor, ResultRow, RowCursor,
};
