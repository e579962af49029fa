//! Catalog entity models.
//!
//! Plain, serializable views of the cached catalog objects.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Kind of catalog object, used to pick filters and label owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Connection root.
    Instance,
    /// Database on the server.
    Database,
    /// Namespace inside a database.
    Schema,
    /// Table or partitioned table.
    Table,
    /// Table column.
    Column,
    /// Entry of the type registry.
    DataType,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Instance => write!(f, "instance"),
            ObjectKind::Database => write!(f, "database"),
            ObjectKind::Schema => write!(f, "schema"),
            ObjectKind::Table => write!(f, "table"),
            ObjectKind::Column => write!(f, "column"),
            ObjectKind::DataType => write!(f, "data type"),
        }
    }
}

/// Database as listed under an instance.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DatabaseItem {
    /// Object identifier.
    pub oid: u32,
    /// Database name.
    pub name: String,
    /// Owner role oid.
    pub owner_id: u32,
    /// Encoding id.
    pub encoding_id: i32,
    /// Default collation.
    pub collation: String,
    /// Default character classification.
    pub ctype: String,
    /// Whether the database is a template.
    pub is_template: bool,
    /// Whether connections are allowed.
    pub allow_connect: bool,
    /// Connection limit (-1 for none).
    pub connection_limit: i32,
    /// Default tablespace oid.
    pub tablespace_id: u32,
}

/// Schema inside a database.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SchemaItem {
    pub oid: u32,
    pub name: String,
    pub owner_id: u32,
    pub is_system: bool,
}

/// Table inside a schema.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TableItem {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    /// `r` for ordinary tables, `p` for partitioned ones.
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Column of a table.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ColumnItem {
    pub name: String,
    pub ordinal_position: i32,
    /// Rendered type clause, e.g. `VARCHAR(50)`.
    pub type_name: String,
    pub type_oid: u32,
    pub max_length: i64,
    pub precision: i32,
    pub scale: i32,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// Entry of a database type registry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DataTypeItem {
    pub oid: u32,
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_oid: Option<u32>,
}
