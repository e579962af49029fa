//! Column edit and DDL result models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Request body for changing an existing column.
///
/// Absent fields keep the column's current value. `default_value` set to an
/// empty string drops the default.
#[derive(Debug, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct ColumnEditRequest {
    /// New column name.
    #[validate(length(min = 1, max = 63, message = "Name must be 1-63 characters"))]
    pub new_name: Option<String>,
    /// Name of the new data type (looked up in the database type registry).
    #[validate(length(min = 1, message = "Type name cannot be empty"))]
    pub type_name: Option<String>,
    /// Maximum length for string types.
    #[validate(range(min = 0))]
    pub max_length: Option<i64>,
    /// Precision for numeric types.
    #[validate(range(min = 0, max = 1000))]
    pub precision: Option<i32>,
    /// Scale for numeric types.
    #[validate(range(min = 0, max = 1000))]
    pub scale: Option<i32>,
    /// NOT NULL flag.
    pub required: Option<bool>,
    /// Default expression.
    pub default_value: Option<String>,
    /// Only synthesize the statements, do not execute them.
    #[serde(default)]
    pub dry_run: bool,
}

impl ColumnEditRequest {
    /// True if the request changes type, nullability or default.
    pub fn has_structural_change(&self) -> bool {
        self.type_name.is_some()
            || self.max_length.is_some()
            || self.precision.is_some()
            || self.scale.is_some()
            || self.required.is_some()
            || self.default_value.is_some()
    }
}

/// Request body for adding a column.
#[derive(Debug, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateColumnRequest {
    /// Column name (generated when absent).
    #[validate(length(min = 1, max = 63, message = "Name must be 1-63 characters"))]
    pub name: Option<String>,
    /// Type name (`varchar` when absent).
    #[validate(length(min = 1, message = "Type name cannot be empty"))]
    pub type_name: Option<String>,
    #[validate(range(min = 0))]
    pub max_length: Option<i64>,
    #[validate(range(min = 0, max = 1000))]
    pub precision: Option<i32>,
    #[validate(range(min = 0, max = 1000))]
    pub scale: Option<i32>,
    #[serde(default)]
    pub required: bool,
    pub default_value: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

/// One synthesized DDL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PersistActionItem {
    /// Human-readable description.
    pub description: String,
    /// SQL text.
    pub sql: String,
}

/// Outcome of an edit request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DdlResult {
    /// Statements in execution order.
    pub actions: Vec<PersistActionItem>,
    /// Whether the statements were executed.
    pub executed: bool,
}
