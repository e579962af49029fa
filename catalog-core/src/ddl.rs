//! Column DDL synthesis.
//!
//! PostgreSQL cannot change a column's type, nullability and default in one
//! `ALTER COLUMN` clause, so a modification becomes three statements that
//! must run in the order they are emitted. A rename is always a statement of
//! its own.

use common::errors::{AppError, AppResult};
use common::models::PersistActionItem;
use common::utils::{qualify_name, quote_identifier};
use serde::{Deserialize, Serialize};

use crate::model::{ColumnDefinition, DataKind, DataType, TypeRegistry, NUMERIC_OID};

/// One DDL statement and what it does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistAction {
    pub description: String,
    pub sql: String,
}

impl PersistAction {
    pub fn new(description: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            sql: sql.into(),
        }
    }
}

impl From<PersistAction> for PersistActionItem {
    fn from(action: PersistAction) -> Self {
        PersistActionItem {
            description: action.description,
            sql: action.sql,
        }
    }
}

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `schema.table` quoted for DDL.
    pub fn full_name(&self) -> AppResult<String> {
        qualify_name(&self.schema, &self.name)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A structural change to one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnChange {
    Create(ColumnDefinition),
    /// The column's complete target state, under its current name.
    Modify(ColumnDefinition),
    Rename { old_name: String, new_name: String },
    Drop { name: String },
}

/// Produces the statements for `change`, in execution order.
///
/// # Errors
/// `AppError::Synthesis` when the column type cannot be resolved through
/// `registry`, `AppError::InvalidIdentifier` for unusable names. Nothing is
/// returned in either case.
pub fn synthesize(
    table: &TableRef,
    change: &ColumnChange,
    registry: &TypeRegistry,
) -> AppResult<Vec<PersistAction>> {
    let table_name = table.full_name()?;
    let actions = match change {
        ColumnChange::Create(column) => {
            let mut sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table_name,
                quote_identifier(&column.name)?,
                type_clause(column, registry)?
            );
            if column.required {
                sql.push_str(" NOT NULL");
            }
            if column.has_default() {
                sql.push_str(" DEFAULT ");
                sql.push_str(column.default_value.as_deref().unwrap_or_default().trim());
            }
            vec![PersistAction::new("Create column", sql)]
        }
        ColumnChange::Modify(column) => {
            let column_name = quote_identifier(&column.name)?;
            let prefix = format!("ALTER TABLE {} ALTER COLUMN {} ", table_name, column_name);
            let clause = type_clause(column, registry)?;
            let cast = cast_type_name(column, registry)?;

            let mut actions = Vec::with_capacity(3);
            actions.push(PersistAction::new(
                "Set column type",
                format!("{}TYPE {} USING {}::{}", prefix, clause, column_name, cast),
            ));
            actions.push(PersistAction::new(
                "Set column nullability",
                format!("{}{} NOT NULL", prefix, if column.required { "SET" } else { "DROP" }),
            ));
            if column.has_default() {
                let default = column.default_value.as_deref().unwrap_or_default().trim();
                actions.push(PersistAction::new(
                    "Set column default",
                    format!("{}SET DEFAULT {}", prefix, default),
                ));
            } else {
                actions.push(PersistAction::new("Drop column default", format!("{}DROP DEFAULT", prefix)));
            }
            actions
        }
        ColumnChange::Rename { old_name, new_name } => vec![PersistAction::new(
            "Rename column",
            format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                table_name,
                quote_identifier(old_name)?,
                quote_identifier(new_name)?
            ),
        )],
        ColumnChange::Drop { name } => vec![PersistAction::new(
            "Drop column",
            format!("ALTER TABLE {} DROP COLUMN {}", table_name, quote_identifier(name)?),
        )],
    };
    Ok(actions)
}

/// Full type of `column` as written in DDL, e.g. `NUMERIC(10,2)` or
/// `VARCHAR(20)[]`.
///
/// Arrays are written as their element type plus `[]`; the element type
/// decides the length or precision qualifier.
pub fn type_clause(column: &ColumnDefinition, registry: &TypeRegistry) -> AppResult<String> {
    let (base, is_array) = resolve_base_type(column, registry)?;
    let mut clause = type_name(base)?;
    match base.kind {
        DataKind::String => {
            if column.max_length > 0 {
                clause.push_str(&format!("({})", column.max_length));
            }
        }
        DataKind::Numeric if base.oid == NUMERIC_OID => {
            let (precision, scale) = (column.precision, column.scale);
            // A negative scale is only meaningful next to a precision.
            let show_scale = scale > 0 || (scale < 0 && precision > 0);
            if precision > 0 || show_scale {
                clause.push('(');
                if precision > 0 {
                    clause.push_str(&precision.to_string());
                }
                if show_scale {
                    if precision > 0 {
                        clause.push(',');
                    }
                    clause.push_str(&scale.to_string());
                }
                clause.push(')');
            }
        }
        _ => {}
    }
    if is_array {
        clause.push_str("[]");
    }
    Ok(clause)
}

/// Target of the `USING` cast: the type name without qualifiers.
fn cast_type_name(column: &ColumnDefinition, registry: &TypeRegistry) -> AppResult<String> {
    let (base, is_array) = resolve_base_type(column, registry)?;
    let name = type_name(base)?;
    Ok(if is_array { format!("{}[]", name) } else { name })
}

fn resolve_base_type<'a>(
    column: &ColumnDefinition,
    registry: &'a TypeRegistry,
) -> AppResult<(&'a DataType, bool)> {
    let data_type: &DataType = registry.get(column.type_oid).ok_or_else(|| {
        AppError::Synthesis(format!(
            "column `{}` has no resolvable data type (oid {})",
            column.name, column.type_oid
        ))
    })?;
    match data_type.element_oid.filter(|_| data_type.is_array()) {
        Some(element_oid) => {
            let element: &DataType = registry.get(element_oid).ok_or_else(|| {
                AppError::Synthesis(format!(
                    "array type `{}` of column `{}` has no resolvable element type",
                    data_type.name, column.name
                ))
            })?;
            Ok((element, true))
        }
        None => Ok((data_type, false)),
    }
}

fn type_name(data_type: &DataType) -> AppResult<String> {
    if data_type.is_builtin() {
        Ok(data_type.name.to_uppercase())
    } else {
        qualify_name(&data_type.schema, &data_type.name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::VARCHAR_OID;
    use crate::testing::{builtin_types, INT4_ARRAY_OID, INT4_OID, VARCHAR_ARRAY_OID};

    fn registry() -> TypeRegistry {
        TypeRegistry::new(builtin_types())
    }

    fn column(name: &str, type_oid: u32) -> ColumnDefinition {
        ColumnDefinition {
            name: name.into(),
            type_oid,
            ..Default::default()
        }
    }

    fn numeric(precision: i32, scale: i32) -> ColumnDefinition {
        ColumnDefinition {
            precision,
            scale,
            ..column("amount", NUMERIC_OID)
        }
    }

    fn orders() -> TableRef {
        TableRef::new("public", "orders")
    }

    #[test]
    fn test_numeric_type_clause() {
        let registry = registry();
        assert_eq!(type_clause(&numeric(10, 2), &registry).unwrap(), "NUMERIC(10,2)");
        assert_eq!(type_clause(&numeric(10, 0), &registry).unwrap(), "NUMERIC(10)");
        assert_eq!(type_clause(&numeric(0, 0), &registry).unwrap(), "NUMERIC");
        assert_eq!(type_clause(&numeric(5, -2), &registry).unwrap(), "NUMERIC(5,-2)");
    }

    #[test]
    fn test_string_type_clause() {
        let registry = registry();
        let mut title = column("title", VARCHAR_OID);
        title.max_length = 50;
        assert_eq!(type_clause(&title, &registry).unwrap(), "VARCHAR(50)");
        title.max_length = 0;
        assert_eq!(type_clause(&title, &registry).unwrap(), "VARCHAR");
    }

    #[test]
    fn test_qualifiers_only_for_matching_kinds() {
        let registry = registry();
        let mut id = column("id", INT4_OID);
        id.max_length = 10;
        id.precision = 10;
        assert_eq!(type_clause(&id, &registry).unwrap(), "INT4");
    }

    #[test]
    fn test_array_type_clause_uses_element_type() {
        let registry = registry();
        let mut tags = column("tags", VARCHAR_ARRAY_OID);
        tags.max_length = 20;
        assert_eq!(type_clause(&tags, &registry).unwrap(), "VARCHAR(20)[]");
        assert_eq!(type_clause(&column("ids", INT4_ARRAY_OID), &registry).unwrap(), "INT4[]");
    }

    #[test]
    fn test_user_types_are_qualified() {
        let mood = Arc::new(DataType {
            oid: 90010,
            name: "Mood".into(),
            schema: "app".into(),
            kind: DataKind::Other,
            element_oid: None,
        });
        let registry = TypeRegistry::new(vec![mood]);
        assert_eq!(type_clause(&column("m", 90010), &registry).unwrap(), "app.\"Mood\"");
    }

    #[test]
    fn test_modify_emits_three_ordered_statements() {
        let mut amount = numeric(12, 4);
        amount.required = true;
        amount.default_value = Some("0".into());

        let actions = synthesize(&orders(), &ColumnChange::Modify(amount), &registry()).unwrap();
        let sql: Vec<&str> = actions.iter().map(|a| a.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE public.orders ALTER COLUMN amount TYPE NUMERIC(12,4) USING amount::NUMERIC",
                "ALTER TABLE public.orders ALTER COLUMN amount SET NOT NULL",
                "ALTER TABLE public.orders ALTER COLUMN amount SET DEFAULT 0",
            ]
        );
        let descriptions: Vec<&str> = actions.iter().map(|a| a.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Set column type", "Set column nullability", "Set column default"]);
    }

    #[test]
    fn test_modify_drops_nullability_and_empty_default() {
        let mut title = column("Title", VARCHAR_OID);
        title.max_length = 80;
        title.default_value = Some(String::new());

        let actions = synthesize(&orders(), &ColumnChange::Modify(title), &registry()).unwrap();
        assert_eq!(actions.len(), 3);
        assert_eq!(
            actions[0].sql,
            "ALTER TABLE public.orders ALTER COLUMN \"Title\" TYPE VARCHAR(80) USING \"Title\"::VARCHAR"
        );
        assert_eq!(actions[1].sql, "ALTER TABLE public.orders ALTER COLUMN \"Title\" DROP NOT NULL");
        assert_eq!(actions[2].sql, "ALTER TABLE public.orders ALTER COLUMN \"Title\" DROP DEFAULT");
        assert_eq!(actions[2].description, "Drop column default");
    }

    #[test]
    fn test_modify_array_cast_keeps_brackets() {
        let actions = synthesize(
            &orders(),
            &ColumnChange::Modify(column("ids", INT4_ARRAY_OID)),
            &registry(),
        )
        .unwrap();
        assert!(actions[0].sql.ends_with("TYPE INT4[] USING ids::INT4[]"));
    }

    #[test]
    fn test_unresolvable_type_is_a_synthesis_error() {
        let err = synthesize(&orders(), &ColumnChange::Modify(column("x", 4242)), &registry())
            .err()
            .unwrap();
        assert_eq!(err.code(), "SYNTHESIS_ERROR");
        assert!(err.to_string().contains("oid 4242"));
    }

    #[test]
    fn test_rename_is_a_single_statement() {
        let change = ColumnChange::Rename {
            old_name: "title".into(),
            new_name: "Headline".into(),
        };
        let actions = synthesize(&orders(), &change, &registry()).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].description, "Rename column");
        assert_eq!(actions[0].sql, "ALTER TABLE public.orders RENAME COLUMN title TO \"Headline\"");
    }

    #[test]
    fn test_create_and_drop() {
        let mut note = column("note", VARCHAR_OID);
        note.max_length = 100;
        note.required = true;
        note.default_value = Some("'n/a'".into());
        let create = synthesize(&orders(), &ColumnChange::Create(note), &registry()).unwrap();
        assert_eq!(
            create[0].sql,
            "ALTER TABLE public.orders ADD COLUMN note VARCHAR(100) NOT NULL DEFAULT 'n/a'"
        );

        let drop = synthesize(&orders(), &ColumnChange::Drop { name: "note".into() }, &registry()).unwrap();
        assert_eq!(drop[0].sql, "ALTER TABLE public.orders DROP COLUMN note");
    }

    #[test]
    fn test_invalid_identifier_is_rejected() {
        let change = ColumnChange::Drop { name: String::new() };
        let err = synthesize(&orders(), &change, &registry()).err().unwrap();
        assert_eq!(err.code(), "INVALID_IDENTIFIER");
    }
}
