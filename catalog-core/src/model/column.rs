use std::sync::{Arc, Weak};

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use common::models::{ColumnItem, ObjectKind};

use crate::cache::{CachedObject, ObjectLoader};
use crate::ddl;
use crate::progress::ProgressMonitor;
use crate::transport::{CatalogQuery, ResultRow};

use super::data_type::{
    BPCHAR_ARRAY_OID, BPCHAR_OID, NUMERIC_ARRAY_OID, NUMERIC_OID, VARCHAR_ARRAY_OID, VARCHAR_OID,
};
use super::{CatalogNode, CatalogObject, Table, TypeRegistry};

/// Size of the varlena header folded into `atttypmod`.
const VARHDRSZ: i32 = 4;

/// Editable properties of a column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    /// Oid of the column type in the database's [`TypeRegistry`].
    pub type_oid: u32,
    pub max_length: i64,
    pub precision: i32,
    pub scale: i32,
    pub ordinal_position: i32,
    /// `NOT NULL`.
    pub required: bool,
    /// Default expression; `None` or empty means no default.
    pub default_value: Option<String>,
}

/// Scale is an 11-bit signed field; PostgreSQL 15 allows negative values.
fn numeric_scale(modifier: i32) -> i32 {
    ((modifier & 0x7ff) ^ 0x400) - 0x400
}

impl ColumnDefinition {
    /// Builds a definition from `pg_attribute` values, decoding the type
    /// modifier into length or precision and scale.
    pub fn from_typmod(name: impl Into<String>, type_oid: u32, typmod: i32) -> Self {
        let mut definition = Self {
            name: name.into(),
            type_oid,
            ..Default::default()
        };
        if typmod >= VARHDRSZ {
            let modifier = typmod - VARHDRSZ;
            match type_oid {
                VARCHAR_OID | BPCHAR_OID | VARCHAR_ARRAY_OID | BPCHAR_ARRAY_OID => {
                    definition.max_length = i64::from(modifier);
                }
                NUMERIC_OID | NUMERIC_ARRAY_OID => {
                    definition.precision = (modifier >> 16) & 0xffff;
                    definition.scale = numeric_scale(modifier);
                }
                _ => {}
            }
        }
        definition
    }

    pub fn has_default(&self) -> bool {
        self.default_value.as_deref().is_some_and(|d| !d.trim().is_empty())
    }

    /// Plain view with the type rendered through `registry`.
    pub fn describe(&self, registry: &TypeRegistry) -> ColumnItem {
        ColumnItem {
            name: self.name.clone(),
            ordinal_position: self.ordinal_position,
            type_name: ddl::type_clause(self, registry)
                .unwrap_or_else(|_| format!("oid {}", self.type_oid)),
            type_oid: self.type_oid,
            max_length: self.max_length,
            precision: self.precision,
            scale: self.scale,
            required: self.required,
            default_value: self.default_value.clone(),
        }
    }
}

/// A column as cached under its table.
#[derive(Debug)]
pub struct TableColumn {
    table: Weak<Table>,
    definition: ColumnDefinition,
}

impl TableColumn {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ColumnDefinition {
        &self.definition
    }

    pub fn table(&self) -> Option<Arc<Table>> {
        self.table.upgrade()
    }
}

impl CachedObject for TableColumn {
    fn name(&self) -> &str {
        &self.definition.name
    }
}

#[async_trait]
impl CatalogObject for TableColumn {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Column
    }

    fn parent(&self) -> Option<CatalogNode> {
        self.table().map(CatalogNode::Table)
    }

    fn child_kind(&self) -> Option<ObjectKind> {
        None
    }

    async fn children(&self, _monitor: &dyn ProgressMonitor) -> AppResult<Vec<CatalogNode>> {
        Ok(Vec::new())
    }

    async fn child(&self, name: &str, _monitor: &dyn ProgressMonitor) -> AppResult<CatalogNode> {
        Err(AppError::not_found(format!("column {}", self.name()), name))
    }
}

pub(super) struct ColumnLoader;

impl ObjectLoader<Table, TableColumn> for ColumnLoader {
    fn prepare_query(&self, table: &Table) -> AppResult<CatalogQuery> {
        let mut query = CatalogQuery::new(
            "SELECT a.attname::text AS attname, a.attnum AS attnum, a.atttypid::int8 AS atttypid, \
             a.atttypmod AS atttypmod, a.attnotnull AS attnotnull, \
             pg_catalog.pg_get_expr(d.adbin, d.adrelid) AS default_value \
             FROM pg_catalog.pg_attribute a \
             JOIN pg_catalog.pg_class c ON c.oid = a.attrelid \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
             WHERE n.nspname = ",
        );
        let schema = query.push_param(table.schema_name());
        query.push_sql(&schema).push_sql(" AND c.relname = ");
        let name = query.push_param(table.name());
        query
            .push_sql(&name)
            .push_sql(" AND a.attnum > 0 AND NOT a.attisdropped ORDER BY a.attnum");
        Ok(query)
    }

    fn fetch_object(&self, table: &Table, row: &ResultRow) -> AppResult<Option<Arc<TableColumn>>> {
        let Some(name) = row.get_string("attname") else {
            return Ok(None);
        };
        let type_oid = row.require_oid("atttypid")?;
        let mut definition = ColumnDefinition::from_typmod(name, type_oid, row.get_i32("atttypmod"));
        definition.ordinal_position = row.get_i32("attnum");
        definition.required = row.get_bool("attnotnull");
        definition.default_value = row.get_string("default_value");

        Ok(Some(Arc::new(TableColumn {
            table: table.downgrade(),
            definition,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::builtin_types;

    #[test]
    fn test_varchar_typmod() {
        let definition = ColumnDefinition::from_typmod("title", VARCHAR_OID, 54);
        assert_eq!(definition.max_length, 50);
        assert_eq!(definition.precision, 0);
    }

    #[test]
    fn test_numeric_typmod() {
        // numeric(10,2)
        let typmod = ((10 << 16) | 2) + VARHDRSZ;
        let definition = ColumnDefinition::from_typmod("amount", NUMERIC_OID, typmod);
        assert_eq!((definition.precision, definition.scale), (10, 2));
        assert_eq!(definition.max_length, 0);
    }

    #[test]
    fn test_negative_numeric_scale() {
        // numeric(5,-2)
        let typmod = ((5 << 16) | (-2i32 & 0x7ff)) + VARHDRSZ;
        let definition = ColumnDefinition::from_typmod("rounded", NUMERIC_OID, typmod);
        assert_eq!((definition.precision, definition.scale), (5, -2));
        // numeric(3,1000)
        let typmod = ((3 << 16) | 1000) + VARHDRSZ;
        assert_eq!(ColumnDefinition::from_typmod("tiny", NUMERIC_OID, typmod).scale, 1000);
    }

    #[test]
    fn test_unconstrained_typmod() {
        let definition = ColumnDefinition::from_typmod("amount", NUMERIC_OID, -1);
        assert_eq!((definition.precision, definition.scale), (0, 0));
        let definition = ColumnDefinition::from_typmod("note", VARCHAR_OID, -1);
        assert_eq!(definition.max_length, 0);
    }

    #[test]
    fn test_empty_default_is_no_default() {
        let mut definition = ColumnDefinition::default();
        assert!(!definition.has_default());
        definition.default_value = Some("  ".into());
        assert!(!definition.has_default());
        definition.default_value = Some("now()".into());
        assert!(definition.has_default());
    }

    #[test]
    fn test_describe_renders_type() {
        let registry = TypeRegistry::new(builtin_types());
        let definition = ColumnDefinition::from_typmod("title", VARCHAR_OID, 54);
        assert_eq!(definition.describe(&registry).type_name, "VARCHAR(50)");
        let unknown = ColumnDefinition::from_typmod("x", 4242, -1);
        assert_eq!(unknown.describe(&registry).type_name, "oid 4242");
    }
}
