use std::collections::HashMap;
use std::sync::Arc;

use common::errors::{AppError, AppResult};
use common::models::DataTypeItem;

use crate::cache::{CachedObject, ObjectLoader};
use crate::transport::{CatalogQuery, ResultRow};

use super::Database;

pub(crate) const BPCHAR_OID: u32 = 1042;
pub(crate) const VARCHAR_OID: u32 = 1043;
pub(crate) const NUMERIC_OID: u32 = 1700;
pub(crate) const BPCHAR_ARRAY_OID: u32 = 1014;
pub(crate) const VARCHAR_ARRAY_OID: u32 = 1015;
pub(crate) const NUMERIC_ARRAY_OID: u32 = 1231;

const BUILTIN_SCHEMA: &str = "pg_catalog";

/// Broad type category, from `pg_type.typcategory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    String,
    Numeric,
    Boolean,
    DateTime,
    Array,
    Other,
}

impl DataKind {
    pub fn from_category(category: &str) -> Self {
        match category {
            "S" => DataKind::String,
            "N" => DataKind::Numeric,
            "B" => DataKind::Boolean,
            "D" => DataKind::DateTime,
            "A" => DataKind::Array,
            _ => DataKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::String => "string",
            DataKind::Numeric => "numeric",
            DataKind::Boolean => "boolean",
            DataKind::DateTime => "datetime",
            DataKind::Array => "array",
            DataKind::Other => "other",
        }
    }
}

/// A row of `pg_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataType {
    pub oid: u32,
    pub name: String,
    pub schema: String,
    pub kind: DataKind,
    /// Element type of an array type.
    pub element_oid: Option<u32>,
}

impl DataType {
    pub fn is_builtin(&self) -> bool {
        self.schema == BUILTIN_SCHEMA
    }

    pub fn is_array(&self) -> bool {
        self.kind == DataKind::Array && self.element_oid.is_some()
    }
}

impl CachedObject for DataType {
    fn name(&self) -> &str {
        &self.name
    }
}

impl From<&DataType> for DataTypeItem {
    fn from(data_type: &DataType) -> Self {
        DataTypeItem {
            oid: data_type.oid,
            name: data_type.name.clone(),
            kind: data_type.kind.as_str().to_string(),
            element_oid: data_type.element_oid,
        }
    }
}

pub(super) struct DataTypeLoader;

impl ObjectLoader<Database, DataType> for DataTypeLoader {
    fn prepare_query(&self, _database: &Database) -> AppResult<CatalogQuery> {
        Ok(CatalogQuery::new(
            "SELECT t.oid::int8 AS oid, t.typname::text AS typname, n.nspname::text AS nspname, \
             t.typcategory::text AS typcategory, t.typelem::int8 AS typelem \
             FROM pg_catalog.pg_type t \
             JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace \
             WHERE t.typrelid = 0 \
             ORDER BY t.oid",
        ))
    }

    fn fetch_object(&self, _database: &Database, row: &ResultRow) -> AppResult<Option<Arc<DataType>>> {
        let Some(name) = row.get_string("typname") else {
            return Ok(None);
        };
        let kind = DataKind::from_category(row.get_string("typcategory").as_deref().unwrap_or(""));
        let element_oid = match kind {
            DataKind::Array => row.get_oid("typelem"),
            _ => None,
        };
        Ok(Some(Arc::new(DataType {
            oid: row.require_oid("oid")?,
            name,
            schema: row.get_string("nspname").unwrap_or_default(),
            kind,
            element_oid,
        })))
    }
}

/// Snapshot of a database's types, looked up by oid or by name.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    by_oid: HashMap<u32, Arc<DataType>>,
    by_name: HashMap<String, u32>,
}

impl TypeRegistry {
    pub fn new(types: impl IntoIterator<Item = Arc<DataType>>) -> Self {
        let mut registry = Self::default();
        for data_type in types {
            let oid = data_type.oid;
            let name = data_type.name.clone();
            let builtin = data_type.is_builtin();
            registry.by_oid.insert(oid, data_type);
            // Builtin names shadow user types of the same name.
            let keep_existing = registry
                .by_name
                .get(&name)
                .is_some_and(|existing| !builtin || registry.is_builtin(*existing));
            if !keep_existing {
                registry.by_name.insert(name, oid);
            }
        }
        registry
    }

    pub fn get(&self, oid: u32) -> Option<&Arc<DataType>> {
        self.by_oid.get(&oid)
    }

    /// Resolves a type name as a user would write it: SQL aliases such as
    /// `integer` or `character varying` and the `name[]` array form.
    pub fn find_by_name(&self, name: &str) -> Option<&Arc<DataType>> {
        let name = name.trim().to_lowercase();
        if let Some(element) = name.strip_suffix("[]") {
            let element = self.find_by_name(element)?;
            return self.by_name.get(&format!("_{}", element.name)).and_then(|oid| self.get(*oid));
        }
        let canonical = canonical_type_name(&name);
        self.by_name.get(canonical).and_then(|oid| self.get(*oid))
    }

    /// Like [`find_by_name`](Self::find_by_name) but fails with a synthesis
    /// error naming the type.
    pub fn resolve(&self, name: &str) -> AppResult<&Arc<DataType>> {
        self.find_by_name(name)
            .ok_or_else(|| AppError::Synthesis(format!("unknown data type `{}`", name)))
    }

    /// Every registered type, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DataType>> {
        self.by_oid.values()
    }

    pub fn len(&self) -> usize {
        self.by_oid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_oid.is_empty()
    }

    fn is_builtin(&self, oid: u32) -> bool {
        self.get(oid).is_some_and(|t| t.is_builtin())
    }
}

fn canonical_type_name(name: &str) -> &str {
    match name {
        "integer" | "int" => "int4",
        "bigint" => "int8",
        "smallint" => "int2",
        "boolean" => "bool",
        "character varying" => "varchar",
        "character" | "char" => "bpchar",
        "decimal" => "numeric",
        "real" => "float4",
        "double precision" => "float8",
        "timestamp without time zone" => "timestamp",
        "timestamp with time zone" => "timestamptz",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{builtin_types, INT4_OID, TEXT_OID};

    #[test]
    fn test_registry_lookup() {
        let registry = TypeRegistry::new(builtin_types());
        assert_eq!(registry.get(VARCHAR_OID).unwrap().name, "varchar");
        assert_eq!(registry.find_by_name("INTEGER").unwrap().oid, INT4_OID);
        assert_eq!(registry.find_by_name("character varying").unwrap().oid, VARCHAR_OID);
        assert_eq!(registry.find_by_name("decimal").unwrap().oid, NUMERIC_OID);
        assert!(registry.find_by_name("no_such_type").is_none());
        assert!(registry.resolve("no_such_type").is_err());
    }

    #[test]
    fn test_array_names_resolve_to_array_types() {
        let registry = TypeRegistry::new(builtin_types());
        let array = registry.find_by_name("varchar[]").unwrap();
        assert_eq!(array.oid, VARCHAR_ARRAY_OID);
        assert!(array.is_array());
        assert_eq!(array.element_oid, Some(VARCHAR_OID));
    }

    #[test]
    fn test_builtin_shadows_user_type() {
        let user_text = Arc::new(DataType {
            oid: 90001,
            name: "text".into(),
            schema: "public".into(),
            kind: DataKind::Other,
            element_oid: None,
        });
        let mut types = vec![user_text];
        types.extend(builtin_types());
        let registry = TypeRegistry::new(types);
        assert_eq!(registry.find_by_name("text").unwrap().oid, TEXT_OID);
        assert!(registry.get(90001).is_some());
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(DataKind::from_category("S"), DataKind::String);
        assert_eq!(DataKind::from_category("A"), DataKind::Array);
        assert_eq!(DataKind::from_category("U"), DataKind::Other);
    }
}
