//! Application configuration.
//!
//! Values come from environment variables so that the same binary can run
//! locally (with a `.env` file) and in containers.

use std::env;

use serde::{Deserialize, Serialize};

use crate::models::ObjectKind;

/// Service-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Service name used in logs and responses.
    pub service_name: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Connection URL of the PostgreSQL server to mirror.
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
    /// Maximum pool size per database.
    pub max_connections: u32,
    /// Pool acquire timeout.
    pub connect_timeout_secs: u64,
    /// Navigator filters.
    pub filters: FilterConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "catalog-service".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None,
            max_connections: 5,
            connect_timeout_secs: 10,
            filters: FilterConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the environment for the named service.
    pub fn load_with_service(service_name: &str) -> Self {
        let defaults = Self::default();
        Self {
            service_name: service_name.to_string(),
            host: env::var("SERVER_HOST").unwrap_or(defaults.host),
            port: env_parse("SERVER_PORT").unwrap_or(defaults.port),
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            max_connections: env_parse("DB_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            connect_timeout_secs: env_parse("DB_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout_secs),
            filters: FilterConfig::from_env(),
        }
    }
}

/// Include/exclude masks for one object kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFilterConfig {
    /// Comma separated glob masks a name must match.
    #[serde(default)]
    pub include: Option<String>,
    /// Comma separated glob masks that reject a name.
    #[serde(default)]
    pub exclude: Option<String>,
}

impl ObjectFilterConfig {
    /// True when neither mask is set.
    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }
}

/// Persisted navigator filter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub database: ObjectFilterConfig,
    #[serde(default)]
    pub schema: ObjectFilterConfig,
    #[serde(default)]
    pub table: ObjectFilterConfig,
    /// Materialize `pg_catalog`, `information_schema` and template databases.
    #[serde(default)]
    pub show_system_objects: bool,
    /// Match masks case sensitively.
    #[serde(default)]
    pub case_sensitive: bool,
}

impl FilterConfig {
    /// Reads `FILTER_*` variables.
    pub fn from_env() -> Self {
        Self {
            database: object_filter_from_env("DATABASE"),
            schema: object_filter_from_env("SCHEMA"),
            table: object_filter_from_env("TABLE"),
            show_system_objects: env_parse("FILTER_SHOW_SYSTEM_OBJECTS").unwrap_or(false),
            case_sensitive: env_parse("FILTER_CASE_SENSITIVE").unwrap_or(false),
        }
    }

    /// Masks configured for `kind`, if any.
    pub fn for_kind(&self, kind: ObjectKind) -> Option<&ObjectFilterConfig> {
        let config = match kind {
            ObjectKind::Database => &self.database,
            ObjectKind::Schema => &self.schema,
            ObjectKind::Table => &self.table,
            _ => return None,
        };
        (!config.is_empty()).then_some(config)
    }
}

fn object_filter_from_env(kind: &str) -> ObjectFilterConfig {
    let read = |suffix: &str| {
        env::var(format!("FILTER_{}_{}", kind, suffix))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    ObjectFilterConfig {
        include: read("INCLUDE"),
        exclude: read("EXCLUDE"),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_masks_are_not_reported() {
        let config = FilterConfig {
            schema: ObjectFilterConfig {
                include: Some("app_*".into()),
                exclude: None,
            },
            ..Default::default()
        };
        assert!(config.for_kind(ObjectKind::Schema).is_some());
        assert!(config.for_kind(ObjectKind::Table).is_none());
        assert!(config.for_kind(ObjectKind::Column).is_none());
    }

    #[test]
    fn test_filter_config_deserializes_with_defaults() {
        let config: FilterConfig =
            serde_json::from_str(r#"{"table": {"exclude": "tmp_*"}}"#).unwrap();
        assert_eq!(config.table.exclude.as_deref(), Some("tmp_*"));
        assert!(!config.show_system_objects);
        assert!(config.database.is_empty());
    }
}
