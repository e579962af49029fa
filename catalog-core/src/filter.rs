//! Navigator object filters.
//!
//! A filter is a list of inclusion masks and a list of exclusion masks, each
//! a glob (`*` any run, `?` one character). Filters are pushed into catalog
//! queries as `LIKE` conditions and re-checked in memory after the fetch.

use common::config::{FilterConfig, ObjectFilterConfig};
use common::models::ObjectKind;

use crate::transport::CatalogQuery;

/// Inclusion/exclusion masks for object names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    case_sensitive: bool,
}

impl ObjectFilter {
    /// Builds a filter from comma separated mask lists.
    pub fn new(include: Option<&str>, exclude: Option<&str>, case_sensitive: bool) -> Self {
        Self {
            include: split_masks(include),
            exclude: split_masks(exclude),
            case_sensitive,
        }
    }

    pub fn from_config(config: &ObjectFilterConfig, case_sensitive: bool) -> Self {
        Self::new(config.include.as_deref(), config.exclude.as_deref(), case_sensitive)
    }

    /// True when the filter accepts everything.
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Checks `name` against the masks. An exclusion match always wins.
    pub fn matches(&self, name: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|m| self.mask_matches(m, name)) {
            return false;
        }
        !self.exclude.iter().any(|m| self.mask_matches(m, name))
    }

    /// Appends the filter as a SQL condition on `column`.
    ///
    /// `has_where` tells whether the query already has a `WHERE` clause.
    /// Masks become bound parameters; nothing is appended for an empty filter.
    pub fn append_sql_condition(&self, query: &mut CatalogQuery, column: &str, has_where: bool) {
        if self.is_empty() {
            return;
        }
        let like = if self.case_sensitive { "LIKE" } else { "ILIKE" };
        query.push_sql(if has_where { " AND " } else { " WHERE " });

        let mut conditions = Vec::new();
        if !self.include.is_empty() {
            let alternatives: Vec<String> = self
                .include
                .iter()
                .map(|mask| {
                    let param = query.push_param(glob_to_like(mask));
                    format!("{} {} {}", column, like, param)
                })
                .collect();
            conditions.push(format!("({})", alternatives.join(" OR ")));
        }
        for mask in &self.exclude {
            let param = query.push_param(glob_to_like(mask));
            conditions.push(format!("{} NOT {} {}", column, like, param));
        }
        query.push_sql(&conditions.join(" AND "));
    }

    fn mask_matches(&self, mask: &str, name: &str) -> bool {
        if self.case_sensitive {
            glob_match(mask, name)
        } else {
            glob_match(&mask.to_lowercase(), &name.to_lowercase())
        }
    }
}

fn split_masks(masks: Option<&str>) -> Vec<String> {
    masks
        .map(|m| {
            m.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Translates a glob into a `LIKE` pattern, escaping LIKE metacharacters.
fn glob_to_like(mask: &str) -> String {
    let mut pattern = String::with_capacity(mask.len());
    for c in mask.chars() {
        match c {
            '*' => pattern.push('%'),
            '?' => pattern.push('_'),
            '%' | '_' | '\\' => {
                pattern.push('\\');
                pattern.push(c);
            }
            _ => pattern.push(c),
        }
    }
    pattern
}

/// Glob match: `*` matches any run of characters, `?` exactly one.
pub fn glob_match(mask: &str, text: &str) -> bool {
    let mask: Vec<char> = mask.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_from(&mask, &text, 0, 0)
}

fn glob_match_from(mask: &[char], text: &[char], mask_pos: usize, text_pos: usize) -> bool {
    if mask_pos >= mask.len() {
        return text_pos >= text.len();
    }
    match mask[mask_pos] {
        '*' => (text_pos..=text.len()).any(|skip| glob_match_from(mask, text, mask_pos + 1, skip)),
        '?' => text_pos < text.len() && glob_match_from(mask, text, mask_pos + 1, text_pos + 1),
        c => {
            text_pos < text.len()
                && text[text_pos] == c
                && glob_match_from(mask, text, mask_pos + 1, text_pos + 1)
        }
    }
}

/// Read-only source of per-kind filter settings.
pub trait FilterSource: Send + Sync {
    /// Filter for objects of `kind`, if one is configured.
    fn object_filter(&self, kind: ObjectKind) -> Option<ObjectFilter>;

    /// Whether system objects (catalog schemas, template databases) are shown.
    fn show_system_objects(&self) -> bool;
}

impl FilterSource for FilterConfig {
    fn object_filter(&self, kind: ObjectKind) -> Option<ObjectFilter> {
        self.for_kind(kind)
            .map(|config| ObjectFilter::from_config(config, self.case_sensitive))
    }

    fn show_system_objects(&self) -> bool {
        self.show_system_objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = ObjectFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches("anything"));
    }

    #[test]
    fn test_include_and_exclude() {
        let filter = ObjectFilter::new(Some("app_*, audit"), Some("app_tmp*"), true);
        assert!(filter.matches("app_users"));
        assert!(filter.matches("audit"));
        assert!(!filter.matches("app_tmp_1"));
        assert!(!filter.matches("billing"));
    }

    #[test]
    fn test_exclude_only() {
        let filter = ObjectFilter::new(None, Some("tmp?"), true);
        assert!(filter.matches("tmp"));
        assert!(!filter.matches("tmp1"));
        assert!(filter.matches("tmp12"));
    }

    #[test]
    fn test_case_sensitivity() {
        let insensitive = ObjectFilter::new(Some("Sales*"), None, false);
        assert!(insensitive.matches("sales_2024"));
        let sensitive = ObjectFilter::new(Some("Sales*"), None, true);
        assert!(!sensitive.matches("sales_2024"));
        assert!(sensitive.matches("Sales_2024"));
    }

    #[test]
    fn test_sql_condition_pushdown() {
        let filter = ObjectFilter::new(Some("app_*,core"), Some("*_old"), false);
        let mut query = CatalogQuery::new("SELECT * FROM pg_namespace n");
        filter.append_sql_condition(&mut query, "n.nspname", false);
        assert_eq!(
            query.sql(),
            "SELECT * FROM pg_namespace n WHERE (n.nspname ILIKE $1 OR n.nspname ILIKE $2) AND n.nspname NOT ILIKE $3"
        );
        assert_eq!(query.params(), &["app\\_%", "core", "%\\_old"]);
    }

    #[test]
    fn test_empty_filter_adds_no_sql() {
        let mut query = CatalogQuery::new("SELECT 1 WHERE true");
        ObjectFilter::default().append_sql_condition(&mut query, "x", true);
        assert_eq!(query.sql(), "SELECT 1 WHERE true");
        assert!(query.params().is_empty());
    }

    #[test]
    fn test_config_source() {
        let config = FilterConfig {
            table: ObjectFilterConfig {
                include: None,
                exclude: Some("tmp_*".into()),
            },
            ..Default::default()
        };
        let filter = config.object_filter(ObjectKind::Table).unwrap();
        assert!(!filter.matches("TMP_x"));
        assert!(config.object_filter(ObjectKind::Schema).is_none());
    }
}
