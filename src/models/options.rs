//! Naming and result-mapping options.
//!
//! Options are layered: process-wide defaults, then the handle's options, then a
//! per-query override. Each layer only sets the fields it cares about.

use crate::models::DelimiterStyle;
use std::fmt;
use std::sync::Arc;

type Transform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A named pair of identifier transforms.
///
/// `to_sql` turns a caller-side name into a SQL identifier, `from_sql` turns a
/// column label into a record key. The rules themselves are opaque here.
#[derive(Clone)]
pub struct NamingStrategy {
    name: String,
    to_sql: Transform,
    from_sql: Transform,
}

impl NamingStrategy {
    /// Names pass through untouched.
    pub fn identity() -> Self {
        Self::custom("identity", |name: &str| name.to_string(), |label: &str| {
            label.to_string()
        })
    }

    /// `created-at` keys on the caller side, `created_at` identifiers in SQL.
    pub fn kebab_case() -> Self {
        Self::custom(
            "kebab-case",
            |name: &str| name.replace('-', "_"),
            |label: &str| label.replace('_', "-"),
        )
    }

    pub fn custom<T, F>(name: impl Into<String>, to_sql: T, from_sql: F) -> Self
    where
        T: Fn(&str) -> String + Send + Sync + 'static,
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            to_sql: Arc::new(to_sql),
            from_sql: Arc::new(from_sql),
        }
    }

    /// Look up a preset by name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "identity" => Some(Self::identity()),
            "kebab" | "kebab-case" | "kebab_case" => Some(Self::kebab_case()),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn to_sql(&self, name: &str) -> String {
        (self.to_sql)(name)
    }

    pub fn from_sql(&self, label: &str) -> String {
        (self.from_sql)(label)
    }
}

impl Default for NamingStrategy {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for NamingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NamingStrategy").field(&self.name).finish()
    }
}

impl PartialEq for NamingStrategy {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Shape of each materialized record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStrategy {
    /// JSON object keyed by the mapped column label.
    #[default]
    Maps,
    /// JSON array in column order.
    Arrays,
}

impl ResultStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "maps" | "map" => Some(Self::Maps),
            "arrays" | "array" => Some(Self::Arrays),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbOptions {
    pub naming: Option<NamingStrategy>,
    pub result: Option<ResultStrategy>,
    /// Decode binary columns as UTF-8 text when possible (default: true).
    pub decode_binary: Option<bool>,
}

impl DbOptions {
    pub fn with_naming(mut self, naming: NamingStrategy) -> Self {
        self.naming = Some(naming);
        self
    }

    pub fn with_result(mut self, result: ResultStrategy) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_decode_binary(mut self, decode: bool) -> Self {
        self.decode_binary = Some(decode);
        self
    }

    /// Layer `over` on top of `self`; fields set in `over` win.
    pub fn merge(&self, over: &DbOptions) -> DbOptions {
        DbOptions {
            naming: over.naming.clone().or_else(|| self.naming.clone()),
            result: over.result.or(self.result),
            decode_binary: over.decode_binary.or(self.decode_binary),
        }
    }

    pub fn naming_or_default(&self) -> NamingStrategy {
        self.naming.clone().unwrap_or_default()
    }

    pub fn result_or_default(&self) -> ResultStrategy {
        self.result.unwrap_or_default()
    }

    pub fn decode_binary_or_default(&self) -> bool {
        self.decode_binary.unwrap_or(true)
    }
}

/// Identifier mapping resolved for one query: naming strategy plus the
/// database's identifier delimiter.
#[derive(Debug, Clone)]
pub struct IdentifierMapper {
    naming: NamingStrategy,
    delimiter: DelimiterStyle,
    result: ResultStrategy,
    decode_binary: bool,
}

impl IdentifierMapper {
    pub fn new(options: &DbOptions, delimiter: DelimiterStyle) -> Self {
        Self {
            naming: options.naming_or_default(),
            delimiter,
            result: options.result_or_default(),
            decode_binary: options.decode_binary_or_default(),
        }
    }

    /// Record key for a result column.
    pub fn column_key(&self, label: &str) -> String {
        self.naming.from_sql(label)
    }

    /// Delimited SQL identifier for a caller-side name.
    pub fn sql_identifier(&self, name: &str) -> String {
        self.delimiter.quote(&self.naming.to_sql(name))
    }

    pub fn result(&self) -> ResultStrategy {
        self.result
    }

    pub fn decode_binary(&self) -> bool {
        self.decode_binary
    }
}

impl Default for IdentifierMapper {
    fn default() -> Self {
        Self::new(&DbOptions::default(), DelimiterStyle::DoubleQuote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_override() {
        let base = DbOptions::default()
            .with_naming(NamingStrategy::kebab_case())
            .with_result(ResultStrategy::Maps);
        let over = DbOptions::default().with_result(ResultStrategy::Arrays);

        let merged = base.merge(&over);
        assert_eq!(merged.naming, Some(NamingStrategy::kebab_case()));
        assert_eq!(merged.result, Some(ResultStrategy::Arrays));
        assert_eq!(merged.decode_binary, None);
        assert!(merged.decode_binary_or_default());
    }

    #[test]
    fn test_kebab_case_mapper() {
        let opts = DbOptions::default().with_naming(NamingStrategy::kebab_case());
        let mapper = IdentifierMapper::new(&opts, DelimiterStyle::Backtick);
        assert_eq!(mapper.column_key("created_at"), "created-at");
        assert_eq!(mapper.sql_identifier("created-at"), "`created_at`");
    }

    #[test]
    fn test_custom_strategy_equality_by_name() {
        let upper = NamingStrategy::custom("upper", |s: &str| s.to_uppercase(), |s: &str| {
            s.to_lowercase()
        });
        assert_eq!(upper.to_sql("id"), "ID");
        assert_eq!(upper.from_sql("ID"), "id");
        assert_ne!(upper, NamingStrategy::identity());
        assert_eq!(
            NamingStrategy::from_name("kebab"),
            Some(NamingStrategy::kebab_case())
        );
        assert!(NamingStrategy::from_name("camel").is_none());
    }

    #[test]
    fn test_result_strategy_from_name() {
        assert_eq!(ResultStrategy::from_name("arrays"), Some(ResultStrategy::Arrays));
        assert_eq!(ResultStrategy::from_name("MAPS"), Some(ResultStrategy::Maps));
        assert_eq!(ResultStrategy::from_name("rows"), None);
    }
}
