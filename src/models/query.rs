//! Query-related data models.
//!
//! A [`QueryDescriptor`] is the fully formed query handed to this layer by the
//! query-building collaborator: SQL text, ordered parameters, a result mode and
//! optional per-query database and option overrides.

use crate::db::DatabaseHandle;
use crate::models::DbOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A materialized row. Shape (object or array) follows the effective
/// [`ResultStrategy`](crate::models::ResultStrategy).
pub type Record = JsonValue;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// Structured JSON (objects and arrays)
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// What a query produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultMode {
    /// Run as a query and materialize every row.
    #[default]
    RowSet,
    /// Run as an insert/update and return the generated key(s).
    GeneratedKeys,
    /// Run as an update and return the affected-row count.
    AffectedCount,
}

#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    pub sql: String,
    pub params: Vec<QueryParam>,
    pub mode: ResultMode,
    /// Runs against this handle instead of the ambient or default connection.
    pub database: Option<DatabaseHandle>,
    /// Merged over the handle's and the process-wide options.
    pub options: Option<DbOptions>,
}

impl QueryDescriptor {
    pub fn new(sql: impl Into<String>, mode: ResultMode) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            mode,
            database: None,
            options: None,
        }
    }

    /// A row-set query.
    pub fn rows(sql: impl Into<String>) -> Self {
        Self::new(sql, ResultMode::RowSet)
    }

    /// An insert returning generated keys.
    pub fn keys(sql: impl Into<String>) -> Self {
        Self::new(sql, ResultMode::GeneratedKeys)
    }

    /// An update returning the affected-row count.
    pub fn count(sql: impl Into<String>) -> Self {
        Self::new(sql, ResultMode::AffectedCount)
    }

    /// Add a parameter to this query.
    pub fn with_param(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn with_params<I, P>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<QueryParam>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Run this query against `handle` rather than the resolved connection.
    pub fn on(mut self, handle: &DatabaseHandle) -> Self {
        self.database = Some(handle.clone());
        self
    }

    pub fn with_options(mut self, options: DbOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Result of executing a [`QueryDescriptor`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Rows(Vec<Record>),
    GeneratedKeys(Vec<Record>),
    AffectedCount(u64),
}

impl QueryOutcome {
    pub fn rows(&self) -> Option<&[Record]> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// First generated key: the first value of the first key record.
    pub fn generated_key(&self) -> Option<&JsonValue> {
        let Self::GeneratedKeys(keys) = self else {
            return None;
        };
        match keys.first()? {
            JsonValue::Object(map) => map.values().next(),
            JsonValue::Array(values) => values.first(),
            other => Some(other),
        }
    }

    pub fn affected(&self) -> Option<u64> {
        match self {
            Self::AffectedCount(n) => Some(*n),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(
            QueryParam::String("hello".to_string()).type_name(),
            "string"
        );
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
    }

    #[test]
    fn test_query_param_from_json() {
        let params: Vec<QueryParam> =
            serde_json::from_str(r#"[null, true, 7, 1.5, "x", {"a": 1}]"#).unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::Null,
                QueryParam::Bool(true),
                QueryParam::Int(7),
                QueryParam::Float(1.5),
                QueryParam::String("x".into()),
                QueryParam::Json(json!({"a": 1})),
            ]
        );
    }

    #[test]
    fn test_descriptor_builders() {
        let d = QueryDescriptor::keys("INSERT INTO t (a, b) VALUES (?, ?)")
            .with_param(1)
            .with_param("two");
        assert_eq!(d.mode, ResultMode::GeneratedKeys);
        assert_eq!(d.params, vec![QueryParam::Int(1), QueryParam::from("two")]);
        assert!(d.database.is_none());
        assert_eq!(QueryDescriptor::rows("SELECT 1").mode, ResultMode::RowSet);
        assert_eq!(
            QueryDescriptor::count("DELETE FROM t").mode,
            ResultMode::AffectedCount
        );
    }

    #[test]
    fn test_outcome_accessors() {
        let keys = QueryOutcome::GeneratedKeys(vec![json!({"generated_key": 3})]);
        assert_eq!(keys.generated_key(), Some(&json!(3)));
        assert_eq!(keys.affected(), None);

        let count = QueryOutcome::AffectedCount(2);
        assert_eq!(count.affected(), Some(2));
        assert!(count.rows().is_none());
        assert_eq!(QueryOutcome::GeneratedKeys(vec![]).generated_key(), None);
    }
}
