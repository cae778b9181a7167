//! Row decoding into records.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! SQLite is dynamically typed, so its decoder classifies by the storage class
//! of the value actually returned rather than by the declared column type.
//! Expression columns such as `SELECT 1` have no declared type at all.

use crate::models::{DatabaseType, IdentifierMapper, Record, ResultStrategy};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    // UUID (PostgreSQL)
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower == "text" {
        return TypeCategory::Text;
    }

    // Dates, times, enums and the like are rendered as text
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Decode binary data to JSON value.
///
/// If `decode_binary` is true, attempts to decode as UTF-8 text first.
/// Falls back to base64 encoding if not valid UTF-8 or if `decode_binary` is false.
pub fn decode_binary_value(bytes: &[u8], decode_binary: bool) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    if decode_binary {
        match std::str::from_utf8(bytes) {
            Ok(s) => JsonValue::String(s.to_string()),
            Err(_) => JsonValue::String(STANDARD.encode(bytes)),
        }
    } else {
        JsonValue::String(STANDARD.encode(bytes))
    }
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// The first integer width the driver accepts for the column. Drivers reject
/// widths that do not match the column type, so order only matters for
/// unsigned MySQL columns.
macro_rules! first_integer {
    ($row:expr, $idx:expr, $($ty:ty),+) => {
        None::<JsonValue>$(.or_else(|| get::<_, $ty>($row, $idx).map(JsonValue::from)))+
    };
}

// =============================================================================
// Row to Record Trait
// =============================================================================

/// Trait for converting database rows to records.
pub trait RowToRecord {
    /// Decode every column, keyed (or ordered) per the mapper's result strategy.
    fn to_record(&self, mapper: &IdentifierMapper) -> Record;
}

fn assemble<R, F>(row: &R, mapper: &IdentifierMapper, mut decode: F) -> Record
where
    R: Row,
    F: FnMut(usize, &str) -> JsonValue,
{
    let values = row.columns().iter().enumerate().map(|(idx, col)| {
        let type_name = col.type_info().name().to_string();
        (col.name(), decode(idx, &type_name))
    });
    match mapper.result() {
        ResultStrategy::Maps => JsonValue::Object(
            values
                .map(|(name, value)| (mapper.column_key(name), value))
                .collect(),
        ),
        ResultStrategy::Arrays => JsonValue::Array(values.map(|(_, value)| value).collect()),
    }
}

impl RowToRecord for MySqlRow {
    fn to_record(&self, mapper: &IdentifierMapper) -> Record {
        assemble(self, mapper, |idx, type_name| {
            let value = match categorize_type(type_name, DatabaseType::MySQL) {
                TypeCategory::Decimal => decimal(self, idx),
                TypeCategory::Integer => {
                    first_integer!(self, idx, i8, i16, i32, i64, u8, u16, u32, u64)
                }
                TypeCategory::Boolean => get::<_, bool>(self, idx).map(JsonValue::Bool),
                TypeCategory::Float => float(self, idx),
                TypeCategory::Binary => binary(self, idx, mapper.decode_binary()),
                TypeCategory::Json => get::<_, JsonValue>(self, idx),
                _ => text(self, idx, type_name),
            };
            value.unwrap_or(JsonValue::Null)
        })
    }
}

impl RowToRecord for PgRow {
    fn to_record(&self, mapper: &IdentifierMapper) -> Record {
        assemble(self, mapper, |idx, type_name| {
            let value = match categorize_type(type_name, DatabaseType::PostgreSQL) {
                TypeCategory::Decimal => decimal(self, idx),
                TypeCategory::Integer => first_integer!(self, idx, i16, i32, i64),
                TypeCategory::Boolean => get::<_, bool>(self, idx).map(JsonValue::Bool),
                TypeCategory::Float => float(self, idx),
                TypeCategory::Binary => binary(self, idx, mapper.decode_binary()),
                TypeCategory::Json => get::<_, JsonValue>(self, idx),
                TypeCategory::Uuid => {
                    get::<_, uuid::Uuid>(self, idx).map(|v| JsonValue::String(v.to_string()))
                }
                _ => text(self, idx, type_name),
            };
            value.unwrap_or(JsonValue::Null)
        })
    }
}

impl RowToRecord for SqliteRow {
    fn to_record(&self, mapper: &IdentifierMapper) -> Record {
        assemble(self, mapper, |idx, declared| {
            sqlite_value(self, idx, declared, mapper.decode_binary()).unwrap_or(JsonValue::Null)
        })
    }
}

// =============================================================================
// Column Decoders
// =============================================================================
//
// Shared by every driver. `None` means SQL NULL or a value the requested Rust
// type cannot hold; the caller renders both as JSON null.

/// Column `idx` as `T`.
fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    T: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn decimal<'r, R>(row: &'r R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    RawDecimal: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(v) => v.map(|v| JsonValue::String(v.0)),
        Err(e) => {
            tracing::error!(column = idx, error = ?e, "Failed to decode decimal");
            None
        }
    }
}

fn float<'r, R>(row: &'r R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    f32: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    get::<_, f64>(row, idx)
        .or_else(|| get::<_, f32>(row, idx).map(f64::from))
        .map(float_value)
}

fn binary<'r, R>(row: &'r R, idx: usize, decode_binary: bool) -> Option<JsonValue>
where
    R: Row,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    get::<_, Vec<u8>>(row, idx).map(|v| decode_binary_value(&v, decode_binary))
}

/// Text, parsed as JSON when the declared type says so.
fn text<'r, R>(row: &'r R, idx: usize, declared: &str) -> Option<JsonValue>
where
    R: Row,
    String: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    let v = get::<_, String>(row, idx)?;
    if declared.to_lowercase().contains("json") {
        if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
            return Some(json);
        }
    }
    Some(JsonValue::String(v))
}

/// SQLite values are classified by the storage class they actually have. The
/// declared type only decides booleans and JSON text.
fn sqlite_value(
    row: &SqliteRow,
    idx: usize,
    declared: &str,
    decode_binary: bool,
) -> Option<JsonValue> {
    let storage = match row.try_get_raw(idx) {
        Ok(value) if value.is_null() => return None,
        Ok(value) => value.type_info().name().to_string(),
        Err(e) => {
            tracing::error!(column = idx, error = ?e, "Failed to read SQLite value");
            return None;
        }
    };

    match categorize_type(declared, DatabaseType::SQLite) {
        TypeCategory::Boolean if storage == "INTEGER" => {
            get::<_, bool>(row, idx).map(JsonValue::Bool)
        }
        TypeCategory::Json if storage == "TEXT" => text(row, idx, declared),
        _ => match categorize_type(&storage, DatabaseType::SQLite) {
            TypeCategory::Integer => get::<_, i64>(row, idx).map(JsonValue::from),
            TypeCategory::Float => float(row, idx),
            TypeCategory::Binary => binary(row, idx, decode_binary),
            _ => text(row, idx, declared),
        },
    }
}
