//! Generic result rows and typed column access.

use migrate_rs_core::MigrateError;

use crate::value::Value;

/// A generic database row passed from the backends to callers.
///
/// `Row` holds a list of column names and their corresponding values. It
/// provides typed access via the [`get`](Row::get) method.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    ///
    /// Column names are matched case-insensitively, since some dialects fold
    /// unquoted names to upper or lower case.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T, MigrateError> {
        let value = self.get_value(column).ok_or_else(|| {
            MigrateError::DatabaseError(format!("Column '{column}' not found in row"))
        })?;
        T::from_value(value)
    }

    /// Gets a typed value by column index.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> Result<T, MigrateError> {
        let value = self.values.get(idx).ok_or_else(|| {
            MigrateError::DatabaseError(format!(
                "Column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Returns a reference to the raw Value at the given column name.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }
}

/// Trait for converting a [`Value`] to a concrete Rust type.
///
/// Conversions are lenient across representations because the same logical
/// column comes back differently per driver: a boolean is `Bool` on
/// PostgreSQL but `Int` on SQLite and MySQL, and text may arrive as `Bytes`.
pub trait FromValue: Sized {
    /// Attempts to convert a value reference to this type.
    fn from_value(value: &Value) -> Result<Self, MigrateError>;
}

fn mismatch(expected: &str, value: &Value) -> MigrateError {
    MigrateError::DatabaseError(format!("Expected {expected}, got {value:?}"))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::String(s) => s.trim().parse().map_err(|_| mismatch("Int", value)),
            _ => Err(mismatch("Int", value)),
        }
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        let i = i64::from_value(value)?;
        Self::try_from(i).map_err(|e| {
            MigrateError::DatabaseError(format!("Int value out of u32 range: {e}"))
        })
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::String(s) => match s.as_str() {
                "1" | "t" | "true" | "TRUE" => Ok(true),
                "0" | "f" | "false" | "FALSE" => Ok(false),
                _ => Err(mismatch("Bool", value)),
            },
            _ => Err(mismatch("Bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Bytes(b) => Self::from_utf8(b.clone()).map_err(|_| mismatch("String", value)),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for chrono::DateTime<chrono::Utc> {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        match value {
            Value::DateTimeTz(dt) => Ok(*dt),
            Value::String(s) => parse_timestamp(s).ok_or_else(|| mismatch("DateTime", value)),
            _ => Err(mismatch("DateTime", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}

/// Parses an RFC 3339 timestamp or a naive `YYYY-MM-DD HH:MM:SS[.f]` one (taken as UTC).
pub fn parse_timestamp(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
