//! Engine-neutral SQL values and rows.

use notestore_core::embedding::RowId;

use crate::error::{StorageError, StorageResult};

/// A single SQL value crossing the backend contract.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<RowId> for Value {
    fn from(v: RowId) -> Self {
        Value::Integer(v.get())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Conversion out of a [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> StorageResult<Self>;
}

fn mismatch(expected: &str, got: &Value) -> StorageError {
    StorageError::Decode(format!("expected {expected}, got {}", got.type_name()))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> StorageResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Integer(i) => Ok(*i),
            Value::Real(f) if f.fract() == 0.0 => Ok(*f as i64),
            other => Err(mismatch("INTEGER", other)),
        }
    }
}

impl FromValue for usize {
    fn from_value(value: &Value) -> StorageResult<Self> {
        let i = i64::from_value(value)?;
        usize::try_from(i).map_err(|_| StorageError::Decode(format!("negative count {i}")))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> StorageResult<Self> {
        Ok(i64::from_value(value)? != 0)
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Real(f) => Ok(*f),
            Value::Integer(i) => Ok(*i as f64),
            other => Err(mismatch("REAL", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Blob(b) => String::from_utf8(b.clone())
                .map_err(|e| StorageError::Decode(format!("invalid UTF-8 text: {e}"))),
            other => Err(mismatch("TEXT", other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Blob(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(mismatch("BLOB", other)),
        }
    }
}

impl FromValue for RowId {
    fn from_value(value: &Value) -> StorageResult<Self> {
        Ok(RowId(i64::from_value(value)?))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// One result row: column names plus values in select order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, column: &str) -> StorageResult<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| StorageError::Decode(format!("no column named '{column}'")))
    }

    /// Typed access by column name.
    pub fn get<T: FromValue>(&self, column: &str) -> StorageResult<T> {
        T::from_value(self.value(column)?)
            .map_err(|e| StorageError::Decode(format!("column '{column}': {e}")))
    }

    /// Typed access by position.
    pub fn get_idx<T: FromValue>(&self, index: usize) -> StorageResult<T> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| StorageError::Decode(format!("no column at index {index}")))?;
        T::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        Row::new(
            vec!["id".into(), "n".into(), "score".into(), "blob".into(), "gone".into()],
            vec![
                Value::Text("doc-1".into()),
                Value::Integer(7),
                Value::Real(0.5),
                Value::Blob(vec![1, 2]),
                Value::Null,
            ],
        )
    }

    #[test]
    fn test_typed_get() {
        let r = row();
        assert_eq!(r.get::<String>("id").unwrap(), "doc-1");
        assert_eq!(r.get::<i64>("n").unwrap(), 7);
        assert_eq!(r.get::<usize>("n").unwrap(), 7);
        assert_eq!(r.get::<f64>("score").unwrap(), 0.5);
        assert_eq!(r.get::<Vec<u8>>("blob").unwrap(), vec![1, 2]);
        assert_eq!(r.get::<Option<String>>("gone").unwrap(), None);
        assert_eq!(r.get_idx::<i64>(1).unwrap(), 7);
    }

    #[test]
    fn test_type_mismatch_is_decode_error() {
        let r = row();
        assert!(matches!(r.get::<i64>("id"), Err(StorageError::Decode(_))));
        assert!(matches!(r.get::<String>("missing"), Err(StorageError::Decode(_))));
        assert!(r.get::<i64>("gone").is_err());
    }

    #[test]
    fn test_conversions_into_value() {
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(true), Value::Integer(1));
        assert_eq!(Value::from(RowId(9)), Value::Integer(9));
    }
}
