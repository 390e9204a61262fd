//! Runtime values held by constant nodes.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{Field, Primitive, Type};

/// A value folded into a constant node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    Decimal(Decimal),
    String(String),
    DateTime(NaiveDateTime),
    Guid(Uuid),
    Binary(Vec<u8>),
    /// An in-memory array or list.
    List(Vec<Value>),
    /// A record: anonymous object or captured closure.
    Record(Vec<(String, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The type a value has at runtime, when it can be told from the value alone.
    pub fn natural_type(&self) -> Option<Type> {
        let p = match self {
            Value::Null => return None,
            Value::Bool(_) => Primitive::Bool,
            Value::Byte(_) => Primitive::Byte,
            Value::Int16(_) => Primitive::Int16,
            Value::Int32(_) => Primitive::Int32,
            Value::Int64(_) => Primitive::Int64,
            Value::Single(_) => Primitive::Single,
            Value::Double(_) => Primitive::Double,
            Value::Decimal(_) => Primitive::Decimal,
            Value::String(_) => Primitive::String,
            Value::DateTime(_) => Primitive::DateTime,
            Value::Guid(_) => Primitive::Guid,
            Value::Binary(_) => Primitive::Binary,
            Value::List(items) => {
                let element = common_type(items)?;
                return Some(Type::collection(element));
            }
            Value::Record(fields) => {
                let fields = fields
                    .iter()
                    .map(|(n, v)| Some(Field::new(n.clone(), v.natural_type()?)))
                    .collect::<Option<Vec<_>>>()?;
                return Some(Type::Anonymous(fields));
            }
        };
        Some(Type::Primitive(p))
    }

    /// Integer view used by `Skip`/`Take` amounts and comparisons.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Look up a record field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Value::Int32(0) | Value::Int64(0) | Value::Int16(0) | Value::Byte(0) => true,
            Value::Decimal(d) => d.is_zero(),
            _ => false,
        }
    }
}

fn common_type(items: &[Value]) -> Option<Type> {
    let mut found: Option<Type> = None;
    for item in items {
        let t = item.natural_type()?;
        match &found {
            None => found = Some(t),
            Some(existing) if *existing == t => {}
            Some(_) => return None,
        }
    }
    found
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Byte(n) => write!(f, "{}", n),
            Value::Int16(n) => write!(f, "{}", n),
            Value::Int32(n) => write!(f, "{}", n),
            Value::Int64(n) => write!(f, "{}", n),
            Value::Single(n) => write!(f, "{}", n),
            Value::Double(n) => write!(f, "{}", n),
            Value::Decimal(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::DateTime(d) => write!(f, "{}", d.format("%m/%d/%Y %H:%M:%S")),
            Value::Guid(g) => write!(f, "{}", g),
            Value::Binary(b) => write!(f, "Byte[{}]", b.len()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Record(fields) => {
                write!(f, "{{ ")?;
                for (i, (n, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", n, v)?;
                }
                write!(f, " }}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_type_of_list() {
        let v = Value::List(vec![Value::Int32(1), Value::Int32(2)]);
        assert_eq!(v.natural_type(), Some(Type::collection(Type::int32())));

        let mixed = Value::List(vec![Value::Int32(1), Value::String("a".into())]);
        assert_eq!(mixed.natural_type(), None);
    }

    #[test]
    fn test_record_field() {
        let v = Value::Record(vec![("limit".into(), Value::Int32(10))]);
        assert_eq!(v.field("limit"), Some(&Value::Int32(10)));
        assert_eq!(v.field("other"), None);
    }
}
