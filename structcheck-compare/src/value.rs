//! Comparable Value Tree
//!
//! Both sides of a comparison are converted into [`Value`] once. Every node
//! then classifies into exactly one [`Kind`], which selects the comparison
//! rule.

use std::fmt;

/// A structured value as seen by the comparator
#[derive(Debug, Clone)]
pub enum Value {
    /// `None`, `()` and unit structs
    Null,
    /// Boolean; counts as the number 1 or 0
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Floating point
    Float(f64),
    /// Character string, compared atomically
    Text(String),
    /// Ordered sequence (vectors, slices, tuples, byte strings)
    Seq(Vec<Value>),
    /// Keyed container; entries keep their insertion order
    Map(Vec<(Value, Value)>),
}

/// Capability tag that decides which comparison rule applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Keyed container
    Mapping,
    /// Positionally ordered container
    Sequence,
    /// Atomic string
    Text,
    /// Converts to `f64` (`Bool` included)
    Number,
    /// Compared by equality only (`Null`)
    Opaque,
}

impl Value {
    /// Classify this node
    pub fn kind(&self) -> Kind {
        match self {
            Value::Map(_) => Kind::Mapping,
            Value::Seq(_) => Kind::Sequence,
            Value::Text(_) => Kind::Text,
            Value::Bool(_) | Value::Int(_) | Value::UInt(_) | Value::Float(_) => Kind::Number,
            Value::Null => Kind::Opaque,
        }
    }

    /// Numeric conversion; `None` for anything that is not a number.
    /// `true` and `false` convert to `1.0` and `0.0`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(i as f64),
            Value::UInt(u) => Some(u as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Number of entries of a mapping or elements of a sequence
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Map(entries) => Some(entries.len()),
            Value::Seq(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Look up `key` in a mapping. Keys match by [`Value::loose_eq`], so
    /// `1` and `1.0` address the same entry.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.loose_eq(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Direct equality, before any tolerance is applied.
    ///
    /// Numbers compare by value across `Bool`/`Int`/`UInt`/`Float`, so
    /// `true` equals `1`. Containers
    /// compare element-wise; mappings ignore entry order.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
                i128::from(*a) == i128::from(*b)
            }
            (a, b) if a.kind() == Kind::Number && b.kind() == Kind::Number => {
                a.as_f64() == b.as_f64()
            }
            (Value::Seq(a), Value::Seq(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Map(a), Value::Map(_)) => {
                self.len() == other.len()
                    && a.iter()
                        .all(|(k, v)| other.get(k).is_some_and(|w| v.loose_eq(w)))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    /// Safe representation used in failure messages. Never fails and never
    /// truncates.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::UInt(u)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::Seq(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (Value::Text(k), Value::from(v)))
                    .collect(),
            ),
        }
    }
}
