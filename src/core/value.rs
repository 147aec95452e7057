use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::Tuple;
use crate::core::StoreError;

/// A single element of a tuple key.
///
/// Components of different types never compare equal; they order by type
/// rank first (the declaration order below), then by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Component {
    Null,
    Bytes(Vec<u8>),
    Text(String),
    Tuple(Tuple),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Component {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bytes(_) => 1,
            Self::Text(_) => 2,
            Self::Tuple(_) => 3,
            Self::Int(_) => 4,
            Self::Float(_) => 5,
            Self::Bool(_) => 6,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bytes(_) => "BYTES",
            Self::Text(_) => "TEXT",
            Self::Tuple(_) => "TUPLE",
            Self::Int(_) => "INT",
            Self::Float(_) => "FLOAT",
            Self::Bool(_) => "BOOL",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&Tuple> {
        match self {
            Self::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Self::Tuple(a), Self::Tuple(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            // total_cmp orders NaN and -0.0 the same way the key encoding does
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Component {}

impl Hash for Component {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bytes(b) => b.hash(state),
            Self::Text(s) => s.hash(state),
            Self::Tuple(t) => t.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Bool(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Self::Text(s) => write!(f, "{:?}", s),
            Self::Tuple(t) => write!(f, "{}", t),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Component {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Component {
    fn from(i: i32) -> Self {
        Self::Int(i as i64)
    }
}

impl From<u32> for Component {
    fn from(i: u32) -> Self {
        Self::Int(i as i64)
    }
}

impl From<f64> for Component {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Component {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<String> for Component {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Component {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Component {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<Tuple> for Component {
    fn from(t: Tuple) -> Self {
        Self::Tuple(t)
    }
}

impl TryFrom<Component> for i64 {
    type Error = StoreError;

    fn try_from(value: Component) -> Result<Self, Self::Error> {
        match value {
            Component::Int(i) => Ok(i),
            other => Err(StoreError::Decode(format!(
                "expected INT, found {}",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Component> for String {
    type Error = StoreError;

    fn try_from(value: Component) -> Result<Self, Self::Error> {
        match value {
            Component::Text(s) => Ok(s),
            other => Err(StoreError::Decode(format!(
                "expected TEXT, found {}",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Component> for bool {
    type Error = StoreError;

    fn try_from(value: Component) -> Result<Self, Self::Error> {
        match value {
            Component::Bool(b) => Ok(b),
            other => Err(StoreError::Decode(format!(
                "expected BOOL, found {}",
                other.type_name()
            ))),
        }
    }
}
