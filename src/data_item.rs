// used to print out readable forms of an item
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::object_id::ObjectId;

/// A single scalar: missing, a primitive value, an object reference or a
/// dtype schema marker. Equality and hashing are by value; floats compare by
/// their bit pattern so that items can be used as dict keys and set members.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum DataItem {
    #[default]
    Missing,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    Mask,
    Text(String),
    Bytes(Vec<u8>),
    Expr(String),
    ObjectId(ObjectId),
    DType(DType),
}

impl DataItem {
    pub fn has_value(&self) -> bool {
        !matches!(self, DataItem::Missing)
    }
    pub fn is_missing(&self) -> bool {
        matches!(self, DataItem::Missing)
    }
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            DataItem::ObjectId(id) => Some(*id),
            _ => None,
        }
    }
    pub fn as_dtype(&self) -> Option<DType> {
        match self {
            DataItem::DType(dtype) => Some(*dtype),
            _ => None,
        }
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataItem::Text(text) => Some(text),
            _ => None,
        }
    }
    pub fn is_dtype(&self, dtype: DType) -> bool {
        matches!(self, DataItem::DType(d) if *d == dtype)
    }
    /// A DType marker or an ObjectId flagged as schema.
    pub fn is_schema(&self) -> bool {
        match self {
            DataItem::DType(_) => true,
            DataItem::ObjectId(id) => id.is_schema(),
            _ => false,
        }
    }
    pub fn is_implicit_schema(&self) -> bool {
        self.as_object_id().is_some_and(|id| id.is_implicit_schema())
    }
    pub fn is_list(&self) -> bool {
        self.as_object_id().is_some_and(|id| id.is_list())
    }
    pub fn is_dict(&self) -> bool {
        self.as_object_id().is_some_and(|id| id.is_dict())
    }
    /// The dtype describing a primitive value; `None` for missing items,
    /// object ids and schema markers.
    pub fn primitive_dtype(&self) -> Option<DType> {
        match self {
            DataItem::Int32(_) => Some(DType::Int32),
            DataItem::Int64(_) => Some(DType::Int64),
            DataItem::Float32(_) => Some(DType::Float32),
            DataItem::Float64(_) => Some(DType::Float64),
            DataItem::Bool(_) => Some(DType::Bool),
            DataItem::Mask => Some(DType::Mask),
            DataItem::Text(_) => Some(DType::Text),
            DataItem::Bytes(_) => Some(DType::Bytes),
            DataItem::Expr(_) => Some(DType::Expr),
            _ => None,
        }
    }
    pub fn is_primitive(&self) -> bool {
        self.primitive_dtype().is_some()
    }
    fn type_index(&self) -> u8 {
        match self {
            DataItem::Missing => 0,
            DataItem::Int32(_) => 1,
            DataItem::Int64(_) => 2,
            DataItem::Float32(_) => 3,
            DataItem::Float64(_) => 4,
            DataItem::Bool(_) => 5,
            DataItem::Mask => 6,
            DataItem::Text(_) => 7,
            DataItem::Bytes(_) => 8,
            DataItem::Expr(_) => 9,
            DataItem::ObjectId(_) => 10,
            DataItem::DType(_) => 11,
        }
    }
    /// Feeds a stable, type-tagged encoding of the item into `hasher`; used
    /// for content derived ids and snapshot fingerprints.
    pub fn fingerprint_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&[self.type_index()]);
        match self {
            DataItem::Missing | DataItem::Mask => {}
            DataItem::Int32(v) => {
                hasher.update(&v.to_le_bytes());
            }
            DataItem::Int64(v) => {
                hasher.update(&v.to_le_bytes());
            }
            DataItem::Float32(v) => {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            DataItem::Float64(v) => {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            DataItem::Bool(v) => {
                hasher.update(&[*v as u8]);
            }
            DataItem::Text(v) | DataItem::Expr(v) => {
                hasher.update(&(v.len() as u64).to_le_bytes());
                hasher.update(v.as_bytes());
            }
            DataItem::Bytes(v) => {
                hasher.update(&(v.len() as u64).to_le_bytes());
                hasher.update(v);
            }
            DataItem::ObjectId(id) => {
                hasher.update(id.to_string().as_bytes());
            }
            DataItem::DType(dtype) => {
                hasher.update(dtype.name().as_bytes());
            }
        }
    }
}

impl PartialEq for DataItem {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DataItem::Missing, DataItem::Missing) | (DataItem::Mask, DataItem::Mask) => true,
            (DataItem::Int32(a), DataItem::Int32(b)) => a == b,
            (DataItem::Int64(a), DataItem::Int64(b)) => a == b,
            (DataItem::Float32(a), DataItem::Float32(b)) => a.to_bits() == b.to_bits(),
            (DataItem::Float64(a), DataItem::Float64(b)) => a.to_bits() == b.to_bits(),
            (DataItem::Bool(a), DataItem::Bool(b)) => a == b,
            (DataItem::Text(a), DataItem::Text(b)) => a == b,
            (DataItem::Bytes(a), DataItem::Bytes(b)) => a == b,
            (DataItem::Expr(a), DataItem::Expr(b)) => a == b,
            (DataItem::ObjectId(a), DataItem::ObjectId(b)) => a == b,
            (DataItem::DType(a), DataItem::DType(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for DataItem {}

impl Hash for DataItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_index().hash(state);
        match self {
            DataItem::Missing | DataItem::Mask => {}
            DataItem::Int32(v) => v.hash(state),
            DataItem::Int64(v) => v.hash(state),
            DataItem::Float32(v) => v.to_bits().hash(state),
            DataItem::Float64(v) => v.to_bits().hash(state),
            DataItem::Bool(v) => v.hash(state),
            DataItem::Text(v) | DataItem::Expr(v) => v.hash(state),
            DataItem::Bytes(v) => v.hash(state),
            DataItem::ObjectId(v) => v.hash(state),
            DataItem::DType(v) => v.hash(state),
        }
    }
}

// Items of different types are ordered by type first, so mixed collections
// (dict keys, snapshot content) sort deterministically.
impl Ord for DataItem {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (DataItem::Int32(a), DataItem::Int32(b)) => a.cmp(b),
            (DataItem::Int64(a), DataItem::Int64(b)) => a.cmp(b),
            (DataItem::Float32(a), DataItem::Float32(b)) => a.total_cmp(b),
            (DataItem::Float64(a), DataItem::Float64(b)) => a.total_cmp(b),
            (DataItem::Bool(a), DataItem::Bool(b)) => a.cmp(b),
            (DataItem::Text(a), DataItem::Text(b)) => a.cmp(b),
            (DataItem::Bytes(a), DataItem::Bytes(b)) => a.cmp(b),
            (DataItem::Expr(a), DataItem::Expr(b)) => a.cmp(b),
            (DataItem::ObjectId(a), DataItem::ObjectId(b)) => a.cmp(b),
            (DataItem::DType(a), DataItem::DType(b)) => a.cmp(b),
            _ => self.type_index().cmp(&other.type_index()),
        }
    }
}
impl PartialOrd for DataItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DataItem::Missing => write!(f, "None"),
            DataItem::Int32(v) => write!(f, "{}", v),
            DataItem::Int64(v) => write!(f, "int64{{{}}}", v),
            DataItem::Float32(v) => write!(f, "{:?}", v),
            DataItem::Float64(v) => write!(f, "float64{{{:?}}}", v),
            DataItem::Bool(v) => write!(f, "{}", if *v { "True" } else { "False" }),
            DataItem::Mask => write!(f, "present"),
            DataItem::Text(v) => write!(f, "'{}'", v),
            DataItem::Bytes(v) => write!(f, "b'{}'", String::from_utf8_lossy(v)),
            DataItem::Expr(v) => write!(f, "<expr {}>", v),
            DataItem::ObjectId(id) => write!(f, "{}", id),
            DataItem::DType(dtype) => write!(f, "{}", dtype),
        }
    }
}

// ------------- Conversions -------------
impl From<i32> for DataItem {
    fn from(v: i32) -> Self {
        DataItem::Int32(v)
    }
}
impl From<i64> for DataItem {
    fn from(v: i64) -> Self {
        DataItem::Int64(v)
    }
}
impl From<f32> for DataItem {
    fn from(v: f32) -> Self {
        DataItem::Float32(v)
    }
}
impl From<f64> for DataItem {
    fn from(v: f64) -> Self {
        DataItem::Float64(v)
    }
}
impl From<bool> for DataItem {
    fn from(v: bool) -> Self {
        DataItem::Bool(v)
    }
}
impl From<&str> for DataItem {
    fn from(v: &str) -> Self {
        DataItem::Text(v.to_owned())
    }
}
impl From<String> for DataItem {
    fn from(v: String) -> Self {
        DataItem::Text(v)
    }
}
impl From<Vec<u8>> for DataItem {
    fn from(v: Vec<u8>) -> Self {
        DataItem::Bytes(v)
    }
}
impl From<ObjectId> for DataItem {
    fn from(v: ObjectId) -> Self {
        DataItem::ObjectId(v)
    }
}
impl From<DType> for DataItem {
    fn from(v: DType) -> Self {
        DataItem::DType(v)
    }
}
impl<T: Into<DataItem>> From<Option<T>> for DataItem {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(DataItem::Missing)
    }
}
