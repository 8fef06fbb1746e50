// Schema markers that are not ObjectIds, plus the reserved attribute names.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DataBagError, Result};

// Reserved attribute names.
pub const SCHEMA_ATTR: &str = "__schema__";
pub const LIST_ITEMS_SCHEMA_ATTR: &str = "__items__";
pub const DICT_KEYS_SCHEMA_ATTR: &str = "__keys__";
pub const DICT_VALUES_SCHEMA_ATTR: &str = "__values__";

pub fn is_reserved_attr(name: &str) -> bool {
    matches!(
        name,
        SCHEMA_ATTR | LIST_ITEMS_SCHEMA_ATTR | DICT_KEYS_SCHEMA_ATTR | DICT_VALUES_SCHEMA_ATTR
    )
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum DType {
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    Mask,
    Text,
    Bytes,
    Expr,
    ItemId,
    Any,
    Object,
    Schema,
    None,
}

pub const ALL_DTYPES: [DType; 14] = [
    DType::Int32,
    DType::Int64,
    DType::Float32,
    DType::Float64,
    DType::Bool,
    DType::Mask,
    DType::Text,
    DType::Bytes,
    DType::Expr,
    DType::ItemId,
    DType::Any,
    DType::Object,
    DType::Schema,
    DType::None,
];

impl DType {
    pub fn name(&self) -> &'static str {
        match self {
            DType::Int32 => "INT32",
            DType::Int64 => "INT64",
            DType::Float32 => "FLOAT32",
            DType::Float64 => "FLOAT64",
            DType::Bool => "BOOLEAN",
            DType::Mask => "MASK",
            DType::Text => "STRING",
            DType::Bytes => "BYTES",
            DType::Expr => "EXPR",
            DType::ItemId => "ITEMID",
            DType::Any => "ANY",
            DType::Object => "OBJECT",
            DType::Schema => "SCHEMA",
            DType::None => "NONE",
        }
    }
    /// Primitive dtypes describe scalar values stored inline.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            DType::Int32
                | DType::Int64
                | DType::Float32
                | DType::Float64
                | DType::Bool
                | DType::Mask
                | DType::Text
                | DType::Bytes
                | DType::Expr
        )
    }
    pub fn is_numeric(&self) -> bool {
        matches!(self, DType::Int32 | DType::Int64 | DType::Float32 | DType::Float64)
    }
    // The dtypes `self` implicitly casts to, least first. NONE is below
    // everything and handled by the caller.
    pub(crate) fn upper_chain(&self) -> &'static [DType] {
        use DType::*;
        match self {
            Int32 => &[Int32, Int64, Float32, Float64, Object, Any],
            Int64 => &[Int64, Float32, Float64, Object, Any],
            Float32 => &[Float32, Float64, Object, Any],
            Float64 => &[Float64, Object, Any],
            Bool => &[Bool, Object, Any],
            Mask => &[Mask, Object, Any],
            Text => &[Text, Object, Any],
            Bytes => &[Bytes, Object, Any],
            Expr => &[Expr, Object, Any],
            Object => &[Object, Any],
            Any => &[Any],
            ItemId => &[ItemId],
            Schema => &[Schema],
            None => &[None],
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DType {
    type Err = DataBagError;
    fn from_str(s: &str) -> Result<Self> {
        ALL_DTYPES
            .iter()
            .find(|dtype| dtype.name() == s)
            .copied()
            .ok_or_else(|| DataBagError::InvalidArgument(format!("unknown dtype: {}", s)))
    }
}
