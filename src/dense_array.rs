// Column storage for DataSliceImpl: one DenseArray per value type present.
//
// Only present values are stored. The presence bitmap maps a logical position
// to its value through rank: value index = rank(position) - 1.
use roaring::RoaringBitmap;

use crate::data_item::DataItem;
use crate::dtype::DType;
use crate::object_id::ObjectId;

#[derive(Clone, Debug, PartialEq)]
pub struct DenseArray<T> {
    values: Vec<T>,
    presence: RoaringBitmap,
    size: usize,
}

impl<T> DenseArray<T> {
    pub fn empty(size: usize) -> Self {
        Self {
            values: Vec::new(),
            presence: RoaringBitmap::new(),
            size,
        }
    }
    /// Entries must come in increasing position order.
    pub fn from_entries(size: usize, entries: impl IntoIterator<Item = (usize, T)>) -> Self {
        let mut array = Self::empty(size);
        for (position, value) in entries {
            debug_assert!(position < size);
            if array.presence.try_push(position as u32).is_ok() {
                array.values.push(value);
            }
        }
        array
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn present_count(&self) -> usize {
        self.values.len()
    }
    pub fn is_present(&self, position: usize) -> bool {
        self.presence.contains(position as u32)
    }
    pub fn get(&self, position: usize) -> Option<&T> {
        let position = position as u32;
        if !self.presence.contains(position) {
            return None;
        }
        let rank = self.presence.rank(position) as usize;
        self.values.get(rank - 1)
    }
    pub fn presence(&self) -> &RoaringBitmap {
        &self.presence
    }
    pub fn iter_present(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.presence.iter().map(|p| p as usize).zip(self.values.iter())
    }
}

// ------------- Column -------------
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Int32(DenseArray<i32>),
    Int64(DenseArray<i64>),
    Float32(DenseArray<f32>),
    Float64(DenseArray<f64>),
    Bool(DenseArray<bool>),
    Mask(DenseArray<()>),
    Text(DenseArray<String>),
    Bytes(DenseArray<Vec<u8>>),
    Expr(DenseArray<String>),
    ObjectId(DenseArray<ObjectId>),
    DType(DenseArray<DType>),
}

macro_rules! with_array {
    ($column:expr, $array:ident => $body:expr) => {
        match $column {
            Column::Int32($array) => $body,
            Column::Int64($array) => $body,
            Column::Float32($array) => $body,
            Column::Float64($array) => $body,
            Column::Bool($array) => $body,
            Column::Mask($array) => $body,
            Column::Text($array) => $body,
            Column::Bytes($array) => $body,
            Column::Expr($array) => $body,
            Column::ObjectId($array) => $body,
            Column::DType($array) => $body,
        }
    };
}

macro_rules! typed_entries {
    ($entries:expr, $variant:ident) => {
        $entries.into_iter().filter_map(|(position, item)| match item {
            DataItem::$variant(value) => Some((position, value)),
            _ => None,
        })
    };
}

impl Column {
    /// Builds a column from entries that all hold the same item variant.
    /// Returns `None` for an empty entry list or missing items.
    pub fn from_entries(size: usize, entries: Vec<(usize, DataItem)>) -> Option<Column> {
        let first = entries.first()?.1.clone();
        let column = match first {
            DataItem::Missing => return None,
            DataItem::Int32(_) => Column::Int32(DenseArray::from_entries(size, typed_entries!(entries, Int32))),
            DataItem::Int64(_) => Column::Int64(DenseArray::from_entries(size, typed_entries!(entries, Int64))),
            DataItem::Float32(_) => {
                Column::Float32(DenseArray::from_entries(size, typed_entries!(entries, Float32)))
            }
            DataItem::Float64(_) => {
                Column::Float64(DenseArray::from_entries(size, typed_entries!(entries, Float64)))
            }
            DataItem::Bool(_) => Column::Bool(DenseArray::from_entries(size, typed_entries!(entries, Bool))),
            DataItem::Mask => Column::Mask(DenseArray::from_entries(
                size,
                entries.into_iter().map(|(position, _)| (position, ())),
            )),
            DataItem::Text(_) => Column::Text(DenseArray::from_entries(size, typed_entries!(entries, Text))),
            DataItem::Bytes(_) => Column::Bytes(DenseArray::from_entries(size, typed_entries!(entries, Bytes))),
            DataItem::Expr(_) => Column::Expr(DenseArray::from_entries(size, typed_entries!(entries, Expr))),
            DataItem::ObjectId(_) => {
                Column::ObjectId(DenseArray::from_entries(size, typed_entries!(entries, ObjectId)))
            }
            DataItem::DType(_) => Column::DType(DenseArray::from_entries(size, typed_entries!(entries, DType))),
        };
        Some(column)
    }
    pub fn present_count(&self) -> usize {
        with_array!(self, array => array.present_count())
    }
    pub fn presence(&self) -> &RoaringBitmap {
        with_array!(self, array => array.presence())
    }
    pub fn get(&self, position: usize) -> Option<DataItem> {
        match self {
            Column::Int32(a) => a.get(position).map(|v| DataItem::Int32(*v)),
            Column::Int64(a) => a.get(position).map(|v| DataItem::Int64(*v)),
            Column::Float32(a) => a.get(position).map(|v| DataItem::Float32(*v)),
            Column::Float64(a) => a.get(position).map(|v| DataItem::Float64(*v)),
            Column::Bool(a) => a.get(position).map(|v| DataItem::Bool(*v)),
            Column::Mask(a) => a.get(position).map(|_| DataItem::Mask),
            Column::Text(a) => a.get(position).map(|v| DataItem::Text(v.clone())),
            Column::Bytes(a) => a.get(position).map(|v| DataItem::Bytes(v.clone())),
            Column::Expr(a) => a.get(position).map(|v| DataItem::Expr(v.clone())),
            Column::ObjectId(a) => a.get(position).map(|v| DataItem::ObjectId(*v)),
            Column::DType(a) => a.get(position).map(|v| DataItem::DType(*v)),
        }
    }
    /// Writes every present value into `out` at its position.
    pub fn scatter_into(&self, out: &mut [DataItem]) {
        for position in self.presence().iter() {
            if let Some(item) = self.get(position as usize) {
                out[position as usize] = item;
            }
        }
    }
    /// The dtype a schema must have to describe this column; `None` for
    /// object ids and schema markers.
    pub fn primitive_dtype(&self) -> Option<DType> {
        match self {
            Column::Int32(_) => Some(DType::Int32),
            Column::Int64(_) => Some(DType::Int64),
            Column::Float32(_) => Some(DType::Float32),
            Column::Float64(_) => Some(DType::Float64),
            Column::Bool(_) => Some(DType::Bool),
            Column::Mask(_) => Some(DType::Mask),
            Column::Text(_) => Some(DType::Text),
            Column::Bytes(_) => Some(DType::Bytes),
            Column::Expr(_) => Some(DType::Expr),
            Column::ObjectId(_) | Column::DType(_) => None,
        }
    }
}
