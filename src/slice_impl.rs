//! Columnar vector of [`DataItem`]s.
//!
//! A [`DataSliceImpl`] stores one [`Column`] per item type that is present,
//! so a slice is either empty, single-typed or mixed. Alongside the columns
//! it keeps the set of allocations its object ids come from; the triple store
//! uses that set to skip allocations it holds nothing for.
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::mem::{Discriminant, discriminant};

use roaring::RoaringBitmap;

use crate::data_item::DataItem;
use crate::dense_array::{Column, DenseArray};
use crate::dtype::DType;
use crate::object_id::{AllocationId, ObjectId, allocate};

#[derive(Clone, Debug, Default)]
pub struct DataSliceImpl {
    size: usize,
    columns: Vec<Column>,
    allocation_ids: BTreeSet<AllocationId>,
}

impl DataSliceImpl {
    pub fn create_empty_and_unknown(size: usize) -> Self {
        Self {
            size,
            columns: Vec::new(),
            allocation_ids: BTreeSet::new(),
        }
    }
    pub fn from_items(items: impl IntoIterator<Item = DataItem>) -> Self {
        let mut size = 0;
        // grouped by variant, positions stay increasing within a group
        let mut groups: HashMap<Discriminant<DataItem>, Vec<(usize, DataItem)>> = HashMap::new();
        let mut order: Vec<Discriminant<DataItem>> = Vec::new();
        let mut allocation_ids = BTreeSet::new();
        for (position, item) in items.into_iter().enumerate() {
            size = position + 1;
            if item.is_missing() {
                continue;
            }
            if let Some(id) = item.as_object_id() {
                allocation_ids.insert(id.allocation());
            }
            let key = discriminant(&item);
            groups
                .entry(key)
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push((position, item));
        }
        let columns = order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .filter_map(|entries| Column::from_entries(size, entries))
            .collect();
        Self {
            size,
            columns,
            allocation_ids,
        }
    }
    /// `size` copies of `item`.
    pub fn create(size: usize, item: DataItem) -> Self {
        let mut slice = Self::from_items(std::iter::repeat_n(item, size));
        slice.size = size;
        slice
    }
    pub fn from_object_ids(size: usize, ids: impl IntoIterator<Item = (usize, ObjectId)>) -> Self {
        let array = DenseArray::from_entries(size, ids);
        let allocation_ids = array.iter_present().map(|(_, id)| id.allocation()).collect();
        let columns = if array.present_count() > 0 {
            vec![Column::ObjectId(array)]
        } else {
            Vec::new()
        };
        Self {
            size,
            columns,
            allocation_ids,
        }
    }
    pub fn objects_from_allocation(alloc: AllocationId, size: usize) -> Self {
        Self::from_object_ids(size, (0..size).map(|i| (i, alloc.object_by_offset(i as u64))))
    }
    pub fn allocate_empty_objects(size: usize) -> Self {
        Self::objects_from_allocation(allocate(size), size)
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn present_count(&self) -> usize {
        self.columns.iter().map(Column::present_count).sum()
    }
    pub fn is_empty_and_unknown(&self) -> bool {
        self.columns.is_empty()
    }
    pub fn is_single_dtype(&self) -> bool {
        self.columns.len() == 1
    }
    pub fn is_mixed_dtype(&self) -> bool {
        self.columns.len() > 1
    }
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
    pub fn allocation_ids(&self) -> &BTreeSet<AllocationId> {
        &self.allocation_ids
    }
    pub fn get(&self, position: usize) -> DataItem {
        self.columns
            .iter()
            .find_map(|column| column.get(position))
            .unwrap_or_default()
    }
    pub fn to_items(&self) -> Vec<DataItem> {
        let mut out = vec![DataItem::Missing; self.size];
        for column in &self.columns {
            column.scatter_into(&mut out);
        }
        out
    }
    pub fn iter(&self) -> impl Iterator<Item = DataItem> + '_ {
        (0..self.size).map(|position| self.get(position))
    }
    pub fn presence(&self) -> RoaringBitmap {
        self.columns
            .iter()
            .fold(RoaringBitmap::new(), |acc, column| acc | column.presence())
    }
    /// Present object ids with their positions, in position order.
    pub fn object_ids(&self) -> Vec<(usize, ObjectId)> {
        self.columns
            .iter()
            .find_map(|column| match column {
                Column::ObjectId(array) => Some(array.iter_present().map(|(p, id)| (p, *id)).collect()),
                _ => None,
            })
            .unwrap_or_default()
    }
    pub fn contains_only_object_ids(&self) -> bool {
        self.columns.iter().all(|column| matches!(column, Column::ObjectId(_)))
    }
    pub fn primitive_dtypes(&self) -> Vec<DType> {
        self.columns.iter().filter_map(Column::primitive_dtype).collect()
    }
    pub fn has_dtype_items(&self) -> bool {
        self.columns.iter().any(|column| matches!(column, Column::DType(_)))
    }
}

impl FromIterator<DataItem> for DataSliceImpl {
    fn from_iter<I: IntoIterator<Item = DataItem>>(iter: I) -> Self {
        Self::from_items(iter)
    }
}

impl PartialEq for DataSliceImpl {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.to_items() == other.to_items()
    }
}

impl fmt::Display for DataSliceImpl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let items: Vec<String> = self.iter().map(|item| item.to_string()).collect();
        write!(f, "[{}]", items.join(", "))
    }
}
