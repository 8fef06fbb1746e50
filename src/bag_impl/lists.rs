// List storage. A layer owns a list once it writes to it; the first write
// copies the list from the parent layers.
use std::collections::BTreeSet;

use super::{DataBagImpl, FallbackSpan, item_to_list_id};
use crate::data_item::DataItem;
use crate::error::{DataBagError, Result, invalid, precondition};
use crate::object_id::ObjectId;
use crate::shape::Edge;
use crate::slice_impl::DataSliceImpl;

/// A python-style `[from:to]` range. Negative bounds count from the end,
/// out of range bounds are clamped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListRange {
    from: i64,
    to: Option<i64>,
}

impl Default for ListRange {
    fn default() -> Self {
        Self::all()
    }
}

impl ListRange {
    pub fn all() -> Self {
        Self { from: 0, to: None }
    }
    pub fn new(from: i64, to: Option<i64>) -> Self {
        Self { from, to }
    }
    pub fn bounds(&self, size: usize) -> (usize, usize) {
        let size = size as i64;
        let resolve = |bound: i64| {
            let bound = if bound < 0 { bound + size } else { bound };
            bound.clamp(0, size)
        };
        let from = resolve(self.from);
        let to = self.to.map(resolve).unwrap_or(size).max(from);
        (from as usize, to as usize)
    }
}

fn resolve_index(index: i64, size: usize) -> Option<usize> {
    let size = size as i64;
    let index = if index < 0 { index + size } else { index };
    (0..size).contains(&index).then_some(index as usize)
}

fn item_to_index(item: &DataItem) -> Result<Option<i64>> {
    match item {
        DataItem::Missing => Ok(None),
        DataItem::Int32(v) => Ok(Some(*v as i64)),
        DataItem::Int64(v) => Ok(Some(*v)),
        _ => invalid(format!("list indices must be integers, got {}", item)),
    }
}

// Present list ids of a slice with their positions.
fn slice_to_list_ids(lists: &DataSliceImpl) -> Result<Vec<(usize, ObjectId)>> {
    if !lists.contains_only_object_ids() {
        return precondition("lists expected");
    }
    let ids = lists.object_ids();
    for (_, id) in &ids {
        item_to_list_id(&DataItem::ObjectId(*id))?;
    }
    Ok(ids)
}

impl DataBagImpl {
    pub(super) fn lookup_list(&self, list: ObjectId) -> Option<&Vec<DataItem>> {
        self.layers().find_map(|layer| layer.lists.get(&list))
    }

    pub(super) fn list_with_fallbacks<'a>(&'a self, list: ObjectId, fallbacks: FallbackSpan<'a>) -> Option<&'a Vec<DataItem>> {
        std::iter::once(self)
            .chain(fallbacks.iter().copied())
            .find_map(|bag| bag.lookup_list(list))
    }

    fn mutable_list(&mut self, list: ObjectId) -> &mut Vec<DataItem> {
        let parent = &self.parent;
        self.lists
            .entry(list)
            .or_insert_with(|| parent.as_ref().and_then(|p| p.lookup_list(list)).cloned().unwrap_or_default())
    }

    /// Copies the lists among `lists` that only a fallback defines into this
    /// layer.
    pub fn seed_lists(&mut self, lists: &DataSliceImpl, fallbacks: FallbackSpan) -> Result<()> {
        if lists.is_empty_and_unknown() {
            return Ok(());
        }
        for (_, id) in slice_to_list_ids(lists)? {
            if self.lookup_list(id).is_some() {
                continue;
            }
            if let Some(items) = fallbacks.iter().find_map(|bag| bag.lookup_list(id)) {
                let items = items.clone();
                self.lists.insert(id, items);
            }
        }
        Ok(())
    }

    pub(crate) fn defined_lists(&self) -> BTreeSet<ObjectId> {
        self.layers().flat_map(|layer| layer.lists.keys().copied()).collect()
    }

    pub fn get_list_size(&self, list: &DataItem, fallbacks: FallbackSpan) -> Result<usize> {
        let Some(id) = item_to_list_id(list)? else {
            return Ok(0);
        };
        Ok(self.list_with_fallbacks(id, fallbacks).map_or(0, Vec::len))
    }

    /// Out of range indices give a missing item, not an error.
    pub fn get_from_list(&self, list: &DataItem, index: i64, fallbacks: FallbackSpan) -> Result<DataItem> {
        let Some(id) = item_to_list_id(list)? else {
            return Ok(DataItem::Missing);
        };
        let Some(items) = self.list_with_fallbacks(id, fallbacks) else {
            return Ok(DataItem::Missing);
        };
        Ok(resolve_index(index, items.len())
            .map(|i| items[i].clone())
            .unwrap_or_default())
    }

    pub fn get_from_lists(
        &self,
        lists: &DataSliceImpl,
        indices: &DataSliceImpl,
        fallbacks: FallbackSpan,
    ) -> Result<DataSliceImpl> {
        if lists.size() != indices.size() {
            return invalid(format!(
                "lists and indices sizes don't match: {} vs {}",
                lists.size(),
                indices.size()
            ));
        }
        if lists.is_empty_and_unknown() {
            return Ok(DataSliceImpl::create_empty_and_unknown(lists.size()));
        }
        let indices = indices.to_items();
        let mut result = vec![DataItem::Missing; lists.size()];
        for (position, id) in slice_to_list_ids(lists)? {
            if let Some(index) = item_to_index(&indices[position])? {
                result[position] = self.get_from_list(&DataItem::ObjectId(id), index, fallbacks)?;
            }
        }
        Ok(DataSliceImpl::from_items(result))
    }

    pub fn explode_list(&self, list: &DataItem, range: ListRange, fallbacks: FallbackSpan) -> Result<Vec<DataItem>> {
        let Some(id) = item_to_list_id(list)? else {
            return Ok(Vec::new());
        };
        let Some(items) = self.list_with_fallbacks(id, fallbacks) else {
            return Ok(Vec::new());
        };
        let (from, to) = range.bounds(items.len());
        Ok(items[from..to].to_vec())
    }

    /// Items of every list, concatenated, with the edge grouping them by list.
    pub fn explode_lists(
        &self,
        lists: &DataSliceImpl,
        range: ListRange,
        fallbacks: FallbackSpan,
    ) -> Result<(DataSliceImpl, Edge)> {
        if lists.is_empty_and_unknown() {
            return Ok((
                DataSliceImpl::create_empty_and_unknown(0),
                Edge::from_uniform_groups(lists.size(), 0),
            ));
        }
        let mut sizes = vec![0; lists.size()];
        let mut items = Vec::new();
        for (position, id) in slice_to_list_ids(lists)? {
            let exploded = self.explode_list(&DataItem::ObjectId(id), range, fallbacks)?;
            sizes[position] = exploded.len();
            items.extend(exploded);
        }
        // sizes are per position; items were appended in position order
        Ok((DataSliceImpl::from_items(items), Edge::from_sizes(&sizes)))
    }

    pub fn extend_list(&mut self, list: &DataItem, values: &[DataItem]) -> Result<()> {
        let Some(id) = item_to_list_id(list)? else {
            return Ok(());
        };
        self.mutable_list(id).extend_from_slice(values);
        Ok(())
    }

    /// Appends `values` to `lists`; `edge` says how many values go to each list.
    pub fn extend_lists(&mut self, lists: &DataSliceImpl, values: &DataSliceImpl, edge: &Edge) -> Result<()> {
        if edge.parent_size() != lists.size() || edge.child_size() != values.size() {
            return invalid(format!(
                "edge {:?} does not match {} lists and {} values",
                edge.split_points(),
                lists.size(),
                values.size()
            ));
        }
        let values = values.to_items();
        let splits = edge.split_points();
        for (position, id) in slice_to_list_ids(lists)? {
            self.mutable_list(id)
                .extend_from_slice(&values[splits[position]..splits[position + 1]]);
        }
        Ok(())
    }

    pub fn append_to_list(&mut self, list: &DataItem, value: DataItem) -> Result<()> {
        self.extend_list(list, std::slice::from_ref(&value))
    }

    /// Out of range indices are ignored.
    pub fn set_in_list(&mut self, list: &DataItem, index: i64, value: DataItem) -> Result<()> {
        let Some(id) = item_to_list_id(list)? else {
            return Ok(());
        };
        let items = self.mutable_list(id);
        if let Some(i) = resolve_index(index, items.len()) {
            items[i] = value;
        }
        Ok(())
    }

    pub fn set_in_lists(&mut self, lists: &DataSliceImpl, indices: &DataSliceImpl, values: &DataSliceImpl) -> Result<()> {
        if lists.size() != indices.size() || lists.size() != values.size() {
            return invalid(format!(
                "lists, indices and values sizes don't match: {}, {}, {}",
                lists.size(),
                indices.size(),
                values.size()
            ));
        }
        if lists.is_empty_and_unknown() {
            return Ok(());
        }
        let indices = indices.to_items();
        let values = values.to_items();
        for (position, id) in slice_to_list_ids(lists)? {
            if let Some(index) = item_to_index(&indices[position])? {
                self.set_in_list(&DataItem::ObjectId(id), index, values[position].clone())?;
            }
        }
        Ok(())
    }

    /// Removes and returns the item at `index`; missing when out of range.
    pub fn pop_from_list(&mut self, list: &DataItem, index: i64) -> Result<DataItem> {
        let Some(id) = item_to_list_id(list)? else {
            return Ok(DataItem::Missing);
        };
        let items = self.mutable_list(id);
        Ok(resolve_index(index, items.len())
            .map(|i| items.remove(i))
            .unwrap_or_default())
    }

    pub fn pop_from_lists(&mut self, lists: &DataSliceImpl, indices: &DataSliceImpl) -> Result<DataSliceImpl> {
        if lists.size() != indices.size() {
            return invalid(format!(
                "lists and indices sizes don't match: {} vs {}",
                lists.size(),
                indices.size()
            ));
        }
        if lists.is_empty_and_unknown() {
            return Ok(DataSliceImpl::create_empty_and_unknown(lists.size()));
        }
        let indices = indices.to_items();
        let mut result = vec![DataItem::Missing; lists.size()];
        for (position, id) in slice_to_list_ids(lists)? {
            if let Some(index) = item_to_index(&indices[position])? {
                result[position] = self.pop_from_list(&DataItem::ObjectId(id), index)?;
            }
        }
        Ok(DataSliceImpl::from_items(result))
    }

    /// Replaces `list[range]` with `values`.
    pub fn replace_in_list(&mut self, list: &DataItem, range: ListRange, values: &[DataItem]) -> Result<()> {
        let Some(id) = item_to_list_id(list)? else {
            return Ok(());
        };
        let items = self.mutable_list(id);
        let (from, to) = range.bounds(items.len());
        items.splice(from..to, values.iter().cloned());
        Ok(())
    }

    pub fn replace_in_lists(
        &mut self,
        lists: &DataSliceImpl,
        range: ListRange,
        values: &DataSliceImpl,
        edge: &Edge,
    ) -> Result<()> {
        if edge.parent_size() != lists.size() || edge.child_size() != values.size() {
            return Err(DataBagError::InvalidArgument(format!(
                "edge {:?} does not match {} lists and {} values",
                edge.split_points(),
                lists.size(),
                values.size()
            )));
        }
        let values = values.to_items();
        let splits = edge.split_points();
        for (position, id) in slice_to_list_ids(lists)? {
            self.replace_in_list(
                &DataItem::ObjectId(id),
                range,
                &values[splits[position]..splits[position + 1]],
            )?;
        }
        Ok(())
    }

    pub fn remove_in_list(&mut self, list: &DataItem, range: ListRange) -> Result<()> {
        self.replace_in_list(list, range, &[])
    }

    /// Removes the items at `indices`. Negative indices count from the end;
    /// out of range and repeated indices are ignored.
    pub fn remove_in_list_by_indices(&mut self, list: &DataItem, indices: &[i64]) -> Result<()> {
        let Some(id) = item_to_list_id(list)? else {
            return Ok(());
        };
        let items = self.mutable_list(id);
        let size = items.len();
        let removed: BTreeSet<usize> = indices.iter().filter_map(|&i| resolve_index(i, size)).collect();
        let mut position = 0;
        items.retain(|_| {
            let keep = !removed.contains(&position);
            position += 1;
            keep
        });
        Ok(())
    }

    pub fn clear_list(&mut self, list: &DataItem) -> Result<()> {
        let Some(id) = item_to_list_id(list)? else {
            return Ok(());
        };
        self.mutable_list(id).clear();
        Ok(())
    }

    pub fn clear_lists(&mut self, lists: &DataSliceImpl) -> Result<()> {
        if lists.is_empty_and_unknown() {
            return Ok(());
        }
        for (_, id) in slice_to_list_ids(lists)? {
            self.mutable_list(id).clear();
        }
        Ok(())
    }
}
