// Dict storage. Each layer holds a KeyedLayer per dict it wrote to; clearing a
// dict hides every layer below.
use std::collections::BTreeSet;

use super::{DataBagImpl, FallbackSpan, item_to_dict_id};
use crate::data_item::DataItem;
use crate::error::{Result, invalid, precondition};
use crate::object_id::ObjectId;
use crate::shape::Edge;
use crate::slice_impl::DataSliceImpl;

/// Float, expression and schema marker items cannot be dict keys.
pub(crate) fn verify_dict_key(key: &DataItem) -> Result<()> {
    match key {
        DataItem::Float32(_) => invalid("invalid key type: FLOAT32"),
        DataItem::Float64(_) => invalid("invalid key type: FLOAT64"),
        DataItem::Expr(_) => invalid("invalid key type: EXPR"),
        DataItem::DType(_) => invalid("invalid key type: DTYPE"),
        _ => Ok(()),
    }
}

fn slice_to_dict_ids(dicts: &DataSliceImpl) -> Result<Vec<(usize, ObjectId)>> {
    if !dicts.contains_only_object_ids() {
        return precondition("dicts expected");
    }
    let ids = dicts.object_ids();
    for (_, id) in &ids {
        item_to_dict_id(&DataItem::ObjectId(*id))?;
    }
    Ok(ids)
}

impl DataBagImpl {
    // Some(Missing) means the key was removed in the chain.
    pub(super) fn lookup_dict_value(&self, dict: ObjectId, key: &DataItem) -> Option<&DataItem> {
        for layer in self.layers() {
            if let Some(entries) = layer.dicts.get(&dict) {
                if let Some(value) = entries.entries.get(key) {
                    return Some(value);
                }
                if entries.cleared {
                    return None;
                }
            }
        }
        None
    }

    pub(crate) fn defined_dicts(&self) -> BTreeSet<ObjectId> {
        self.layers().flat_map(|layer| layer.dicts.keys().copied()).collect()
    }

    pub fn get_from_dict(&self, dict: &DataItem, key: &DataItem, fallbacks: FallbackSpan) -> Result<DataItem> {
        let Some(dict_id) = item_to_dict_id(dict)? else {
            return Ok(DataItem::Missing);
        };
        if key.is_missing() {
            return Ok(DataItem::Missing);
        }
        verify_dict_key(key)?;
        Ok(std::iter::once(self)
            .chain(fallbacks.iter().copied())
            .find_map(|bag| bag.lookup_dict_value(dict_id, key).filter(|value| value.has_value()))
            .cloned()
            .unwrap_or_default())
    }

    pub fn get_from_dicts(
        &self,
        dicts: &DataSliceImpl,
        keys: &DataSliceImpl,
        fallbacks: FallbackSpan,
    ) -> Result<DataSliceImpl> {
        if dicts.size() != keys.size() {
            return invalid(format!(
                "dicts and keys sizes don't match: {} vs {}",
                dicts.size(),
                keys.size()
            ));
        }
        if dicts.is_empty_and_unknown() {
            return Ok(DataSliceImpl::create_empty_and_unknown(dicts.size()));
        }
        let keys = keys.to_items();
        let mut result = vec![DataItem::Missing; dicts.size()];
        for (position, id) in slice_to_dict_ids(dicts)? {
            result[position] = self.get_from_dict(&DataItem::ObjectId(id), &keys[position], fallbacks)?;
        }
        Ok(DataSliceImpl::from_items(result))
    }

    /// A missing key is a no-op; a missing value removes the key.
    pub fn set_in_dict(&mut self, dict: &DataItem, key: &DataItem, value: DataItem) -> Result<()> {
        let Some(dict_id) = item_to_dict_id(dict)? else {
            return Ok(());
        };
        if key.is_missing() {
            return Ok(());
        }
        verify_dict_key(key)?;
        self.dicts.entry(dict_id).or_default().set(key.clone(), value);
        Ok(())
    }

    pub fn set_in_dicts(&mut self, dicts: &DataSliceImpl, keys: &DataSliceImpl, values: &DataSliceImpl) -> Result<()> {
        if dicts.size() != keys.size() {
            return invalid(format!(
                "dicts and keys sizes don't match: {} vs {}",
                dicts.size(),
                keys.size()
            ));
        }
        if keys.size() != values.size() {
            return invalid(format!(
                "keys and values sizes don't match: {} vs {}",
                keys.size(),
                values.size()
            ));
        }
        if dicts.is_empty_and_unknown() {
            return Ok(());
        }
        let keys = keys.to_items();
        let values = values.to_items();
        // validate before writing anything
        for key in &keys {
            if key.has_value() {
                verify_dict_key(key)?;
            }
        }
        let ids = slice_to_dict_ids(dicts)?;
        for (position, id) in ids {
            self.set_in_dict(&DataItem::ObjectId(id), &keys[position], values[position].clone())?;
        }
        Ok(())
    }

    /// Present keys of `dict`, merged across this store and the fallbacks,
    /// sorted.
    pub fn get_dict_keys(&self, dict: &DataItem, fallbacks: FallbackSpan) -> Result<Vec<DataItem>> {
        let Some(dict_id) = item_to_dict_id(dict)? else {
            return Ok(Vec::new());
        };
        let mut keys = Vec::new();
        for bag in std::iter::once(self).chain(fallbacks.iter().copied()) {
            keys.extend(bag.collect_keyed(|layer| layer.dicts.get(&dict_id)));
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Values in the order of [`DataBagImpl::get_dict_keys`].
    pub fn get_dict_values(&self, dict: &DataItem, fallbacks: FallbackSpan) -> Result<Vec<DataItem>> {
        self.get_dict_keys(dict, fallbacks)?
            .iter()
            .map(|key| self.get_from_dict(dict, key, fallbacks))
            .collect()
    }

    pub fn get_dict_size(&self, dict: &DataItem, fallbacks: FallbackSpan) -> Result<usize> {
        Ok(self.get_dict_keys(dict, fallbacks)?.len())
    }

    /// Keys of every dict, concatenated, with the edge grouping them by dict.
    pub fn get_dict_keys_slice(&self, dicts: &DataSliceImpl, fallbacks: FallbackSpan) -> Result<(DataSliceImpl, Edge)> {
        self.per_dict(dicts, |dict| self.get_dict_keys(dict, fallbacks))
    }

    pub fn get_dict_values_slice(
        &self,
        dicts: &DataSliceImpl,
        fallbacks: FallbackSpan,
    ) -> Result<(DataSliceImpl, Edge)> {
        self.per_dict(dicts, |dict| self.get_dict_values(dict, fallbacks))
    }

    fn per_dict<F>(&self, dicts: &DataSliceImpl, items_of: F) -> Result<(DataSliceImpl, Edge)>
    where
        F: Fn(&DataItem) -> Result<Vec<DataItem>>,
    {
        if dicts.is_empty_and_unknown() {
            return Ok((
                DataSliceImpl::create_empty_and_unknown(0),
                Edge::from_uniform_groups(dicts.size(), 0),
            ));
        }
        let mut sizes = vec![0; dicts.size()];
        let mut items = Vec::new();
        for (position, id) in slice_to_dict_ids(dicts)? {
            let group = items_of(&DataItem::ObjectId(id))?;
            sizes[position] = group.len();
            items.extend(group);
        }
        Ok((DataSliceImpl::from_items(items), Edge::from_sizes(&sizes)))
    }

    /// Hides every key of `dict`, including the ones from parent layers.
    pub fn clear_dict(&mut self, dict: &DataItem) -> Result<()> {
        let Some(dict_id) = item_to_dict_id(dict)? else {
            return Ok(());
        };
        self.dicts.entry(dict_id).or_default().clear();
        Ok(())
    }
}
