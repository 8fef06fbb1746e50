//! The triple store.
//!
//! A [`DataBagImpl`] maps
//! * `(object, attribute)` to a value,
//! * a list id to its ordered items,
//! * `(dict, key)` to a value,
//! * `(schema, attribute)` to a schema, in a namespace disjoint from data.
//!
//! Stores are layered: a store may have a frozen `parent` and only records
//! its own writes, so a fork is O(1). Lookups walk the layers top-down and
//! stop at the first layer that knows the triple. A missing value stored in a
//! layer is a tombstone that masks the layers below it.
//!
//! Every read also takes a list of fallback stores. Fallbacks are consulted in
//! order, per item, for whatever the store itself resolves to missing.
//!
//! No schema validation happens here; that belongs to the DataSlice layer.
mod content;
mod dicts;
mod lists;
mod merge;

pub use content::{DataBagContent, DataBagIndex, DataBagStatistics};
pub(crate) use dicts::verify_dict_key;
pub use lists::ListRange;
pub use merge::{ConflictPolicy, MergeOptions};

use core::hash::BuildHasherDefault;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

// we will use a fast hashing algo for maps keyed by ids and attribute names
use seahash::SeaHasher;

use crate::data_item::DataItem;
use crate::error::{DataBagError, Result, precondition};
use crate::object_id::{AllocationId, ObjectId};
use crate::slice_impl::DataSliceImpl;

pub type IdHasher = BuildHasherDefault<SeaHasher>;
pub type NameHasher = BuildHasherDefault<SeaHasher>;

/// Read-only stores consulted, in order, when a lookup misses.
pub type FallbackSpan<'a> = &'a [&'a DataBagImpl];

// Attribute values of one allocation, keyed by offset.
type AttrSource = HashMap<u64, DataItem, IdHasher>;

// ------------- Keyed layer -------------
/// One layer of a dict (or of a schema's attributes). `cleared` hides
/// everything below this layer; a missing value hides one key.
#[derive(Clone, Debug)]
pub(crate) struct KeyedLayer<K: Eq + Hash> {
    entries: HashMap<K, DataItem, IdHasher>,
    cleared: bool,
}

impl<K: Eq + Hash> Default for KeyedLayer<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::default(),
            cleared: false,
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLayer<K> {
    pub(crate) fn set(&mut self, key: K, value: DataItem) {
        self.entries.insert(key, value);
    }
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.cleared = true;
    }
}

// ------------- DataBagImpl -------------
#[derive(Clone, Debug, Default)]
pub struct DataBagImpl {
    parent: Option<Arc<DataBagImpl>>,
    attrs: HashMap<String, HashMap<AllocationId, AttrSource, IdHasher>, NameHasher>,
    lists: HashMap<ObjectId, Vec<DataItem>, IdHasher>,
    dicts: HashMap<ObjectId, KeyedLayer<DataItem>, IdHasher>,
    schemas: HashMap<ObjectId, KeyedLayer<String>, IdHasher>,
}

/// Layers deeper than this are squashed when forking.
const MAX_PARENT_DEPTH: usize = 32;

pub(crate) fn item_to_list_id(list: &DataItem) -> Result<Option<ObjectId>> {
    match list {
        DataItem::Missing => Ok(None),
        DataItem::ObjectId(id) if id.is_list() => Ok(Some(*id)),
        _ => precondition(format!("list expected, got {}", list)),
    }
}

pub(crate) fn item_to_dict_id(dict: &DataItem) -> Result<Option<ObjectId>> {
    match dict {
        DataItem::Missing => Ok(None),
        DataItem::ObjectId(id) if id.is_dict() => Ok(Some(*id)),
        _ => precondition(format!("dict expected, got {}", dict)),
    }
}

pub(crate) fn item_to_schema_id(schema: &DataItem) -> Result<Option<ObjectId>> {
    match schema {
        DataItem::Missing => Ok(None),
        DataItem::ObjectId(id) if id.is_schema() => Ok(Some(*id)),
        DataItem::DType(_) => precondition(format!("cannot get or set attributes on schema: {}", schema)),
        _ => precondition(format!("schema expected, got {}", schema)),
    }
}

pub(crate) fn verify_is_schema(item: &DataItem) -> Result<()> {
    if item.is_schema() {
        Ok(())
    } else {
        Err(DataBagError::InvalidArgument(format!(
            "only schemas can be assigned as attributes of schemas, got: {}",
            item
        )))
    }
}

impl DataBagImpl {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new empty layer on top of `parent`. The parent must not be mutated
    /// afterwards, which `Arc` guarantees unless it is uniquely owned.
    pub fn partially_persistent_fork(parent: &Arc<DataBagImpl>) -> Result<DataBagImpl> {
        if parent.depth() >= MAX_PARENT_DEPTH {
            let squashed = Self::from_content(&parent.extract_content())?;
            return Ok(DataBagImpl {
                parent: Some(Arc::new(squashed)),
                ..Default::default()
            });
        }
        Ok(DataBagImpl {
            parent: Some(Arc::clone(parent)),
            ..Default::default()
        })
    }

    pub fn parent(&self) -> Option<&Arc<DataBagImpl>> {
        self.parent.as_ref()
    }

    pub(crate) fn layers(&self) -> impl Iterator<Item = &DataBagImpl> + '_ {
        std::iter::successors(Some(self), |layer| layer.parent.as_deref())
    }

    fn depth(&self) -> usize {
        self.layers().count()
    }

    // ------------- Attributes -------------

    // Some(Missing) is a tombstone.
    fn lookup_attr(&self, object: ObjectId, attr: &str) -> Option<&DataItem> {
        let alloc = object.allocation();
        self.layers().find_map(|layer| {
            layer
                .attrs
                .get(attr)
                .and_then(|sources| sources.get(&alloc))
                .and_then(|source| source.get(&object.offset()))
        })
    }

    fn has_attr_source(&self, alloc: AllocationId, attr: &str) -> bool {
        self.layers().any(|layer| {
            layer
                .attrs
                .get(attr)
                .is_some_and(|sources| sources.contains_key(&alloc))
        })
    }

    fn lookup_attr_with_fallbacks(&self, object: ObjectId, attr: &str, fallbacks: FallbackSpan) -> DataItem {
        std::iter::once(self)
            .chain(fallbacks.iter().copied())
            .find_map(|bag| bag.lookup_attr(object, attr).filter(|value| value.has_value()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_attr(&self, object: &DataItem, attr: &str, fallbacks: FallbackSpan) -> Result<DataItem> {
        match object {
            DataItem::Missing => Ok(DataItem::Missing),
            DataItem::ObjectId(id) => Ok(self.lookup_attr_with_fallbacks(*id, attr, fallbacks)),
            _ => precondition("getting attribute of a primitive is not allowed"),
        }
    }

    /// Vectorized lookup. Allocations no store holds `attr` for are skipped.
    pub fn get_attr_slice(&self, objects: &DataSliceImpl, attr: &str, fallbacks: FallbackSpan) -> Result<DataSliceImpl> {
        if objects.is_empty_and_unknown() {
            return Ok(DataSliceImpl::create_empty_and_unknown(objects.size()));
        }
        if !objects.contains_only_object_ids() {
            return precondition("getting attributes of primitives is not allowed");
        }
        let known: HashSet<AllocationId, IdHasher> = objects
            .allocation_ids()
            .iter()
            .copied()
            .filter(|alloc| {
                self.has_attr_source(*alloc, attr) || fallbacks.iter().any(|fb| fb.has_attr_source(*alloc, attr))
            })
            .collect();
        if known.is_empty() {
            return Ok(DataSliceImpl::create_empty_and_unknown(objects.size()));
        }
        let mut result = vec![DataItem::Missing; objects.size()];
        for (position, id) in objects.object_ids() {
            if known.contains(&id.allocation()) {
                result[position] = self.lookup_attr_with_fallbacks(id, attr, fallbacks);
            }
        }
        Ok(DataSliceImpl::from_items(result))
    }

    pub fn set_attr(&mut self, object: &DataItem, attr: &str, value: DataItem) -> Result<()> {
        match object {
            DataItem::Missing => Ok(()),
            DataItem::ObjectId(id) => {
                self.attrs
                    .entry(attr.to_owned())
                    .or_default()
                    .entry(id.allocation())
                    .or_default()
                    .insert(id.offset(), value);
                Ok(())
            }
            _ => precondition("setting attribute of a primitive is not allowed"),
        }
    }

    pub fn set_attr_slice(&mut self, objects: &DataSliceImpl, attr: &str, values: &DataSliceImpl) -> Result<()> {
        if objects.size() != values.size() {
            return Err(DataBagError::InvalidArgument(format!(
                "objects and values sizes don't match: {} vs {}",
                objects.size(),
                values.size()
            )));
        }
        if objects.is_empty_and_unknown() {
            return Ok(());
        }
        if !objects.contains_only_object_ids() {
            return precondition("setting attribute of primitives is not allowed");
        }
        let values = values.to_items();
        for (position, id) in objects.object_ids() {
            self.set_attr(&DataItem::ObjectId(id), attr, values[position].clone())?;
        }
        Ok(())
    }

    /// Masks the attribute in this layer.
    pub fn del_attr(&mut self, object: &DataItem, attr: &str) -> Result<()> {
        self.set_attr(object, attr, DataItem::Missing)
    }

    // ------------- Schemas -------------

    // Some(Missing) means removed in the chain.
    fn lookup_schema_attr(&self, schema: ObjectId, attr: &str) -> Option<&DataItem> {
        for layer in self.layers() {
            if let Some(dict) = layer.schemas.get(&schema) {
                if let Some(value) = dict.entries.get(attr) {
                    return Some(value);
                }
                if dict.cleared {
                    return None;
                }
            }
        }
        None
    }

    pub fn get_schema_attr_allow_missing(
        &self,
        schema: &DataItem,
        attr: &str,
        fallbacks: FallbackSpan,
    ) -> Result<DataItem> {
        let Some(schema_id) = item_to_schema_id(schema)? else {
            return Ok(DataItem::Missing);
        };
        Ok(std::iter::once(self)
            .chain(fallbacks.iter().copied())
            .find_map(|bag| bag.lookup_schema_attr(schema_id, attr).filter(|value| value.has_value()))
            .cloned()
            .unwrap_or_default())
    }

    pub fn get_schema_attr(&self, schema: &DataItem, attr: &str, fallbacks: FallbackSpan) -> Result<DataItem> {
        let result = self.get_schema_attr_allow_missing(schema, attr, fallbacks)?;
        if result.is_missing() && schema.has_value() {
            return Err(DataBagError::InvalidArgument(format!("the attribute '{}' is missing", attr)));
        }
        Ok(result)
    }

    /// Names of the present attributes of `schema`, sorted.
    pub fn get_schema_attrs(&self, schema: &DataItem, fallbacks: FallbackSpan) -> Result<Vec<String>> {
        let Some(schema_id) = item_to_schema_id(schema)? else {
            return Ok(Vec::new());
        };
        let mut names = Vec::new();
        for bag in std::iter::once(self).chain(fallbacks.iter().copied()) {
            names.extend(bag.collect_keyed(|layer| layer.schemas.get(&schema_id)));
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn set_schema_attr(&mut self, schema: &DataItem, attr: &str, value: DataItem) -> Result<()> {
        let Some(schema_id) = item_to_schema_id(schema)? else {
            return Ok(());
        };
        verify_is_schema(&value)?;
        self.schemas
            .entry(schema_id)
            .or_default()
            .set(attr.to_owned(), value);
        Ok(())
    }

    /// Removes the attribute; it must exist.
    pub fn del_schema_attr(&mut self, schema: &DataItem, attr: &str) -> Result<()> {
        self.get_schema_attr(schema, attr, &[])?;
        let Some(schema_id) = item_to_schema_id(schema)? else {
            return Ok(());
        };
        self.schemas
            .entry(schema_id)
            .or_default()
            .set(attr.to_owned(), DataItem::Missing);
        Ok(())
    }

    /// Sets several attributes, keeping the others.
    pub fn set_schema_fields(&mut self, schema: &DataItem, names: &[&str], values: &[DataItem]) -> Result<()> {
        let Some(schema_id) = item_to_schema_id(schema)? else {
            return Ok(());
        };
        for value in values {
            verify_is_schema(value)?;
        }
        let dict = self.schemas.entry(schema_id).or_default();
        for (name, value) in names.iter().zip(values) {
            dict.set((*name).to_owned(), value.clone());
        }
        Ok(())
    }

    /// Replaces all attributes of the schema.
    pub fn overwrite_schema_fields(&mut self, schema: &DataItem, names: &[&str], values: &[DataItem]) -> Result<()> {
        let Some(schema_id) = item_to_schema_id(schema)? else {
            return Ok(());
        };
        for value in values {
            verify_is_schema(value)?;
        }
        let dict = self.schemas.entry(schema_id).or_default();
        dict.clear();
        for (name, value) in names.iter().zip(values) {
            dict.set((*name).to_owned(), value.clone());
        }
        Ok(())
    }

    // Present keys of a keyed structure (dict or schema) across this store's
    // layers. Unsorted.
    pub(crate) fn collect_keyed<'a, K, F>(&'a self, get: F) -> Vec<K>
    where
        K: Eq + Hash + Clone + 'a,
        F: Fn(&'a DataBagImpl) -> Option<&'a KeyedLayer<K>>,
    {
        let mut seen: HashSet<&K, IdHasher> = HashSet::default();
        let mut keys = Vec::new();
        for layer in self.layers() {
            let Some(dict) = get(layer) else { continue };
            for (key, value) in &dict.entries {
                if seen.insert(key) && value.has_value() {
                    keys.push(key.clone());
                }
            }
            if dict.cleared {
                break;
            }
        }
        keys
    }
}
