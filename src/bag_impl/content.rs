// Flattened views of a store: the content dump used for merging, snapshots
// and serialization, and the statistics summary.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ConflictPolicy, DataBagImpl, FallbackSpan, MergeOptions};
use crate::data_item::DataItem;
use crate::error::Result;
use crate::object_id::{AllocationId, ObjectId};

/// Every present triple of a store, flattened over its parent layers and
/// sorted. Lists are kept even when empty, dicts and schemas only when they
/// have entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataBagContent {
    pub attrs: BTreeMap<String, Vec<(ObjectId, DataItem)>>,
    pub lists: Vec<(ObjectId, Vec<DataItem>)>,
    pub dicts: Vec<(ObjectId, Vec<(DataItem, DataItem)>)>,
    pub schemas: Vec<(ObjectId, Vec<(String, DataItem)>)>,
}

impl DataBagContent {
    pub fn is_empty(&self) -> bool {
        self.attrs.values().all(Vec::is_empty)
            && self.lists.is_empty()
            && self.dicts.is_empty()
            && self.schemas.is_empty()
    }

    /// A blake3 digest over the sorted content; equal content gives equal
    /// fingerprints.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (attr, values) in &self.attrs {
            if values.is_empty() {
                continue;
            }
            hasher.update(b"attr:");
            hasher.update(attr.as_bytes());
            for (object, value) in values {
                DataItem::ObjectId(*object).fingerprint_into(&mut hasher);
                value.fingerprint_into(&mut hasher);
            }
        }
        for (list, items) in &self.lists {
            hasher.update(b"list:");
            DataItem::ObjectId(*list).fingerprint_into(&mut hasher);
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                item.fingerprint_into(&mut hasher);
            }
        }
        for (dict, entries) in &self.dicts {
            hasher.update(b"dict:");
            DataItem::ObjectId(*dict).fingerprint_into(&mut hasher);
            for (key, value) in entries {
                key.fingerprint_into(&mut hasher);
                value.fingerprint_into(&mut hasher);
            }
        }
        for (schema, attrs) in &self.schemas {
            hasher.update(b"schema:");
            DataItem::ObjectId(*schema).fingerprint_into(&mut hasher);
            for (name, value) in attrs {
                hasher.update(name.as_bytes());
                value.fingerprint_into(&mut hasher);
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Which allocations a store holds data for, per attribute, plus the lists
/// and dicts it defines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataBagIndex {
    pub attrs: BTreeMap<String, BTreeSet<AllocationId>>,
    pub lists: BTreeSet<AllocationId>,
    pub dicts: BTreeSet<AllocationId>,
}

// ------------- Statistics -------------
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBagStatistics {
    pub entity_and_object_count: usize,
    pub attr_values_sizes: BTreeMap<String, usize>,
    pub total_non_empty_lists: usize,
    pub total_items_in_lists: usize,
    pub total_non_empty_dicts: usize,
    pub total_items_in_dicts: usize,
    pub total_explicit_schemas: usize,
    pub total_explicit_schema_attrs: usize,
}

impl DataBagStatistics {
    /// Attributes with the most values first, at most `limit` of them.
    pub fn top_attrs(&self, limit: usize) -> Vec<(&str, usize)> {
        let mut attrs: Vec<(&str, usize)> = self
            .attr_values_sizes
            .iter()
            .map(|(attr, count)| (attr.as_str(), *count))
            .collect();
        attrs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(a.0)));
        attrs.truncate(limit);
        attrs
    }

    pub fn report(&self, top_attr_limit: usize) -> String {
        let top = self.top_attrs(top_attr_limit);
        let values: usize = top.iter().map(|(_, count)| count).sum();
        let mut out = format!(
            "DataBag:\n  {} Entities/Objects with {} values in {} attrs\n  {} non empty Lists with {} items\n  {} non empty Dicts with {} key/value entries\n  {} schemas with {} values\n\nTop attrs:\n",
            self.entity_and_object_count,
            values,
            self.attr_values_sizes.len(),
            self.total_non_empty_lists,
            self.total_items_in_lists,
            self.total_non_empty_dicts,
            self.total_items_in_dicts,
            self.total_explicit_schemas,
            self.total_explicit_schema_attrs,
        );
        let lines: Vec<String> = top
            .iter()
            .map(|(attr, count)| format!("  {}: {} values", attr, count))
            .collect();
        out.push_str(&lines.join("\n"));
        out
    }
}

impl fmt::Display for DataBagStatistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.report(usize::MAX))
    }
}

impl DataBagImpl {
    /// The content of this store and its parents. Fallbacks are not included.
    pub fn extract_content(&self) -> DataBagContent {
        let mut content = DataBagContent::default();

        let attr_names: BTreeSet<&String> = self.layers().flat_map(|layer| layer.attrs.keys()).collect();
        for attr in attr_names {
            let mut objects = BTreeSet::new();
            for layer in self.layers() {
                let Some(sources) = layer.attrs.get(attr.as_str()) else { continue };
                for (alloc, source) in sources {
                    objects.extend(source.keys().map(|offset| alloc.object_by_offset(*offset)));
                }
            }
            let values: Vec<(ObjectId, DataItem)> = objects
                .into_iter()
                .filter_map(|object| {
                    self.lookup_attr(object, attr)
                        .filter(|value| value.has_value())
                        .map(|value| (object, value.clone()))
                })
                .collect();
            if !values.is_empty() {
                content.attrs.insert(attr.clone(), values);
            }
        }

        for list in self.defined_lists() {
            let items = self.lookup_list(list).cloned().unwrap_or_default();
            content.lists.push((list, items));
        }

        for dict in self.defined_dicts() {
            let mut keys = self.collect_keyed(|layer| layer.dicts.get(&dict));
            if keys.is_empty() {
                continue;
            }
            keys.sort();
            let entries = keys
                .into_iter()
                .filter_map(|key| {
                    let value = self.lookup_dict_value(dict, &key)?.clone();
                    Some((key, value))
                })
                .collect();
            content.dicts.push((dict, entries));
        }

        let schema_ids: BTreeSet<ObjectId> = self.layers().flat_map(|layer| layer.schemas.keys().copied()).collect();
        for schema in schema_ids {
            let mut names = self.collect_keyed(|layer| layer.schemas.get(&schema));
            if names.is_empty() {
                continue;
            }
            names.sort();
            let attrs = names
                .into_iter()
                .filter_map(|name| {
                    let value = self.lookup_schema_attr(schema, &name)?.clone();
                    Some((name, value))
                })
                .collect();
            content.schemas.push((schema, attrs));
        }
        content
    }

    /// A single layer store holding exactly `content`.
    pub fn from_content(content: &DataBagContent) -> Result<DataBagImpl> {
        let mut bag = DataBagImpl::new();
        for (attr, values) in &content.attrs {
            for (object, value) in values {
                bag.set_attr(&DataItem::ObjectId(*object), attr, value.clone())?;
            }
        }
        for (list, items) in &content.lists {
            bag.lists.insert(*list, items.clone());
        }
        for (dict, entries) in &content.dicts {
            for (key, value) in entries {
                bag.set_in_dict(&DataItem::ObjectId(*dict), key, value.clone())?;
            }
        }
        for (schema, attrs) in &content.schemas {
            for (name, value) in attrs {
                bag.set_schema_attr(&DataItem::ObjectId(*schema), name, value.clone())?;
            }
        }
        Ok(bag)
    }

    /// One store with the fallbacks merged in. Values of this store win, then
    /// earlier fallbacks win over later ones. A list is taken whole from the
    /// first store that defines it, empty or not, as reads do.
    pub fn flatten_with_fallbacks(&self, fallbacks: FallbackSpan) -> Result<DataBagImpl> {
        let mut flat = DataBagImpl::new();
        flat.merge_inplace(self, MergeOptions::uniform(ConflictPolicy::Overwrite))?;
        for fallback in fallbacks {
            flat.merge_inplace(fallback, MergeOptions::default())?;
        }
        let mut lists = self.defined_lists();
        for fallback in fallbacks {
            lists.extend(fallback.defined_lists());
        }
        for list in lists {
            if let Some(items) = self.list_with_fallbacks(list, fallbacks) {
                flat.lists.insert(list, items.clone());
            }
        }
        Ok(flat)
    }

    pub fn create_index(&self) -> DataBagIndex {
        let mut index = DataBagIndex::default();
        for layer in self.layers() {
            for (attr, sources) in &layer.attrs {
                index
                    .attrs
                    .entry(attr.clone())
                    .or_default()
                    .extend(sources.keys().copied());
            }
        }
        index.lists = self.defined_lists().iter().map(|id| id.allocation()).collect();
        index.dicts = self.defined_dicts().iter().map(|id| id.allocation()).collect();
        index
    }

    pub fn get_statistics(&self) -> DataBagStatistics {
        let content = self.extract_content();
        let mut stats = DataBagStatistics::default();
        let mut objects = BTreeSet::new();
        for (attr, values) in &content.attrs {
            objects.extend(values.iter().map(|(object, _)| *object));
            stats.attr_values_sizes.insert(attr.clone(), values.len());
        }
        stats.entity_and_object_count = objects.len();
        for (_, items) in &content.lists {
            if !items.is_empty() {
                stats.total_non_empty_lists += 1;
                stats.total_items_in_lists += items.len();
            }
        }
        stats.total_non_empty_dicts = content.dicts.len();
        stats.total_items_in_dicts = content.dicts.iter().map(|(_, entries)| entries.len()).sum();
        for (schema, attrs) in &content.schemas {
            if schema.is_explicit_schema() {
                stats.total_explicit_schemas += 1;
                stats.total_explicit_schema_attrs += attrs.len();
            }
        }
        stats
    }
}
