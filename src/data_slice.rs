//! The user facing value: items with a shape, a schema and a DataBag.
//!
//! A [`DataSlice`] is cheap to clone; items, shape and bag are shared
//! through `Arc`. Operations that look like mutations (`set_attr`,
//! `set_in_dict`, `append_to_list`, ...) write through to the attached bag
//! and leave the slice itself untouched, so every slice sharing the bag sees
//! the write.
//!
//! Schema checks, casts and shape alignment all happen here before anything
//! is written. The triple store below accepts whatever it is given.
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::bag::{DataBag, DataBagPtr, common_bag};
use crate::bag_impl::{DataBagImpl, FallbackSpan, ListRange, MergeOptions, verify_dict_key};
use crate::data_item::DataItem;
use crate::dtype::{
    DICT_KEYS_SCHEMA_ATTR, DICT_VALUES_SCHEMA_ATTR, DType, LIST_ITEMS_SCHEMA_ATTR, SCHEMA_ATTR, is_reserved_attr,
};
use crate::error::{DataBagError, Result, internal, invalid};
use crate::ops::{DeepCloneOp, ExtractOp, ShallowCloneOp};
use crate::schema_utils::{
    cast_item, common_schema, common_schema_of, data_schema, expect_integer, is_implicitly_castable_to,
};
use crate::shape::{Edge, JaggedShape};
use crate::slice_impl::DataSliceImpl;

// ------------- Slice data -------------
#[derive(Clone, Debug)]
enum SliceData {
    Item(DataItem),
    Slice(Arc<DataSliceImpl>),
}

#[derive(Clone, Debug)]
pub struct DataSlice {
    data: SliceData,
    shape: Arc<JaggedShape>,
    schema: DataItem,
    bag: Option<DataBagPtr>,
}

fn verify_schema_consistency(schema: &DataItem, values: &DataSliceImpl) -> Result<()> {
    if !schema.is_schema() {
        return invalid(format!("schema must be a schema item, got {}", schema));
    }
    let consistent = match schema {
        DataItem::DType(DType::Object) | DataItem::DType(DType::Any) => true,
        DataItem::DType(DType::None) => values.present_count() == 0,
        DataItem::DType(DType::Schema) => {
            if values.iter().any(|item| item.has_value() && !item.is_schema()) {
                return invalid("a non-schema item cannot be present in a schema DataSlice.");
            }
            true
        }
        DataItem::DType(DType::ItemId) | DataItem::ObjectId(_) => values.object_ids().len() == values.present_count(),
        DataItem::DType(dtype) => values.primitive_dtypes().iter().all(|present| present == dtype),
        _ => false,
    };
    if !consistent {
        return invalid(format!("the items {} are not consistent with the schema {}", values, schema));
    }
    Ok(())
}

fn assignment_error(error: DataBagError, lhs_rank: usize, rhs_rank: usize) -> DataBagError {
    if rhs_rank > lhs_rank {
        return DataBagError::InvalidArgument(format!(
            "trying to assign a slice with {} dimensions to a slice with only {} dimensions. \
             To wrap the last dimension into a list, use a list factory",
            rhs_rank, lhs_rank
        ));
    }
    error
}

// Casts primitives to `schema` when it is a primitive dtype.
fn cast_values(values: &DataSliceImpl, schema: &DataItem) -> Result<DataSliceImpl> {
    match schema.as_dtype() {
        Some(dtype) if dtype.is_primitive() && values.primitive_dtypes().iter().any(|present| *present != dtype) => {
            values.iter().map(|item| cast_item(&item, dtype)).collect()
        }
        _ => Ok(values.clone()),
    }
}

fn incompatible_schema(attr: &str, expected: &DataItem, assigned: &DataItem) -> DataBagError {
    let (name, head) = match attr {
        LIST_ITEMS_SCHEMA_ATTR => ("Items", "The schema for List Items is incompatible.".to_owned()),
        DICT_KEYS_SCHEMA_ATTR => ("Keys", "The schema for Dict Keys is incompatible.".to_owned()),
        DICT_VALUES_SCHEMA_ATTR => ("Values", "The schema for Dict Values is incompatible.".to_owned()),
        other => (other, format!("The schema for attribute '{}' is incompatible.", other)),
    };
    DataBagError::InvalidArgument(format!(
        "{}\n\nExpected schema for '{}': {}\nAssigned schema for '{}': {}",
        head, name, expected, name, assigned
    ))
}

// Broadcasts all slices to the shape of the highest rank one.
fn align(slices: &[&DataSlice]) -> Result<(Arc<JaggedShape>, Vec<DataSlice>)> {
    let shape = slices
        .iter()
        .max_by_key(|slice| slice.rank())
        .map(|slice| Arc::clone(&slice.shape))
        .unwrap_or_else(|| Arc::new(JaggedShape::scalar()));
    let aligned = slices
        .iter()
        .map(|slice| slice.broadcast_to_shape(&shape))
        .collect::<Result<Vec<_>>>()?;
    Ok((shape, aligned))
}

// Triples `rhs` brings from a different bag. They are merged into the target
// bag, keeping what it already has, before values pointing at them are written.
fn adopted_triples(target: &DataBagPtr, rhs: &DataSlice) -> Result<Option<DataBagImpl>> {
    let Some(source) = rhs.bag() else {
        return Ok(None);
    };
    if Arc::ptr_eq(source, target) {
        return Ok(None);
    }
    let values = rhs.to_impl();
    if values.object_ids().is_empty() && rhs.schema.as_object_id().is_none() {
        return Ok(None);
    }
    if rhs.schema.is_dtype(DType::Any) {
        return source.flattened_impl().map(Some);
    }
    let mut adopted = DataBagImpl::new();
    source.read(|store, fallbacks| ExtractOp::new(&mut adopted).call(&values, &rhs.schema, store, fallbacks))?;
    debug!(items = values.size(), "adopting triples from another bag");
    Ok(Some(adopted))
}

// ------------- Assignment -------------
// The values to store and the writes that must go in with them.
struct Assignment {
    values: DataSliceImpl,
    value_schema: DataItem,
    // schemas whose attribute schema becomes `value_schema`
    schema_updates: Vec<DataItem>,
    // embedded into the assigned objects when they are cast to OBJECT
    embed: Option<DataItem>,
    adopted: Option<DataBagImpl>,
}

impl Assignment {
    fn write_schemas(&self, store: &mut DataBagImpl, attr: &str) -> Result<()> {
        if let Some(adopted) = &self.adopted {
            store.merge_inplace(adopted, MergeOptions::default())?;
        }
        for owner in &self.schema_updates {
            store.set_schema_attr(owner, attr, self.value_schema.clone())?;
        }
        if let Some(schema) = &self.embed {
            let schemas = DataSliceImpl::create(self.values.size(), schema.clone());
            store.set_attr_slice(&self.values, SCHEMA_ATTR, &schemas)?;
        }
        Ok(())
    }
}

// Implicit schemas follow the assigned values. Explicit schemas must already
// declare `attr`, and the values are cast to the declared schema.
fn plan_assignment(
    store: &DataBagImpl,
    fallbacks: FallbackSpan,
    owners: &[DataItem],
    attr: &str,
    rhs: &DataSlice,
    update_schema: bool,
) -> Result<Assignment> {
    let mut implicit = Vec::new();
    let mut cast_to: Option<DataItem> = None;
    for owner in owners {
        let Some(owner_id) = owner.as_object_id() else {
            return internal("objects must have ObjectId(s) as __schema__ attribute");
        };
        let stored = store.get_schema_attr_allow_missing(owner, attr, fallbacks)?;
        if owner_id.is_implicit_schema() || update_schema {
            implicit.push((owner.clone(), stored));
            continue;
        }
        if stored.is_missing() {
            return invalid(format!("The attribute '{}' is missing on the schema.", attr));
        }
        match &cast_to {
            Some(target) if *target != stored => {
                return invalid(format!(
                    "Assignment would require to cast values to two different types: {} and {}",
                    stored, target
                ));
            }
            _ => cast_to = Some(stored),
        }
    }
    let values = rhs.to_impl().as_ref().clone();
    let (values, value_schema, embed) = match cast_to {
        Some(target) => cast_rhs(&target, rhs.schema(), values, attr)?,
        None => (values, rhs.schema().clone(), None),
    };
    let schema_updates = implicit
        .into_iter()
        .filter(|(_, stored)| *stored != value_schema)
        .map(|(owner, _)| owner)
        .collect();
    Ok(Assignment {
        values,
        value_schema,
        schema_updates,
        embed,
        adopted: None,
    })
}

fn cast_rhs(
    target: &DataItem,
    rhs_schema: &DataItem,
    values: DataSliceImpl,
    attr: &str,
) -> Result<(DataSliceImpl, DataItem, Option<DataItem>)> {
    if target == rhs_schema || target.is_dtype(DType::Any) {
        return Ok((values, target.clone(), None));
    }
    // entities become objects by carrying their schema along
    if target.is_dtype(DType::Object) && rhs_schema.as_object_id().is_some() {
        return Ok((values, target.clone(), Some(rhs_schema.clone())));
    }
    if is_implicitly_castable_to(rhs_schema, target) {
        return Ok((cast_values(&values, target)?, target.clone(), None));
    }
    Err(incompatible_schema(attr, target, rhs_schema))
}

impl DataSlice {
    fn build(values: DataSliceImpl, shape: Arc<JaggedShape>, schema: DataItem, bag: Option<DataBagPtr>) -> Result<Self> {
        if shape.size() != values.size() {
            return invalid(format!(
                "shape size must be compatible with number of items: shape_size={} != items_size={}",
                shape.size(),
                values.size()
            ));
        }
        verify_schema_consistency(&schema, &values)?;
        let data = if shape.rank() == 0 {
            SliceData::Item(values.get(0))
        } else {
            SliceData::Slice(Arc::new(values))
        };
        Ok(Self {
            data,
            shape,
            schema,
            bag,
        })
    }

    pub fn create(values: DataSliceImpl, shape: JaggedShape, schema: DataItem, bag: Option<DataBagPtr>) -> Result<Self> {
        Self::build(values, Arc::new(shape), schema, bag)
    }

    pub fn create_item(item: DataItem, schema: DataItem, bag: Option<DataBagPtr>) -> Result<Self> {
        Self::create(DataSliceImpl::create(1, item), JaggedShape::scalar(), schema, bag)
    }

    /// A slice whose schema is read off the values. Only primitives (or
    /// schemas) of a single type qualify.
    pub fn from_values(values: DataSliceImpl, shape: JaggedShape) -> Result<Self> {
        let schema = data_schema(&values);
        if values.is_mixed_dtype() || schema.is_missing() {
            return invalid(
                "creating a DataSlice without passing schema is supported only for primitive types \
                 where all items are the same",
            );
        }
        Self::create(values, shape, schema, None)
    }

    /// A flat slice of `items` with an inferred schema.
    pub fn from_items(items: impl IntoIterator<Item = DataItem>) -> Result<Self> {
        let values = DataSliceImpl::from_items(items);
        let shape = JaggedShape::flat(values.size());
        Self::from_values(values, shape)
    }

    pub fn from_item(item: impl Into<DataItem>) -> Result<Self> {
        Self::from_values(DataSliceImpl::create(1, item.into()), JaggedShape::scalar())
    }

    fn derived(&self, values: DataSliceImpl, shape: Arc<JaggedShape>, schema: DataItem) -> Result<DataSlice> {
        let values = cast_values(&values, &schema)?;
        Self::build(values, shape, schema, self.bag.clone())
    }

    fn require_bag(&self, message: &str) -> Result<&DataBagPtr> {
        self.bag
            .as_ref()
            .ok_or_else(|| DataBagError::InvalidArgument(message.to_owned()))
    }

    pub fn schema(&self) -> &DataItem {
        &self.schema
    }
    pub fn shape(&self) -> &JaggedShape {
        &self.shape
    }
    pub fn bag(&self) -> Option<&DataBagPtr> {
        self.bag.as_ref()
    }
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }
    pub fn size(&self) -> usize {
        self.shape.size()
    }
    pub fn is_item(&self) -> bool {
        matches!(self.data, SliceData::Item(_))
    }
    /// The value of a rank 0 slice.
    pub fn item(&self) -> Option<&DataItem> {
        match &self.data {
            SliceData::Item(item) => Some(item),
            SliceData::Slice(_) => None,
        }
    }
    pub fn to_impl(&self) -> Arc<DataSliceImpl> {
        match &self.data {
            SliceData::Item(item) => Arc::new(DataSliceImpl::create(1, item.clone())),
            SliceData::Slice(values) => Arc::clone(values),
        }
    }
    pub fn items(&self) -> Vec<DataItem> {
        match &self.data {
            SliceData::Item(item) => vec![item.clone()],
            SliceData::Slice(values) => values.to_items(),
        }
    }
    pub fn present_count(&self) -> usize {
        match &self.data {
            SliceData::Item(item) => item.has_value() as usize,
            SliceData::Slice(values) => values.present_count(),
        }
    }

    pub fn with_bag(&self, bag: Option<DataBagPtr>) -> DataSlice {
        Self {
            bag,
            ..self.clone()
        }
    }

    pub fn with_schema(&self, schema: DataItem) -> Result<DataSlice> {
        Self::build(self.to_impl().as_ref().clone(), Arc::clone(&self.shape), schema, self.bag.clone())
    }

    /// The schema as a rank 0 SCHEMA slice sharing this slice's bag.
    pub fn get_schema(&self) -> DataSlice {
        Self {
            data: SliceData::Item(self.schema.clone()),
            shape: Arc::new(JaggedShape::scalar()),
            schema: DataItem::DType(DType::Schema),
            bag: self.bag.clone(),
        }
    }

    // ------------- Schema lookups -------------

    // Distinct schemas declaring the attributes of the objects: the slice
    // schema for entities, the embedded schemas for OBJECT.
    fn owner_schemas(&self, store: &DataBagImpl, fallbacks: FallbackSpan, objects: &DataSliceImpl) -> Result<Vec<DataItem>> {
        match &self.schema {
            DataItem::ObjectId(_) => Ok(vec![self.schema.clone()]),
            DataItem::DType(DType::Object) => {
                let ids = objects.object_ids();
                if ids.len() != objects.present_count() {
                    return invalid("primitives do not have attributes");
                }
                let embedded = store.get_attr_slice(objects, SCHEMA_ATTR, fallbacks)?;
                let mut seen = HashSet::new();
                let mut owners = Vec::new();
                for (position, id) in ids {
                    let schema = embedded.get(position);
                    if schema.is_missing() {
                        return Err(DataBagError::MissingObjectSchema(DataItem::ObjectId(id).to_string()));
                    }
                    if !schema.as_object_id().is_some_and(|schema_id| schema_id.is_schema()) {
                        return internal("objects must have ObjectId(s) as __schema__ attribute");
                    }
                    if seen.insert(schema.clone()) {
                        owners.push(schema);
                    }
                }
                Ok(owners)
            }
            _ => Ok(Vec::new()),
        }
    }

    // Schema of `attr` on the objects. Missing when nothing declares it and
    // `allow_missing` is set.
    fn attr_schema(
        &self,
        store: &DataBagImpl,
        fallbacks: FallbackSpan,
        objects: &DataSliceImpl,
        attr: &str,
        allow_missing: bool,
    ) -> Result<DataItem> {
        match &self.schema {
            DataItem::DType(DType::Any) => Ok(DataItem::DType(DType::Any)),
            DataItem::DType(DType::None) => Ok(DataItem::DType(DType::None)),
            DataItem::DType(DType::ItemId) => invalid(format!(
                "failed to get attribute '{}': ITEMID schema does not support attribute access",
                attr
            )),
            DataItem::DType(DType::Object) | DataItem::ObjectId(_) => {
                let owners = self.owner_schemas(store, fallbacks, objects)?;
                if owners.is_empty() {
                    return Ok(DataItem::DType(DType::None));
                }
                let mut attr_schemas = Vec::with_capacity(owners.len());
                for owner in &owners {
                    let attr_schema = store.get_schema_attr_allow_missing(owner, attr, fallbacks)?;
                    if attr_schema.is_missing() {
                        if allow_missing {
                            continue;
                        }
                        return invalid(format!("The attribute '{}' is missing on the schema.", attr));
                    }
                    attr_schemas.push(attr_schema);
                }
                common_schema_of(&attr_schemas)
            }
            _ => invalid(format!("failed to get attribute '{}': primitives do not have attributes", attr)),
        }
    }

    fn prepare(
        &self,
        bag: &DataBagPtr,
        objects: &DataSliceImpl,
        attr: &str,
        rhs: &DataSlice,
        update_schema: bool,
    ) -> Result<Assignment> {
        let adopted = adopted_triples(bag, rhs)?;
        let mut assignment = bag.read(|store, fallbacks| {
            let owners = self.owner_schemas(store, fallbacks, objects)?;
            plan_assignment(store, fallbacks, &owners, attr, rhs, update_schema)
        })?;
        assignment.adopted = adopted;
        Ok(assignment)
    }

    // ------------- Attributes -------------

    pub fn get_attr(&self, attr: &str) -> Result<DataSlice> {
        self.get_attr_impl(attr, false)
    }

    /// Like [`DataSlice::get_attr`], with missing values (and a missing
    /// attribute) replaced by `default`.
    pub fn get_attr_with_default(&self, attr: &str, default: &DataSlice) -> Result<DataSlice> {
        let found = self.get_attr_impl(attr, true)?;
        let default = default.broadcast_to_shape(&self.shape)?;
        let schema = common_schema(&found.schema, &default.schema)?;
        let values: DataSliceImpl = found
            .to_impl()
            .iter()
            .zip(default.to_impl().iter())
            .map(|(value, fallback)| if value.has_value() { value } else { fallback })
            .collect();
        let values = cast_values(&values, &schema)?;
        let bag = common_bag(&[self.bag.clone(), default.bag.clone()]);
        Self::build(values, Arc::clone(&self.shape), schema, bag)
    }

    fn get_attr_impl(&self, attr: &str, allow_missing: bool) -> Result<DataSlice> {
        let bag = self.require_bag(&format!("cannot fetch attributes without a DataBag: {}", attr))?;
        let objects = self.to_impl();
        let (values, schema) = bag.read(|store, fallbacks| {
            if self.schema.is_dtype(DType::Schema) {
                return self.get_schema_slice_attr(store, fallbacks, &objects, attr, allow_missing);
            }
            if attr == SCHEMA_ATTR {
                if objects.object_ids().len() != objects.present_count() {
                    return invalid("primitives do not have attributes");
                }
                let values = store.get_attr_slice(&objects, SCHEMA_ATTR, fallbacks)?;
                return Ok((values, DataItem::DType(DType::Schema)));
            }
            let schema = self.attr_schema(store, fallbacks, &objects, attr, allow_missing)?;
            if schema.is_missing() {
                return Ok((
                    DataSliceImpl::create_empty_and_unknown(objects.size()),
                    DataItem::DType(DType::None),
                ));
            }
            Ok((store.get_attr_slice(&objects, attr, fallbacks)?, schema))
        })?;
        self.derived(values, Arc::clone(&self.shape), schema)
    }

    fn get_schema_slice_attr(
        &self,
        store: &DataBagImpl,
        fallbacks: FallbackSpan,
        schemas: &DataSliceImpl,
        attr: &str,
        allow_missing: bool,
    ) -> Result<(DataSliceImpl, DataItem)> {
        let mut values = vec![DataItem::Missing; schemas.size()];
        for (position, schema) in schemas.iter().enumerate() {
            if schema.is_missing() {
                continue;
            }
            let value = store.get_schema_attr_allow_missing(&schema, attr, fallbacks)?;
            if value.is_missing() && !allow_missing {
                return invalid(format!("The attribute '{}' is missing on the schema.", attr));
            }
            values[position] = value;
        }
        Ok((DataSliceImpl::from_items(values), DataItem::DType(DType::Schema)))
    }

    /// Attribute names declared by the schemas of the items, sorted. For
    /// OBJECT slices `intersection` picks the names every object has over
    /// the names any object has. Reserved names are left out.
    pub fn get_attr_names(&self, intersection: bool) -> Result<Vec<String>> {
        let bag = self.require_bag("cannot get available attributes without a DataBag")?;
        let objects = self.to_impl();
        let names = bag.read(|store, fallbacks| {
            let owners: Vec<DataItem> = match &self.schema {
                DataItem::DType(DType::Schema) => objects.iter().filter(|item| item.as_object_id().is_some()).collect(),
                DataItem::ObjectId(_) => vec![self.schema.clone()],
                DataItem::DType(DType::Object) => {
                    let ids = objects.object_ids();
                    // primitives have no attributes
                    if intersection && ids.len() != objects.present_count() {
                        return Ok(BTreeSet::new());
                    }
                    let only_objects = DataSliceImpl::from_object_ids(objects.size(), ids);
                    self.owner_schemas(store, fallbacks, &only_objects)?
                }
                _ => Vec::new(),
            };
            let mut names: Option<BTreeSet<String>> = None;
            for owner in &owners {
                let attrs: BTreeSet<String> = store
                    .get_schema_attrs(owner, fallbacks)?
                    .into_iter()
                    .filter(|name| !is_reserved_attr(name))
                    .collect();
                names = Some(match names {
                    None => attrs,
                    Some(acc) if intersection => acc.intersection(&attrs).cloned().collect(),
                    Some(mut acc) => {
                        acc.extend(attrs);
                        acc
                    }
                });
            }
            Ok(names.unwrap_or_default())
        })?;
        Ok(names.into_iter().collect())
    }

    /// Assigns `values` (broadcast to this slice) to `attr` of every item.
    ///
    /// On entities with an explicit schema the attribute must be declared and
    /// the values are cast to the declared schema. Implicit schemas (OBJECT
    /// items created through the object factory) take the schema of the
    /// values. Values from another bag bring their reachable triples along.
    pub fn set_attr(&self, attr: &str, values: &DataSlice) -> Result<()> {
        self.set_attr_impl(attr, values, false)
    }

    /// Like [`DataSlice::set_attr`], but explicit schemas are overwritten
    /// with the schema of the values instead of being enforced.
    pub fn set_attr_with_update_schema(&self, attr: &str, values: &DataSlice) -> Result<()> {
        self.set_attr_impl(attr, values, true)
    }

    fn set_attr_impl(&self, attr: &str, values: &DataSlice, update_schema: bool) -> Result<()> {
        let bag = self.require_bag("cannot set attributes without a DataBag")?;
        match &self.schema {
            DataItem::DType(DType::Schema) => return self.set_schema_slice_attr(bag, attr, values),
            DataItem::DType(DType::ItemId) => return invalid("setting attributes on ITEMID slices is not allowed"),
            DataItem::DType(dtype) if dtype.is_primitive() => {
                return invalid("setting attributes on primitive slices is not allowed");
            }
            _ => {}
        }
        let objects = self.to_impl();
        if objects.object_ids().len() != objects.present_count() {
            return invalid("setting attributes on primitive slices is not allowed");
        }
        let rhs = values
            .broadcast_to_shape(&self.shape)
            .map_err(|e| assignment_error(e, self.rank(), values.rank()))?;
        let assignment = if attr == SCHEMA_ATTR {
            if !rhs.schema.is_dtype(DType::Schema) {
                return invalid("only schemas can be assigned to the '__schema__' attribute");
            }
            if self.schema.as_object_id().is_some() {
                return invalid("'__schema__' can only be assigned on OBJECT slices; use embed_schema for entities");
            }
            Assignment {
                values: rhs.to_impl().as_ref().clone(),
                value_schema: DataItem::DType(DType::Schema),
                schema_updates: Vec::new(),
                embed: None,
                adopted: adopted_triples(bag, &rhs)?,
            }
        } else {
            self.prepare(bag, &objects, attr, &rhs, update_schema)?
        };
        bag.write(|store| {
            assignment.write_schemas(store, attr)?;
            store.set_attr_slice(&objects, attr, &assignment.values)
        })
    }

    fn set_schema_slice_attr(&self, bag: &DataBagPtr, attr: &str, values: &DataSlice) -> Result<()> {
        if !(values.schema.is_dtype(DType::Schema) || values.schema.is_dtype(DType::None)) {
            return invalid(format!(
                "only schemas can be assigned as attributes of schemas, got {}",
                values.schema
            ));
        }
        let rhs = values
            .broadcast_to_shape(&self.shape)
            .map_err(|e| assignment_error(e, self.rank(), values.rank()))?;
        let adopted = adopted_triples(bag, &rhs)?;
        let schemas = self.to_impl();
        let rhs_values = rhs.to_impl();
        bag.write(|store| {
            if let Some(adopted) = &adopted {
                store.merge_inplace(adopted, MergeOptions::default())?;
            }
            for (position, schema) in schemas.iter().enumerate() {
                let value = rhs_values.get(position);
                if schema.has_value() && value.has_value() {
                    store.set_schema_attr(&schema, attr, value)?;
                }
            }
            Ok(())
        })
    }

    /// Removes `attr` from every item. Explicit schemas must declare it;
    /// implicit schemas lose it.
    pub fn del_attr(&self, attr: &str) -> Result<()> {
        let bag = self.require_bag("cannot delete attributes without a DataBag")?;
        let objects = self.to_impl();
        let schema_dels: Vec<DataItem> = match &self.schema {
            DataItem::DType(DType::Schema) => objects.iter().filter(DataItem::has_value).collect(),
            DataItem::DType(DType::Any) => Vec::new(),
            DataItem::DType(DType::Object) | DataItem::ObjectId(_) => bag.read(|store, fallbacks| {
                let mut implicit = Vec::new();
                for owner in self.owner_schemas(store, fallbacks, &objects)? {
                    if store.get_schema_attr_allow_missing(&owner, attr, fallbacks)?.is_missing() {
                        return invalid(format!("The attribute '{}' is missing on the schema.", attr));
                    }
                    if owner.is_implicit_schema() {
                        implicit.push(owner);
                    }
                }
                Ok(implicit)
            })?,
            _ => {
                return invalid(format!(
                    "Deleting an attribute cannot be done on a DataSlice with {} schema",
                    self.schema
                ));
            }
        };
        let is_schema_slice = self.schema.is_dtype(DType::Schema);
        bag.write(|store| {
            for schema in &schema_dels {
                // attributes living in a fallback cannot be masked from here
                if store.get_schema_attr_allow_missing(schema, attr, &[])?.has_value() {
                    store.del_schema_attr(schema, attr)?;
                }
            }
            if is_schema_slice {
                return Ok(());
            }
            for (_, id) in objects.object_ids() {
                store.del_attr(&DataItem::ObjectId(id), attr)?;
            }
            Ok(())
        })
    }

    /// Stores the entity schema in every object's `__schema__` and returns
    /// the same items as OBJECT. Primitives only change their schema.
    pub fn embed_schema(&self, overwrite: bool) -> Result<DataSlice> {
        match &self.schema {
            DataItem::DType(DType::Object) => return Ok(self.clone()),
            DataItem::DType(dtype) if dtype.is_primitive() || *dtype == DType::None => {
                return self.with_schema(DataItem::DType(DType::Object));
            }
            DataItem::ObjectId(_) => {}
            other => {
                return invalid(format!(
                    "schema embedding is only supported for primitive and entity schemas, got {}",
                    other
                ));
            }
        }
        let bag = self.require_bag("cannot embed schema without a DataBag")?;
        let objects = self.to_impl();
        if !overwrite {
            let existing = bag.read(|store, fallbacks| store.get_attr_slice(&objects, SCHEMA_ATTR, fallbacks))?;
            if let Some(conflict) = existing.iter().find(|schema| schema.has_value() && *schema != self.schema) {
                return invalid(format!(
                    "existing schema {} differs from the provided schema {}",
                    conflict, self.schema
                ));
            }
        }
        let schemas = DataSliceImpl::create(objects.size(), self.schema.clone());
        bag.write(|store| store.set_attr_slice(&objects, SCHEMA_ATTR, &schemas))?;
        self.with_schema(DataItem::DType(DType::Object))
    }

    // ------------- Dicts -------------

    fn cast_keys(&self, keys: &DataSlice, key_schema: &DataItem) -> Result<DataSliceImpl> {
        let checked = !(key_schema.is_dtype(DType::Object)
            || key_schema.is_dtype(DType::Any)
            || key_schema.is_dtype(DType::None));
        if checked && !is_implicitly_castable_to(keys.schema(), key_schema) {
            return Err(incompatible_schema(DICT_KEYS_SCHEMA_ATTR, key_schema, keys.schema()));
        }
        cast_values(&keys.to_impl(), key_schema)
    }

    /// Values of `keys` (aligned with the dicts); missing where absent.
    pub fn get_from_dict(&self, keys: &DataSlice) -> Result<DataSlice> {
        let bag = self.require_bag("cannot get dict values without a DataBag")?;
        let (shape, aligned) = align(&[self, keys])?;
        let dicts = aligned[0].to_impl();
        let (values, schema) = bag.read(|store, fallbacks| {
            let key_schema = self.attr_schema(store, fallbacks, &dicts, DICT_KEYS_SCHEMA_ATTR, false)?;
            let keys = self.cast_keys(&aligned[1], &key_schema)?;
            let schema = self.attr_schema(store, fallbacks, &dicts, DICT_VALUES_SCHEMA_ATTR, false)?;
            Ok((store.get_from_dicts(&dicts, &keys, fallbacks)?, schema))
        })?;
        self.derived(values, shape, schema)
    }

    /// Sets `dict[key] = value`; dicts, keys and values are aligned first.
    /// Writing the same key twice keeps the last value.
    pub fn set_in_dict(&self, keys: &DataSlice, values: &DataSlice) -> Result<()> {
        let bag = self.require_bag("cannot set dict values without a DataBag")?;
        let (_, aligned) = align(&[self, keys, values])?;
        let dicts = aligned[0].to_impl();
        let key_assignment = self.prepare(bag, &dicts, DICT_KEYS_SCHEMA_ATTR, &aligned[1], false)?;
        for key in key_assignment.values.iter().filter(DataItem::has_value) {
            verify_dict_key(&key)?;
        }
        let value_assignment = self.prepare(bag, &dicts, DICT_VALUES_SCHEMA_ATTR, &aligned[2], false)?;
        bag.write(|store| {
            key_assignment.write_schemas(store, DICT_KEYS_SCHEMA_ATTR)?;
            value_assignment.write_schemas(store, DICT_VALUES_SCHEMA_ATTR)?;
            store.set_in_dicts(&dicts, &key_assignment.values, &value_assignment.values)
        })
    }

    /// Keys of every dict, one more dimension than this slice.
    pub fn get_dict_keys(&self) -> Result<DataSlice> {
        self.dict_contents(DICT_KEYS_SCHEMA_ATTR, "cannot get dict keys without a DataBag")
    }

    /// Values in the order of [`DataSlice::get_dict_keys`].
    pub fn get_dict_values(&self) -> Result<DataSlice> {
        self.dict_contents(DICT_VALUES_SCHEMA_ATTR, "cannot get dict values without a DataBag")
    }

    fn dict_contents(&self, attr: &str, no_bag: &str) -> Result<DataSlice> {
        let bag = self.require_bag(no_bag)?;
        let dicts = self.to_impl();
        let (values, edge, schema) = bag.read(|store, fallbacks| {
            let schema = self.attr_schema(store, fallbacks, &dicts, attr, false)?;
            let (values, edge) = if attr == DICT_KEYS_SCHEMA_ATTR {
                store.get_dict_keys_slice(&dicts, fallbacks)?
            } else {
                store.get_dict_values_slice(&dicts, fallbacks)?
            };
            Ok((values, edge, schema))
        })?;
        let shape = self.shape.add_dims([edge])?;
        self.derived(values, Arc::new(shape), schema)
    }

    pub fn dict_size(&self) -> Result<DataSlice> {
        let bag = self.require_bag("cannot get dict size without a DataBag")?;
        let dicts = self.to_impl();
        let sizes = bag.read(|store, fallbacks| {
            dicts
                .iter()
                .map(|dict| -> Result<DataItem> {
                    match dict {
                        DataItem::Missing => Ok(DataItem::Missing),
                        dict => Ok(DataItem::Int64(store.get_dict_size(&dict, fallbacks)? as i64)),
                    }
                })
                .collect::<Result<DataSliceImpl>>()
        })?;
        self.derived(sizes, Arc::clone(&self.shape), DataItem::DType(DType::Int64))
    }

    pub fn clear_dict(&self) -> Result<()> {
        let bag = self.require_bag("cannot clear lists or dicts without a DataBag")?;
        let dicts = self.to_impl();
        bag.write(|store| {
            for (_, id) in dicts.object_ids() {
                store.clear_dict(&DataItem::ObjectId(id))?;
            }
            Ok(())
        })
    }

    // ------------- Lists -------------

    /// Items of every list within `range`, one more dimension than this
    /// slice.
    pub fn explode_list(&self, range: ListRange) -> Result<DataSlice> {
        let bag = self.require_bag("cannot get list items without a DataBag")?;
        let lists = self.to_impl();
        let (values, edge, schema) = bag.read(|store, fallbacks| {
            let schema = self.attr_schema(store, fallbacks, &lists, LIST_ITEMS_SCHEMA_ATTR, false)?;
            let (values, edge) = store.explode_lists(&lists, range, fallbacks)?;
            Ok((values, edge, schema))
        })?;
        let shape = self.shape.add_dims([edge])?;
        self.derived(values, Arc::new(shape), schema)
    }

    pub fn get_from_list(&self, indices: &DataSlice) -> Result<DataSlice> {
        let bag = self.require_bag("cannot get list items without a DataBag")?;
        expect_integer("indices", indices)?;
        let (shape, aligned) = align(&[self, indices])?;
        let lists = aligned[0].to_impl();
        let indices = aligned[1].to_impl();
        let (values, schema) = bag.read(|store, fallbacks| {
            let schema = self.attr_schema(store, fallbacks, &lists, LIST_ITEMS_SCHEMA_ATTR, false)?;
            Ok((store.get_from_lists(&lists, &indices, fallbacks)?, schema))
        })?;
        self.derived(values, shape, schema)
    }

    /// Appends one value per list, or, when `values` has one more dimension
    /// than this slice, a whole row of values per list.
    pub fn append_to_list(&self, values: &DataSlice) -> Result<()> {
        let bag = self.require_bag("cannot append items to list without a DataBag")?;
        let rank = self.rank();
        let (rhs, edge) = if values.rank() == rank + 1 && values.shape.remove_dims(rank) == *self.shape {
            (values.clone(), values.shape.edges()[rank].clone())
        } else {
            let rhs = values
                .broadcast_to_shape(&self.shape)
                .map_err(|e| assignment_error(e, rank + 1, values.rank()))?;
            (rhs, Edge::from_uniform_groups(self.size(), 1))
        };
        let lists = self.to_impl();
        let assignment = self.prepare(bag, &lists, LIST_ITEMS_SCHEMA_ATTR, &rhs, false)?;
        bag.write_lists(&lists, |store| {
            assignment.write_schemas(store, LIST_ITEMS_SCHEMA_ATTR)?;
            store.extend_lists(&lists, &assignment.values, &edge)
        })
    }

    /// Sets `list[index] = value`; out of range indices are ignored.
    pub fn set_in_list(&self, indices: &DataSlice, values: &DataSlice) -> Result<()> {
        let bag = self.require_bag("cannot set list items without a DataBag")?;
        expect_integer("indices", indices)?;
        let (_, aligned) = align(&[self, indices, values])?;
        let lists = aligned[0].to_impl();
        let indices = aligned[1].to_impl();
        let assignment = self.prepare(bag, &lists, LIST_ITEMS_SCHEMA_ATTR, &aligned[2], false)?;
        bag.write_lists(&lists, |store| {
            assignment.write_schemas(store, LIST_ITEMS_SCHEMA_ATTR)?;
            store.set_in_lists(&lists, &indices, &assignment.values)
        })
    }

    /// Removes and returns `list[index]` of every list.
    pub fn pop_from_list(&self, index: i64) -> Result<DataSlice> {
        let bag = self.require_bag("cannot pop items from list without a DataBag")?;
        let lists = self.to_impl();
        let schema = bag.read(|store, fallbacks| {
            self.attr_schema(store, fallbacks, &lists, LIST_ITEMS_SCHEMA_ATTR, false)
        })?;
        let indices = DataSliceImpl::create(lists.size(), DataItem::Int64(index));
        let values = bag.write_lists(&lists, |store| store.pop_from_lists(&lists, &indices))?;
        self.derived(values, Arc::clone(&self.shape), schema)
    }

    /// Replaces `list[range]` of every list with the matching row of
    /// `values`, which has one more dimension than this slice.
    pub fn replace_in_list(&self, range: ListRange, values: &DataSlice) -> Result<()> {
        let bag = self.require_bag("cannot set items of a list without a DataBag")?;
        let rank = self.rank();
        if values.rank() != rank + 1 || values.shape.remove_dims(rank) != *self.shape {
            return invalid(format!(
                "replacement values must have one more dimension than the lists: lists {}, values {}",
                self.shape, values.shape
            ));
        }
        let edge = values.shape.edges()[rank].clone();
        let lists = self.to_impl();
        let assignment = self.prepare(bag, &lists, LIST_ITEMS_SCHEMA_ATTR, values, false)?;
        bag.write_lists(&lists, |store| {
            assignment.write_schemas(store, LIST_ITEMS_SCHEMA_ATTR)?;
            store.replace_in_lists(&lists, range, &assignment.values, &edge)
        })
    }

    pub fn remove_in_list(&self, range: ListRange) -> Result<()> {
        let bag = self.require_bag("cannot remove items from list without a DataBag")?;
        let lists = self.to_impl();
        bag.write_lists(&lists, |store| {
            for (_, id) in lists.object_ids() {
                store.remove_in_list(&DataItem::ObjectId(id), range)?;
            }
            Ok(())
        })
    }

    pub fn remove_in_list_by_indices(&self, indices: &[i64]) -> Result<()> {
        let bag = self.require_bag("cannot remove items from list without a DataBag")?;
        let lists = self.to_impl();
        bag.write_lists(&lists, |store| {
            for (_, id) in lists.object_ids() {
                store.remove_in_list_by_indices(&DataItem::ObjectId(id), indices)?;
            }
            Ok(())
        })
    }

    pub fn list_size(&self) -> Result<DataSlice> {
        let bag = self.require_bag("cannot get list size without a DataBag")?;
        let lists = self.to_impl();
        let sizes = bag.read(|store, fallbacks| {
            lists
                .iter()
                .map(|list| -> Result<DataItem> {
                    match list {
                        DataItem::Missing => Ok(DataItem::Missing),
                        list => Ok(DataItem::Int64(store.get_list_size(&list, fallbacks)? as i64)),
                    }
                })
                .collect::<Result<DataSliceImpl>>()
        })?;
        self.derived(sizes, Arc::clone(&self.shape), DataItem::DType(DType::Int64))
    }

    pub fn clear_list(&self) -> Result<()> {
        let bag = self.require_bag("cannot clear lists or dicts without a DataBag")?;
        let lists = self.to_impl();
        bag.write_lists(&lists, |store| store.clear_lists(&lists))
    }

    // ------------- Shapes -------------

    /// Repeats items along the dimensions `shape` adds to this one. Pure; the
    /// bag is shared.
    pub fn broadcast_to_shape(&self, shape: &JaggedShape) -> Result<DataSlice> {
        if *self.shape == *shape {
            return Ok(self.clone());
        }
        let indices = self.shape.broadcast_indices(shape)?;
        let values = match &self.data {
            SliceData::Item(item) => DataSliceImpl::create(indices.len(), item.clone()),
            SliceData::Slice(values) => {
                let items = values.to_items();
                DataSliceImpl::from_items(indices.iter().map(|&index| items[index].clone()))
            }
        };
        Self::create(values, shape.clone(), self.schema.clone(), self.bag.clone())
    }

    /// The same items under another shape of the same size.
    pub fn reshape(&self, shape: JaggedShape) -> Result<DataSlice> {
        Self::create(self.to_impl().as_ref().clone(), shape, self.schema.clone(), self.bag.clone())
    }

    /// Merges dimensions `[from, to)` into one.
    pub fn flatten(&self, from: usize, to: usize) -> Result<DataSlice> {
        self.reshape(self.shape.flatten(from, to)?)
    }

    // ------------- Bags -------------

    /// The same items in a new bag holding only the triples reachable from
    /// them.
    pub fn extract(&self) -> Result<DataSlice> {
        let Some(bag) = &self.bag else {
            return Ok(self.clone());
        };
        let values = self.to_impl();
        let mut extracted = DataBagImpl::new();
        bag.read(|store, fallbacks| ExtractOp::new(&mut extracted).call(&values, &self.schema, store, fallbacks))?;
        Ok(self.with_bag(Some(DataBag::from_impl(extracted))))
    }

    /// Fresh copies of every reachable object, in a new bag.
    pub fn deep_clone(&self) -> Result<DataSlice> {
        let Some(bag) = &self.bag else {
            return Ok(self.clone());
        };
        let values = self.to_impl();
        let mut cloned_bag = DataBagImpl::new();
        let (cloned, schema) = bag.read(|store, fallbacks| {
            DeepCloneOp::new(&mut cloned_bag).call(&values, &self.schema, store, fallbacks)
        })?;
        Self::build(cloned, Arc::clone(&self.shape), schema, Some(DataBag::from_impl(cloned_bag)))
    }

    /// Fresh copies of the items only; their attributes keep pointing at the
    /// original objects, whose triples are not copied.
    pub fn shallow_clone(&self) -> Result<DataSlice> {
        let Some(bag) = &self.bag else {
            return Ok(self.clone());
        };
        let values = self.to_impl();
        let mut cloned_bag = DataBagImpl::new();
        let (cloned, schema) = bag.read(|store, fallbacks| {
            ShallowCloneOp::new(&mut cloned_bag).call(&values, &self.schema, store, fallbacks)
        })?;
        Self::build(cloned, Arc::clone(&self.shape), schema, Some(DataBag::from_impl(cloned_bag)))
    }

    /// Reads through this slice's bag first, then `bags`.
    pub fn enriched(&self, bags: &[DataBagPtr]) -> DataSlice {
        let fallbacks = self.bag.iter().chain(bags).cloned().collect();
        self.with_bag(Some(DataBag::immutable_empty_with_fallbacks(fallbacks)))
    }

    /// Reads through `bags`, the last one first, then this slice's bag.
    pub fn updated(&self, bags: &[DataBagPtr]) -> DataSlice {
        let fallbacks = bags.iter().rev().chain(self.bag.iter()).cloned().collect();
        self.with_bag(Some(DataBag::immutable_empty_with_fallbacks(fallbacks)))
    }

    /// The same items with a frozen copy of the bag.
    pub fn freeze_bag(&self) -> Result<DataSlice> {
        let Some(bag) = &self.bag else {
            return Ok(self.clone());
        };
        let frozen = if bag.has_fallbacks() {
            let merged = bag.merge_fallbacks()?;
            merged.freeze();
            merged
        } else {
            bag.fork(true)?
        };
        Ok(self.with_bag(Some(frozen)))
    }

    /// The same items with a mutable fork of the bag.
    pub fn fork_bag(&self) -> Result<DataSlice> {
        let Some(bag) = &self.bag else {
            return Ok(self.clone());
        };
        Ok(self.with_bag(Some(bag.fork(false)?)))
    }

    /// The same items with the fallback chain merged into one mutable bag.
    pub fn with_merged_bag(&self) -> Result<DataSlice> {
        let Some(bag) = &self.bag else {
            return Ok(self.clone());
        };
        Ok(self.with_bag(Some(bag.merge_fallbacks()?)))
    }
}

impl fmt::Display for DataSlice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.data {
            SliceData::Item(item) => write!(f, "DataItem({}, schema: {})", item, self.schema),
            SliceData::Slice(values) => write!(f, "DataSlice({}, schema: {}, shape: {})", values, self.schema, self.shape),
        }
    }
}
