//! Factories for new entities, objects, lists, dicts and schemas.
//!
//! Every factory allocates fresh ids (or derives uuids), writes the schema
//! triples into the target bag and then assigns the given values through the
//! regular [`DataSlice`] setters, so casting and schema checks are the same
//! as for any later assignment.
use std::sync::Arc;

use tracing::debug;

use crate::bag::DataBagPtr;
use crate::bag_impl::MergeOptions;
use crate::data_item::DataItem;
use crate::data_slice::DataSlice;
use crate::dtype::{DICT_KEYS_SCHEMA_ATTR, DICT_VALUES_SCHEMA_ATTR, DType, LIST_ITEMS_SCHEMA_ATTR, SCHEMA_ATTR};
use crate::error::{Result, invalid};
use crate::object_id::{
    AllocationId, IdKind, ObjectId, allocate, allocate_dicts, allocate_explicit_schema, allocate_lists,
    create_implicit_schema, create_uuid_from_fields as uuid_from_fields, nofollow_schema, nofollow_target,
};
use crate::shape::JaggedShape;
use crate::slice_impl::DataSliceImpl;

const LIST_SCHEMA_SEED: &str = "__list_schema__";
const DICT_SCHEMA_SEED: &str = "__dict_schema__";
// stands in for OBJECT when it is wrapped into a nofollow schema
const OBJECT_SCHEMA_SEED: &str = "__object_schema__";

// ------------- Helpers -------------

fn schema_slice(schema: DataItem, bag: Option<DataBagPtr>) -> Result<DataSlice> {
    DataSlice::create_item(schema, DataItem::DType(DType::Schema), bag)
}

// The schema held by a rank 0 SCHEMA slice.
fn schema_value(schema: &DataSlice) -> Result<DataItem> {
    if !schema.schema().is_dtype(DType::Schema) {
        return invalid(format!("schema's schema must be SCHEMA, got: {}", schema.schema()));
    }
    match schema.item() {
        Some(item) => Ok(item.clone()),
        None => invalid(format!("schema can only be 0-rank schema slice, got: rank({})", schema.rank())),
    }
}

// Copies the triples reachable from `slice` into `bag` unless they already
// live there.
fn adopt(bag: &DataBagPtr, slice: &DataSlice) -> Result<()> {
    let Some(source) = slice.bag() else {
        return Ok(());
    };
    if Arc::ptr_eq(source, bag) {
        return Ok(());
    }
    if let Some(extracted) = slice.extract()?.bag() {
        bag.merge_inplace(extracted, MergeOptions::default())?;
    }
    Ok(())
}

// The shape of the highest rank value; every other value must expand to it.
fn common_shape(values: &[DataSlice]) -> Result<JaggedShape> {
    let shape = values
        .iter()
        .max_by_key(|value| value.rank())
        .map(|value| value.shape().clone())
        .unwrap_or_else(JaggedShape::scalar);
    if values.iter().any(|value| !value.shape().is_broadcastable_to(&shape)) {
        return invalid("shapes are not compatible");
    }
    Ok(shape)
}

fn verify_names(names: &[&str], values: &[DataSlice]) -> Result<()> {
    if names.len() != values.len() {
        return invalid(format!(
            "expected as many attribute names as values, got {} names and {} values",
            names.len(),
            values.len()
        ));
    }
    Ok(())
}

// Ids from `alloc` at the present positions of `mask`.
fn ids_like(alloc: AllocationId, mask: &DataSlice) -> DataSliceImpl {
    let mask = mask.to_impl();
    let present: Vec<(usize, ObjectId)> = mask
        .iter()
        .enumerate()
        .filter(|(_, item)| item.has_value())
        .map(|(position, _)| (position, alloc.object_by_offset(position as u64)))
        .collect();
    DataSliceImpl::from_object_ids(mask.size(), present)
}

fn set_attrs(target: &DataSlice, names: &[&str], values: &[DataSlice], update_schema: bool) -> Result<()> {
    for (name, value) in names.iter().zip(values) {
        if update_schema {
            target.set_attr_with_update_schema(name, value)?;
        } else {
            target.set_attr(name, value)?;
        }
    }
    Ok(())
}

// ------------- Schemas -------------

/// A new explicit schema declaring `names` with the given attribute schemas.
pub fn create_entity_schema(bag: &DataBagPtr, names: &[&str], schemas: &[DataSlice]) -> Result<DataSlice> {
    verify_names(names, schemas)?;
    let mut values = Vec::with_capacity(schemas.len());
    for schema in schemas {
        values.push(schema_value(schema)?);
        adopt(bag, schema)?;
    }
    let schema = DataItem::ObjectId(allocate_explicit_schema());
    bag.write(|store| store.set_schema_fields(&schema, names, &values))?;
    schema_slice(schema, Some(Arc::clone(bag)))
}

fn uu_schema_item(bag: &DataBagPtr, seed: &str, names: &[&str], values: &[DataItem]) -> Result<DataItem> {
    let schema = DataItem::ObjectId(uuid_from_fields(IdKind::ExplicitSchema, seed, names, values));
    bag.write(|store| store.set_schema_fields(&schema, names, values))?;
    Ok(schema)
}

/// An explicit schema whose id is derived from `seed` and the attribute
/// schemas; the same inputs give the same schema.
pub fn uu_schema(bag: &DataBagPtr, seed: &str, names: &[&str], schemas: &[DataSlice]) -> Result<DataSlice> {
    verify_names(names, schemas)?;
    let mut values = Vec::with_capacity(schemas.len());
    for schema in schemas {
        values.push(schema_value(schema)?);
        adopt(bag, schema)?;
    }
    let schema = uu_schema_item(bag, seed, names, &values)?;
    schema_slice(schema, Some(Arc::clone(bag)))
}

fn list_schema_item(bag: &DataBagPtr, item_schema: DataItem) -> Result<DataItem> {
    uu_schema_item(bag, LIST_SCHEMA_SEED, &[LIST_ITEMS_SCHEMA_ATTR], &[item_schema])
}

/// The schema of lists holding `item_schema` items.
pub fn list_schema(bag: &DataBagPtr, item_schema: &DataSlice) -> Result<DataSlice> {
    let item = schema_value(item_schema)?;
    adopt(bag, item_schema)?;
    schema_slice(list_schema_item(bag, item)?, Some(Arc::clone(bag)))
}

fn verify_dict_key_schema(key_schema: &DataItem) -> Result<()> {
    match key_schema.as_dtype() {
        Some(dtype @ (DType::Float32 | DType::Float64 | DType::Expr | DType::Schema)) => {
            invalid(format!("dict keys cannot be {}", dtype))
        }
        _ => Ok(()),
    }
}

fn dict_schema_item(bag: &DataBagPtr, key_schema: DataItem, value_schema: DataItem) -> Result<DataItem> {
    verify_dict_key_schema(&key_schema)?;
    uu_schema_item(
        bag,
        DICT_SCHEMA_SEED,
        &[DICT_KEYS_SCHEMA_ATTR, DICT_VALUES_SCHEMA_ATTR],
        &[key_schema, value_schema],
    )
}

/// The schema of dicts from `key_schema` to `value_schema`.
pub fn dict_schema(bag: &DataBagPtr, key_schema: &DataSlice, value_schema: &DataSlice) -> Result<DataSlice> {
    let key = schema_value(key_schema)?;
    let value = schema_value(value_schema)?;
    adopt(bag, key_schema)?;
    adopt(bag, value_schema)?;
    schema_slice(dict_schema_item(bag, key, value)?, Some(Arc::clone(bag)))
}

// Given schema first, then the schema of the values, then OBJECT.
fn resolve_schema(bag: &DataBagPtr, schema: Option<&DataSlice>, values: Option<&DataSlice>) -> Result<DataItem> {
    match (schema, values) {
        (Some(schema), _) => {
            let item = schema_value(schema)?;
            adopt(bag, schema)?;
            Ok(item)
        }
        (None, Some(values)) => Ok(values.schema().clone()),
        (None, None) => Ok(DataItem::DType(DType::Object)),
    }
}

// ------------- Entities and objects -------------

/// The factory interface shared by entities and objects.
pub trait Creator {
    /// One new item per row of the aligned `values`, with `names` set to them.
    fn from_attrs(bag: &DataBagPtr, names: &[&str], values: &[DataSlice]) -> Result<DataSlice>;
    /// New items without attributes, one per element of `shape`.
    fn shaped(bag: &DataBagPtr, shape: JaggedShape) -> Result<DataSlice>;
    /// New items at the present positions of `shape_and_mask_from`.
    fn like(bag: &DataBagPtr, shape_and_mask_from: &DataSlice) -> Result<DataSlice>;
    /// `value` as an item of this kind living in `bag`. The caller takes care
    /// of bringing the triples of `value` along.
    fn convert(bag: &DataBagPtr, value: &DataSlice) -> Result<DataSlice>;
}

/// Entities share one explicit schema.
pub struct EntityCreator;

impl EntityCreator {
    fn create(bag: &DataBagPtr, ids: DataSliceImpl, shape: JaggedShape) -> Result<DataSlice> {
        let schema = DataItem::ObjectId(allocate_explicit_schema());
        DataSlice::create(ids, shape, schema, Some(Arc::clone(bag)))
    }

    /// Like [`Creator::from_attrs`], with the entities taking `schema`. With
    /// `update_schema` the schema is extended to fit the values instead of
    /// being enforced.
    pub fn from_attrs_with_schema(
        bag: &DataBagPtr,
        names: &[&str],
        values: &[DataSlice],
        schema: &DataSlice,
        update_schema: bool,
    ) -> Result<DataSlice> {
        verify_names(names, values)?;
        let schema_item = schema_value(schema)?;
        match &schema_item {
            DataItem::ObjectId(id) if id.is_schema() && !id.is_implicit_schema() => {}
            DataItem::DType(DType::Any) => {}
            other => return invalid(format!("requires Entity schema, got {}", other)),
        }
        adopt(bag, schema)?;
        let shape = common_shape(values)?;
        let ids = DataSliceImpl::allocate_empty_objects(shape.size());
        let entities = DataSlice::create(ids, shape, schema_item, Some(Arc::clone(bag)))?;
        set_attrs(&entities, names, values, update_schema)?;
        Ok(entities)
    }
}

impl Creator for EntityCreator {
    fn from_attrs(bag: &DataBagPtr, names: &[&str], values: &[DataSlice]) -> Result<DataSlice> {
        verify_names(names, values)?;
        let shape = common_shape(values)?;
        let entities = Self::shaped(bag, shape)?;
        let attr_schemas: Vec<DataItem> = values.iter().map(|value| value.schema().clone()).collect();
        bag.write(|store| store.set_schema_fields(entities.schema(), names, &attr_schemas))?;
        set_attrs(&entities, names, values, false)?;
        debug!(items = entities.size(), attrs = names.len(), "entities created");
        Ok(entities)
    }

    fn shaped(bag: &DataBagPtr, shape: JaggedShape) -> Result<DataSlice> {
        let ids = DataSliceImpl::allocate_empty_objects(shape.size());
        Self::create(bag, ids, shape)
    }

    fn like(bag: &DataBagPtr, shape_and_mask_from: &DataSlice) -> Result<DataSlice> {
        let ids = ids_like(allocate(shape_and_mask_from.size()), shape_and_mask_from);
        Self::create(bag, ids, shape_and_mask_from.shape().clone())
    }

    fn convert(bag: &DataBagPtr, value: &DataSlice) -> Result<DataSlice> {
        Ok(value.with_bag(Some(Arc::clone(bag))))
    }
}

/// Objects carry their own implicit schema in `__schema__`.
pub struct ObjectCreator;

impl ObjectCreator {
    fn create(bag: &DataBagPtr, ids: DataSliceImpl, shape: JaggedShape) -> Result<DataSlice> {
        let schemas: DataSliceImpl = ids
            .iter()
            .map(|item| match item.as_object_id() {
                Some(id) => DataItem::ObjectId(create_implicit_schema(id)),
                None => DataItem::Missing,
            })
            .collect();
        bag.write(|store| store.set_attr_slice(&ids, SCHEMA_ATTR, &schemas))?;
        DataSlice::create(ids, shape, DataItem::DType(DType::Object), Some(Arc::clone(bag)))
    }
}

impl Creator for ObjectCreator {
    fn from_attrs(bag: &DataBagPtr, names: &[&str], values: &[DataSlice]) -> Result<DataSlice> {
        verify_names(names, values)?;
        if names.contains(&"schema") {
            return invalid("please use new_...() instead of obj_...() to create items with a given schema");
        }
        let shape = common_shape(values)?;
        let objects = Self::shaped(bag, shape)?;
        set_attrs(&objects, names, values, false)?;
        debug!(items = objects.size(), attrs = names.len(), "objects created");
        Ok(objects)
    }

    fn shaped(bag: &DataBagPtr, shape: JaggedShape) -> Result<DataSlice> {
        let ids = DataSliceImpl::allocate_empty_objects(shape.size());
        Self::create(bag, ids, shape)
    }

    fn like(bag: &DataBagPtr, shape_and_mask_from: &DataSlice) -> Result<DataSlice> {
        let ids = ids_like(allocate(shape_and_mask_from.size()), shape_and_mask_from);
        Self::create(bag, ids, shape_and_mask_from.shape().clone())
    }

    fn convert(bag: &DataBagPtr, value: &DataSlice) -> Result<DataSlice> {
        value.with_bag(Some(Arc::clone(bag))).embed_schema(false)
    }
}

// ------------- Uuids -------------

// One uuid per row of the aligned `values`.
fn row_uuids(kind: IdKind, seed: &str, names: &[&str], values: &[DataSlice]) -> Result<(DataSliceImpl, JaggedShape)> {
    verify_names(names, values)?;
    let shape = common_shape(values)?;
    let columns = values
        .iter()
        .map(|value| -> Result<Vec<DataItem>> { Ok(value.broadcast_to_shape(&shape)?.items()) })
        .collect::<Result<Vec<Vec<DataItem>>>>()?;
    let ids: DataSliceImpl = (0..shape.size())
        .map(|row| {
            let fields: Vec<DataItem> = columns.iter().map(|column| column[row].clone()).collect();
            DataItem::ObjectId(uuid_from_fields(kind, seed, names, &fields))
        })
        .collect();
    Ok((ids, shape))
}

/// Ids derived from `seed` and the field values of every row, with ITEMID
/// schema and no bag.
pub fn create_uuid_from_fields(seed: &str, names: &[&str], values: &[DataSlice]) -> Result<DataSlice> {
    let (ids, shape) = row_uuids(IdKind::Entity, seed, names, values)?;
    DataSlice::create(ids, shape, DataItem::DType(DType::ItemId), None)
}

/// Entities and objects whose ids are derived from their content. Creating
/// them again with the same inputs returns the same items, so attributes set
/// in between stay visible.
pub struct UuCreator;

impl UuCreator {
    /// Uu entities under a uu schema derived from the attribute schemas.
    pub fn entities(bag: &DataBagPtr, seed: &str, names: &[&str], values: &[DataSlice]) -> Result<DataSlice> {
        let (ids, shape) = row_uuids(IdKind::Entity, seed, names, values)?;
        let attr_schemas: Vec<DataItem> = values.iter().map(|value| value.schema().clone()).collect();
        let schema = uu_schema_item(bag, seed, names, &attr_schemas)?;
        let entities = DataSlice::create(ids, shape, schema, Some(Arc::clone(bag)))?;
        set_attrs(&entities, names, values, false)?;
        Ok(entities)
    }

    /// Uu objects, each with its implicit schema.
    pub fn objects(bag: &DataBagPtr, seed: &str, names: &[&str], values: &[DataSlice]) -> Result<DataSlice> {
        let (ids, shape) = row_uuids(IdKind::Entity, seed, names, values)?;
        let objects = ObjectCreator::create(bag, ids, shape)?;
        set_attrs(&objects, names, values, false)?;
        Ok(objects)
    }
}

// ------------- Lists -------------

fn create_lists(
    bag: &DataBagPtr,
    ids: DataSliceImpl,
    shape: JaggedShape,
    values: Option<&DataSlice>,
    item_schema: DataItem,
) -> Result<DataSlice> {
    let schema = list_schema_item(bag, item_schema)?;
    let lists = DataSlice::create(ids, shape, schema, Some(Arc::clone(bag)))?;
    if let Some(values) = values {
        lists.append_to_list(values)?;
    }
    Ok(lists)
}

/// A single empty list of `item_schema` items (OBJECT when not given).
pub fn create_empty_list(bag: &DataBagPtr, item_schema: Option<&DataSlice>) -> Result<DataSlice> {
    create_list_shaped(bag, JaggedShape::scalar(), None, item_schema)
}

/// One list per element of `shape`. `values` either has one more dimension
/// than `shape`, giving each list its row, or is broadcast to `shape`, giving
/// each list one item.
pub fn create_list_shaped(
    bag: &DataBagPtr,
    shape: JaggedShape,
    values: Option<&DataSlice>,
    item_schema: Option<&DataSlice>,
) -> Result<DataSlice> {
    let item_schema = resolve_schema(bag, item_schema, values)?;
    let ids = DataSliceImpl::objects_from_allocation(allocate_lists(shape.size()), shape.size());
    create_lists(bag, ids, shape, values, item_schema)
}

/// Lists at the present positions of `shape_and_mask_from`.
pub fn create_list_like(
    bag: &DataBagPtr,
    shape_and_mask_from: &DataSlice,
    values: Option<&DataSlice>,
    item_schema: Option<&DataSlice>,
) -> Result<DataSlice> {
    let item_schema = resolve_schema(bag, item_schema, values)?;
    let ids = ids_like(allocate_lists(shape_and_mask_from.size()), shape_and_mask_from);
    create_lists(bag, ids, shape_and_mask_from.shape().clone(), values, item_schema)
}

/// Folds the last dimension of `values` into lists.
pub fn create_lists_from_last_dimension(
    bag: &DataBagPtr,
    values: &DataSlice,
    item_schema: Option<&DataSlice>,
) -> Result<DataSlice> {
    if values.rank() == 0 {
        return invalid("creating a list from values requires at least one dimension");
    }
    let shape = values.shape().remove_dims(values.rank() - 1);
    create_list_shaped(bag, shape, Some(values), item_schema)
}

/// Folds every dimension of `values` into nested lists; `item_schema`
/// applies to the innermost lists.
pub fn create_nested_list(bag: &DataBagPtr, values: &DataSlice, item_schema: Option<&DataSlice>) -> Result<DataSlice> {
    let mut lists = create_lists_from_last_dimension(bag, values, item_schema)?;
    while lists.rank() > 0 {
        lists = create_lists_from_last_dimension(bag, &lists, None)?;
    }
    Ok(lists)
}

// ------------- Dicts -------------

fn verify_keys_and_values(keys: Option<&DataSlice>, values: Option<&DataSlice>) -> Result<()> {
    match (keys, values) {
        (Some(_), None) => invalid("creating a dict requires both keys and values, got only keys"),
        (None, Some(_)) => invalid("creating a dict requires both keys and values, got only values"),
        _ => Ok(()),
    }
}

fn create_dicts(
    bag: &DataBagPtr,
    ids: DataSliceImpl,
    shape: JaggedShape,
    keys: Option<&DataSlice>,
    values: Option<&DataSlice>,
    key_schema: Option<&DataSlice>,
    value_schema: Option<&DataSlice>,
) -> Result<DataSlice> {
    verify_keys_and_values(keys, values)?;
    let key_schema = resolve_schema(bag, key_schema, keys)?;
    let value_schema = resolve_schema(bag, value_schema, values)?;
    let schema = dict_schema_item(bag, key_schema, value_schema)?;
    let dicts = DataSlice::create(ids, shape, schema, Some(Arc::clone(bag)))?;
    if let (Some(keys), Some(values)) = (keys, values) {
        dicts.set_in_dict(keys, values)?;
    }
    Ok(dicts)
}

/// One dict per element of `shape`, filled with the aligned `keys` and
/// `values`. Key and value schemas default to the schemas of `keys` and
/// `values`, or OBJECT.
pub fn create_dict_shaped(
    bag: &DataBagPtr,
    shape: JaggedShape,
    keys: Option<&DataSlice>,
    values: Option<&DataSlice>,
    key_schema: Option<&DataSlice>,
    value_schema: Option<&DataSlice>,
) -> Result<DataSlice> {
    let ids = DataSliceImpl::objects_from_allocation(allocate_dicts(shape.size()), shape.size());
    create_dicts(bag, ids, shape, keys, values, key_schema, value_schema)
}

/// Dicts at the present positions of `shape_and_mask_from`.
pub fn create_dict_like(
    bag: &DataBagPtr,
    shape_and_mask_from: &DataSlice,
    keys: Option<&DataSlice>,
    values: Option<&DataSlice>,
    key_schema: Option<&DataSlice>,
    value_schema: Option<&DataSlice>,
) -> Result<DataSlice> {
    let ids = ids_like(allocate_dicts(shape_and_mask_from.size()), shape_and_mask_from);
    let shape = shape_and_mask_from.shape().clone();
    create_dicts(bag, ids, shape, keys, values, key_schema, value_schema)
}

// ------------- Nofollow -------------

fn object_schema_marker() -> ObjectId {
    uuid_from_fields(IdKind::ExplicitSchema, OBJECT_SCHEMA_SEED, &[], &[])
}

/// Wraps an entity schema (or OBJECT) into a nofollow schema, which
/// traversals treat as a leaf.
pub fn create_nofollow_schema(schema: &DataSlice) -> Result<DataSlice> {
    let item = schema_value(schema)?;
    let target = match &item {
        DataItem::DType(DType::Object) => object_schema_marker(),
        DataItem::ObjectId(id) if id.is_nofollow_schema() => {
            return invalid("nofollow on a nofollow slice is not allowed");
        }
        DataItem::ObjectId(id) => *id,
        other => return invalid(format!("calling nofollow on {} slice is not allowed", other)),
    };
    schema_slice(DataItem::ObjectId(nofollow_schema(target)?), schema.bag().cloned())
}

/// The same items under the nofollow version of their schema.
pub fn nofollow(slice: &DataSlice) -> Result<DataSlice> {
    let schema = create_nofollow_schema(&slice.get_schema())?;
    slice.with_schema(schema_value(&schema)?)
}

/// The schema a nofollow schema wraps.
pub fn get_nofollowed_schema(schema: &DataSlice) -> Result<DataSlice> {
    let item = schema_value(schema)?;
    let Some(id) = item.as_object_id() else {
        return invalid(format!("a nofollow schema is required, got {}", item));
    };
    let target = nofollow_target(id)?;
    let followed = if target == object_schema_marker() {
        DataItem::DType(DType::Object)
    } else {
        DataItem::ObjectId(target)
    };
    schema_slice(followed, schema.bag().cloned())
}
