// Shallow clone: fresh ids for the top level items only. Attribute values,
// list items and dict entries are copied as they are, so they keep pointing
// at the original objects. Schemas come along so the clone is usable.
use bimap::BiMap;
use tracing::debug;

use super::ExtractOp;
use crate::bag_impl::{DataBagImpl, FallbackSpan, ListRange};
use crate::data_item::DataItem;
use crate::dtype::{DType, SCHEMA_ATTR};
use crate::error::{DataBagError, Result, invalid};
use crate::object_id::{AllocationId, ObjectId, allocate_explicit_schemas, create_implicit_schema};
use crate::slice_impl::DataSliceImpl;

pub struct ShallowCloneOp<'a> {
    new_bag: &'a mut DataBagImpl,
    allocation_tracker: BiMap<AllocationId, AllocationId>,
    // schemas whose triples are copied once all items are cloned
    schemas_to_extract: Vec<DataItem>,
}

impl<'a> ShallowCloneOp<'a> {
    pub fn new(new_bag: &'a mut DataBagImpl) -> Self {
        Self {
            new_bag,
            allocation_tracker: BiMap::new(),
            schemas_to_extract: Vec::new(),
        }
    }

    fn new_id(&mut self, id: ObjectId) -> ObjectId {
        let alloc = id.allocation();
        let new_alloc = match self.allocation_tracker.get_by_left(&alloc) {
            Some(new_alloc) => *new_alloc,
            None => {
                let new_alloc = if id.is_implicit_schema() {
                    allocate_explicit_schemas(alloc.capacity())
                } else {
                    alloc.new_like()
                };
                self.allocation_tracker.insert(alloc, new_alloc);
                new_alloc
            }
        };
        new_alloc.object_by_offset(id.offset())
    }

    /// Returns the cloned items and their schema, which is unchanged.
    pub fn call(
        &mut self,
        items: &DataSliceImpl,
        schema: &DataItem,
        bag: &DataBagImpl,
        fallbacks: FallbackSpan,
    ) -> Result<(DataSliceImpl, DataItem)> {
        if !schema.is_schema() {
            return invalid(format!("schema expected, got {}", schema));
        }
        let mut cloned = items.to_items();
        for (position, id) in items.object_ids() {
            let new_item = if schema.is_dtype(DType::Schema) {
                self.clone_schema(id, bag, fallbacks)?
            } else {
                self.clone_object(id, schema, bag, fallbacks)?
            };
            cloned[position] = new_item;
        }
        let schemas = DataSliceImpl::from_items(std::mem::take(&mut self.schemas_to_extract));
        ExtractOp::new(&mut *self.new_bag).call(&schemas, &DataItem::DType(DType::Schema), bag, fallbacks)?;
        debug!(
            items = items.size(),
            allocations = self.allocation_tracker.len(),
            "shallow clone complete"
        );
        Ok((DataSliceImpl::from_items(cloned), schema.clone()))
    }

    fn clone_schema(&mut self, id: ObjectId, bag: &DataBagImpl, fallbacks: FallbackSpan) -> Result<DataItem> {
        let old = DataItem::ObjectId(id);
        if !id.is_schema() {
            return invalid(format!("schema expected, got {}", old));
        }
        let new_schema = DataItem::ObjectId(self.new_id(id));
        for name in bag.get_schema_attrs(&old, fallbacks)? {
            let attr_schema = bag.get_schema_attr(&old, &name, fallbacks)?;
            self.new_bag.set_schema_attr(&new_schema, &name, attr_schema.clone())?;
            self.schemas_to_extract.push(attr_schema);
        }
        Ok(new_schema)
    }

    fn clone_object(&mut self, id: ObjectId, schema: &DataItem, bag: &DataBagImpl, fallbacks: FallbackSpan) -> Result<DataItem> {
        let old = DataItem::ObjectId(id);
        let is_object_schema = schema.is_dtype(DType::Object);
        let item_schema = if is_object_schema {
            let embedded = bag.get_attr(&old, SCHEMA_ATTR, fallbacks)?;
            if embedded.is_missing() {
                return Err(DataBagError::MissingObjectSchema(old.to_string()));
            }
            embedded
        } else {
            schema.clone()
        };
        let new_object = self.new_id(id);
        let new_item = DataItem::ObjectId(new_object);

        let new_schema = match item_schema.as_object_id() {
            Some(schema_id) if schema_id.is_implicit_schema() => {
                let new_schema = DataItem::ObjectId(create_implicit_schema(new_object));
                for name in bag.get_schema_attrs(&item_schema, fallbacks)? {
                    let attr_schema = bag.get_schema_attr(&item_schema, &name, fallbacks)?;
                    self.new_bag.set_schema_attr(&new_schema, &name, attr_schema.clone())?;
                    self.schemas_to_extract.push(attr_schema);
                }
                new_schema
            }
            _ => {
                self.schemas_to_extract.push(item_schema.clone());
                item_schema.clone()
            }
        };
        if is_object_schema {
            self.new_bag.set_attr(&new_item, SCHEMA_ATTR, new_schema)?;
        }

        if id.is_list() {
            let values = bag.explode_list(&old, ListRange::all(), fallbacks)?;
            self.new_bag.extend_list(&new_item, &values)?;
        } else if id.is_dict() {
            for key in bag.get_dict_keys(&old, fallbacks)? {
                let value = bag.get_from_dict(&old, &key, fallbacks)?;
                self.new_bag.set_in_dict(&new_item, &key, value)?;
            }
        } else if item_schema.as_object_id().is_some() {
            for name in bag.get_schema_attrs(&item_schema, fallbacks)? {
                let value = bag.get_attr(&old, &name, fallbacks)?;
                if value.has_value() {
                    self.new_bag.set_attr(&new_item, &name, value)?;
                }
            }
        }
        Ok(new_item)
    }
}
