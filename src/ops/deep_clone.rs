// Deep clone: every reachable object gets a fresh id. Objects that shared an
// allocation in the source share one (new) allocation in the clone, so
// offsets are kept. Implicit schemas become explicit schemas of their own.
use std::time::Instant;

use bimap::BiMap;
use tracing::info;

use crate::bag_impl::{DataBagImpl, FallbackSpan};
use crate::data_item::DataItem;
use crate::dtype::{DType, SCHEMA_ATTR};
use crate::error::{DataBagError, Result, internal};
use crate::object_id::{AllocationId, allocate_explicit_schemas};
use crate::slice_impl::DataSliceImpl;
use crate::traverser::{AbstractVisitor, Traverser};

struct DeepCloneVisitor<'a> {
    new_bag: &'a mut DataBagImpl,
    is_schema_slice: bool,
    // source allocation on the left, clone allocation on the right
    allocation_tracker: BiMap<AllocationId, AllocationId>,
}

impl<'a> DeepCloneVisitor<'a> {
    fn new(new_bag: &'a mut DataBagImpl, is_schema_slice: bool) -> Self {
        Self {
            new_bag,
            is_schema_slice,
            allocation_tracker: BiMap::new(),
        }
    }

    fn previsit_object(&mut self, item: &DataItem) {
        let Some(id) = item.as_object_id() else { return };
        let alloc = id.allocation();
        if !self.allocation_tracker.contains_left(&alloc) {
            self.allocation_tracker.insert(alloc, alloc.new_like());
        }
    }

    fn previsit_schema(&mut self, schema: &DataItem) {
        let Some(id) = schema.as_object_id() else { return };
        if id.is_nofollow_schema() || (!id.is_implicit_schema() && !self.is_schema_slice) {
            return;
        }
        let alloc = id.allocation();
        if self.allocation_tracker.contains_left(&alloc) {
            return;
        }
        let new_alloc = if id.is_implicit_schema() {
            allocate_explicit_schemas(alloc.capacity())
        } else {
            alloc.new_like()
        };
        self.allocation_tracker.insert(alloc, new_alloc);
    }

    fn set_embedded_schema(&mut self, new_item: &DataItem, schema: &DataItem) -> Result<()> {
        let new_schema = self.get_value(schema, &DataItem::DType(DType::Schema))?;
        self.new_bag.set_attr(new_item, SCHEMA_ATTR, new_schema)
    }
}

impl AbstractVisitor for DeepCloneVisitor<'_> {
    fn previsit(&mut self, item: &DataItem, schema: &DataItem) -> Result<()> {
        match schema {
            DataItem::ObjectId(schema_id) if schema_id.is_nofollow_schema() => Ok(()),
            DataItem::ObjectId(_) | DataItem::DType(DType::Object) => {
                self.previsit_object(item);
                Ok(())
            }
            DataItem::DType(DType::Any) => internal(format!(
                "deep_clone does not support {} schema; encountered for object {}",
                schema, item
            )),
            DataItem::DType(DType::Schema) => {
                self.previsit_schema(item);
                Ok(())
            }
            DataItem::DType(_) => Ok(()),
            _ => internal(format!("unsupported schema type: {}", schema)),
        }
    }

    fn get_value(&self, item: &DataItem, schema: &DataItem) -> Result<DataItem> {
        let Some(id) = item.as_object_id() else {
            return Ok(item.clone());
        };
        if id.is_schema() && (id.is_nofollow_schema() || (!self.is_schema_slice && !id.is_implicit_schema())) {
            return Ok(item.clone());
        }
        let kept = match schema {
            DataItem::ObjectId(schema_id) => schema_id.is_nofollow_schema(),
            DataItem::DType(dtype) => *dtype == DType::ItemId,
            _ => false,
        };
        if kept {
            return Ok(item.clone());
        }
        self.allocation_tracker
            .get_by_left(&id.allocation())
            .map(|new_alloc| DataItem::ObjectId(new_alloc.object_by_offset(id.offset())))
            .ok_or_else(|| DataBagError::InvalidArgument(format!("new allocation for object {} is not found", item)))
    }

    fn visit_object(
        &mut self,
        object: &DataItem,
        schema: &DataItem,
        is_object_schema: bool,
        attr_names: &[String],
        attr_values: &[DataItem],
    ) -> Result<()> {
        let new_object = self.get_value(object, schema)?;
        if is_object_schema {
            self.set_embedded_schema(&new_object, schema)?;
        }
        for (name, value) in attr_names.iter().zip(attr_values) {
            if value.has_value() {
                self.new_bag.set_attr(&new_object, name, value.clone())?;
            }
        }
        Ok(())
    }

    fn visit_list(&mut self, list: &DataItem, schema: &DataItem, is_object_schema: bool, items: &[DataItem]) -> Result<()> {
        let new_list = self.get_value(list, schema)?;
        if is_object_schema {
            self.set_embedded_schema(&new_list, schema)?;
        }
        self.new_bag.extend_list(&new_list, items)
    }

    fn visit_dict(
        &mut self,
        dict: &DataItem,
        schema: &DataItem,
        is_object_schema: bool,
        keys: &[DataItem],
        values: &[DataItem],
    ) -> Result<()> {
        let new_dict = self.get_value(dict, schema)?;
        if is_object_schema {
            self.set_embedded_schema(&new_dict, schema)?;
        }
        for (key, value) in keys.iter().zip(values) {
            self.new_bag.set_in_dict(&new_dict, key, value.clone())?;
        }
        Ok(())
    }

    fn visit_schema(
        &mut self,
        schema_item: &DataItem,
        schema: &DataItem,
        _is_object_schema: bool,
        attr_names: &[String],
        attr_schemas: &[DataItem],
    ) -> Result<()> {
        let new_schema = self.get_value(schema_item, schema)?;
        for (name, value) in attr_names.iter().zip(attr_schemas) {
            if value.has_value() {
                self.new_bag.set_schema_attr(&new_schema, name, value.clone())?;
            }
        }
        Ok(())
    }
}

/// Clones everything reachable from a slice into `new_bag`.
pub struct DeepCloneOp<'a> {
    new_bag: &'a mut DataBagImpl,
}

impl<'a> DeepCloneOp<'a> {
    pub fn new(new_bag: &'a mut DataBagImpl) -> Self {
        Self { new_bag }
    }

    /// Returns the cloned items and their schema. Explicit schemas are
    /// returned unchanged, implicit ones as their clone. For a slice of
    /// schemas the items are the cloned schemas.
    pub fn call(
        &mut self,
        items: &DataSliceImpl,
        schema: &DataItem,
        bag: &DataBagImpl,
        fallbacks: FallbackSpan,
    ) -> Result<(DataSliceImpl, DataItem)> {
        let start = Instant::now();
        let mut visitor = DeepCloneVisitor::new(&mut *self.new_bag, schema.is_dtype(DType::Schema));
        Traverser::new(bag, fallbacks).traverse_slice(items, schema, &mut visitor)?;
        let cloned = items
            .iter()
            .map(|item| visitor.get_value(&item, schema))
            .collect::<Result<DataSliceImpl>>()?;
        // an implicit root schema belongs to the source objects; hand back its copy
        let schema = if schema.is_implicit_schema() {
            visitor.get_value(schema, &DataItem::DType(DType::Schema))?
        } else {
            schema.clone()
        };
        info!(
            ms = start.elapsed().as_millis() as u64,
            items = items.size(),
            allocations = visitor.allocation_tracker.len(),
            "deep clone complete"
        );
        Ok((cloned, schema))
    }

    pub fn call_item(
        &mut self,
        item: &DataItem,
        schema: &DataItem,
        bag: &DataBagImpl,
        fallbacks: FallbackSpan,
    ) -> Result<(DataItem, DataItem)> {
        let (cloned, schema) = self.call(&DataSliceImpl::create(1, item.clone()), schema, bag, fallbacks)?;
        Ok((cloned.get(0), schema))
    }
}
