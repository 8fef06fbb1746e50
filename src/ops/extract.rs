// Extraction: copies the triples reachable from a slice into a new store,
// keeping every id. Everything not reachable is left behind.
use std::time::Instant;

use tracing::info;

use crate::bag_impl::{DataBagImpl, FallbackSpan};
use crate::data_item::DataItem;
use crate::dtype::{DType, SCHEMA_ATTR};
use crate::error::{Result, invalid};
use crate::slice_impl::DataSliceImpl;
use crate::traverser::{AbstractVisitor, Traverser};

struct ExtractVisitor<'a> {
    new_bag: &'a mut DataBagImpl,
    visited: usize,
}

impl ExtractVisitor<'_> {
    fn set_embedded_schema(&mut self, item: &DataItem, schema: &DataItem) -> Result<()> {
        self.new_bag.set_attr(item, SCHEMA_ATTR, schema.clone())
    }
}

impl AbstractVisitor for ExtractVisitor<'_> {
    fn previsit(&mut self, item: &DataItem, schema: &DataItem) -> Result<()> {
        if schema.is_dtype(DType::Any) && item.as_object_id().is_some() {
            return invalid(format!(
                "extract does not support {} schema; encountered for object {}",
                schema, item
            ));
        }
        self.visited += 1;
        Ok(())
    }

    fn get_value(&self, item: &DataItem, _schema: &DataItem) -> Result<DataItem> {
        Ok(item.clone())
    }

    fn visit_object(
        &mut self,
        object: &DataItem,
        schema: &DataItem,
        is_object_schema: bool,
        attr_names: &[String],
        attr_values: &[DataItem],
    ) -> Result<()> {
        if is_object_schema {
            self.set_embedded_schema(object, schema)?;
        }
        for (name, value) in attr_names.iter().zip(attr_values) {
            if value.has_value() {
                self.new_bag.set_attr(object, name, value.clone())?;
            }
        }
        Ok(())
    }

    fn visit_list(&mut self, list: &DataItem, schema: &DataItem, is_object_schema: bool, items: &[DataItem]) -> Result<()> {
        if is_object_schema {
            self.set_embedded_schema(list, schema)?;
        }
        self.new_bag.extend_list(list, items)
    }

    fn visit_dict(
        &mut self,
        dict: &DataItem,
        schema: &DataItem,
        is_object_schema: bool,
        keys: &[DataItem],
        values: &[DataItem],
    ) -> Result<()> {
        if is_object_schema {
            self.set_embedded_schema(dict, schema)?;
        }
        for (key, value) in keys.iter().zip(values) {
            self.new_bag.set_in_dict(dict, key, value.clone())?;
        }
        Ok(())
    }

    fn visit_schema(
        &mut self,
        schema_item: &DataItem,
        _schema: &DataItem,
        _is_object_schema: bool,
        attr_names: &[String],
        attr_schemas: &[DataItem],
    ) -> Result<()> {
        for (name, value) in attr_names.iter().zip(attr_schemas) {
            if value.has_value() {
                self.new_bag.set_schema_attr(schema_item, name, value.clone())?;
            }
        }
        Ok(())
    }
}

/// Copies the triples reachable from a slice into `new_bag`.
pub struct ExtractOp<'a> {
    new_bag: &'a mut DataBagImpl,
}

impl<'a> ExtractOp<'a> {
    pub fn new(new_bag: &'a mut DataBagImpl) -> Self {
        Self { new_bag }
    }

    pub fn call(&mut self, items: &DataSliceImpl, schema: &DataItem, bag: &DataBagImpl, fallbacks: FallbackSpan) -> Result<()> {
        let start = Instant::now();
        let mut visitor = ExtractVisitor {
            new_bag: &mut *self.new_bag,
            visited: 0,
        };
        Traverser::new(bag, fallbacks).traverse_slice(items, schema, &mut visitor)?;
        info!(
            ms = start.elapsed().as_millis() as u64,
            items = items.size(),
            visited = visitor.visited,
            "extract complete"
        );
        Ok(())
    }

    pub fn call_item(&mut self, item: &DataItem, schema: &DataItem, bag: &DataBagImpl, fallbacks: FallbackSpan) -> Result<()> {
        self.call(&DataSliceImpl::create(1, item.clone()), schema, bag, fallbacks)
    }
}
