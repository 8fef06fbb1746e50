//! Generic two-pass walk over the object graph stored in a DataBag.
//!
//! The first pass discovers every reachable `(item, schema)` pair depth
//! first and calls [`AbstractVisitor::previsit`] once per pair. The second
//! pass calls the kind specific `visit_*` method for each pair, in discovery
//! order, with child values already translated through
//! [`AbstractVisitor::get_value`]. Since every pair is previsited before any
//! visit, a visitor can allocate all new ids up front.
//!
//! An item with the OBJECT schema is expanded through its embedded
//! `__schema__` attribute: the pair `(item, embedded)` is discovered with
//! `is_object_schema` set. Cycles terminate because pairs are only expanded
//! the first time they are seen.
use std::collections::HashMap;

use crate::bag_impl::{DataBagImpl, FallbackSpan, ListRange};
use crate::data_item::DataItem;
use crate::dtype::{DICT_KEYS_SCHEMA_ATTR, DICT_VALUES_SCHEMA_ATTR, DType, LIST_ITEMS_SCHEMA_ATTR, SCHEMA_ATTR};
use crate::error::{DataBagError, Result};
use crate::slice_impl::DataSliceImpl;

/// The capabilities a traversal needs from its visitor.
pub trait AbstractVisitor {
    /// Called exactly once per reachable `(item, schema)` pair, before any
    /// visit.
    fn previsit(&mut self, item: &DataItem, schema: &DataItem) -> Result<()>;

    /// The item to use in the output for `item` seen under `schema`.
    fn get_value(&self, item: &DataItem, schema: &DataItem) -> Result<DataItem>;

    fn visit_object(
        &mut self,
        object: &DataItem,
        schema: &DataItem,
        is_object_schema: bool,
        attr_names: &[String],
        attr_values: &[DataItem],
    ) -> Result<()>;

    fn visit_list(&mut self, list: &DataItem, schema: &DataItem, is_object_schema: bool, items: &[DataItem])
    -> Result<()>;

    fn visit_dict(
        &mut self,
        dict: &DataItem,
        schema: &DataItem,
        is_object_schema: bool,
        keys: &[DataItem],
        values: &[DataItem],
    ) -> Result<()>;

    fn visit_schema(
        &mut self,
        schema_item: &DataItem,
        schema: &DataItem,
        is_object_schema: bool,
        attr_names: &[String],
        attr_schemas: &[DataItem],
    ) -> Result<()>;

    fn visit_primitive(&mut self, _item: &DataItem, _schema: &DataItem) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct Discovered {
    item: DataItem,
    schema: DataItem,
    is_object_schema: bool,
}

pub struct Traverser<'a> {
    bag: &'a DataBagImpl,
    fallbacks: FallbackSpan<'a>,
}

fn schema_dtype() -> DataItem {
    DataItem::DType(DType::Schema)
}

impl<'a> Traverser<'a> {
    pub fn new(bag: &'a DataBagImpl, fallbacks: FallbackSpan<'a>) -> Self {
        Self { bag, fallbacks }
    }

    pub fn traverse_slice<V: AbstractVisitor>(&self, items: &DataSliceImpl, schema: &DataItem, visitor: &mut V) -> Result<()> {
        let roots: Vec<DataItem> = items.iter().collect();
        self.traverse(&roots, schema, visitor)
    }

    pub fn traverse_item<V: AbstractVisitor>(&self, item: &DataItem, schema: &DataItem, visitor: &mut V) -> Result<()> {
        self.traverse(std::slice::from_ref(item), schema, visitor)
    }

    fn traverse<V: AbstractVisitor>(&self, roots: &[DataItem], schema: &DataItem, visitor: &mut V) -> Result<()> {
        if !schema.is_schema() {
            return Err(DataBagError::InvalidArgument(format!("schema expected, got {}", schema)));
        }
        let mut pending: Vec<(DataItem, DataItem, bool)> = Vec::new();
        for item in roots.iter().rev() {
            pending.push((item.clone(), schema.clone(), false));
        }
        if schema.as_object_id().is_some() {
            pending.push((schema.clone(), schema_dtype(), false));
        }
        let order = self.previsit_all(pending, visitor)?;
        for entry in &order {
            self.visit(entry, visitor)?;
        }
        Ok(())
    }

    fn previsit_all<V: AbstractVisitor>(
        &self,
        mut pending: Vec<(DataItem, DataItem, bool)>,
        visitor: &mut V,
    ) -> Result<Vec<Discovered>> {
        let mut seen: HashMap<(DataItem, DataItem), usize> = HashMap::new();
        let mut order: Vec<Discovered> = Vec::new();
        while let Some((item, schema, is_object_schema)) = pending.pop() {
            if item.is_missing() {
                continue;
            }
            let key = (item.clone(), schema.clone());
            if let Some(&index) = seen.get(&key) {
                // reached again through OBJECT: remember that it needs __schema__
                if is_object_schema {
                    order[index].is_object_schema = true;
                }
                continue;
            }
            seen.insert(key, order.len());
            visitor.previsit(&item, &schema)?;
            let mut children = self.children(&item, &schema)?;
            children.reverse();
            pending.extend(children);
            order.push(Discovered {
                item,
                schema,
                is_object_schema,
            });
        }
        Ok(order)
    }

    // Pairs reachable in one step from `(item, schema)`.
    fn children(&self, item: &DataItem, schema: &DataItem) -> Result<Vec<(DataItem, DataItem, bool)>> {
        let mut children = Vec::new();
        match schema {
            DataItem::DType(DType::Object) => {
                if item.as_object_id().is_none() {
                    return Ok(children);
                }
                let embedded = self.bag.get_attr(item, SCHEMA_ATTR, self.fallbacks)?;
                if embedded.is_missing() {
                    return Err(DataBagError::MissingObjectSchema(item.to_string()));
                }
                if !embedded.is_schema() {
                    return Err(DataBagError::InvalidArgument(format!(
                        "object {} has a non-schema __schema__ attribute: {}",
                        item, embedded
                    )));
                }
                children.push((item.clone(), embedded.clone(), true));
                children.push((embedded, schema_dtype(), false));
            }
            DataItem::DType(DType::Schema) => {
                if item.as_object_id().is_none_or(|id| !id.is_schema()) {
                    return Ok(children);
                }
                for name in self.bag.get_schema_attrs(item, self.fallbacks)? {
                    let attr_schema = self.bag.get_schema_attr(item, &name, self.fallbacks)?;
                    children.push((attr_schema, schema_dtype(), false));
                }
            }
            DataItem::ObjectId(schema_id) => {
                children.push((schema.clone(), schema_dtype(), false));
                if schema_id.is_nofollow_schema() || item.as_object_id().is_none() {
                    return Ok(children);
                }
                if item.is_list() {
                    let item_schema = self.required_schema_attr(schema, LIST_ITEMS_SCHEMA_ATTR)?;
                    for value in self.bag.explode_list(item, ListRange::all(), self.fallbacks)? {
                        children.push((value, item_schema.clone(), false));
                    }
                } else if item.is_dict() {
                    let key_schema = self.required_schema_attr(schema, DICT_KEYS_SCHEMA_ATTR)?;
                    let value_schema = self.required_schema_attr(schema, DICT_VALUES_SCHEMA_ATTR)?;
                    for key in self.bag.get_dict_keys(item, self.fallbacks)? {
                        let value = self.bag.get_from_dict(item, &key, self.fallbacks)?;
                        children.push((key, key_schema.clone(), false));
                        children.push((value, value_schema.clone(), false));
                    }
                } else {
                    for name in self.bag.get_schema_attrs(schema, self.fallbacks)? {
                        let attr_schema = self.bag.get_schema_attr(schema, &name, self.fallbacks)?;
                        let value = self.bag.get_attr(item, &name, self.fallbacks)?;
                        children.push((value, attr_schema, false));
                    }
                }
            }
            // ANY, ITEMID, NONE and primitives are leaves
            _ => {}
        }
        Ok(children)
    }

    fn required_schema_attr(&self, schema: &DataItem, attr: &str) -> Result<DataItem> {
        let value = self.bag.get_schema_attr_allow_missing(schema, attr, self.fallbacks)?;
        if value.is_missing() {
            return Err(DataBagError::InvalidArgument(format!(
                "The attribute '{}' is missing on the schema.",
                attr
            )));
        }
        Ok(value)
    }

    fn visit<V: AbstractVisitor>(&self, entry: &Discovered, visitor: &mut V) -> Result<()> {
        let Discovered {
            item,
            schema,
            is_object_schema,
        } = entry;
        if item.is_primitive() {
            return visitor.visit_primitive(item, schema);
        }
        match schema {
            DataItem::DType(DType::Schema) => {
                if item.as_object_id().is_none_or(|id| !id.is_schema()) {
                    return Ok(());
                }
                let names = self.bag.get_schema_attrs(item, self.fallbacks)?;
                let mut attr_schemas = Vec::with_capacity(names.len());
                for name in &names {
                    let attr_schema = self.bag.get_schema_attr(item, name, self.fallbacks)?;
                    attr_schemas.push(visitor.get_value(&attr_schema, &schema_dtype())?);
                }
                visitor.visit_schema(item, schema, *is_object_schema, &names, &attr_schemas)
            }
            DataItem::ObjectId(schema_id) => {
                if schema_id.is_nofollow_schema() || item.as_object_id().is_none() {
                    return Ok(());
                }
                if item.is_list() {
                    let item_schema = self.required_schema_attr(schema, LIST_ITEMS_SCHEMA_ATTR)?;
                    let items = self
                        .bag
                        .explode_list(item, ListRange::all(), self.fallbacks)?
                        .iter()
                        .map(|value| visitor.get_value(value, &item_schema))
                        .collect::<Result<Vec<_>>>()?;
                    visitor.visit_list(item, schema, *is_object_schema, &items)
                } else if item.is_dict() {
                    let key_schema = self.required_schema_attr(schema, DICT_KEYS_SCHEMA_ATTR)?;
                    let value_schema = self.required_schema_attr(schema, DICT_VALUES_SCHEMA_ATTR)?;
                    let mut keys = Vec::new();
                    let mut values = Vec::new();
                    for key in self.bag.get_dict_keys(item, self.fallbacks)? {
                        let value = self.bag.get_from_dict(item, &key, self.fallbacks)?;
                        keys.push(visitor.get_value(&key, &key_schema)?);
                        values.push(visitor.get_value(&value, &value_schema)?);
                    }
                    visitor.visit_dict(item, schema, *is_object_schema, &keys, &values)
                } else {
                    let names = self.bag.get_schema_attrs(schema, self.fallbacks)?;
                    let mut values = Vec::with_capacity(names.len());
                    for name in &names {
                        let attr_schema = self.bag.get_schema_attr(schema, name, self.fallbacks)?;
                        let value = self.bag.get_attr(item, name, self.fallbacks)?;
                        values.push(visitor.get_value(&value, &attr_schema)?);
                    }
                    visitor.visit_object(item, schema, *is_object_schema, &names, &values)
                }
            }
            // OBJECT items are visited under their embedded schema
            _ => Ok(()),
        }
    }
}
