//! DataBag – a triple store for objects, lists, dicts and schemas, with
//! jagged slices on top.
//!
//! Everything stored is a triple keyed by an [`object_id::ObjectId`]:
//! * an attribute `(object, attribute) -> value`,
//! * a list `list -> [value, ...]`,
//! * a dict entry `(dict, key) -> value`,
//! * a schema attribute `(schema, attribute) -> schema`.
//!
//! A [`bag::DataBag`] owns such a store and may read through an ordered
//! chain of fallback bags. Bags are shared by `Arc` and copy their top layer
//! on write, so forks and snapshots are cheap. A [`data_slice::DataSlice`]
//! couples a flat array of [`data_item::DataItem`]s with a
//! [`shape::JaggedShape`], a schema and an optional bag, and is the surface
//! most operations are called on.
//!
//! ## Modules
//! * [`object_id`] – 128 bit ids, allocations and content derived (uu) ids.
//! * [`dtype`], [`data_item`] – scalar values and primitive schemas.
//! * [`dense_array`], [`slice_impl`] – columnar storage of items.
//! * [`shape`] – jagged shapes, edges and broadcasting.
//! * [`bag_impl`] – the layered store: attributes, lists, dicts, schemas,
//!   merging, content dumps and statistics.
//! * [`bag`] – the shared, lockable bag with fallbacks.
//! * [`traverser`] – schema directed walk over everything reachable.
//! * [`ops`] – deep clone, extract and shallow clone.
//! * [`object_factories`] – entities, objects, uu ids, lists, dicts, nofollow.
//! * [`persist`] – SQLite snapshots of bags.
//! * [`serialization`] – JSON documents for slices and bags.
//! * [`config`] – settings and tracing setup.
//!
//! ## Quick Start
//! ```
//! use databag::bag::DataBag;
//! use databag::data_slice::DataSlice;
//! use databag::object_factories::{Creator, EntityCreator};
//!
//! let bag = DataBag::empty();
//! let name = DataSlice::from_item("Alice").unwrap();
//! let person = EntityCreator::from_attrs(&bag, &["name"], &[name]).unwrap();
//! let copy = person.deep_clone().unwrap();
//! assert_eq!(copy.get_attr("name").unwrap().items(), person.get_attr("name").unwrap().items());
//! ```

pub mod bag;
pub mod bag_impl;
pub mod config;
pub mod data_item;
pub mod data_slice;
pub mod dense_array;
pub mod dtype;
pub mod error;
pub mod object_factories;
pub mod object_id;
pub mod ops;
pub mod persist;
pub mod schema_utils;
pub mod serialization;
pub mod shape;
pub mod slice_impl;
pub mod traverser;
