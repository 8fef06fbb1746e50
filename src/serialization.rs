//! JSON documents for slices and bags.
//!
//! A slice document carries its items, the split points of every shape
//! edge, the schema and, when the slice has one, the full visible content
//! of its bag. Loading gives a slice over a new mutable bag without
//! fallbacks; object ids are kept as they were.
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bag::{DataBag, DataBagPtr};
use crate::bag_impl::{DataBagContent, DataBagImpl};
use crate::data_item::DataItem;
use crate::data_slice::DataSlice;
use crate::error::{DataBagError, Result};
use crate::shape::{Edge, JaggedShape};
use crate::slice_impl::DataSliceImpl;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SliceDocument {
    pub items: Vec<DataItem>,
    pub split_points: Vec<Vec<usize>>,
    pub schema: DataItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bag: Option<DataBagContent>,
}

impl SliceDocument {
    pub fn from_slice(slice: &DataSlice) -> Result<SliceDocument> {
        let bag = match slice.bag() {
            Some(bag) => Some(bag.content()?),
            None => None,
        };
        Ok(SliceDocument {
            items: slice.items(),
            split_points: slice
                .shape()
                .edges()
                .iter()
                .map(|edge| edge.split_points().to_vec())
                .collect(),
            schema: slice.schema().clone(),
            bag,
        })
    }

    pub fn into_slice(self) -> Result<DataSlice> {
        let edges = self
            .split_points
            .into_iter()
            .map(Edge::from_split_points)
            .collect::<Result<Vec<Edge>>>()?;
        let shape = JaggedShape::from_edges(edges)?;
        if shape.size() != self.items.len() {
            return Err(DataBagError::Serialization(format!(
                "shape of size {} does not fit {} items",
                shape.size(),
                self.items.len()
            )));
        }
        let bag = match &self.bag {
            Some(content) => Some(DataBag::from_impl(DataBagImpl::from_content(content)?)),
            None => None,
        };
        DataSlice::create(DataSliceImpl::from_items(self.items), shape, self.schema, bag)
    }
}

pub fn dumps(slice: &DataSlice) -> Result<String> {
    let document = SliceDocument::from_slice(slice)?;
    let text = serde_json::to_string(&document)?;
    debug!(bytes = text.len(), rank = slice.rank(), "slice serialized");
    Ok(text)
}

pub fn loads(text: &str) -> Result<DataSlice> {
    let document: SliceDocument = serde_json::from_str(text)?;
    document.into_slice()
}

/// The visible content of `bag`, fallbacks included.
pub fn dumps_bag(bag: &DataBag) -> Result<String> {
    Ok(serde_json::to_string(&bag.content()?)?)
}

pub fn loads_bag(text: &str) -> Result<DataBagPtr> {
    let content: DataBagContent = serde_json::from_str(text)?;
    Ok(DataBag::from_impl(DataBagImpl::from_content(&content)?))
}
