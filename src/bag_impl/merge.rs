// In-place merge of another store's content. Writes are collected first and
// applied only when no conflict was raised, so a failed merge changes nothing.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::DataBagImpl;
use crate::data_item::DataItem;
use crate::error::{DataBagError, Result};
use crate::object_id::ObjectId;

/// What to do when both stores hold a different present value for a triple.
/// Reads and writes as text, accepting every spelling `FromStr` does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConflictPolicy {
    RaiseOnConflict,
    #[default]
    KeepOriginal,
    Overwrite,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ConflictPolicy::RaiseOnConflict => "raise_on_conflict",
            ConflictPolicy::KeepOriginal => "keep_original",
            ConflictPolicy::Overwrite => "overwrite",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ConflictPolicy {
    type Err = DataBagError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raise_on_conflict" | "raise" => Ok(ConflictPolicy::RaiseOnConflict),
            "keep_original" | "keep" => Ok(ConflictPolicy::KeepOriginal),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            other => Err(DataBagError::Config(format!("unknown conflict policy: {}", other))),
        }
    }
}

impl TryFrom<String> for ConflictPolicy {
    type Error = DataBagError;
    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ConflictPolicy> for String {
    fn from(policy: ConflictPolicy) -> String {
        policy.to_string()
    }
}

/// `data_conflict_policy` covers attributes, lists, dicts and implicit
/// schemas; `schema_conflict_policy` covers explicit schemas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    pub data_conflict_policy: ConflictPolicy,
    pub schema_conflict_policy: ConflictPolicy,
}

impl MergeOptions {
    pub fn uniform(policy: ConflictPolicy) -> Self {
        Self {
            data_conflict_policy: policy,
            schema_conflict_policy: policy,
        }
    }
}

enum PendingWrite {
    Attr(ObjectId, String, DataItem),
    List(ObjectId, Vec<DataItem>),
    Dict(ObjectId, DataItem, DataItem),
    Schema(ObjectId, String, DataItem),
}

// Decides whether `incoming` should replace `existing`.
fn resolve(
    policy: ConflictPolicy,
    existing: Option<&DataItem>,
    incoming: &DataItem,
    describe: impl FnOnce() -> String,
) -> Result<bool> {
    match existing {
        None => Ok(true),
        Some(existing) if existing == incoming => Ok(false),
        Some(existing) => match policy {
            ConflictPolicy::RaiseOnConflict => {
                let message = format!("{}: {} vs {}", describe(), existing, incoming);
                warn!(error = %message, "merge conflict");
                Err(DataBagError::FailedPrecondition(message))
            }
            ConflictPolicy::KeepOriginal => Ok(false),
            ConflictPolicy::Overwrite => Ok(true),
        },
    }
}

impl DataBagImpl {
    /// Merges every triple of `other` (and its parents) into this store.
    pub fn merge_inplace(&mut self, other: &DataBagImpl, options: MergeOptions) -> Result<()> {
        let content = other.extract_content();
        let data_policy = options.data_conflict_policy;
        let mut writes = Vec::new();

        for (attr, values) in &content.attrs {
            for (object, value) in values {
                let existing = self.lookup_attr(*object, attr).filter(|v| v.has_value());
                if resolve(data_policy, existing, value, || {
                    format!("conflicting values for {} for {}", attr, object)
                })? {
                    writes.push(PendingWrite::Attr(*object, attr.clone(), value.clone()));
                }
            }
        }

        for (list, items) in &content.lists {
            // an empty list only defines a list the receiver doesn't have yet
            if items.is_empty() {
                if self.lookup_list(*list).is_none() {
                    writes.push(PendingWrite::List(*list, Vec::new()));
                }
                continue;
            }
            let existing = self.lookup_list(*list).filter(|current| !current.is_empty());
            let replace = match (existing, data_policy) {
                (None, _) | (_, ConflictPolicy::Overwrite) => true,
                (Some(_), ConflictPolicy::KeepOriginal) => false,
                (Some(current), ConflictPolicy::RaiseOnConflict) => {
                    if current.len() != items.len() {
                        return Err(DataBagError::FailedPrecondition(format!(
                            "conflicting list sizes for {}: {} vs {}",
                            list,
                            current.len(),
                            items.len()
                        )));
                    }
                    if let Some((index, (a, b))) = current.iter().zip(items).enumerate().find(|(_, (a, b))| a != b) {
                        return Err(DataBagError::FailedPrecondition(format!(
                            "conflicting list values for {} at index {}: {} vs {}",
                            list, index, a, b
                        )));
                    }
                    false
                }
            };
            if replace {
                writes.push(PendingWrite::List(*list, items.clone()));
            }
        }

        for (dict, entries) in &content.dicts {
            for (key, value) in entries {
                let existing = self.lookup_dict_value(*dict, key).filter(|v| v.has_value());
                if resolve(data_policy, existing, value, || {
                    format!("conflicting dict values for {} key {}", dict, key)
                })? {
                    writes.push(PendingWrite::Dict(*dict, key.clone(), value.clone()));
                }
            }
        }

        for (schema, attrs) in &content.schemas {
            let policy = if schema.is_implicit_schema() {
                data_policy
            } else {
                options.schema_conflict_policy
            };
            for (name, value) in attrs {
                let existing = self.lookup_schema_attr(*schema, name).filter(|v| v.has_value());
                if resolve(policy, existing, value, || {
                    format!("conflicting values for {} for {}", name, schema)
                })? {
                    writes.push(PendingWrite::Schema(*schema, name.clone(), value.clone()));
                }
            }
        }

        let count = writes.len();
        for write in writes {
            match write {
                PendingWrite::Attr(object, attr, value) => {
                    self.set_attr(&DataItem::ObjectId(object), &attr, value)?;
                }
                PendingWrite::List(list, items) => {
                    self.lists.insert(list, items);
                }
                PendingWrite::Dict(dict, key, value) => {
                    self.set_in_dict(&DataItem::ObjectId(dict), &key, value)?;
                }
                PendingWrite::Schema(schema, name, value) => {
                    self.set_schema_attr(&DataItem::ObjectId(schema), &name, value)?;
                }
            }
        }
        debug!(writes = count, "merge complete");
        Ok(())
    }
}
