//! 128-bit identities for entities, lists, dicts and schemas.
//!
//! An [`ObjectId`] is an allocation word plus an offset. The allocation word
//! packs the allocation capacity (as a power of two), the kind flags and the
//! allocation base:
//!
//! ```text
//! bits  0..6   log2(capacity)
//! bit   6      list
//! bit   7      dict
//! bit   8      schema
//! bit   9      implicit schema (always together with bit 8)
//! bit  10      nofollow schema (always together with bit 8)
//! bit  11      uuid (content derived)
//! bits 12..64  allocation base
//! ```
//!
//! Objects from the same allocation share the allocation word and occupy
//! offsets `[0, n)`.
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

// the process seed only needs to be computed once
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::data_item::DataItem;
use crate::error::{DataBagError, Result, invalid};

const CAPACITY_MASK: u64 = (1 << 6) - 1;
const LIST_FLAG: u64 = 1 << 6;
const DICT_FLAG: u64 = 1 << 7;
const SCHEMA_FLAG: u64 = 1 << 8;
const IMPLICIT_SCHEMA_FLAG: u64 = 1 << 9;
const NOFOLLOW_FLAG: u64 = 1 << 10;
const UUID_FLAG: u64 = 1 << 11;
const FLAGS_MASK: u64 = LIST_FLAG | DICT_FLAG | SCHEMA_FLAG | IMPLICIT_SCHEMA_FLAG | NOFOLLOW_FLAG | UUID_FLAG;
const BASE_SHIFT: u32 = 12;
const BASE_MASK: u64 = u64::MAX << BASE_SHIFT;

lazy_static! {
    // Mixed into every allocation base so two processes hand out different ids.
    static ref PROCESS_SEED: u64 = {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&std::process::id().to_le_bytes());
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        hasher.update(&nanos.to_le_bytes());
        let digest = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(word)
    };
}

static ALLOCATION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// The kind of objects an allocation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Entity,
    List,
    Dict,
    ExplicitSchema,
    ImplicitSchema,
}

impl IdKind {
    fn flags(self) -> u64 {
        match self {
            IdKind::Entity => 0,
            IdKind::List => LIST_FLAG,
            IdKind::Dict => DICT_FLAG,
            IdKind::ExplicitSchema => SCHEMA_FLAG,
            IdKind::ImplicitSchema => SCHEMA_FLAG | IMPLICIT_SCHEMA_FLAG,
        }
    }
}

// ------------- AllocationId -------------
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocationId {
    word: u64,
}

fn capacity_log2(size: usize) -> u64 {
    let size = size.max(1) as u64;
    (u64::BITS - (size - 1).leading_zeros()) as u64
}

fn next_base() -> u64 {
    let counter = ALLOCATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    // the counter keeps bases unique within the process, the seed across processes
    PROCESS_SEED.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(counter) << BASE_SHIFT
}

impl AllocationId {
    fn new(kind: IdKind, size: usize) -> Self {
        Self {
            word: next_base() | kind.flags() | capacity_log2(size),
        }
    }
    pub fn capacity(&self) -> usize {
        1usize << (self.word & CAPACITY_MASK)
    }
    pub fn object_by_offset(&self, offset: u64) -> ObjectId {
        debug_assert!((offset as usize) < self.capacity());
        ObjectId {
            alloc: self.word,
            offset,
        }
    }
    pub fn contains(&self, object: ObjectId) -> bool {
        object.alloc == self.word
    }
    pub fn is_lists_alloc(&self) -> bool {
        self.word & LIST_FLAG != 0
    }
    pub fn is_dicts_alloc(&self) -> bool {
        self.word & DICT_FLAG != 0
    }
    pub fn is_schemas_alloc(&self) -> bool {
        self.word & SCHEMA_FLAG != 0
    }
    pub fn is_explicit_schemas_alloc(&self) -> bool {
        self.is_schemas_alloc() && self.word & IMPLICIT_SCHEMA_FLAG == 0
    }
    pub fn is_implicit_schemas_alloc(&self) -> bool {
        self.word & IMPLICIT_SCHEMA_FLAG != 0
    }
    pub fn is_uuid(&self) -> bool {
        self.word & UUID_FLAG != 0
    }
    /// A fresh allocation with the same kind and capacity. Uuid allocations
    /// become regular ones, nofollow schemas become followable again.
    pub fn new_like(&self) -> AllocationId {
        let flags = self.word & FLAGS_MASK & !(UUID_FLAG | NOFOLLOW_FLAG);
        AllocationId {
            word: next_base() | flags | (self.word & CAPACITY_MASK),
        }
    }
}

impl From<ObjectId> for AllocationId {
    fn from(object: ObjectId) -> Self {
        AllocationId { word: object.alloc }
    }
}

impl fmt::Debug for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Alloc:{:016x}", self.word)
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.word)
    }
}

// ------------- ObjectId -------------
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    alloc: u64,
    offset: u64,
}

impl ObjectId {
    pub fn offset(&self) -> u64 {
        self.offset
    }
    pub fn allocation(&self) -> AllocationId {
        AllocationId::from(*self)
    }
    pub fn is_list(&self) -> bool {
        self.alloc & LIST_FLAG != 0
    }
    pub fn is_dict(&self) -> bool {
        self.alloc & DICT_FLAG != 0
    }
    pub fn is_schema(&self) -> bool {
        self.alloc & SCHEMA_FLAG != 0
    }
    pub fn is_implicit_schema(&self) -> bool {
        self.alloc & IMPLICIT_SCHEMA_FLAG != 0
    }
    pub fn is_explicit_schema(&self) -> bool {
        self.is_schema() && !self.is_implicit_schema()
    }
    pub fn is_nofollow_schema(&self) -> bool {
        self.alloc & NOFOLLOW_FLAG != 0
    }
    pub fn is_uuid(&self) -> bool {
        self.alloc & UUID_FLAG != 0
    }
    pub fn is_entity(&self) -> bool {
        self.alloc & (LIST_FLAG | DICT_FLAG | SCHEMA_FLAG) == 0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "${:016x}:{:x}", self.alloc, self.offset)
    }
}

impl FromStr for ObjectId {
    type Err = DataBagError;
    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix('$')
            .ok_or_else(|| DataBagError::InvalidArgument(format!("invalid object id: {}", s)))?;
        let (alloc, offset) = body
            .split_once(':')
            .ok_or_else(|| DataBagError::InvalidArgument(format!("invalid object id: {}", s)))?;
        let parse = |part: &str| {
            u64::from_str_radix(part, 16)
                .map_err(|e| DataBagError::InvalidArgument(format!("invalid object id {}: {}", s, e)))
        };
        Ok(ObjectId {
            alloc: parse(alloc)?,
            offset: parse(offset)?,
        })
    }
}

// ------------- Allocation -------------
pub fn allocate(size: usize) -> AllocationId {
    AllocationId::new(IdKind::Entity, size)
}

pub fn allocate_lists(size: usize) -> AllocationId {
    AllocationId::new(IdKind::List, size)
}

pub fn allocate_dicts(size: usize) -> AllocationId {
    AllocationId::new(IdKind::Dict, size)
}

pub fn allocate_explicit_schemas(size: usize) -> AllocationId {
    AllocationId::new(IdKind::ExplicitSchema, size)
}

pub fn allocate_single_object() -> ObjectId {
    allocate(1).object_by_offset(0)
}

pub fn allocate_single_list() -> ObjectId {
    allocate_lists(1).object_by_offset(0)
}

pub fn allocate_single_dict() -> ObjectId {
    allocate_dicts(1).object_by_offset(0)
}

pub fn allocate_explicit_schema() -> ObjectId {
    allocate_explicit_schemas(1).object_by_offset(0)
}

// ------------- Uuid -------------
fn uuid_from_digest(kind: IdKind, digest: blake3::Hash) -> ObjectId {
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest.as_bytes()[..8]);
    let base = u64::from_le_bytes(word) & BASE_MASK;
    ObjectId {
        alloc: base | kind.flags() | UUID_FLAG,
        offset: 0,
    }
}

/// Deterministic id for `seed` and the named field values. Field order does
/// not matter.
pub fn create_uuid_from_fields(kind: IdKind, seed: &str, names: &[&str], values: &[DataItem]) -> ObjectId {
    debug_assert_eq!(names.len(), values.len());
    let mut fields: Vec<(&str, &DataItem)> = names.iter().copied().zip(values.iter()).collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"uuid:");
    hasher.update(&(seed.len() as u64).to_le_bytes());
    hasher.update(seed.as_bytes());
    for (name, value) in fields {
        hasher.update(&(name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        value.fingerprint_into(&mut hasher);
    }
    uuid_from_digest(kind, hasher.finalize())
}

/// Deterministic id derived from another object, e.g. the implicit schema of
/// an object.
pub fn create_uuid_with_main_object(kind: IdKind, main: ObjectId, salt: &str) -> ObjectId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"main:");
    hasher.update(&main.alloc.to_le_bytes());
    hasher.update(&main.offset.to_le_bytes());
    hasher.update(salt.as_bytes());
    uuid_from_digest(kind, hasher.finalize())
}

pub fn create_implicit_schema(object: ObjectId) -> ObjectId {
    create_uuid_with_main_object(IdKind::ImplicitSchema, object, "__implicit_schema__")
}

// ------------- Nofollow -------------
pub fn nofollow_schema(schema: ObjectId) -> Result<ObjectId> {
    if !schema.is_schema() {
        return invalid(format!("nofollow expects a schema, got {}", schema));
    }
    if schema.is_nofollow_schema() {
        return invalid(format!("schema {} is already nofollow", schema));
    }
    Ok(ObjectId {
        alloc: schema.alloc | NOFOLLOW_FLAG,
        offset: schema.offset,
    })
}

pub fn nofollow_target(schema: ObjectId) -> Result<ObjectId> {
    if !schema.is_nofollow_schema() {
        return invalid(format!("schema {} is not a nofollow schema", schema));
    }
    Ok(ObjectId {
        alloc: schema.alloc & !NOFOLLOW_FLAG,
        offset: schema.offset,
    })
}
