//! The shared DataBag handle.
//!
//! A [`DataBag`] wraps a [`DataBagImpl`] behind a lock together with its
//! fallback bags and a one-way mutable flag. DataSlices hold bags through
//! `Arc`, so every holder sees writes made through any of them. Reads take a
//! cheap snapshot of the store (an `Arc` clone) and of every fallback, so no
//! lock is held while a traversal runs; writes go through `Arc::make_mut`,
//! which copies the top layer only if a reader still holds the old snapshot.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::bag_impl::{DataBagContent, DataBagImpl, DataBagStatistics, FallbackSpan, MergeOptions};
use crate::error::{DataBagError, Result, precondition};
use crate::slice_impl::DataSliceImpl;

pub type DataBagPtr = Arc<DataBag>;

#[derive(Debug)]
pub struct DataBag {
    inner: RwLock<Arc<DataBagImpl>>,
    fallbacks: Vec<DataBagPtr>,
    mutable: AtomicBool,
}

impl DataBag {
    fn build(store: DataBagImpl, fallbacks: Vec<DataBagPtr>, mutable: bool) -> DataBagPtr {
        Arc::new(DataBag {
            inner: RwLock::new(Arc::new(store)),
            fallbacks,
            mutable: AtomicBool::new(mutable),
        })
    }

    /// A new, empty, mutable bag.
    pub fn empty() -> DataBagPtr {
        Self::build(DataBagImpl::new(), Vec::new(), true)
    }

    pub fn from_impl(store: DataBagImpl) -> DataBagPtr {
        Self::build(store, Vec::new(), true)
    }

    /// An empty bag that only reads through `fallbacks`, in order.
    pub fn immutable_empty_with_fallbacks(fallbacks: Vec<DataBagPtr>) -> DataBagPtr {
        Self::build(DataBagImpl::new(), fallbacks, false)
    }

    /// A mutable bag on top of `fallbacks`; writes land in the new bag.
    pub fn empty_with_fallbacks(fallbacks: Vec<DataBagPtr>) -> DataBagPtr {
        Self::build(DataBagImpl::new(), fallbacks, true)
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable.load(Ordering::Acquire)
    }

    pub fn has_fallbacks(&self) -> bool {
        !self.fallbacks.is_empty()
    }

    pub fn fallbacks(&self) -> &[DataBagPtr] {
        &self.fallbacks
    }

    /// Freezes the bag. There is no way back.
    pub fn unsafe_make_immutable(&self) {
        if self.mutable.swap(false, Ordering::AcqRel) {
            debug!("bag frozen");
        }
    }

    pub fn freeze(&self) {
        self.unsafe_make_immutable()
    }

    /// The current state of the main store.
    pub fn snapshot(&self) -> Result<Arc<DataBagImpl>> {
        Ok(Arc::clone(&*self.inner.read()?))
    }

    // Stores of all fallbacks, depth first, each followed by its own fallbacks.
    fn fallback_snapshots(&self, out: &mut Vec<Arc<DataBagImpl>>) -> Result<()> {
        for fallback in &self.fallbacks {
            out.push(fallback.snapshot()?);
            fallback.fallback_snapshots(out)?;
        }
        Ok(())
    }

    /// Runs `f` against the main store and the flattened fallback chain.
    pub fn read<R>(&self, f: impl FnOnce(&DataBagImpl, FallbackSpan) -> Result<R>) -> Result<R> {
        let main = self.snapshot()?;
        let mut fallbacks = Vec::new();
        self.fallback_snapshots(&mut fallbacks)?;
        let span: Vec<&DataBagImpl> = fallbacks.iter().map(Arc::as_ref).collect();
        f(&main, &span)
    }

    /// Runs `f` against the main store for writing. Fails on a frozen bag.
    pub fn write<R>(&self, f: impl FnOnce(&mut DataBagImpl) -> Result<R>) -> Result<R> {
        if !self.is_mutable() {
            return Err(DataBagError::Immutable);
        }
        let mut guard = self.inner.write()?;
        f(Arc::make_mut(&mut guard))
    }

    /// Like [`DataBag::write`], for writes that modify `lists` in place. Lists
    /// this bag only reads through its fallbacks are copied into the main
    /// store first, so the write starts from what a read would return.
    pub fn write_lists<R>(&self, lists: &DataSliceImpl, f: impl FnOnce(&mut DataBagImpl) -> Result<R>) -> Result<R> {
        if !self.has_fallbacks() {
            return self.write(f);
        }
        let mut fallbacks = Vec::new();
        self.fallback_snapshots(&mut fallbacks)?;
        let span: Vec<&DataBagImpl> = fallbacks.iter().map(Arc::as_ref).collect();
        self.write(|store| {
            store.seed_lists(lists, &span)?;
            f(store)
        })
    }

    /// A new bag with the same content, in O(1). Both bags continue on their
    /// own layer over the shared, now frozen, state. Bags with fallbacks
    /// cannot be forked; merge them first.
    pub fn fork(&self, immutable: bool) -> Result<DataBagPtr> {
        if self.has_fallbacks() {
            return precondition("forking with fallbacks is not supported");
        }
        let shared = {
            let mut guard = self.inner.write()?;
            let shared = Arc::clone(&*guard);
            if self.is_mutable() {
                *guard = Arc::new(DataBagImpl::partially_persistent_fork(&shared)?);
            }
            shared
        };
        let forked = DataBagImpl::partially_persistent_fork(&shared)?;
        info!(depth = forked.layers().count(), immutable, "bag forked");
        Ok(Self::build(forked, Vec::new(), !immutable))
    }

    /// A single store holding the main store merged with every fallback.
    pub fn flattened_impl(&self) -> Result<DataBagImpl> {
        self.read(|main, fallbacks| main.flatten_with_fallbacks(fallbacks))
    }

    /// A new mutable bag without fallbacks and with the same visible content.
    pub fn merge_fallbacks(&self) -> Result<DataBagPtr> {
        Ok(Self::from_impl(self.flattened_impl()?))
    }

    /// Copies every triple of `other`, including its fallbacks, into this bag.
    pub fn merge_inplace(&self, other: &DataBag, options: MergeOptions) -> Result<()> {
        let flat = other.flattened_impl()?;
        self.write(|store| store.merge_inplace(&flat, options))
    }

    pub fn content(&self) -> Result<DataBagContent> {
        Ok(self.flattened_impl()?.extract_content())
    }

    pub fn statistics(&self) -> Result<DataBagStatistics> {
        Ok(self.flattened_impl()?.get_statistics())
    }

    pub fn fingerprint(&self) -> Result<String> {
        Ok(self.content()?.fingerprint())
    }
}

/// The bag to use when combining values that carry `bags`. Missing and
/// repeated bags are ignored; several distinct bags are combined into an
/// immutable bag that reads through all of them, in order.
pub fn common_bag(bags: &[Option<DataBagPtr>]) -> Option<DataBagPtr> {
    let mut distinct: Vec<DataBagPtr> = Vec::new();
    for bag in bags.iter().flatten() {
        if !distinct.iter().any(|seen| Arc::ptr_eq(seen, bag)) {
            distinct.push(Arc::clone(bag));
        }
    }
    match distinct.len() {
        0 => None,
        1 => distinct.pop(),
        _ => Some(DataBag::immutable_empty_with_fallbacks(distinct)),
    }
}
