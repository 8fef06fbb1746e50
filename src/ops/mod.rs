//! Whole-graph operations built on the [`Traverser`](crate::traverser::Traverser).
mod deep_clone;
mod extract;
mod shallow_clone;

pub use deep_clone::DeepCloneOp;
pub use extract::ExtractOp;
pub use shallow_clone::ShallowCloneOp;
