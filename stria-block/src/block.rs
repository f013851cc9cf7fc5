//! The columnar block capability.
//!
//! Key and value columns reach the map layer through this trait rather than
//! as concrete types, so the map block never depends on how its children are
//! physically stored. Implementations must be immutable after construction;
//! every method here is a read.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use stria_result::Result;

/// A substructure reported to [`RetainedPartVisitor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetainedPart {
    /// The flat key column of a map block.
    Keys,
    /// The flat value column of a map block.
    Values,
    /// The per-position offsets array.
    Offsets,
    /// The per-position null flags array.
    Nulls,
    /// The key hash index allocation.
    HashIndex,
    /// A leaf data buffer.
    Buffer,
    /// Fixed per-instance overhead of the block itself.
    Instance,
}

/// Receives one callback per owned or shared substructure of a block.
///
/// This is a structural traversal: the visitor sees each part and its
/// retained size, and the external memory-accounting framework decides how
/// to aggregate (shared parts may be visited from many blocks).
pub trait RetainedPartVisitor {
    fn visit(&mut self, part: RetainedPart, bytes: u64);
}

impl<F: FnMut(RetainedPart, u64)> RetainedPartVisitor for F {
    fn visit(&mut self, part: RetainedPart, bytes: u64) {
        self(part, bytes)
    }
}

/// A read-only columnar block of values.
///
/// `logical_size_bytes` covers the values visible through this block only;
/// `retained_size_bytes` covers everything the block keeps reachable,
/// including storage shared with other blocks. The two are intentionally
/// independent figures.
pub trait Block: Debug + Send + Sync {
    /// Number of positions in this block.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_null(&self, position: usize) -> bool;

    /// Bytes attributable to the values visible through this block.
    fn logical_size_bytes(&self) -> u64;

    /// Bytes attributable to the sub-range `[offset, offset + len)`.
    fn region_size_bytes(&self, offset: usize, len: usize) -> u64;

    /// Total memory footprint of everything this block keeps reachable.
    fn retained_size_bytes(&self) -> u64;

    /// Whether the backing storage is fully decoded.
    ///
    /// Lazily loaded blocks answer `false` until [`Block::materialize`] has
    /// produced a loaded replacement.
    fn is_materialized(&self) -> bool;

    /// Force any lazily loaded backing storage to fully decode.
    ///
    /// Returns the receiver unchanged (same allocation, observable through
    /// `Arc::ptr_eq`) when the block is already materialized, so callers can
    /// cheaply detect that nothing changed.
    fn materialize(self: Arc<Self>) -> Result<Arc<dyn Block>>;

    /// Report each owned or shared substructure and its retained size.
    fn visit_retained_parts(&self, visitor: &mut dyn RetainedPartVisitor);

    /// Downcast support for typed consumers such as key-type capabilities.
    fn as_any(&self) -> &dyn Any;
}
