//! The columnar map block.
//!
//! A `MapBlock` is an immutable logical sequence of map values over shared
//! flat storage: all keys of all maps in one column, all values in another,
//! and a monotonic offsets array assigning each position the entry range
//! `[offsets[i], offsets[i + 1])`. Region views share every backing array
//! and the key index by reference; nothing is copied and nothing is mutated
//! after construction except the lazily cached logical size and the lazily
//! built index payload.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use stria_result::{Error, Result};

use crate::block::{Block, RetainedPart, RetainedPartVisitor};
use crate::key_index::{KeyIndex, HASH_MULTIPLIER};
use crate::key_type::KeyType;
use crate::mem::{instance_size_of, SIZE_OF_U32, SIZE_OF_U8};

const LOGICAL_SIZE_UNSET: u64 = u64::MAX;

/// An immutable view of `position_count` map values starting at
/// `start_offset` into shared backing storage.
pub struct MapBlock {
    start_offset: usize,
    position_count: usize,
    nulls: Option<Arc<[bool]>>,
    offsets: Arc<[u32]>,
    keys: Arc<dyn Block>,
    values: Arc<dyn Block>,
    key_type: Arc<dyn KeyType>,
    key_index: Arc<KeyIndex>,
    logical_size: AtomicU64,
    retained_size: u64,
}

impl MapBlock {
    /// Construct a map block over parallel key/value columns.
    ///
    /// Only O(1) shape checks run here. Per-position offset monotonicity and
    /// the null/zero-entries rule are validated lazily, when the key index
    /// is first built; a block holding structurally broken offsets still
    /// answers count and null queries.
    pub fn from_parts(
        position_count: usize,
        nulls: Option<Arc<[bool]>>,
        offsets: Arc<[u32]>,
        keys: Arc<dyn Block>,
        values: Arc<dyn Block>,
        key_type: Arc<dyn KeyType>,
    ) -> Result<MapBlock> {
        let key_index = Arc::new(KeyIndex::new(keys.len()));
        Self::with_backing(
            0,
            position_count,
            nulls,
            offsets,
            keys,
            values,
            key_type,
            key_index,
        )
    }

    /// Internal constructor shared by `from_parts`, `region`, and
    /// `materialize`: callers hand in the (possibly shared) index.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn with_backing(
        start_offset: usize,
        position_count: usize,
        nulls: Option<Arc<[bool]>>,
        offsets: Arc<[u32]>,
        keys: Arc<dyn Block>,
        values: Arc<dyn Block>,
        key_type: Arc<dyn KeyType>,
        key_index: Arc<KeyIndex>,
    ) -> Result<MapBlock> {
        if let Some(n) = nulls.as_deref() {
            if n.len() < start_offset + position_count {
                return Err(Error::InvalidArgumentError(
                    "null flags length is less than position count".to_string(),
                ));
            }
        }
        if offsets.len() < start_offset + position_count + 1 {
            return Err(Error::InvalidArgumentError(
                "offsets length is less than position count".to_string(),
            ));
        }
        if keys.len() != values.len() {
            return Err(Error::InvalidArgumentError(format!(
                "key and value columns have different lengths: {} {}",
                keys.len(),
                values.len()
            )));
        }
        if key_index.capacity() < keys.len() * HASH_MULTIPLIER {
            return Err(Error::InvalidArgumentError(format!(
                "key column length {} does not match hash index capacity {}",
                keys.len(),
                key_index.capacity()
            )));
        }

        // The index allocation is counted whether or not it is built yet;
        // the accounting framework polls retained size once per operator.
        let retained_size = std::mem::size_of::<MapBlock>() as u64
            + keys.retained_size_bytes()
            + values.retained_size_bytes()
            + offsets.len() as u64 * SIZE_OF_U32
            + nulls.as_deref().map_or(0, |n| n.len() as u64)
            + key_index.retained_size_bytes();

        Ok(MapBlock {
            start_offset,
            position_count,
            nulls,
            offsets,
            keys,
            values,
            key_type,
            key_index,
            logical_size: AtomicU64::new(LOGICAL_SIZE_UNSET),
            retained_size,
        })
    }

    /// Zero-copy sub-range view sharing all backing storage and the index.
    pub fn region(&self, offset: usize, length: usize) -> Result<MapBlock> {
        if offset + length > self.position_count {
            return Err(Error::InvalidArgumentError(format!(
                "region [{}, {}) is out of range for {} positions",
                offset,
                offset + length,
                self.position_count
            )));
        }
        Self::with_backing(
            self.start_offset + offset,
            length,
            self.nulls.clone(),
            Arc::clone(&self.offsets),
            Arc::clone(&self.keys),
            Arc::clone(&self.values),
            Arc::clone(&self.key_type),
            Arc::clone(&self.key_index),
        )
    }

    pub fn position_count(&self) -> usize {
        self.position_count
    }

    pub fn start_offset(&self) -> usize {
        self.start_offset
    }

    pub fn is_null(&self, position: usize) -> bool {
        debug_assert!(position < self.position_count);
        self.nulls
            .as_deref()
            .is_some_and(|n| n[self.start_offset + position])
    }

    /// Entry range `[start, end)` of the map at `position`, as global
    /// positions into the key/value columns.
    pub fn entry_range(&self, position: usize) -> (usize, usize) {
        debug_assert!(position < self.position_count);
        let i = self.start_offset + position;
        (self.offsets[i] as usize, self.offsets[i + 1] as usize)
    }

    pub fn entry_count(&self, position: usize) -> usize {
        let (start, end) = self.entry_range(position);
        end.saturating_sub(start)
    }

    pub fn keys(&self) -> &Arc<dyn Block> {
        &self.keys
    }

    pub fn values(&self) -> &Arc<dyn Block> {
        &self.values
    }

    pub fn key_type(&self) -> &Arc<dyn KeyType> {
        &self.key_type
    }

    pub fn key_index(&self) -> &Arc<KeyIndex> {
        &self.key_index
    }

    /// Find the entry of the map at `position` whose key equals the probe
    /// value at `probe_pos` of `probe`.
    ///
    /// Builds the shared index on first use. Returns the global entry
    /// position into the key/value columns; duplicate keys within one map
    /// are permitted, and the first match in probe order wins.
    pub fn find_entry(
        &self,
        position: usize,
        probe: &dyn Block,
        probe_pos: usize,
    ) -> Result<Option<usize>> {
        if position >= self.position_count {
            return Err(Error::InvalidArgumentError(format!(
                "position {} is out of range for {} positions",
                position, self.position_count
            )));
        }
        if !self.keys.is_materialized() {
            return Err(Error::Internal(
                "map key column must be materialized before key lookup".to_string(),
            ));
        }
        self.key_index.ensure_built(
            &self.offsets,
            self.nulls.as_deref(),
            self.keys.as_ref(),
            self.key_type.as_ref(),
        )?;

        let (start, end) = self.entry_range(position);
        if end <= start {
            return Ok(None);
        }
        let hash = self.key_type.hash_across(probe, probe_pos);
        Ok(self.key_index.probe(hash, |entry| {
            entry >= start
                && entry < end
                && self
                    .key_type
                    .equals(self.keys.as_ref(), entry, probe, probe_pos)
        }))
    }

    /// Force any lazily loaded backing value column to fully decode.
    ///
    /// The key column must already be materialized: key bytes have to be
    /// stable before any lookup or index build may reference them, so a lazy
    /// key column here is a wiring error, never silently forced. When the
    /// value column is already loaded the receiver itself is returned, so
    /// callers can detect "nothing changed" by identity.
    pub fn materialize(self: Arc<Self>) -> Result<Arc<MapBlock>> {
        if !self.keys.is_materialized() {
            return Err(Error::Internal(
                "map key column must be materialized before the map is loaded".to_string(),
            ));
        }
        let loaded = Arc::clone(&self.values).materialize()?;
        if Arc::as_ptr(&loaded) as *const () == Arc::as_ptr(&self.values) as *const () {
            return Ok(self);
        }
        Self::with_backing(
            self.start_offset,
            self.position_count,
            self.nulls.clone(),
            Arc::clone(&self.offsets),
            Arc::clone(&self.keys),
            loaded,
            Arc::clone(&self.key_type),
            Arc::clone(&self.key_index),
        )
        .map(Arc::new)
    }

    fn size_of_range(&self, offset: usize, length: usize) -> u64 {
        let entries_start = self.offsets[self.start_offset + offset] as usize;
        let entries_end = self.offsets[self.start_offset + offset + length] as usize;
        let entry_count = entries_end.saturating_sub(entries_start);
        self.keys.region_size_bytes(entries_start, entry_count)
            + self.values.region_size_bytes(entries_start, entry_count)
            + (SIZE_OF_U32 + SIZE_OF_U8) * length as u64
            + SIZE_OF_U32 * HASH_MULTIPLIER as u64 * entry_count as u64
            + instance_size_of(self.key_index.as_ref())
    }
}

impl fmt::Debug for MapBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapBlock")
            .field("position_count", &self.position_count)
            .finish()
    }
}

impl Block for MapBlock {
    fn len(&self) -> usize {
        self.position_count
    }

    fn is_null(&self, position: usize) -> bool {
        MapBlock::is_null(self, position)
    }

    /// Bytes attributable to the viewed range only: the entries' key and
    /// value region sizes, fixed per-position overhead, and per-entry
    /// hash-slot overhead. Computed lazily and cached; recomputation is a
    /// pure function of immutable inputs, so racing writers are harmless.
    fn logical_size_bytes(&self) -> u64 {
        let cached = self.logical_size.load(Ordering::Relaxed);
        if cached != LOGICAL_SIZE_UNSET {
            return cached;
        }
        let computed = self.size_of_range(0, self.position_count);
        self.logical_size.store(computed, Ordering::Relaxed);
        computed
    }

    fn region_size_bytes(&self, offset: usize, len: usize) -> u64 {
        self.size_of_range(offset, len)
    }

    /// Fixed at construction: the full backing columns plus offsets, null
    /// flags, and the index allocation, regardless of how narrow the view
    /// is. Backing storage may be shared by many narrow views, and an exact
    /// share-of-ownership figure is unsafe to compute without global
    /// coordination, so the deliberate upper bound is reported instead.
    fn retained_size_bytes(&self) -> u64 {
        self.retained_size
    }

    fn is_materialized(&self) -> bool {
        self.keys.is_materialized() && self.values.is_materialized()
    }

    fn materialize(self: Arc<Self>) -> Result<Arc<dyn Block>> {
        MapBlock::materialize(self).map(|b| b as Arc<dyn Block>)
    }

    fn visit_retained_parts(&self, visitor: &mut dyn RetainedPartVisitor) {
        visitor.visit(RetainedPart::Keys, self.keys.retained_size_bytes());
        visitor.visit(RetainedPart::Values, self.values.retained_size_bytes());
        visitor.visit(
            RetainedPart::Offsets,
            self.offsets.len() as u64 * SIZE_OF_U32,
        );
        visitor.visit(
            RetainedPart::Nulls,
            self.nulls.as_deref().map_or(0, |n| n.len() as u64),
        );
        visitor.visit(
            RetainedPart::HashIndex,
            self.key_index.retained_size_bytes(),
        );
        visitor.visit(RetainedPart::Instance, instance_size_of(self));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
