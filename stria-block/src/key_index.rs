//! Lazily built, shared hash index over a flat key column.
//!
//! The index is an open-addressing table mapping key hashes to global key
//! positions. It is fully re-derivable from `(key column, offsets)`, so one
//! instance is shared by every region view over the same backing columns and
//! is built at most once, on first key-oriented access. A majority of
//! decoded map batches are never probed by key; deferring the O(n) build
//! (and the full-range structural validation that rides along with it)
//! avoids that wasted work.

use std::sync::{Mutex, OnceLock};

use stria_result::{Error, Result};

use crate::block::Block;
use crate::key_type::KeyType;
use crate::mem::{instance_size_of, SIZE_OF_U32};

/// Oversizing factor of the table relative to the key-column length.
///
/// Load factor stays at or below one half, which keeps linear-probe chains
/// short and guarantees the probe loop always reaches an empty slot.
pub const HASH_MULTIPLIER: usize = 2;

/// Sentinel marking an unoccupied slot.
pub const EMPTY_SLOT: u32 = u32::MAX;

/// Open-addressing index from key hash to candidate global key positions.
///
/// The slot allocation size is fixed at construction from the backing key
/// column's length; the table payload is installed exactly once. Once built,
/// the contents are immutable and independent of which region view triggered
/// the build: the table indexes the entire backing key column, never a
/// view's sub-range.
#[derive(Debug)]
pub struct KeyIndex {
    capacity: usize,
    table: OnceLock<Box<[u32]>>,
    build_lock: Mutex<()>,
}

impl KeyIndex {
    /// Create an unbuilt index for a key column of `key_count` entries.
    pub fn new(key_count: usize) -> Self {
        Self {
            capacity: key_count * HASH_MULTIPLIER,
            table: OnceLock::new(),
            build_lock: Mutex::new(()),
        }
    }

    /// Slot count of the (eventual) table.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-blocking read of the current state. `None` until built.
    pub fn get(&self) -> Option<&[u32]> {
        self.table.get().map(|t| t.as_ref())
    }

    pub fn is_built(&self) -> bool {
        self.table.get().is_some()
    }

    /// Retained bytes: the slot allocation is counted from construction,
    /// before the table is actually built. The memory framework polls
    /// retained size once per operator, so growing it mid-processing would
    /// go unobserved; the fixed upper bound is reported instead.
    pub fn retained_size_bytes(&self) -> u64 {
        self.capacity as u64 * SIZE_OF_U32 + instance_size_of(self)
    }

    /// Build and install the table if it is not built yet.
    ///
    /// The build is idempotent: it is a pure function of `(offsets, nulls,
    /// key column)`, so racing builders would produce byte-identical tables.
    /// The mutex only avoids duplicated work; readers of an installed table
    /// never take it.
    ///
    /// Structural validation happens here, not at block construction:
    /// non-monotonic offsets or a null position with entries fail the build
    /// with [`Error::CorruptedData`] and leave the index unbuilt.
    pub fn ensure_built(
        &self,
        offsets: &[u32],
        nulls: Option<&[bool]>,
        keys: &dyn Block,
        key_type: &dyn KeyType,
    ) -> Result<()> {
        if self.table.get().is_some() {
            return Ok(());
        }

        let _guard = self
            .build_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.table.get().is_some() {
            return Ok(());
        }

        let table = self.build(offsets, nulls, keys, key_type)?;
        // Cannot race: installation happens under the build lock.
        let _ = self.table.set(table);
        Ok(())
    }

    fn build(
        &self,
        offsets: &[u32],
        nulls: Option<&[bool]>,
        keys: &dyn Block,
        key_type: &dyn KeyType,
    ) -> Result<Box<[u32]>> {
        let mut table = vec![EMPTY_SLOT; self.capacity].into_boxed_slice();
        let position_count = offsets.len().saturating_sub(1);
        let key_count = keys.len();

        let mut entries = 0u64;
        for position in 0..position_count {
            let start = offsets[position];
            let end = offsets[position + 1];
            if end < start {
                return Err(Error::CorruptedData(format!(
                    "offsets are not monotonically ascending: offsets[{}]={}, offsets[{}]={}",
                    position,
                    start,
                    position + 1,
                    end
                )));
            }
            if end as usize > key_count {
                return Err(Error::CorruptedData(format!(
                    "offsets[{}]={} exceeds key column length {}",
                    position + 1,
                    end,
                    key_count
                )));
            }
            if nulls.is_some_and(|n| position < n.len() && n[position]) && end != start {
                return Err(Error::CorruptedData(
                    "a null map must have zero entries".to_string(),
                ));
            }

            for entry in start..end {
                let hash = key_type.hash(keys, entry as usize);
                let mut slot = (hash % self.capacity as u64) as usize;
                while table[slot] != EMPTY_SLOT {
                    slot += 1;
                    if slot == self.capacity {
                        slot = 0;
                    }
                }
                table[slot] = entry;
                entries += 1;
            }
        }

        tracing::debug!(
            capacity = self.capacity,
            entries,
            "built map key hash index"
        );
        Ok(table)
    }

    /// Probe candidates for `hash`, first match in probe order wins.
    ///
    /// Walks the chain from `hash % capacity` with wraparound, yielding each
    /// occupied slot's key position to `accept` until it returns true (that
    /// position is returned) or an empty slot terminates the chain.
    pub fn probe<F>(&self, hash: u64, mut accept: F) -> Option<usize>
    where
        F: FnMut(usize) -> bool,
    {
        let table = self.table.get()?;
        if self.capacity == 0 {
            return None;
        }
        let mut slot = (hash % self.capacity as u64) as usize;
        loop {
            let candidate = table[slot];
            if candidate == EMPTY_SLOT {
                return None;
            }
            let position = candidate as usize;
            if accept(position) {
                return Some(position);
            }
            slot += 1;
            if slot == self.capacity {
                slot = 0;
            }
        }
    }
}
