//! Key-type capabilities: equality and hashing over block positions.
//!
//! The map layer never hard-codes a concrete key type. Equality and hashing
//! are supplied per map column as an opaque capability object, so the same
//! block and index code serves every key type the surrounding type system
//! can produce.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::block::Block;
use crate::scalar::{U64Block, Utf8Block};

/// Equality and hashing over key positions.
///
/// `hash` covers positions of the map's own key column; `hash_across` covers
/// positions of some other column holding a probe key. The two must agree on
/// equal values, or index lookups will miss.
///
/// Implementations downcast through [`Block::as_any`] and panic when handed
/// a block of the wrong concrete type: that is an upstream wiring bug, not a
/// recoverable condition.
pub trait KeyType: Send + Sync {
    /// Whether the key at `key_pos` equals the value at `other_pos` of
    /// `other`.
    fn equals(
        &self,
        key_block: &dyn Block,
        key_pos: usize,
        other: &dyn Block,
        other_pos: usize,
    ) -> bool;

    /// Hash of the key at `key_pos`.
    fn hash(&self, key_block: &dyn Block, key_pos: usize) -> u64;

    /// Hash of the probe value at `other_pos` of `other`.
    fn hash_across(&self, other: &dyn Block, other_pos: usize) -> u64;
}

fn as_u64_block<'a>(block: &'a dyn Block) -> &'a U64Block {
    match block.as_any().downcast_ref::<U64Block>() {
        Some(b) => b,
        None => panic!("u64 key type applied to a non-u64 block"),
    }
}

fn as_utf8_block<'a>(block: &'a dyn Block) -> &'a Utf8Block {
    match block.as_any().downcast_ref::<Utf8Block>() {
        Some(b) => b,
        None => panic!("utf8 key type applied to a non-utf8 block"),
    }
}

#[inline]
fn fxhash_u64(v: u64) -> u64 {
    let mut h = FxHasher::default();
    h.write_u64(v);
    h.finish()
}

#[inline]
fn fxhash_bytes(bytes: &[u8]) -> u64 {
    let mut h = FxHasher::default();
    h.write(bytes);
    h.finish()
}

/// Key capability for u64 keys over [`U64Block`] columns.
#[derive(Debug, Default, Clone, Copy)]
pub struct U64KeyType;

impl KeyType for U64KeyType {
    fn equals(
        &self,
        key_block: &dyn Block,
        key_pos: usize,
        other: &dyn Block,
        other_pos: usize,
    ) -> bool {
        as_u64_block(key_block).value(key_pos) == as_u64_block(other).value(other_pos)
    }

    fn hash(&self, key_block: &dyn Block, key_pos: usize) -> u64 {
        fxhash_u64(as_u64_block(key_block).value(key_pos))
    }

    fn hash_across(&self, other: &dyn Block, other_pos: usize) -> u64 {
        fxhash_u64(as_u64_block(other).value(other_pos))
    }
}

/// Key capability for UTF-8 string keys over [`Utf8Block`] columns.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8KeyType;

impl KeyType for Utf8KeyType {
    fn equals(
        &self,
        key_block: &dyn Block,
        key_pos: usize,
        other: &dyn Block,
        other_pos: usize,
    ) -> bool {
        as_utf8_block(key_block).value(key_pos) == as_utf8_block(other).value(other_pos)
    }

    fn hash(&self, key_block: &dyn Block, key_pos: usize) -> u64 {
        fxhash_bytes(as_utf8_block(key_block).value(key_pos).as_bytes())
    }

    fn hash_across(&self, other: &dyn Block, other_pos: usize) -> u64 {
        fxhash_bytes(as_utf8_block(other).value(other_pos).as_bytes())
    }
}
