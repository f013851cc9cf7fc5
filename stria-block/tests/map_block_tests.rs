use std::sync::Arc;

use stria_block::mem::RetainedSizeTally;
use stria_block::{
    Block, DeferredBlock, Error, KeyType, MapBlock, U64Block, Utf8Block, Utf8KeyType,
    HASH_MULTIPLIER,
};

fn sample_block() -> MapBlock {
    // map0 = {a: 1, b: 2}, map1 = {c: 3, d: 4}
    let keys: Arc<dyn Block> = Arc::new(Utf8Block::from_values(vec!["a", "b", "c", "d"]));
    let values: Arc<dyn Block> = Arc::new(U64Block::from_values(vec![1, 2, 3, 4]));
    MapBlock::from_parts(
        2,
        Some(Arc::from(vec![false, false])),
        Arc::from(vec![0u32, 2, 4]),
        keys,
        values,
        Arc::new(Utf8KeyType),
    )
    .unwrap()
}

fn probe(key: &str) -> Utf8Block {
    Utf8Block::from_values(vec![key])
}

#[test]
fn construction_rejects_bad_shapes() {
    let keys: Arc<dyn Block> = Arc::new(Utf8Block::from_values(vec!["a", "b"]));
    let values: Arc<dyn Block> = Arc::new(U64Block::from_values(vec![1]));
    let err = MapBlock::from_parts(
        1,
        None,
        Arc::from(vec![0u32, 2]),
        keys,
        values,
        Arc::new(Utf8KeyType),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgumentError(_)));

    let keys: Arc<dyn Block> = Arc::new(Utf8Block::from_values(vec!["a", "b"]));
    let values: Arc<dyn Block> = Arc::new(U64Block::from_values(vec![1, 2]));
    let err = MapBlock::from_parts(
        2,
        None,
        Arc::from(vec![0u32, 2]), // needs position_count + 1 offsets
        keys,
        values,
        Arc::new(Utf8KeyType),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgumentError(_)));
}

#[test]
fn entry_ranges_and_nulls() {
    let block = sample_block();
    assert_eq!(block.position_count(), 2);
    assert_eq!(block.entry_range(0), (0, 2));
    assert_eq!(block.entry_range(1), (2, 4));
    assert!(!block.is_null(0));
    assert!(!block.is_null(1));
}

#[test]
fn lookup_resolves_global_entry_positions() {
    let block = sample_block();
    assert_eq!(block.key_index().capacity(), 4 * HASH_MULTIPLIER);
    assert!(!block.key_index().is_built());

    // "c" belongs to map1 and sits at global key position 2.
    let found = block.find_entry(1, &probe("c"), 0).unwrap();
    assert_eq!(found, Some(2));
    assert!(block.key_index().is_built());

    // map0 does not contain "c", even though the shared key column does.
    assert_eq!(block.find_entry(0, &probe("c"), 0).unwrap(), None);
    assert_eq!(block.find_entry(0, &probe("a"), 0).unwrap(), Some(0));
    assert_eq!(block.find_entry(1, &probe("zz"), 0).unwrap(), None);
}

#[test]
fn duplicate_keys_resolve_to_a_matching_entry() {
    let keys: Arc<dyn Block> = Arc::new(Utf8Block::from_values(vec!["k", "k", "x"]));
    let values: Arc<dyn Block> = Arc::new(U64Block::from_values(vec![10, 20, 30]));
    let block = MapBlock::from_parts(
        1,
        None,
        Arc::from(vec![0u32, 3]),
        keys,
        values,
        Arc::new(Utf8KeyType),
    )
    .unwrap();
    let found = block.find_entry(0, &probe("k"), 0).unwrap().unwrap();
    assert!(found == 0 || found == 1);
}

#[test]
fn structural_validation_is_deferred_to_first_lookup() {
    // Position 1 claims two entries but is flagged null: construction
    // succeeds, the first key-oriented access fails.
    let keys: Arc<dyn Block> = Arc::new(Utf8Block::from_values(vec!["a", "b", "c", "d"]));
    let values: Arc<dyn Block> = Arc::new(U64Block::from_values(vec![1, 2, 3, 4]));
    let block = MapBlock::from_parts(
        2,
        Some(Arc::from(vec![false, true])),
        Arc::from(vec![0u32, 2, 4]),
        keys,
        values,
        Arc::new(Utf8KeyType),
    )
    .unwrap();

    // Non-key-oriented reads still work on the malformed block.
    assert!(block.is_null(1));
    assert_eq!(block.position_count(), 2);

    let err = block.find_entry(0, &probe("a"), 0).unwrap_err();
    assert!(matches!(err, Error::CorruptedData(_)));
    assert!(!block.key_index().is_built());
}

#[test]
fn non_monotonic_offsets_fail_on_first_lookup() {
    let keys: Arc<dyn Block> = Arc::new(Utf8Block::from_values(vec!["a", "b"]));
    let values: Arc<dyn Block> = Arc::new(U64Block::from_values(vec![1, 2]));
    let block = MapBlock::from_parts(
        2,
        None,
        Arc::from(vec![0u32, 2, 1]),
        keys,
        values,
        Arc::new(Utf8KeyType),
    )
    .unwrap();
    let err = block.find_entry(0, &probe("a"), 0).unwrap_err();
    assert!(matches!(err, Error::CorruptedData(_)));
}

#[test]
fn region_shares_backing_and_index() {
    let block = sample_block();
    let view = block.region(1, 1).unwrap();
    assert_eq!(view.position_count(), 1);
    assert_eq!(view.entry_range(0), (2, 4));
    assert!(Arc::ptr_eq(block.key_index(), view.key_index()));

    // A lookup through the view builds the shared index; the parent
    // observes the same build.
    assert_eq!(view.find_entry(0, &probe("d"), 0).unwrap(), Some(3));
    assert!(block.key_index().is_built());

    let err = block.region(1, 2).unwrap_err();
    assert!(matches!(err, Error::InvalidArgumentError(_)));
}

#[test]
fn region_logical_size_is_computed_from_its_own_range() {
    let block = sample_block();
    let view = block.region(1, 1).unwrap();
    let expected = view.logical_size_bytes();

    // Caching the parent's figure must not leak into a fresh equal view.
    let _ = block.logical_size_bytes();
    let fresh = block.region(1, 1).unwrap();
    assert_eq!(fresh.logical_size_bytes(), expected);

    // The whole-range view agrees with the block's own figure.
    let whole = block.region(0, 2).unwrap();
    assert_eq!(whole.logical_size_bytes(), block.logical_size_bytes());
    assert!(expected < block.logical_size_bytes());
}

#[test]
fn retained_size_is_an_upper_bound_shared_by_views() {
    let block = sample_block();
    let view = block.region(1, 1).unwrap();
    // A narrow view retains the full backing storage.
    assert_eq!(view.retained_size_bytes(), block.retained_size_bytes());

    let mut tally = RetainedSizeTally::new();
    block.visit_retained_parts(&mut tally);
    assert_eq!(tally.part_count(), 6);
    assert_eq!(tally.total_bytes(), block.retained_size_bytes());
}

#[test]
fn materialize_is_identity_when_already_loaded() {
    let block = Arc::new(sample_block());
    let loaded = Arc::clone(&block).materialize().unwrap();
    assert!(Arc::ptr_eq(&block, &loaded));
}

#[test]
fn materialize_forces_a_lazy_value_column() {
    let keys: Arc<dyn Block> = Arc::new(Utf8Block::from_values(vec!["a", "b"]));
    let inner: Arc<dyn Block> = Arc::new(U64Block::from_values(vec![1, 2]));
    let values: Arc<dyn Block> = Arc::new(DeferredBlock::new(inner));
    let block = Arc::new(
        MapBlock::from_parts(
            1,
            None,
            Arc::from(vec![0u32, 2]),
            keys,
            values,
            Arc::new(Utf8KeyType),
        )
        .unwrap(),
    );
    assert!(!Block::is_materialized(block.as_ref()));

    let loaded = Arc::clone(&block).materialize().unwrap();
    assert!(!Arc::ptr_eq(&block, &loaded));
    assert!(Block::is_materialized(loaded.as_ref()));
    // The loaded block still shares the key index.
    assert!(Arc::ptr_eq(block.key_index(), loaded.key_index()));
}

#[test]
fn materialize_rejects_a_lazy_key_column() {
    let inner: Arc<dyn Block> = Arc::new(Utf8Block::from_values(vec!["a", "b"]));
    let keys: Arc<dyn Block> = Arc::new(DeferredBlock::new(inner));
    let values: Arc<dyn Block> = Arc::new(U64Block::from_values(vec![1, 2]));
    let block = Arc::new(
        MapBlock::from_parts(
            1,
            None,
            Arc::from(vec![0u32, 2]),
            keys,
            values,
            Arc::new(Utf8KeyType),
        )
        .unwrap(),
    );

    let err = Arc::clone(&block).materialize().unwrap_err();
    assert!(matches!(err, Error::Internal(_)));

    // Key lookup over unstable key bytes is refused for the same reason.
    let err = block.find_entry(0, &probe("a"), 0).unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
}

#[test]
fn empty_block_is_valid() {
    let keys: Arc<dyn Block> = Arc::new(Utf8Block::from_values(Vec::new()));
    let values: Arc<dyn Block> = Arc::new(U64Block::from_values(Vec::new()));
    let block = MapBlock::from_parts(
        0,
        None,
        Arc::from(vec![0u32]),
        keys,
        values,
        Arc::new(Utf8KeyType),
    )
    .unwrap();
    assert_eq!(block.position_count(), 0);
    assert_eq!(block.key_index().capacity(), 0);
}

struct ReversedUtf8KeyType;

impl KeyType for ReversedUtf8KeyType {
    fn equals(
        &self,
        key_block: &dyn Block,
        key_pos: usize,
        other: &dyn Block,
        other_pos: usize,
    ) -> bool {
        Utf8KeyType.equals(key_block, key_pos, other, other_pos)
    }

    fn hash(&self, key_block: &dyn Block, key_pos: usize) -> u64 {
        Utf8KeyType.hash(key_block, key_pos).rotate_left(17)
    }

    fn hash_across(&self, other: &dyn Block, other_pos: usize) -> u64 {
        Utf8KeyType.hash_across(other, other_pos).rotate_left(17)
    }
}

#[test]
fn key_type_is_an_injected_capability() {
    let keys: Arc<dyn Block> = Arc::new(Utf8Block::from_values(vec!["a", "b"]));
    let values: Arc<dyn Block> = Arc::new(U64Block::from_values(vec![1, 2]));
    let block = MapBlock::from_parts(
        1,
        None,
        Arc::from(vec![0u32, 2]),
        keys,
        values,
        Arc::new(ReversedUtf8KeyType),
    )
    .unwrap();
    assert_eq!(block.find_entry(0, &probe("b"), 0).unwrap(), Some(1));
}
