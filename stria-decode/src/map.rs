//! Selective map-column decoding.
//!
//! [`SelectiveMapDecoder`] resolves the physical encoding once per segment
//! and binds a strategy; [`MapDirectDecoder`] is the strategy for direct
//! encodings. Per row group, the strategy re-primes its streams; per batch,
//! it decodes only the requested positions, skipping everything between
//! them, and assembles [`MapBlock`]s over the decoded storage on demand.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use stria_block::{Block, KeyType, MapBlock};
use stria_result::{Error, Result};

use crate::column::ColumnDecoder;
use crate::encoding::{ColumnId, EncodingKind, RowGroupSources, SegmentMetadata, StreamKind};
use crate::source::BitReader;

/// Predicate evaluated against the map column itself.
///
/// Only null-oriented filters are expressible at this level; anything keyed
/// on map contents is applied downstream of decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowFilter {
    IsNull,
    NonNull,
}

impl RowFilter {
    fn accepts(self, is_null: bool) -> bool {
        match self {
            RowFilter::IsNull => is_null,
            RowFilter::NonNull => !is_null,
        }
    }
}

/// Decode-time tunables, passed per decoder the way scan options are.
#[derive(Clone, Debug)]
pub struct DecodeOptions {
    /// Rows declaring more entries than this are not decoded; the row is
    /// recorded with a deferred error and its entries are skipped, so the
    /// batch still decodes for every other row.
    pub max_entries_per_map: usize,
    pub filter: Option<RowFilter>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_entries_per_map: 1 << 24,
            filter: None,
        }
    }
}

/// One decoded batch: the requested positions and the flat storage built
/// from their entries. Dropped on the next `decode` or `prime_row_group`.
struct DecodedBatch {
    positions: Vec<usize>,
    qualifying: Vec<usize>,
    nulls: Option<Arc<[bool]>>,
    offsets: Arc<[u32]>,
    keys: Arc<dyn Block>,
    values: Arc<dyn Block>,
    errors: FxHashMap<usize, String>,
}

/// Direct-encoding decode strategy for map columns.
pub struct MapDirectDecoder {
    options: DecodeOptions,
    key_type: Arc<dyn KeyType>,
    key_decoder: Box<dyn ColumnDecoder>,
    value_decoder: Box<dyn ColumnDecoder>,
    presence: Option<BitReader>,
    lengths: Option<crate::source::ByteSource>,
    row_cursor: usize,
    primed: bool,
    batch: Option<DecodedBatch>,
}

impl fmt::Debug for MapDirectDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapDirectDecoder")
            .field("primed", &self.primed)
            .field("row_cursor", &self.row_cursor)
            .finish()
    }
}

impl MapDirectDecoder {
    pub fn new(
        key_type: Arc<dyn KeyType>,
        key_decoder: Box<dyn ColumnDecoder>,
        value_decoder: Box<dyn ColumnDecoder>,
        options: DecodeOptions,
    ) -> Self {
        Self {
            options,
            key_type,
            key_decoder,
            value_decoder,
            presence: None,
            lengths: None,
            row_cursor: 0,
            primed: false,
            batch: None,
        }
    }

    /// Per-segment reset, forwarded from the facade's bind.
    fn bind_segment(&mut self) {
        self.presence = None;
        self.lengths = None;
        self.row_cursor = 0;
        self.primed = false;
        self.batch = None;
    }

    fn prime_row_group(&mut self, sources: &RowGroupSources) -> Result<()> {
        self.presence = sources.source(StreamKind::Presence).map(BitReader::new);
        self.lengths = Some(sources.require(StreamKind::Lengths)?);
        self.key_decoder.prime(sources.require(StreamKind::KeyData)?)?;
        self.value_decoder
            .prime(sources.require(StreamKind::ValueData)?)?;
        self.row_cursor = 0;
        self.primed = true;
        self.batch = None;
        tracing::trace!("primed map row group");
        Ok(())
    }

    fn next_present(presence: &mut Option<BitReader>) -> Result<bool> {
        match presence {
            Some(bits) => bits.next_bit(),
            None => Ok(true),
        }
    }

    fn decode(&mut self, base_offset: usize, positions: &[usize], count: usize) -> Result<usize> {
        if !self.primed {
            return Err(Error::InvalidArgumentError(
                "no row group has been primed".to_string(),
            ));
        }
        if count > positions.len() {
            return Err(Error::InvalidArgumentError(
                "position count exceeds the positions buffer".to_string(),
            ));
        }
        let positions = &positions[..count];
        for pair in positions.windows(2) {
            if pair[1] <= pair[0] {
                return Err(Error::InvalidArgumentError(
                    "positions must be strictly ascending".to_string(),
                ));
            }
        }

        self.key_decoder.begin_batch();
        self.value_decoder.begin_batch();
        self.batch = None;

        let mut nulls: Vec<bool> = Vec::with_capacity(count);
        let mut offsets: Vec<u32> = Vec::with_capacity(count + 1);
        offsets.push(0);
        let mut errors: FxHashMap<usize, String> = FxHashMap::default();
        let mut entry_total: u32 = 0;

        let lengths = self
            .lengths
            .as_mut()
            .ok_or_else(|| Error::Internal("length stream missing after prime".to_string()))?;

        for &rel in positions {
            let row = base_offset + rel;
            if row < self.row_cursor {
                return Err(Error::InvalidArgumentError(format!(
                    "position {} rewinds the row cursor (next undecoded row is {})",
                    row, self.row_cursor
                )));
            }

            // Skip the rows nobody asked for; their entries are consumed
            // from the child streams without being decoded.
            let mut skip_entries = 0usize;
            for _ in self.row_cursor..row {
                if Self::next_present(&mut self.presence)? {
                    skip_entries += lengths.read_varint_u32()? as usize;
                }
            }
            if skip_entries > 0 {
                self.key_decoder.skip(skip_entries)?;
                self.value_decoder.skip(skip_entries)?;
            }

            let present = Self::next_present(&mut self.presence)?;
            if !present {
                nulls.push(true);
                offsets.push(entry_total);
            } else {
                let entry_count = lengths.read_varint_u32()? as usize;
                if entry_count > self.options.max_entries_per_map {
                    errors.insert(
                        rel,
                        format!(
                            "map declares {} entries, more than the limit of {}",
                            entry_count, self.options.max_entries_per_map
                        ),
                    );
                    self.key_decoder.skip(entry_count)?;
                    self.value_decoder.skip(entry_count)?;
                    nulls.push(false);
                    offsets.push(entry_total);
                } else {
                    if let Some(defect) = self.key_decoder.read(entry_count)? {
                        errors.entry(rel).or_insert(defect);
                    }
                    if let Some(defect) = self.value_decoder.read(entry_count)? {
                        errors.entry(rel).or_insert(defect);
                    }
                    entry_total += entry_count as u32;
                    nulls.push(false);
                    offsets.push(entry_total);
                }
            }
            self.row_cursor = row + 1;
        }

        let qualifying: Vec<usize> = match self.options.filter {
            None => positions.to_vec(),
            Some(filter) => positions
                .iter()
                .zip(nulls.iter())
                .filter(|&(_, &is_null)| filter.accepts(is_null))
                .map(|(&rel, _)| rel)
                .collect(),
        };

        if !errors.is_empty() {
            tracing::debug!(deferred = errors.len(), "recorded deferred decode errors");
        }

        let keys = self.key_decoder.batch_block()?;
        let values = self.value_decoder.batch_block()?;
        let qualifying_count = qualifying.len();
        self.batch = Some(DecodedBatch {
            positions: positions.to_vec(),
            qualifying,
            nulls: self.presence.is_some().then(|| Arc::from(nulls)),
            offsets: Arc::from(offsets),
            keys,
            values,
            errors,
        });
        Ok(qualifying_count)
    }

    fn qualifying_positions(&self) -> &[usize] {
        self.batch.as_ref().map_or(&[], |b| b.qualifying.as_slice())
    }

    fn batch(&self) -> Result<&DecodedBatch> {
        self.batch.as_ref().ok_or_else(|| {
            Error::InvalidArgumentError("no batch has been decoded".to_string())
        })
    }

    /// Map each requested position to its index in the decoded batch,
    /// raising any deferred error attached to a requested position.
    fn resolve_subset(&self, positions: &[usize], count: usize) -> Result<Vec<usize>> {
        let batch = self.batch()?;
        if count > positions.len() {
            return Err(Error::InvalidArgumentError(
                "position count exceeds the positions buffer".to_string(),
            ));
        }
        let positions = &positions[..count];
        let mut indices = Vec::with_capacity(count);
        let mut cursor = 0usize;
        for &rel in positions {
            if let Some(message) = batch.errors.get(&rel) {
                return Err(Error::CorruptedData(message.clone()));
            }
            while cursor < batch.positions.len() && batch.positions[cursor] < rel {
                cursor += 1;
            }
            if cursor == batch.positions.len() || batch.positions[cursor] != rel {
                return Err(Error::InvalidArgumentError(format!(
                    "position {rel} was not decoded in the current batch"
                )));
            }
            indices.push(cursor);
            cursor += 1;
        }
        Ok(indices)
    }

    fn assemble(&self, positions: &[usize], count: usize) -> Result<MapBlock> {
        let indices = self.resolve_subset(positions, count)?;
        let batch = self.batch()?;

        if indices.len() == batch.positions.len() {
            // The full decoded set: reuse the batch storage as-is.
            return MapBlock::from_parts(
                batch.positions.len(),
                batch.nulls.clone(),
                Arc::clone(&batch.offsets),
                Arc::clone(&batch.keys),
                Arc::clone(&batch.values),
                Arc::clone(&self.key_type),
            );
        }

        // Sparse subset: compact the selected entry ranges.
        let mut ranges = Vec::with_capacity(indices.len());
        let mut offsets: Vec<u32> = Vec::with_capacity(indices.len() + 1);
        offsets.push(0);
        let mut total = 0u32;
        for &i in &indices {
            let start = batch.offsets[i];
            let end = batch.offsets[i + 1];
            ranges.push((start, end));
            total += end - start;
            offsets.push(total);
        }
        let nulls = batch
            .nulls
            .as_deref()
            .map(|n| indices.iter().map(|&i| n[i]).collect::<Arc<[bool]>>());
        let keys = self.key_decoder.batch_block_selected(&ranges)?;
        let values = self.value_decoder.batch_block_selected(&ranges)?;
        MapBlock::from_parts(
            indices.len(),
            nulls,
            Arc::from(offsets),
            keys,
            values,
            Arc::clone(&self.key_type),
        )
    }

    fn report_deferred_errors(&self, positions: &[usize], count: usize) -> Result<()> {
        let batch = self.batch()?;
        if count > positions.len() {
            return Err(Error::InvalidArgumentError(
                "position count exceeds the positions buffer".to_string(),
            ));
        }
        for &rel in &positions[..count] {
            if let Some(message) = batch.errors.get(&rel) {
                return Err(Error::CorruptedData(message.clone()));
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.presence = None;
        self.lengths = None;
        self.batch = None;
        self.primed = false;
        self.key_decoder.close();
        self.value_decoder.close();
    }
}

/// A leased, zero-copy view over a decoder's current batch storage.
///
/// The lease borrows the decoder, so `prime_row_group` and `close` cannot
/// run while one is outstanding; releasing is dropping the lease, and a
/// forgotten release is a compile error rather than a recycled-storage
/// hazard.
pub struct BlockLease<'a> {
    block: MapBlock,
    _decoder: std::marker::PhantomData<&'a MapDirectDecoder>,
}

impl<'a> BlockLease<'a> {
    pub fn block(&self) -> &MapBlock {
        &self.block
    }
}

impl<'a> Deref for BlockLease<'a> {
    type Target = MapBlock;

    fn deref(&self) -> &MapBlock {
        &self.block
    }
}

/// Lifecycle states of a [`SelectiveMapDecoder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderState {
    Unbound,
    Bound,
    RowGroupReady,
    Closed,
}

/// The closed set of decode strategies a segment can bind.
enum Strategy {
    Direct(MapDirectDecoder),
}

/// Facade the execution engine drives for one map column.
///
/// `bind_segment` resolves the encoding once per segment; every later call
/// goes straight to the bound strategy, so the per-batch hot path never
/// re-resolves which decoder to use.
pub struct SelectiveMapDecoder {
    column: ColumnId,
    strategy: Strategy,
    state: DecoderState,
}

impl fmt::Debug for SelectiveMapDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectiveMapDecoder")
            .field("column", &self.column)
            .field("state", &self.state)
            .finish()
    }
}

impl SelectiveMapDecoder {
    pub fn new(
        column: ColumnId,
        key_type: Arc<dyn KeyType>,
        key_decoder: Box<dyn ColumnDecoder>,
        value_decoder: Box<dyn ColumnDecoder>,
        options: DecodeOptions,
    ) -> Self {
        Self {
            column,
            strategy: Strategy::Direct(MapDirectDecoder::new(
                key_type,
                key_decoder,
                value_decoder,
                options,
            )),
            state: DecoderState::Unbound,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    fn direct(&self) -> &MapDirectDecoder {
        match &self.strategy {
            Strategy::Direct(d) => d,
        }
    }

    fn direct_mut(&mut self) -> &mut MapDirectDecoder {
        match &mut self.strategy {
            Strategy::Direct(d) => d,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.state == DecoderState::Closed {
            return Err(Error::InvalidArgumentError(
                "decoder is closed".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve this column's encoding for a new segment and bind the
    /// matching strategy.
    ///
    /// Direct encodings bind the positional strategy. Flat-map encoding is
    /// a static mismatch between the declared schema encoding and the
    /// implemented support: the call fails without binding, as it does for
    /// any unrecognized kind.
    pub fn bind_segment(&mut self, metadata: &SegmentMetadata) -> Result<()> {
        self.check_open()?;
        let kind = metadata.encoding(self.column).ok_or_else(|| {
            Error::CorruptedData(format!(
                "segment metadata has no encoding for column {}",
                self.column
            ))
        })?;
        match kind {
            EncodingKind::Direct | EncodingKind::DirectV2 => {
                tracing::debug!(column = self.column, ?kind, "bound direct map decoder");
                self.direct_mut().bind_segment();
                self.state = DecoderState::Bound;
                Ok(())
            }
            EncodingKind::FlatMap => Err(Error::UnsupportedEncoding(
                "flat map encoding is not supported".to_string(),
            )),
            other => Err(Error::UnsupportedEncoding(format!(
                "{other:?} is not a supported map column encoding"
            ))),
        }
    }

    /// Bind this row group's byte sources; discards prior row-group state.
    pub fn prime_row_group(&mut self, sources: &RowGroupSources) -> Result<()> {
        self.check_open()?;
        if self.state == DecoderState::Unbound {
            return Err(Error::InvalidArgumentError(
                "no strategy bound; bind_segment must run first".to_string(),
            ));
        }
        self.direct_mut().prime_row_group(sources)?;
        self.state = DecoderState::RowGroupReady;
        Ok(())
    }

    /// Decode the requested (strictly ascending) positions relative to
    /// `base_offset`; returns how many passed this column's own filter.
    pub fn decode(
        &mut self,
        base_offset: usize,
        positions: &[usize],
        count: usize,
    ) -> Result<usize> {
        self.check_ready()?;
        self.direct_mut().decode(base_offset, positions, count)
    }

    /// The subset of the last batch's positions that qualified, ascending.
    pub fn qualifying_positions(&self) -> &[usize] {
        self.direct().qualifying_positions()
    }

    /// Build a map block over exactly the given decoded positions.
    ///
    /// Deferred errors attached to any requested position surface here.
    pub fn materialized_block(&self, positions: &[usize], count: usize) -> Result<MapBlock> {
        self.check_ready()?;
        self.direct().assemble(positions, count)
    }

    /// Lease a view over the current batch storage without copying.
    ///
    /// The lease must be dropped before the next `prime_row_group` or
    /// `close`; the underlying storage may be reused afterwards.
    pub fn borrowed_block_view(
        &self,
        positions: &[usize],
        count: usize,
    ) -> Result<BlockLease<'_>> {
        self.check_ready()?;
        let block = self.direct().assemble(positions, count)?;
        Ok(BlockLease {
            block,
            _decoder: std::marker::PhantomData,
        })
    }

    /// Raise any decode error recorded for the given positions.
    ///
    /// Errors are scoped to positions the caller is materializing; a
    /// defective position nobody consumes never raises.
    pub fn report_deferred_errors(&self, positions: &[usize], count: usize) -> Result<()> {
        self.check_ready()?;
        self.direct().report_deferred_errors(positions, count)
    }

    fn check_ready(&self) -> Result<()> {
        self.check_open()?;
        if self.state != DecoderState::RowGroupReady {
            return Err(Error::InvalidArgumentError(
                "no row group has been primed".to_string(),
            ));
        }
        Ok(())
    }

    /// Release the bound strategy's resources. Idempotent, legal from any
    /// state.
    pub fn close(&mut self) {
        if self.state == DecoderState::Closed {
            return;
        }
        self.direct_mut().close();
        self.state = DecoderState::Closed;
    }
}
