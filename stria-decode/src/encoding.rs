//! Segment encoding metadata and row-group stream sources.
//!
//! The decode layer only reads the encoding kind declared for its column and
//! requests named byte sources per row group; it never parses the physical
//! file format. Both structures here are filled in by the storage-format
//! layer that owns the stripe bytes.

use rustc_hash::FxHashMap;

use stria_result::{Error, Result};

use crate::source::ByteSource;

/// Identifies one column within a segment.
pub type ColumnId = u32;

/// Physical encoding declared for a column over one segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodingKind {
    Direct,
    DirectV2,
    Dictionary,
    /// Alternative physical layout for map columns, not decodable here.
    FlatMap,
}

/// Per-column encoding kinds for one segment.
#[derive(Clone, Debug, Default)]
pub struct SegmentMetadata {
    encodings: FxHashMap<ColumnId, EncodingKind>,
}

impl SegmentMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_encoding(&mut self, column: ColumnId, kind: EncodingKind) {
        self.encodings.insert(column, kind);
    }

    pub fn with_encoding(mut self, column: ColumnId, kind: EncodingKind) -> Self {
        self.set_encoding(column, kind);
        self
    }

    pub fn encoding(&self, column: ColumnId) -> Option<EncodingKind> {
        self.encodings.get(&column).copied()
    }
}

/// Named streams of one column within a row group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// One bit per row; set = the row is present (non-null).
    Presence,
    /// One varint per present row: the row's entry count.
    Lengths,
    /// Encoded key entries.
    KeyData,
    /// Encoded value entries.
    ValueData,
}

/// Byte-source provider for one row group.
///
/// Sources are stored as prototypes positioned at the stream start; lookups
/// hand out cheap cursor clones, so priming the same row group twice reads
/// the same bytes again.
#[derive(Clone, Debug, Default)]
pub struct RowGroupSources {
    sources: FxHashMap<StreamKind, ByteSource>,
}

impl RowGroupSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_source(&mut self, kind: StreamKind, source: ByteSource) {
        self.sources.insert(kind, source);
    }

    pub fn with_source(mut self, kind: StreamKind, source: ByteSource) -> Self {
        self.set_source(kind, source);
        self
    }

    /// Optional stream; absent is a valid state (e.g. no nulls in the group).
    pub fn source(&self, kind: StreamKind) -> Option<ByteSource> {
        self.sources.get(&kind).cloned()
    }

    /// Required stream; absence means the stripe is malformed.
    pub fn require(&self, kind: StreamKind) -> Result<ByteSource> {
        self.source(kind).ok_or_else(|| {
            Error::CorruptedData(format!("row group is missing the {kind:?} stream"))
        })
    }
}
