//! Selective decoding of map columns from encoded stripe data.
//!
//! The execution engine drives a [`SelectiveMapDecoder`], which inspects the
//! segment's encoding metadata once, binds to exactly one decode strategy,
//! and forwards every subsequent call to it for the life of the segment.
//! Within a segment, row groups are primed repeatedly; within a row group,
//! `decode` reads only the positions the caller still wants (upstream
//! filters have already eliminated the rest), so skipped positions cost
//! nothing beyond cursor movement.
//!
//! Decode errors affecting positions nobody consumes are deferred: they are
//! recorded during `decode` and raised only when the affected position is
//! actually materialized.

pub mod column;
pub mod encoding;
pub mod map;
pub mod source;

pub use column::{ColumnDecoder, U64DirectDecoder, Utf8DirectDecoder};
pub use encoding::{ColumnId, EncodingKind, RowGroupSources, SegmentMetadata, StreamKind};
pub use map::{
    BlockLease, DecodeOptions, DecoderState, MapDirectDecoder, RowFilter, SelectiveMapDecoder,
};
pub use source::{BitReader, ByteSource};

pub use stria_result::{Error, Result};
