//! Scalar column decoders driven by the map decode strategy.
//!
//! These decode the flat key and value entry streams. The map strategy
//! tells a child how many entries to skip or read per row; the child
//! accumulates a batch and can emit it as a block, either whole or as a
//! concatenation of selected entry ranges (for sparse materialization).

use std::sync::Arc;

use arrow::array::{StringArray, UInt64Array};

use stria_block::{Block, U64Block, Utf8Block};
use stria_result::{Error, Result};

use crate::source::ByteSource;

/// A decoder for one flat entry column.
///
/// `read` consumes entries from the stream on every outcome except a hard
/// error: `Ok(None)` is a clean decode, `Ok(Some(message))` means the
/// entries were consumed and placeholders appended but the decoded values
/// are defective (the caller defers the error to the affected row), and
/// `Err` means the stream itself is unusable from here on.
pub trait ColumnDecoder: Send {
    fn prime(&mut self, source: ByteSource) -> Result<()>;

    /// Consume `count` entries without decoding them.
    fn skip(&mut self, count: usize) -> Result<()>;

    /// Discard the previous batch and start a new one.
    fn begin_batch(&mut self);

    /// Decode `count` entries into the current batch.
    fn read(&mut self, count: usize) -> Result<Option<String>>;

    /// Entries decoded into the current batch so far.
    fn batch_len(&self) -> usize;

    /// The current batch as a block.
    fn batch_block(&self) -> Result<Arc<dyn Block>>;

    /// Selected entry ranges of the current batch, concatenated in order.
    fn batch_block_selected(&self, ranges: &[(u32, u32)]) -> Result<Arc<dyn Block>>;

    /// Release stream state; the decoder can be primed again afterwards.
    fn close(&mut self);
}

fn source_mut(source: &mut Option<ByteSource>) -> Result<&mut ByteSource> {
    source
        .as_mut()
        .ok_or_else(|| Error::Internal("column decoder is not primed".to_string()))
}

/// Direct decoder for fixed-width u64 entries, big-endian on the wire.
#[derive(Debug, Default)]
pub struct U64DirectDecoder {
    source: Option<ByteSource>,
    batch: Vec<u64>,
}

impl U64DirectDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ColumnDecoder for U64DirectDecoder {
    fn prime(&mut self, source: ByteSource) -> Result<()> {
        self.source = Some(source);
        self.batch.clear();
        Ok(())
    }

    fn skip(&mut self, count: usize) -> Result<()> {
        source_mut(&mut self.source)?.skip(count * 8)
    }

    fn begin_batch(&mut self) {
        self.batch.clear();
    }

    fn read(&mut self, count: usize) -> Result<Option<String>> {
        let source = source_mut(&mut self.source)?;
        self.batch.reserve(count);
        for _ in 0..count {
            self.batch.push(source.read_u64_be()?);
        }
        Ok(None)
    }

    fn batch_len(&self) -> usize {
        self.batch.len()
    }

    fn batch_block(&self) -> Result<Arc<dyn Block>> {
        Ok(Arc::new(U64Block::new(UInt64Array::from(
            self.batch.clone(),
        ))))
    }

    fn batch_block_selected(&self, ranges: &[(u32, u32)]) -> Result<Arc<dyn Block>> {
        let mut out = Vec::new();
        for &(start, end) in ranges {
            out.extend_from_slice(&self.batch[start as usize..end as usize]);
        }
        Ok(Arc::new(U64Block::new(UInt64Array::from(out))))
    }

    fn close(&mut self) {
        self.source = None;
        self.batch.clear();
    }
}

/// Direct decoder for var-width UTF-8 entries: varint length, then bytes.
///
/// An entry whose bytes are not valid UTF-8 is replaced by an empty
/// placeholder and reported as a deferred defect; the stream cursor stays
/// consistent, so later rows decode normally.
#[derive(Debug, Default)]
pub struct Utf8DirectDecoder {
    source: Option<ByteSource>,
    batch: Vec<String>,
}

impl Utf8DirectDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ColumnDecoder for Utf8DirectDecoder {
    fn prime(&mut self, source: ByteSource) -> Result<()> {
        self.source = Some(source);
        self.batch.clear();
        Ok(())
    }

    fn skip(&mut self, count: usize) -> Result<()> {
        let source = source_mut(&mut self.source)?;
        for _ in 0..count {
            let len = source.read_varint_u32()? as usize;
            source.skip(len)?;
        }
        Ok(())
    }

    fn begin_batch(&mut self) {
        self.batch.clear();
    }

    fn read(&mut self, count: usize) -> Result<Option<String>> {
        let source = source_mut(&mut self.source)?;
        let mut defect = None;
        self.batch.reserve(count);
        for _ in 0..count {
            let len = source.read_varint_u32()? as usize;
            let bytes = source.read_bytes(len)?;
            match std::str::from_utf8(bytes) {
                Ok(s) => self.batch.push(s.to_string()),
                Err(_) => {
                    self.batch.push(String::new());
                    defect
                        .get_or_insert_with(|| "invalid UTF-8 in string column".to_string());
                }
            }
        }
        Ok(defect)
    }

    fn batch_len(&self) -> usize {
        self.batch.len()
    }

    fn batch_block(&self) -> Result<Arc<dyn Block>> {
        let refs: Vec<&str> = self.batch.iter().map(|s| s.as_str()).collect();
        Ok(Arc::new(Utf8Block::new(StringArray::from(refs))))
    }

    fn batch_block_selected(&self, ranges: &[(u32, u32)]) -> Result<Arc<dyn Block>> {
        let mut refs = Vec::new();
        for &(start, end) in ranges {
            for s in &self.batch[start as usize..end as usize] {
                refs.push(s.as_str());
            }
        }
        Ok(Arc::new(Utf8Block::new(StringArray::from(refs))))
    }

    fn close(&mut self) {
        self.source = None;
        self.batch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8_stream(entries: &[&[u8]]) -> ByteSource {
        let mut bytes = Vec::new();
        for e in entries {
            let mut len = e.len() as u32;
            loop {
                let byte = (len & 0x7F) as u8;
                len >>= 7;
                if len == 0 {
                    bytes.push(byte);
                    break;
                }
                bytes.push(byte | 0x80);
            }
            bytes.extend_from_slice(e);
        }
        ByteSource::from_vec(bytes)
    }

    #[test]
    fn utf8_skip_then_read() {
        let mut dec = Utf8DirectDecoder::new();
        dec.prime(utf8_stream(&[b"aa", b"bb", b"cc"])).unwrap();
        dec.begin_batch();
        dec.skip(1).unwrap();
        assert_eq!(dec.read(2).unwrap(), None);
        assert_eq!(dec.batch_len(), 2);
        let block = dec.batch_block().unwrap();
        let strings = block.as_any().downcast_ref::<Utf8Block>().unwrap();
        assert_eq!(strings.value(0), "bb");
        assert_eq!(strings.value(1), "cc");
    }

    #[test]
    fn invalid_utf8_is_a_deferred_defect() {
        let mut dec = Utf8DirectDecoder::new();
        dec.prime(utf8_stream(&[&[0xFF, 0xFE], b"ok"])).unwrap();
        dec.begin_batch();
        let defect = dec.read(2).unwrap();
        assert!(defect.is_some());
        // The stream stayed consistent: both entries were consumed.
        assert_eq!(dec.batch_len(), 2);
        let block = dec.batch_block().unwrap();
        let strings = block.as_any().downcast_ref::<Utf8Block>().unwrap();
        assert_eq!(strings.value(0), "");
        assert_eq!(strings.value(1), "ok");
    }

    #[test]
    fn u64_selected_ranges_concatenate() {
        let mut bytes = Vec::new();
        for v in [1u64, 2, 3, 4, 5] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        let mut dec = U64DirectDecoder::new();
        dec.prime(ByteSource::from_vec(bytes)).unwrap();
        dec.begin_batch();
        dec.read(5).unwrap();
        let block = dec.batch_block_selected(&[(0, 2), (4, 5)]).unwrap();
        let ints = block.as_any().downcast_ref::<U64Block>().unwrap();
        assert_eq!(ints.len(), 3);
        assert_eq!(ints.value(0), 1);
        assert_eq!(ints.value(1), 2);
        assert_eq!(ints.value(2), 5);
    }
}
