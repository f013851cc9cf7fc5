//! Arrow-backed scalar block implementations.
//!
//! These are the concrete key/value columns the decode layer produces:
//! fixed-width unsigned integers and UTF-8 strings, plus [`DeferredBlock`],
//! a wrapper that models storage whose decode has been deferred.

use std::any::Any;
use std::sync::Arc;

use arrow::array::{Array, StringArray, UInt64Array};

use stria_result::Result;

use crate::block::{Block, RetainedPart, RetainedPartVisitor};
use crate::mem::{instance_size_of, SIZE_OF_U32, SIZE_OF_U64, SIZE_OF_U8};

/// Fixed-width block of unsigned 64-bit values.
#[derive(Debug)]
pub struct U64Block {
    values: UInt64Array,
}

impl U64Block {
    pub fn new(values: UInt64Array) -> Self {
        Self { values }
    }

    pub fn from_values(values: Vec<u64>) -> Self {
        Self::new(UInt64Array::from(values))
    }

    pub fn value(&self, position: usize) -> u64 {
        self.values.value(position)
    }

    pub fn values(&self) -> &UInt64Array {
        &self.values
    }
}

impl Block for U64Block {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn is_null(&self, position: usize) -> bool {
        self.values.is_null(position)
    }

    fn logical_size_bytes(&self) -> u64 {
        self.region_size_bytes(0, self.values.len())
    }

    fn region_size_bytes(&self, _offset: usize, len: usize) -> u64 {
        // Fixed width: value bytes plus one null-flag byte per position.
        (SIZE_OF_U64 + SIZE_OF_U8) * len as u64
    }

    fn retained_size_bytes(&self) -> u64 {
        self.values.get_array_memory_size() as u64 + instance_size_of(self)
    }

    fn is_materialized(&self) -> bool {
        true
    }

    fn materialize(self: Arc<Self>) -> Result<Arc<dyn Block>> {
        Ok(self)
    }

    fn visit_retained_parts(&self, visitor: &mut dyn RetainedPartVisitor) {
        visitor.visit(
            RetainedPart::Buffer,
            self.values.get_array_memory_size() as u64,
        );
        visitor.visit(RetainedPart::Instance, instance_size_of(self));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Variable-width block of UTF-8 strings.
#[derive(Debug)]
pub struct Utf8Block {
    values: StringArray,
}

impl Utf8Block {
    pub fn new(values: StringArray) -> Self {
        Self { values }
    }

    pub fn from_values(values: Vec<&str>) -> Self {
        Self::new(StringArray::from(values))
    }

    pub fn value(&self, position: usize) -> &str {
        self.values.value(position)
    }

    pub fn values(&self) -> &StringArray {
        &self.values
    }
}

impl Block for Utf8Block {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn is_null(&self, position: usize) -> bool {
        self.values.is_null(position)
    }

    fn logical_size_bytes(&self) -> u64 {
        self.region_size_bytes(0, self.values.len())
    }

    fn region_size_bytes(&self, offset: usize, len: usize) -> u64 {
        if len == 0 {
            return 0;
        }
        // Exact var-width accounting from the value offsets buffer, plus the
        // per-position offset and null-flag overhead.
        let offsets = self.values.value_offsets();
        let data_bytes = (offsets[offset + len] - offsets[offset]) as u64;
        data_bytes + (SIZE_OF_U32 + SIZE_OF_U8) * len as u64
    }

    fn retained_size_bytes(&self) -> u64 {
        self.values.get_array_memory_size() as u64 + instance_size_of(self)
    }

    fn is_materialized(&self) -> bool {
        true
    }

    fn materialize(self: Arc<Self>) -> Result<Arc<dyn Block>> {
        Ok(self)
    }

    fn visit_retained_parts(&self, visitor: &mut dyn RetainedPartVisitor) {
        visitor.visit(
            RetainedPart::Buffer,
            self.values.get_array_memory_size() as u64,
        );
        visitor.visit(RetainedPart::Instance, instance_size_of(self));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A block whose decode has been deferred.
///
/// Reads of shape and sizes are answered without forcing the load;
/// [`Block::materialize`] unwraps to the inner, fully decoded block.
#[derive(Debug)]
pub struct DeferredBlock {
    inner: Arc<dyn Block>,
}

impl DeferredBlock {
    pub fn new(inner: Arc<dyn Block>) -> Self {
        Self { inner }
    }
}

impl Block for DeferredBlock {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_null(&self, position: usize) -> bool {
        self.inner.is_null(position)
    }

    fn logical_size_bytes(&self) -> u64 {
        self.inner.logical_size_bytes()
    }

    fn region_size_bytes(&self, offset: usize, len: usize) -> u64 {
        self.inner.region_size_bytes(offset, len)
    }

    fn retained_size_bytes(&self) -> u64 {
        self.inner.retained_size_bytes() + instance_size_of(self)
    }

    fn is_materialized(&self) -> bool {
        false
    }

    fn materialize(self: Arc<Self>) -> Result<Arc<dyn Block>> {
        Arc::clone(&self.inner).materialize()
    }

    fn visit_retained_parts(&self, visitor: &mut dyn RetainedPartVisitor) {
        self.inner.visit_retained_parts(visitor);
        visitor.visit(RetainedPart::Instance, instance_size_of(self));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_region_size_is_exact() {
        let block = Utf8Block::from_values(vec!["a", "bc", "def"]);
        // "bc" + "def" = 5 data bytes, 2 positions of (4 + 1) overhead.
        assert_eq!(block.region_size_bytes(1, 2), 5 + 2 * 5);
        assert_eq!(block.region_size_bytes(0, 0), 0);
    }

    #[test]
    fn deferred_block_materializes_to_inner() {
        let inner: Arc<dyn Block> = Arc::new(U64Block::from_values(vec![1, 2, 3]));
        let deferred = Arc::new(DeferredBlock::new(Arc::clone(&inner)));
        assert!(!deferred.is_materialized());
        let loaded = deferred.materialize().unwrap();
        assert!(Arc::ptr_eq(&loaded, &inner));
    }
}
