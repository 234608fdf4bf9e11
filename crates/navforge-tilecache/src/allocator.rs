//! Scratch memory for tile builds

use std::ops::Range;

/// Allocates scratch buffers for a single tile build. Allocations are
/// returned as ranges into the allocator's storage.
pub trait TileAllocator {
    /// Releases every allocation
    fn reset(&mut self);

    /// Allocates `size` bytes, `None` when the allocator is exhausted
    fn alloc(&mut self, size: usize) -> Option<Range<usize>>;

    /// Releases one allocation
    fn free(&mut self, _allocation: Range<usize>) {}

    /// Mutable view of an allocation
    fn buffer_mut(&mut self, allocation: Range<usize>) -> &mut [u8];
}

/// Bump allocator over a fixed buffer. `free` does nothing; memory comes
/// back on `reset`.
#[derive(Debug, Clone)]
pub struct LinearAllocator {
    buffer: Vec<u8>,
    top: usize,
    high: usize,
}

impl LinearAllocator {
    /// Creates an allocator with `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            top: 0,
            high: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Largest number of bytes in use since creation
    pub fn high_water_mark(&self) -> usize {
        self.high
    }
}

impl Default for LinearAllocator {
    fn default() -> Self {
        Self::new(32 * 1024)
    }
}

impl TileAllocator for LinearAllocator {
    fn reset(&mut self) {
        self.top = 0;
    }

    fn alloc(&mut self, size: usize) -> Option<Range<usize>> {
        let end = self.top.checked_add(size)?;
        if end > self.buffer.len() {
            return None;
        }
        let range = self.top..end;
        self.top = end;
        self.high = self.high.max(end);
        Some(range)
    }

    fn buffer_mut(&mut self, allocation: Range<usize>) -> &mut [u8] {
        &mut self.buffer[allocation]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_allocator() {
        let mut alloc = LinearAllocator::new(16);
        let a = alloc.alloc(10).unwrap();
        assert_eq!(a, 0..10);
        assert!(alloc.alloc(10).is_none());
        let b = alloc.alloc(6).unwrap();
        assert_eq!(b, 10..16);
        alloc.free(a);
        assert!(alloc.alloc(1).is_none());

        alloc.reset();
        assert_eq!(alloc.alloc(16), Some(0..16));
        assert_eq!(alloc.high_water_mark(), 16);
    }
}
