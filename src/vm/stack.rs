//! Slot storage for call frames
//!
//! Frames are carved out of chunks. A chunk holds
//! `align_up(request + FRAME_SPARE_SIZE, FRAME_SPARE_SIZE)` bytes, so callees
//! usually fit in the spare capacity left by their caller. Only the frame
//! that opened a chunk frees it. Every frame also takes
//! [`FRAME_HEADER_SLOTS`] slots for its bookkeeping, so frames without
//! locals still count against the stack limit.

use std::mem::size_of;

use thiserror::Error;

use crate::arena::{Arena, CellId, MemoryError, MemoryTag};
use crate::value::Value;

/// Spare bytes reserved beyond a frame when a new chunk is opened
pub const FRAME_SPARE_SIZE: usize = 4096;

/// Default byte budget of all chunks together
pub const DEFAULT_MAX_STACK_SIZE: usize = 160 * 1024;

/// Bytes charged per slot
pub const SLOT_SIZE: usize = size_of::<Slot>();

/// Slots reserved ahead of every frame's variables
pub const FRAME_HEADER_SLOTS: usize = 8;

/// A variable slot: an inline value, or a heap cell once captured
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Value(Value),
    Cell(CellId),
}

impl Default for Slot {
    fn default() -> Self {
        Slot::Value(Value::Undefined)
    }
}

#[inline]
const fn align_up(size: usize, align: usize) -> usize {
    size.div_ceil(align) * align
}

/// Where a frame's slots live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    chunk: usize,
    base: usize,
    len: usize,
    /// This frame allocated the chunk
    opened: bool,
}

impl Region {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn opened_chunk(&self) -> bool {
        self.opened
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StackError {
    #[error("Maximum call stack size exceeded")]
    Overflow,

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

#[derive(Debug)]
struct Chunk {
    slots: Vec<Slot>,
    used: usize,
    bytes: usize,
}

/// Chunked slot stack
#[derive(Debug)]
pub struct Stack {
    chunks: Vec<Chunk>,
    /// Bytes held by all chunks
    size: usize,
    limit: usize,
}

impl Stack {
    pub fn new(limit: usize) -> Self {
        Stack {
            chunks: Vec::new(),
            size: 0,
            limit,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Reserve `len` slots, reusing the top chunk's spare capacity if it fits
    pub fn push(&mut self, arena: &mut Arena, len: usize) -> Result<Region, StackError> {
        let need = len + FRAME_HEADER_SLOTS;
        let top = self.chunks.len();
        if let Some(chunk) = self.chunks.last_mut() {
            if chunk.slots.len() - chunk.used >= need {
                let base = chunk.used + FRAME_HEADER_SLOTS;
                chunk.used += need;
                return Ok(Region {
                    chunk: top - 1,
                    base,
                    len,
                    opened: false,
                });
            }
        }

        let bytes = align_up(need * SLOT_SIZE + FRAME_SPARE_SIZE, FRAME_SPARE_SIZE);
        if self.size + bytes > self.limit {
            return Err(StackError::Overflow);
        }
        arena.charge(MemoryTag::Frame, bytes)?;

        self.chunks.push(Chunk {
            slots: vec![Slot::default(); bytes / SLOT_SIZE],
            used: need,
            bytes,
        });
        self.size += bytes;
        log::trace!("frame chunk of {} bytes allocated, stack size {}", bytes, self.size);

        Ok(Region {
            chunk: top,
            base: FRAME_HEADER_SLOTS,
            len,
            opened: true,
        })
    }

    /// Give back the slots of the most recent region
    pub fn pop(&mut self, arena: &mut Arena, region: Region) {
        if let Some(chunk) = self.chunks.get_mut(region.chunk) {
            for slot in &mut chunk.slots[region.base..region.base + region.len] {
                *slot = Slot::default();
            }
            chunk.used = region.base - FRAME_HEADER_SLOTS;
        }

        if region.opened && region.chunk + 1 == self.chunks.len() {
            if let Some(chunk) = self.chunks.pop() {
                arena.release(MemoryTag::Frame, chunk.bytes);
                self.size -= chunk.bytes;
                log::trace!("frame chunk of {} bytes freed", chunk.bytes);
            }
        }
    }

    pub fn slots(&self, region: Region) -> &[Slot] {
        &self.chunks[region.chunk].slots[region.base..region.base + region.len]
    }

    pub fn slots_mut(&mut self, region: Region) -> &mut [Slot] {
        &mut self.chunks[region.chunk].slots[region.base..region.base + region.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_share_spare_capacity() {
        let mut arena = Arena::default();
        let mut stack = Stack::new(DEFAULT_MAX_STACK_SIZE);

        let a = stack.push(&mut arena, 4).unwrap();
        assert!(a.opened_chunk());
        let b = stack.push(&mut arena, 8).unwrap();
        assert!(!b.opened_chunk());
        assert_eq!(stack.chunk_count(), 1);
        assert_eq!(
            stack.size(),
            align_up((4 + FRAME_HEADER_SLOTS) * SLOT_SIZE + FRAME_SPARE_SIZE, FRAME_SPARE_SIZE)
        );

        stack.slots_mut(b)[0] = Slot::Value(Value::Number(1.0));
        stack.pop(&mut arena, b);
        stack.pop(&mut arena, a);
        assert_eq!(stack.chunk_count(), 0);
        assert_eq!(stack.size(), 0);
        assert_eq!(arena.stats().by_tag[MemoryTag::Frame as usize].bytes, 0);
    }

    #[test]
    fn test_large_frame_opens_chunk() {
        let mut arena = Arena::default();
        let mut stack = Stack::new(DEFAULT_MAX_STACK_SIZE);
        let small = stack.push(&mut arena, 1).unwrap();
        let big = stack.push(&mut arena, FRAME_SPARE_SIZE).unwrap();
        assert!(big.opened_chunk());
        assert_eq!(stack.chunk_count(), 2);
        // reused slots come back reset
        assert_eq!(stack.slots(big)[0], Slot::default());
        stack.pop(&mut arena, big);
        assert_eq!(stack.chunk_count(), 1);
        stack.pop(&mut arena, small);
    }

    #[test]
    fn test_overflow() {
        let mut arena = Arena::default();
        let mut stack = Stack::new(3 * FRAME_SPARE_SIZE);
        let per_chunk = FRAME_SPARE_SIZE / SLOT_SIZE;
        stack.push(&mut arena, per_chunk).unwrap();
        assert_eq!(
            stack.push(&mut arena, FRAME_SPARE_SIZE).unwrap_err(),
            StackError::Overflow
        );
    }

    #[test]
    fn test_empty_frames_are_bounded() {
        let mut arena = Arena::default();
        let mut stack = Stack::new(2 * FRAME_SPARE_SIZE);
        let mut regions = Vec::new();
        let err = loop {
            match stack.push(&mut arena, 0) {
                Ok(region) => regions.push(region),
                Err(e) => break e,
            }
        };
        assert_eq!(err, StackError::Overflow);
        assert!(!regions.is_empty());
        assert!(regions.len() <= 2 * FRAME_SPARE_SIZE / (FRAME_HEADER_SLOTS * SLOT_SIZE));
        for region in regions.into_iter().rev() {
            stack.pop(&mut arena, region);
        }
        assert_eq!(stack.size(), 0);
    }
}
