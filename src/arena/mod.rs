//! Region allocation for VM-lifetime data
//!
//! Everything a VM allocates lives in its [`Heap`] and is released as a unit
//! when the VM is dropped:
//! - [`Pool`]s hand out dense `u32` ids and never free individual entries
//! - an [`Arena`] budget is charged for every allocation and reports
//!   [`MemoryError`] once the configured limit would be exceeded
//!
//! Frame chunks are the one kind of charge that is returned before teardown.

mod pool;

pub use pool::Pool;

use thiserror::Error;

use crate::runtime::object::Object;
use crate::value::Value;

/// Allocation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("MemoryError")]
pub struct MemoryError;

/// What an arena charge was made for
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTag {
    /// Heap object
    Object = 0,
    /// Durable closure cell
    Cell = 1,
    /// Frame value chunk
    Frame = 2,
    /// Compiled function template
    Lambda = 3,
    /// Host event registration
    Event = 4,
}

impl MemoryTag {
    pub const COUNT: usize = 5;
}

/// Per-tag allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagStats {
    pub count: usize,
    pub bytes: usize,
}

/// Snapshot of arena usage
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub used: usize,
    pub peak: usize,
    pub limit: usize,
    pub by_tag: [TagStats; MemoryTag::COUNT],
}

/// Byte budget shared by all pools of one VM
#[derive(Debug, Clone)]
pub struct Arena {
    limit: usize,
    used: usize,
    peak: usize,
    by_tag: [TagStats; MemoryTag::COUNT],
}

impl Arena {
    /// Default budget: 64 MiB
    pub const DEFAULT_LIMIT: usize = 64 * 1024 * 1024;

    pub fn new(limit: usize) -> Self {
        Arena {
            limit,
            used: 0,
            peak: 0,
            by_tag: [TagStats::default(); MemoryTag::COUNT],
        }
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn free_space(&self) -> usize {
        self.limit.saturating_sub(self.used)
    }

    /// Check if `size` more bytes fit in the budget
    #[inline]
    fn check_free(&self, size: usize) -> bool {
        self.free_space() >= size
    }

    /// Account for an allocation
    pub fn charge(&mut self, tag: MemoryTag, bytes: usize) -> Result<(), MemoryError> {
        if !self.check_free(bytes) {
            log::debug!(
                "arena exhausted: {} bytes requested for {:?}, {} of {} used",
                bytes,
                tag,
                self.used,
                self.limit
            );
            return Err(MemoryError);
        }
        self.used += bytes;
        self.peak = self.peak.max(self.used);
        let stats = &mut self.by_tag[tag as usize];
        stats.count += 1;
        stats.bytes += bytes;
        Ok(())
    }

    /// Return a charge made earlier
    pub fn release(&mut self, tag: MemoryTag, bytes: usize) {
        self.used = self.used.saturating_sub(bytes);
        let stats = &mut self.by_tag[tag as usize];
        stats.count = stats.count.saturating_sub(1);
        stats.bytes = stats.bytes.saturating_sub(bytes);
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            used: self.used,
            peak: self.peak,
            limit: self.limit,
            by_tag: self.by_tag,
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT)
    }
}

/// Handle of a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        ObjectId(raw)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a durable closure cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u32);

impl CellId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The VM heap: object and cell pools over one budget
#[derive(Debug, Clone)]
pub struct Heap {
    arena: Arena,
    objects: Pool<Object>,
    cells: Pool<Value>,
}

impl Heap {
    pub fn new(limit: usize) -> Self {
        Heap {
            arena: Arena::new(limit),
            objects: Pool::new(MemoryTag::Object),
            cells: Pool::new(MemoryTag::Cell),
        }
    }

    #[inline]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    #[inline]
    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub fn alloc_object(&mut self, object: Object) -> Result<ObjectId, MemoryError> {
        self.objects.alloc(&mut self.arena, object).map(ObjectId)
    }

    /// Object by id
    ///
    /// # Panics
    /// Ids are only minted by this heap and never freed, so an unknown id
    /// means it came from another VM.
    #[inline]
    pub fn object(&self, id: ObjectId) -> &Object {
        &self.objects[id.0]
    }

    #[inline]
    pub fn object_mut(&mut self, id: ObjectId) -> &mut Object {
        &mut self.objects[id.0]
    }

    #[inline]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn alloc_cell(&mut self, value: Value) -> Result<CellId, MemoryError> {
        self.cells.alloc(&mut self.arena, value).map(CellId)
    }

    #[inline]
    pub fn cell(&self, id: CellId) -> &Value {
        &self.cells[id.0]
    }

    #[inline]
    pub fn cell_mut(&mut self, id: CellId) -> &mut Value {
        &mut self.cells[id.0]
    }

    pub fn stats(&self) -> MemoryStats {
        self.arena.stats()
    }
}
