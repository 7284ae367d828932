//! Typed append-only pool

use std::ops::{Index, IndexMut};

use super::{Arena, MemoryError, MemoryTag};

/// Dense storage of `T` addressed by `u32` ids
///
/// Entries are never freed individually; each allocation is charged
/// `size_of::<T>()` bytes against the owning [`Arena`].
#[derive(Debug, Clone)]
pub struct Pool<T> {
    items: Vec<T>,
    tag: MemoryTag,
}

impl<T> Pool<T> {
    pub fn new(tag: MemoryTag) -> Self {
        Pool {
            items: Vec::new(),
            tag,
        }
    }

    /// Store `item`, returning its id
    pub fn alloc(&mut self, arena: &mut Arena, item: T) -> Result<u32, MemoryError> {
        let id = u32::try_from(self.items.len()).map_err(|_| MemoryError)?;
        arena.charge(self.tag, std::mem::size_of::<T>())?;
        self.items.push(item);
        Ok(id)
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&T> {
        self.items.get(id as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.items.get_mut(id as usize)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.items.iter().enumerate().map(|(i, item)| (i as u32, item))
    }
}

impl<T> Index<u32> for Pool<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: u32) -> &T {
        &self.items[id as usize]
    }
}

impl<T> IndexMut<u32> for Pool<T> {
    #[inline]
    fn index_mut(&mut self, id: u32) -> &mut T {
        &mut self.items[id as usize]
    }
}
