//! Flat hash table
//!
//! Layout of an allocated table:
//! - `cells[hash & mask]`: 1-based index of the first element of a chain
//!   (0 = empty chain)
//! - `elts[]`: elements stored densely in insertion order, chained through
//!   their `next` index
//!
//! Deletion unlinks the element and leaves a tombstone in place, so
//! iteration order stays stable. Once enough tombstones accumulate the table
//! is compacted; once every element is a tombstone the storage is released.
//!
//! Keys are 32-bit hashes that are unique per logical key (see
//! [`Atom::hash`](crate::atom::Atom::hash)), so the hash alone identifies an
//! element.

const ELTS_INITIAL_SIZE: u32 = 2;
const HASH_INITIAL_SIZE: u32 = 4;
const ELTS_EXPAND_FACTOR_NUM: u32 = 3;
const ELTS_EXPAND_FACTOR_DENOM: u32 = 2;
const ELTS_MINIMUM_TO_SHRINK: u32 = 8;
const ELTS_FRACTION_TO_SHRINK: u32 = 2;

#[derive(Debug, Clone)]
struct Element<T> {
    key_hash: u32,
    /// 1-based index of the next element in the chain
    next: u32,
    /// `None` marks a tombstone
    value: Option<T>,
}

#[derive(Debug, Clone)]
struct Descr<T> {
    hash_mask: u32,
    elts_size: u32,
    elts_deleted_count: u32,
    cells: Box<[u32]>,
    elts: Vec<Element<T>>,
}

impl<T> Descr<T> {
    fn new(hash_size: u32, elts_size: u32) -> Self {
        Descr {
            hash_mask: hash_size - 1,
            elts_size,
            elts_deleted_count: 0,
            cells: vec![0; hash_size as usize].into_boxed_slice(),
            elts: Vec::with_capacity(elts_size as usize),
        }
    }

    #[inline]
    fn elts_count(&self) -> u32 {
        self.elts.len() as u32
    }

    #[inline]
    fn cell(&self, key_hash: u32) -> usize {
        (key_hash & self.hash_mask) as usize
    }

    fn find_index(&self, key_hash: u32) -> Option<usize> {
        let mut idx = self.cells[self.cell(key_hash)];
        while idx != 0 {
            let elt = &self.elts[(idx - 1) as usize];
            if elt.key_hash == key_hash {
                return Some((idx - 1) as usize);
            }
            idx = elt.next;
        }
        None
    }

    /// Chain every live element into `cells`
    fn relink(&mut self) {
        self.cells.fill(0);
        for i in 0..self.elts.len() {
            if self.elts[i].value.is_none() {
                continue;
            }
            let cell = self.cell(self.elts[i].key_hash);
            self.elts[i].next = self.cells[cell];
            self.cells[cell] = (i + 1) as u32;
        }
    }

    /// Grow the element array, doubling the cells while they are smaller
    fn expand(&mut self) {
        let count = self.elts_count();
        let new_elts_size = (count + 1)
            .max(self.elts_size * ELTS_EXPAND_FACTOR_NUM / ELTS_EXPAND_FACTOR_DENOM);

        let hash_size = self.hash_mask + 1;
        let mut new_hash_size = hash_size;
        while new_hash_size < new_elts_size {
            new_hash_size *= 2;
        }

        if new_hash_size != hash_size {
            self.hash_mask = new_hash_size - 1;
            self.cells = vec![0; new_hash_size as usize].into_boxed_slice();
            self.relink();
        }

        self.elts.reserve_exact((new_elts_size - count) as usize);
        self.elts_size = new_elts_size;

        log::trace!(
            "flathsh expand: elts {} -> {}, cells {} -> {}",
            count,
            new_elts_size,
            hash_size,
            new_hash_size
        );
    }

    /// Drop tombstones, halving the cells while the live set allows
    fn shrink(&mut self) {
        let live = self.elts_count() - self.elts_deleted_count;
        let new_elts_size = ELTS_INITIAL_SIZE.max(live);

        let mut new_hash_size = self.hash_mask + 1;
        while new_hash_size / 2 >= new_elts_size {
            new_hash_size /= 2;
        }

        let mut elts = Vec::with_capacity(new_elts_size as usize);
        elts.extend(self.elts.drain(..).filter(|e| e.value.is_some()));

        log::trace!(
            "flathsh shrink: elts {} -> {}, cells {} -> {}",
            self.elts_size,
            new_elts_size,
            self.hash_mask + 1,
            new_hash_size
        );

        self.elts = elts;
        self.elts_size = new_elts_size;
        self.elts_deleted_count = 0;
        self.hash_mask = new_hash_size - 1;
        self.cells = vec![0; new_hash_size as usize].into_boxed_slice();
        self.relink();
    }
}

#[derive(Debug, Clone)]
enum Slot<T> {
    Unallocated,
    Released,
    Live(Box<Descr<T>>),
}

/// Outcome of [`FlatHash::insert`]
#[derive(Debug, PartialEq)]
pub enum Insert<'a, T> {
    /// A new element was appended
    Inserted,
    /// The key existed and `replace` was requested; carries the old value
    Replaced(T),
    /// The key existed and was left untouched
    Present(&'a T),
}

/// Iteration cursor for [`FlatHash::each`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Each {
    cp: u32,
}

impl Each {
    pub const fn new() -> Self {
        Each { cp: 0 }
    }
}

/// Insertion-ordered hash table keyed by unique 32-bit hashes
#[derive(Debug, Clone)]
pub struct FlatHash<T> {
    slot: Slot<T>,
}

impl<T> FlatHash<T> {
    pub const fn new() -> Self {
        FlatHash {
            slot: Slot::Unallocated,
        }
    }

    #[inline]
    fn descr(&self) -> Option<&Descr<T>> {
        match &self.slot {
            Slot::Live(h) => Some(h),
            _ => None,
        }
    }

    /// Number of live elements
    pub fn len(&self) -> usize {
        self.descr()
            .map_or(0, |h| (h.elts_count() - h.elts_deleted_count) as usize)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Storage is currently allocated
    #[inline]
    pub fn is_allocated(&self) -> bool {
        matches!(self.slot, Slot::Live(_))
    }

    /// Storage was allocated once and released after every key was deleted
    #[inline]
    pub fn is_released(&self) -> bool {
        matches!(self.slot, Slot::Released)
    }

    /// Number of hash cells (0 when unallocated)
    pub fn hash_size(&self) -> usize {
        self.descr().map_or(0, |h| (h.hash_mask + 1) as usize)
    }

    /// Capacity of the element array (0 when unallocated)
    pub fn elts_size(&self) -> usize {
        self.descr().map_or(0, |h| h.elts_size as usize)
    }

    /// Elements used so far, tombstones included
    pub fn elts_count(&self) -> usize {
        self.descr().map_or(0, |h| h.elts_count() as usize)
    }

    pub fn deleted_count(&self) -> usize {
        self.descr().map_or(0, |h| h.elts_deleted_count as usize)
    }

    pub fn find(&self, key_hash: u32) -> Option<&T> {
        let h = self.descr()?;
        let idx = h.find_index(key_hash)?;
        h.elts[idx].value.as_ref()
    }

    pub fn find_mut(&mut self, key_hash: u32) -> Option<&mut T> {
        let Slot::Live(h) = &mut self.slot else {
            return None;
        };
        let idx = h.find_index(key_hash)?;
        h.elts[idx].value.as_mut()
    }

    #[inline]
    pub fn contains(&self, key_hash: u32) -> bool {
        self.find(key_hash).is_some()
    }

    /// Insert `value` under `key_hash`
    ///
    /// An existing key is overwritten only when `replace` is set.
    pub fn insert(&mut self, key_hash: u32, value: T, replace: bool) -> Insert<'_, T> {
        if !self.is_allocated() {
            self.slot = Slot::Live(Box::new(Descr::new(HASH_INITIAL_SIZE, ELTS_INITIAL_SIZE)));
        }
        let Slot::Live(h) = &mut self.slot else {
            return Insert::Inserted;
        };

        if let Some(idx) = h.find_index(key_hash) {
            let elt = &mut h.elts[idx];
            if replace {
                return match elt.value.replace(value) {
                    Some(old) => Insert::Replaced(old),
                    None => Insert::Inserted,
                };
            }
            return match elt.value.as_ref() {
                Some(existing) => Insert::Present(existing),
                None => Insert::Inserted,
            };
        }

        if h.elts_count() == h.elts_size {
            h.expand();
        }

        let cell = h.cell(key_hash);
        h.elts.push(Element {
            key_hash,
            next: h.cells[cell],
            value: Some(value),
        });
        h.cells[cell] = h.elts_count();
        Insert::Inserted
    }

    /// Remove `key_hash`, returning its value
    pub fn delete(&mut self, key_hash: u32) -> Option<T> {
        let Slot::Live(h) = &mut self.slot else {
            return None;
        };

        let cell = h.cell(key_hash);
        let mut prev: Option<usize> = None;
        let mut idx = h.cells[cell];

        while idx != 0 {
            let i = (idx - 1) as usize;
            if h.elts[i].key_hash != key_hash {
                prev = Some(i);
                idx = h.elts[i].next;
                continue;
            }

            let next = h.elts[i].next;
            match prev {
                Some(p) => h.elts[p].next = next,
                None => h.cells[cell] = next,
            }
            let value = h.elts[i].value.take();
            h.elts_deleted_count += 1;

            if h.elts_deleted_count >= ELTS_MINIMUM_TO_SHRINK
                && h.elts_deleted_count >= h.elts_count() / ELTS_FRACTION_TO_SHRINK
            {
                h.shrink();
            }

            if h.elts_deleted_count == h.elts_count() {
                log::trace!("flathsh release");
                self.slot = Slot::Released;
            }
            return value;
        }

        None
    }

    /// Advance `cursor` to the next live element, in insertion order
    pub fn each(&self, cursor: &mut Each) -> Option<(u32, &T)> {
        let h = self.descr()?;
        while (cursor.cp as usize) < h.elts.len() {
            let elt = &h.elts[cursor.cp as usize];
            cursor.cp += 1;
            if let Some(value) = &elt.value {
                return Some((elt.key_hash, value));
            }
        }
        None
    }

    /// Iterate live `(key_hash, value)` pairs in insertion order
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            table: self,
            cursor: Each::new(),
        }
    }

    /// Drop every element and release storage
    pub fn clear(&mut self) {
        if self.is_allocated() {
            self.slot = Slot::Released;
        }
    }
}

impl<T> Default for FlatHash<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a [`FlatHash`]
pub struct Iter<'a, T> {
    table: &'a FlatHash<T>,
    cursor: Each,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (u32, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.table.each(&mut self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_allocation() {
        let mut t: FlatHash<i32> = FlatHash::new();
        assert!(!t.is_allocated());
        assert!(t.find(1).is_none());
        assert!(t.delete(1).is_none());
        assert_eq!(t.insert(1, 10, false), Insert::Inserted);
        assert!(t.is_allocated());
        assert_eq!(t.hash_size(), 4);
        assert_eq!(t.elts_size(), 2);
    }

    #[test]
    fn test_insert_find_replace() {
        let mut t = FlatHash::new();
        assert_eq!(t.insert(7, "a", false), Insert::Inserted);
        assert_eq!(t.insert(7, "b", false), Insert::Present(&"a"));
        assert_eq!(t.find(7), Some(&"a"));
        assert_eq!(t.insert(7, "c", true), Insert::Replaced("a"));
        assert_eq!(t.find(7), Some(&"c"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_colliding_cells() {
        let mut t = FlatHash::new();
        // 4 cells initially: 1, 5, 9 share a chain until expansion
        for k in [1u32, 5, 9, 13] {
            t.insert(k, k * 10, false);
        }
        for k in [1u32, 5, 9, 13] {
            assert_eq!(t.find(k), Some(&(k * 10)));
        }
        assert_eq!(t.delete(5), Some(50));
        assert_eq!(t.find(5), None);
        assert_eq!(t.find(9), Some(&90));
        assert_eq!(t.find(1), Some(&10));
    }

    #[test]
    fn test_expansion_sizes() {
        let mut t = FlatHash::new();
        t.insert(1, (), false);
        t.insert(2, (), false);
        assert_eq!(t.elts_size(), 2);
        t.insert(3, (), false);
        // max(2 + 1, 2 * 3 / 2) = 3, cells stay at 4
        assert_eq!(t.elts_size(), 3);
        assert_eq!(t.hash_size(), 4);
        t.insert(4, (), false);
        // max(4, 4) = 4
        assert_eq!(t.elts_size(), 4);
        t.insert(5, (), false);
        // max(5, 6) = 6, cells double to 8
        assert_eq!(t.elts_size(), 6);
        assert_eq!(t.hash_size(), 8);
        for k in 1..=5 {
            assert!(t.contains(k));
        }
    }

    #[test]
    fn test_insertion_order_iteration() {
        let mut t = FlatHash::new();
        for k in [30u32, 10, 20, 40] {
            t.insert(k, k, false);
        }
        t.delete(10);
        let keys: Vec<u32> = t.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![30, 20, 40]);

        let mut cursor = Each::new();
        assert_eq!(t.each(&mut cursor), Some((30, &30)));
        assert_eq!(t.each(&mut cursor), Some((20, &20)));
        assert_eq!(t.each(&mut cursor), Some((40, &40)));
        assert_eq!(t.each(&mut cursor), None);
    }

    #[test]
    fn test_tombstones_and_shrink() {
        let mut t = FlatHash::new();
        for k in 0..20u32 {
            t.insert(k, k, false);
        }
        for k in 0..7u32 {
            t.delete(k);
        }
        assert_eq!(t.deleted_count(), 7);
        assert_eq!(t.elts_count(), 20);

        for k in 7..10u32 {
            t.delete(k);
        }
        // 10 deleted >= 8 and >= 20 / 2: compacted
        assert_eq!(t.deleted_count(), 0);
        assert_eq!(t.elts_count(), 10);
        assert_eq!(t.elts_size(), 10);
        assert_eq!(t.hash_size(), 16);
        for k in 10..20u32 {
            assert_eq!(t.find(k), Some(&k));
        }
        let keys: Vec<u32> = t.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, (10..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_release_when_empty() {
        let mut t = FlatHash::new();
        t.insert(1, 'a', false);
        t.insert(2, 'b', false);
        t.delete(1);
        assert!(t.is_allocated());
        t.delete(2);
        assert!(t.is_released());
        assert!(t.is_empty());
        assert_eq!(t.hash_size(), 0);

        assert_eq!(t.insert(3, 'c', false), Insert::Inserted);
        assert!(t.is_allocated());
        assert_eq!(t.find(3), Some(&'c'));
    }

    #[test]
    fn test_find_mut() {
        let mut t = FlatHash::new();
        t.insert(9, 1, false);
        if let Some(v) = t.find_mut(9) {
            *v += 41;
        }
        assert_eq!(t.find(9), Some(&42));
        assert!(t.find_mut(10).is_none());
    }
}
