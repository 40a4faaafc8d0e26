//! Reusable object pool (factory) rewound once per processing unit.
//!
//! Items are built once and handed out again after every [`Pool::reset`];
//! nothing is destroyed or reconstructed in steady state. Each item lives in
//! its own box, so growth moves only the box pointers and the address of an
//! issued item never changes for the lifetime of the pool.

use cascade_types::{CascadeError, Result};

/// Reference to an item checked out of a [`Pool`].
///
/// Handles carry the pool generation they were issued in; once the pool is
/// reset they no longer resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    index: usize,
    generation: u64,
}

impl PoolHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug)]
pub struct Pool<T> {
    items: Vec<Box<T>>,
    cursor: usize,
    generation: u64,
    ceiling: Option<usize>,
}

impl<T: Default> Pool<T> {
    /// An empty pool; the first [`next`](Pool::next) grows it to one item.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            cursor: 0,
            generation: 0,
            ceiling: None,
        }
    }

    /// A pool with `n` items pre-built.
    pub fn with_capacity(n: usize) -> Self {
        let mut pool = Self::new();
        pool.initialize(n);
        pool
    }

    /// Refuse to grow past `max` items. Hitting the ceiling is fatal.
    pub fn with_ceiling(mut self, max: usize) -> Self {
        self.ceiling = Some(max);
        self
    }

    /// Discard everything and pre-build `n` default items.
    pub fn initialize(&mut self, n: usize) {
        self.items.clear();
        self.items.extend((0..n).map(|_| Box::<T>::default()));
        self.cursor = 0;
        self.generation += 1;
    }

    /// Rewind to the first item. O(1): items are kept as they are.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.generation += 1;
    }

    /// Check out the next item, doubling capacity first when full.
    pub fn next(&mut self) -> Result<PoolHandle> {
        if self.cursor == self.items.len() {
            self.grow()?;
        }
        let handle = PoolHandle {
            index: self.cursor,
            generation: self.generation,
        };
        self.cursor += 1;
        debug_assert!(self.cursor <= self.items.len());
        Ok(handle)
    }

    /// Check out the next item and borrow it for filling.
    pub fn next_mut(&mut self) -> Result<&mut T> {
        let handle = self.next()?;
        Ok(&mut self.items[handle.index])
    }

    fn grow(&mut self) -> Result<()> {
        let capacity = self.items.len();
        let target = if capacity == 0 { 1 } else { capacity * 2 };
        if self.ceiling.is_some_and(|max| target > max) {
            return Err(CascadeError::PoolExhausted { capacity });
        }
        self.items
            .try_reserve_exact(target - capacity)
            .map_err(|_| CascadeError::PoolExhausted { capacity })?;
        self.items
            .extend((capacity..target).map(|_| Box::<T>::default()));
        tracing::debug!(from = capacity, to = target, "Pool grown");
        Ok(())
    }
}

impl<T> Pool<T> {
    /// Resolve a handle issued in the current generation.
    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        self.is_live(handle).then(|| &*self.items[handle.index])
    }

    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        if self.is_live(handle) {
            Some(&mut *self.items[handle.index])
        } else {
            None
        }
    }

    fn is_live(&self, handle: PoolHandle) -> bool {
        handle.generation == self.generation && handle.index < self.cursor
    }

    /// Items checked out since the last reset, in issue order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items[..self.cursor].iter().map(|b| &**b)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items[..self.cursor].iter_mut().map(|b| &mut **b)
    }

    pub fn capacity(&self) -> usize {
        self.items.len()
    }

    /// Number of items checked out in the active unit.
    pub fn size(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Index of the most recently issued item.
    pub fn last_index(&self) -> Option<usize> {
        self.cursor.checked_sub(1)
    }
}

impl<T: Default> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}
