use alloc::{collections::VecDeque, vec::Vec};

/// Per-level queues of free block offsets.
///
/// Blocks are handed out oldest-first: [`FreeLists::pop`] takes from the front
/// and [`FreeLists::push`] appends to the back.
#[derive(Clone, Debug)]
pub struct FreeLists {
    levels: Vec<VecDeque<usize>>,
}

impl FreeLists {
    /// Creates `num_levels` empty free lists.
    pub fn new(num_levels: usize) -> FreeLists {
        let mut levels = Vec::with_capacity(num_levels);
        levels.resize_with(num_levels, VecDeque::new);

        FreeLists { levels }
    }

    /// Appends a block to the free list at `level`.
    #[inline]
    pub fn push(&mut self, level: usize, offset: usize) {
        self.levels[level].push_back(offset);
    }

    /// Takes the oldest block from the free list at `level`.
    #[inline]
    pub fn pop(&mut self, level: usize) -> Option<usize> {
        self.levels[level].pop_front()
    }

    /// Takes the most recently queued block from the free list at `level`.
    #[inline]
    pub fn pop_back(&mut self, level: usize) -> Option<usize> {
        self.levels[level].pop_back()
    }

    /// Puts `offset` back into the free list at `level` at position `index`.
    #[inline]
    pub fn insert_at(&mut self, level: usize, index: usize, offset: usize) {
        self.levels[level].insert(index, offset);
    }

    /// Returns the index of `offset` in the free list at `level`.
    #[inline]
    pub fn position(&self, level: usize, offset: usize) -> Option<usize> {
        self.levels[level].iter().position(|&ofs| ofs == offset)
    }

    /// Removes the entry at `index` from the free list at `level`.
    ///
    /// `index` must have been obtained from [`FreeLists::position`] with no
    /// intervening mutation of that list.
    #[inline]
    pub fn remove_at(&mut self, level: usize, index: usize) -> usize {
        self.levels[level]
            .remove(index)
            .expect("free list index out of bounds")
    }

    /// Returns `true` if the free list at `level` is empty.
    #[inline]
    pub fn is_empty(&self, level: usize) -> bool {
        self.levels[level].is_empty()
    }

    /// Iterates over the free blocks at `level`, oldest first.
    ///
    /// A level past the deepest one yields nothing.
    pub fn level(&self, level: usize) -> impl Iterator<Item = usize> + '_ {
        self.levels.get(level).into_iter().flatten().copied()
    }

    /// Iterates over every free block as `(level, offset)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .flat_map(|(level, list)| list.iter().map(move |&ofs| (level, ofs)))
    }
}
