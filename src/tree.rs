//! The offset-only buddy engine.
//!
//! [`BuddyTree`] performs all of the bookkeeping of a buddy pool without
//! touching any memory: blocks are identified by their offset from the start
//! of the pool and the level they were carved from. [`BuddyPool`] layers the
//! backing region and address translation on top of it.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! | Operation                | Best-case | Worst-case                    |
//! |--------------------------|-----------|-------------------------------|
//! | Allocate                 | O(1)      | O(levels)                     |
//! | Free                     | O(log n)  | O(levels × free list length)  |
//! | Reallocate               | O(log n)  | O(levels × free list length)  |
//!
//! where _n_ is the number of outstanding allocations.
//!
//! #### Fragmentation
//!
//! Requests are rounded up to a power of two no smaller than the granularity,
//! so internal fragmentation is bounded by just under half of each block.
//! External fragmentation is limited by coalescing: a block is merged with its
//! buddy as soon as both are free.
//!
//! [`BuddyPool`]: crate::BuddyPool

use core::cmp;

#[cfg(feature = "log")]
use log::{debug, info, trace, warn};

use crate::{
    dump::{BlockInfo, Dump},
    free_list::FreeLists,
    ledger::Ledger,
    math::Geometry,
    AllocError, FreeError, ReallocError,
};

use alloc::vec::Vec;

/// The outcome of a successful [`BuddyTree::reallocate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Relocation {
    /// Offset of the block before the call.
    pub from: usize,
    /// Offset of the block after the call. May equal `from`.
    pub to: usize,
    /// The number of bytes to carry over from `from` to `to`.
    ///
    /// This is the smaller of the old and new block sizes. The two ranges may
    /// overlap.
    pub len: usize,
}

impl Relocation {
    /// Returns `true` if the block did not move.
    #[inline]
    pub fn in_place(&self) -> bool {
        self.from == self.to
    }
}

/// A buddy taken off the free list at `level`, and where it was.
#[derive(Copy, Clone, Debug)]
struct Merge {
    level: usize,
    index: usize,
    buddy: usize,
}

/// A binary-buddy allocator over pool offsets.
///
/// The tree starts with a single free block spanning the whole pool at level
/// 0. Blocks are split on demand when a level's free list runs dry and are
/// coalesced with their buddy when freed.
///
/// ```
/// use buddy_pool::{BuddyTree, Geometry};
///
/// let mut tree = BuddyTree::new(Geometry::new(1024, 8).unwrap());
///
/// let a = tree.allocate(256).unwrap();
/// let b = tree.allocate(256).unwrap();
/// assert_eq!((a, b), (0, 256));
///
/// tree.free(a).unwrap();
/// tree.free(b).unwrap();
/// assert_eq!(tree.free_blocks(0).collect::<Vec<_>>(), [0]);
/// ```
#[derive(Clone, Debug)]
pub struct BuddyTree {
    geometry: Geometry,
    free: FreeLists,
    ledger: Ledger,
}

impl BuddyTree {
    /// Creates a tree with the whole pool free.
    pub fn new(geometry: Geometry) -> BuddyTree {
        let mut free = FreeLists::new(geometry.num_levels());
        free.push(0, 0);

        BuddyTree {
            geometry,
            free,
            ledger: Ledger::new(),
        }
    }

    /// Returns the shape of the pool managed by this tree.
    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Allocates a block of at least `size` bytes, returning its offset.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ZeroSize`] if `size` is zero.
    /// - [`AllocError::OutOfMemory`] if `size` exceeds the pool or no block of
    ///   the required level can be produced.
    pub fn allocate(&mut self, size: usize) -> Result<usize, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let level = match self.geometry.level_for_request(size) {
            Some(l) => l,
            None => {
                info!(
                    "buddy pool: request of {} bytes exceeds pool size {}",
                    size,
                    self.geometry.pool_size()
                );
                return Err(AllocError::OutOfMemory);
            }
        };

        let offset = match self.find_free_block_on_level(level) {
            Some(ofs) => ofs,
            None => {
                info!(
                    "buddy pool: no free block on level {} for {} bytes",
                    level, size
                );
                return Err(AllocError::OutOfMemory);
            }
        };

        self.ledger.insert(offset, level);
        debug!(
            "buddy pool: allocated {:#x} (level {}, {} bytes) for {} bytes",
            offset,
            level,
            self.geometry.size_of_level(level),
            size
        );

        Ok(offset)
    }

    /// Takes a free block from `level`, splitting blocks from the levels
    /// above as needed.
    ///
    /// When a parent is split, both halves are queued and the front half is
    /// returned.
    fn find_free_block_on_level(&mut self, level: usize) -> Option<usize> {
        if self.free.is_empty(level) {
            let parent = self.find_free_block_on_level(level.checked_sub(1)?)?;
            let half = self.geometry.size_of_level(level);

            trace!(
                "buddy pool: split {:#x} into two level {} blocks",
                parent,
                level
            );

            self.free.push(level, parent);
            self.free.push(level, parent + half);
        }

        self.free.pop(level)
    }

    /// Frees the block at `offset`, coalescing it with its buddy as far up as
    /// possible. Returns the level the block was allocated from.
    ///
    /// # Errors
    ///
    /// Returns [`FreeError::NotAllocated`] if no block is allocated at
    /// `offset`. The tree is left unchanged.
    pub fn free(&mut self, offset: usize) -> Result<usize, FreeError> {
        let level = match self.ledger.remove(offset) {
            Some(l) => l,
            None => {
                warn!("buddy pool: free of unallocated offset {:#x}", offset);
                return Err(FreeError::NotAllocated);
            }
        };

        self.release(offset, level, None);
        debug!("buddy pool: freed {:#x} (level {})", offset, level);

        Ok(level)
    }

    /// Returns a block that is no longer in the ledger to the free lists.
    ///
    /// If `merges` is given, every buddy taken off a free list is recorded
    /// there so the release can be undone by [`BuddyTree::unrelease`].
    fn release(&mut self, offset: usize, level: usize, mut merges: Option<&mut Vec<Merge>>) {
        let buddy = self.geometry.buddy_of(offset, level);
        let parent = self.geometry.parent_of(offset, level);

        if let (Some(buddy), Some(parent)) = (buddy, parent) {
            // Locate the buddy first and only then mutate the list.
            if let Some(index) = self.free.position(level, buddy) {
                self.free.remove_at(level, index);

                if let Some(m) = merges.as_deref_mut() {
                    m.push(Merge {
                        level,
                        index,
                        buddy,
                    });
                }

                trace!(
                    "buddy pool: coalesce {:#x} and {:#x} into level {}",
                    offset,
                    buddy,
                    level - 1
                );

                return self.release(parent, level - 1, merges);
            }
        }

        self.free.push(level, offset);
    }

    /// Reverses the release of the block at `offset` on `level`, restoring
    /// every free list to its exact prior order and recording the block as
    /// allocated again.
    ///
    /// The free lists must not have been modified since the release.
    fn unrelease(&mut self, offset: usize, level: usize, merges: &[Merge]) {
        debug_assert!(self.geometry.is_block_start(offset, level));

        let top = level - merges.len();
        let merged = self.free.pop_back(top);
        debug_assert_eq!(
            merged,
            Some(offset & !(self.geometry.size_of_level(top) - 1))
        );

        for m in merges.iter().rev() {
            self.free.insert_at(m.level, m.index, m.buddy);
        }

        self.ledger.insert(offset, level);
    }

    /// Resizes the block at `offset` to hold at least `new_size` bytes.
    ///
    /// If `new_size` maps to the block's current level, nothing changes and the
    /// returned [`Relocation`] is in place. Otherwise the old block is freed
    /// before the new one is allocated, so the new block may overlap or equal
    /// the old one.
    ///
    /// The caller is responsible for moving [`Relocation::len`] bytes.
    ///
    /// # Errors
    ///
    /// - [`ReallocError::NotAllocated`] if no block is allocated at `offset`.
    /// - [`ReallocError::Alloc`] if `new_size` is zero or cannot be satisfied.
    ///
    /// On error the original block remains allocated at `offset`.
    pub fn reallocate(
        &mut self,
        offset: usize,
        new_size: usize,
    ) -> Result<Relocation, ReallocError> {
        let old_level = self.ledger.get(offset).ok_or(ReallocError::NotAllocated)?;

        if new_size == 0 {
            return Err(AllocError::ZeroSize.into());
        }

        let new_level = self
            .geometry
            .level_for_request(new_size)
            .ok_or(AllocError::OutOfMemory)?;

        let old_size = self.geometry.size_of_level(old_level);

        if new_level == old_level {
            return Ok(Relocation {
                from: offset,
                to: offset,
                len: old_size,
            });
        }

        let mut merges = Vec::new();
        self.ledger.remove(offset);
        self.release(offset, old_level, Some(&mut merges));

        let to = match self.find_free_block_on_level(new_level) {
            Some(ofs) => ofs,
            None => {
                // A failed search leaves the free lists untouched, so the
                // release can be reversed exactly.
                self.unrelease(offset, old_level, &merges);

                info!(
                    "buddy pool: cannot grow {:#x} to {} bytes",
                    offset, new_size
                );
                return Err(AllocError::OutOfMemory.into());
            }
        };

        self.ledger.insert(to, new_level);

        let len = cmp::min(old_size, self.geometry.size_of_level(new_level));
        debug!(
            "buddy pool: reallocated {:#x} (level {}) to {:#x} (level {})",
            offset, old_level, to, new_level
        );

        Ok(Relocation {
            from: offset,
            to,
            len,
        })
    }

    /// Returns the level of the allocated block at `offset`.
    #[inline]
    pub fn level_of(&self, offset: usize) -> Option<usize> {
        self.ledger.get(offset)
    }

    /// Returns the number of outstanding allocations.
    #[inline]
    pub fn num_allocated(&self) -> usize {
        self.ledger.len()
    }

    /// Iterates over the free blocks at `level` in the order they will be
    /// handed out.
    ///
    /// Levels deeper than [`Geometry::max_depth`] have no free blocks.
    pub fn free_blocks(&self, level: usize) -> impl Iterator<Item = usize> + '_ {
        self.free.level(level)
    }

    /// Captures the current state of the tree.
    pub fn dump(&self) -> Dump {
        let info = |(offset, level): (usize, usize)| BlockInfo {
            offset,
            level,
            size: self.geometry.size_of_level(level),
        };

        let allocated: Vec<BlockInfo> = self.ledger.iter().map(info).collect();

        let mut free: Vec<BlockInfo> = self
            .free
            .iter()
            .map(|(level, offset)| info((offset, level)))
            .collect();
        free.sort_by_key(|b| b.offset);

        Dump {
            pool_size: self.geometry.pool_size(),
            allocated,
            free,
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::prelude::rust_2021::*;

    use super::*;

    fn tree(capacity: usize) -> BuddyTree {
        BuddyTree::new(Geometry::new(capacity, 8).unwrap())
    }

    #[test]
    fn starts_with_one_free_block() {
        let t = tree(1024);
        let dump = t.dump();

        assert!(dump.allocated.is_empty());
        assert_eq!(
            dump.free,
            [BlockInfo {
                offset: 0,
                level: 0,
                size: 1024
            }]
        );
    }

    #[test]
    fn split_returns_front_half() {
        let mut t = tree(1024);

        assert_eq!(t.allocate(256), Ok(0));
        assert_eq!(t.free_blocks(1).collect::<Vec<_>>(), [512]);
        assert_eq!(t.free_blocks(2).collect::<Vec<_>>(), [256]);

        assert_eq!(t.allocate(8), Ok(256));
        assert_eq!(t.level_of(256), Some(7));
    }

    #[test]
    fn whole_pool_then_exhausted() {
        let mut t = tree(1024);

        assert_eq!(t.allocate(1024), Ok(0));
        assert_eq!(t.allocate(1024), Err(AllocError::OutOfMemory));
        assert_eq!(t.allocate(8), Err(AllocError::OutOfMemory));
    }

    #[test]
    fn zero_and_oversize() {
        let mut t = tree(64);

        assert_eq!(t.allocate(0), Err(AllocError::ZeroSize));
        assert_eq!(t.allocate(1000), Err(AllocError::OutOfMemory));
        assert_eq!(t.dump().free.len(), 1);
    }

    #[test]
    fn free_list_is_fifo() {
        let mut t = tree(1024);

        let blocks: Vec<usize> = (0..4).map(|_| t.allocate(64).unwrap()).collect();
        assert_eq!(blocks, [0, 64, 128, 192]);

        // Neither buddy is free, so both go to the back of level 4.
        t.free(192).unwrap();
        t.free(0).unwrap();
        assert_eq!(t.free_blocks(4).collect::<Vec<_>>(), [192, 0]);

        assert_eq!(t.allocate(64), Ok(192));
        assert_eq!(t.allocate(64), Ok(0));
    }

    #[test]
    fn coalescing_chain() {
        let mut t = tree(1024);

        let a = t.allocate(256).unwrap();
        let b = t.allocate(256).unwrap();

        t.free(a).unwrap();
        assert_eq!(t.free_blocks(2).collect::<Vec<_>>(), [a]);

        t.free(b).unwrap();
        for level in 1..=t.geometry().max_depth() {
            assert_eq!(t.free_blocks(level).count(), 0);
        }
        assert_eq!(t.free_blocks(0).collect::<Vec<_>>(), [0]);
    }

    #[test]
    fn coalescing_stops_at_live_buddy() {
        let mut t = tree(1024);

        let a = t.allocate(128).unwrap();
        let b = t.allocate(128).unwrap();
        let c = t.allocate(256).unwrap();

        t.free(a).unwrap();
        t.free(b).unwrap();

        // a and b merge into [0, 256), whose buddy `c` is still live.
        assert_eq!(t.free_blocks(2).collect::<Vec<_>>(), [0]);
        assert_eq!(t.free_blocks(3).count(), 0);

        t.free(c).unwrap();
        assert_eq!(t.free_blocks(0).collect::<Vec<_>>(), [0]);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut t = tree(1024);

        let a = t.allocate(16).unwrap();
        t.free(a).unwrap();
        let before = t.dump();

        assert_eq!(t.free(a), Err(FreeError::NotAllocated));
        assert_eq!(t.free(3), Err(FreeError::NotAllocated));
        assert_eq!(t.dump(), before);
    }

    #[test]
    fn realloc_same_level_is_in_place() {
        let mut t = tree(1024);

        let p = t.allocate(100).unwrap();
        let before = t.dump();

        let r = t.reallocate(p, 120).unwrap();
        assert!(r.in_place());
        assert_eq!(r.to, p);
        assert_eq!(t.dump(), before);
    }

    #[test]
    fn realloc_shrink_may_return_same_offset() {
        let mut t = tree(1024);

        let p = t.allocate(256).unwrap();
        let r = t.reallocate(p, 32).unwrap();

        assert_eq!(r.to, p);
        assert_eq!(r.len, 32);
        assert_eq!(t.level_of(p), Some(5));
    }

    #[test]
    fn realloc_grow_moves() {
        let mut t = tree(1024);

        let _a = t.allocate(64).unwrap();
        let b = t.allocate(64).unwrap();

        let r = t.reallocate(b, 256).unwrap();
        assert_eq!(r.from, b);
        assert_eq!(r.to, 256);
        assert_eq!(r.len, 64);
        assert_eq!(t.level_of(b), None);
        assert_eq!(t.level_of(256), Some(2));
    }

    #[test]
    fn failed_realloc_keeps_old_block() {
        let mut t = tree(1024);

        let _a = t.allocate(256).unwrap();
        let b = t.allocate(256).unwrap();
        let _c = t.allocate(512).unwrap();
        let before = t.dump();

        assert_eq!(
            t.reallocate(b, 512),
            Err(ReallocError::Alloc(AllocError::OutOfMemory))
        );
        assert_eq!(t.level_of(b), Some(2));
        assert_eq!(t.dump(), before);

        assert_eq!(
            t.reallocate(b, 4096),
            Err(ReallocError::Alloc(AllocError::OutOfMemory))
        );
        assert_eq!(
            t.reallocate(b, 0),
            Err(ReallocError::Alloc(AllocError::ZeroSize))
        );
        assert_eq!(t.dump(), before);
    }

    #[test]
    fn failed_realloc_restores_deep_block() {
        let mut t = tree(1024);

        let a = t.allocate(8).unwrap();
        let b = t.allocate(8).unwrap();
        let _big = t.allocate(512).unwrap();
        t.free(a).unwrap();

        // Freeing b merges it all the way up to [0, 512) before the 1024-byte
        // request fails; b must be carved back out at offset 8.
        assert!(t.reallocate(b, 1024).is_err());
        assert_eq!(t.level_of(b), Some(7));
        assert!(t.dump().tiles_pool());
        assert_eq!(t.allocate(8), Ok(0));
    }

    #[test]
    fn failed_realloc_keeps_fifo_order() {
        let mut t = tree(1024);

        let blocks: Vec<usize> = (0..4).map(|_| t.allocate(64).unwrap()).collect();
        assert_eq!(blocks, [0, 64, 128, 192]);

        t.free(64).unwrap();
        t.free(192).unwrap();
        assert_eq!(t.free_blocks(4).collect::<Vec<_>>(), [64, 192]);

        // Freeing 0 merges it with 64 before the request fails.
        assert!(t.reallocate(0, 1024).is_err());
        assert_eq!(t.level_of(0), Some(4));
        assert_eq!(t.free_blocks(3).count(), 0);
        assert_eq!(t.free_blocks(4).collect::<Vec<_>>(), [64, 192]);

        assert_eq!(t.allocate(64), Ok(64));
    }

    #[test]
    fn free_blocks_past_max_depth_is_empty() {
        let t = tree(1024);
        let depth = t.geometry().max_depth();

        assert_eq!(t.free_blocks(depth + 1).count(), 0);
        assert_eq!(t.free_blocks(usize::MAX).count(), 0);
    }

    #[test]
    fn realloc_unknown_offset() {
        let mut t = tree(1024);
        assert_eq!(t.reallocate(0, 8), Err(ReallocError::NotAllocated));
    }
}
