//! A buddy pool backed by memory from the global allocator.
//!
//! [`BuddyPool`] pairs a [`BuddyTree`] with the region it describes. Blocks
//! are handed out as `NonNull<[u8]>` whose length is the full block size; the
//! pool keeps no metadata inside the region, so the contents of a block are
//! never disturbed by the pool except through [`BuddyPool::reallocate`].

use core::{
    alloc::Layout,
    fmt, mem,
    ptr::{self, NonNull},
};

#[cfg(feature = "log")]
use log::{debug, warn};

use crate::{
    base::BasePtr, math::Geometry, tree::BuddyTree, AllocError, AllocInitError, Dump, FreeError,
    ReallocError,
};

/// A fixed-capacity binary-buddy memory pool.
///
/// The pool owns a single region whose size is `capacity` rounded up to a
/// power of two. The region is released when the pool is dropped, which
/// invalidates every outstanding block.
///
/// ```
/// use buddy_pool::{AllocError, BuddyPool};
///
/// let mut pool = BuddyPool::try_new(1024).unwrap();
///
/// let whole = pool.allocate(1024).unwrap();
/// assert_eq!(pool.allocate(1024), Err(AllocError::OutOfMemory));
///
/// pool.deallocate(whole.cast()).unwrap();
/// assert!(pool.allocate(1024).is_ok());
/// ```
pub struct BuddyPool {
    base: BasePtr,
    layout: Layout,
    tree: BuddyTree,
}

// SAFETY: the pool has exclusive ownership of its region; the raw base pointer
// is never shared except through blocks handed out to the caller.
unsafe impl Send for BuddyPool {}

impl BuddyPool {
    /// Attempts to construct a pool holding at least `capacity` bytes, with a
    /// granularity of one `usize`.
    ///
    /// # Errors
    ///
    /// See [`BuddyPool::try_with_granularity`].
    pub fn try_new(capacity: usize) -> Result<BuddyPool, AllocInitError> {
        Self::try_with_granularity(capacity, mem::size_of::<usize>())
    }

    /// Attempts to construct a pool holding at least `capacity` bytes, whose
    /// smallest block is `granularity` bytes.
    ///
    /// The region is allocated from the global allocator, aligned to its own
    /// size, and zero-initialized. Every block address is therefore aligned
    /// to the block's size.
    ///
    /// # Errors
    ///
    /// - [`AllocInitError::InvalidConfig`] if `granularity` is not a power of
    ///   two at least as large as a `usize`, if `capacity` is smaller than
    ///   `granularity`, or if the rounded-up capacity is not representable.
    /// - [`AllocInitError::AllocFailed`] if the global allocator cannot
    ///   provide the region.
    pub fn try_with_granularity(
        capacity: usize,
        granularity: usize,
    ) -> Result<BuddyPool, AllocInitError> {
        if granularity < mem::size_of::<usize>() {
            return Err(AllocInitError::InvalidConfig);
        }

        let geometry = Geometry::new(capacity, granularity).ok_or(AllocInitError::InvalidConfig)?;

        let layout = Layout::from_size_align(geometry.pool_size(), geometry.pool_size())
            .map_err(|_| AllocInitError::InvalidConfig)?;

        let region = unsafe {
            // SAFETY: `layout` has a nonzero size, as the pool holds at least
            // one granule.
            let raw = alloc::alloc::alloc_zeroed(layout);
            NonNull::new(raw).ok_or(AllocInitError::AllocFailed(layout))?
        };

        debug!(
            "buddy pool: created {} byte pool at {:p} ({} levels, granularity {})",
            geometry.pool_size(),
            region,
            geometry.num_levels(),
            granularity
        );

        Ok(BuddyPool {
            base: BasePtr::new(region, geometry.pool_size()),
            layout,
            tree: BuddyTree::new(geometry),
        })
    }

    /// The size of the pool in bytes. Always a power of two.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.tree.geometry().pool_size()
    }

    /// The smallest block size the pool hands out.
    #[inline]
    pub fn granularity(&self) -> usize {
        self.tree.geometry().granularity()
    }

    /// The deepest level of the pool.
    #[inline]
    pub fn max_depth(&self) -> usize {
        self.tree.geometry().max_depth()
    }

    /// Returns the underlying bookkeeping.
    #[inline]
    pub fn tree(&self) -> &BuddyTree {
        &self.tree
    }

    /// Returns the block beginning at `offset` as a slice pointer.
    fn block_at(&self, offset: usize) -> NonNull<[u8]> {
        let size = self
            .block_size_at(offset)
            .expect("block is not allocated");

        self.base.with_offset_and_size(offset, size)
    }

    fn block_size_at(&self, offset: usize) -> Option<usize> {
        let level = self.tree.level_of(offset)?;
        Some(self.tree.geometry().size_of_level(level))
    }

    /// Attempts to allocate a block of at least `size` bytes.
    ///
    /// On success, returns a [`NonNull<[u8]>`] spanning the whole block. The
    /// block's address is aligned to its own size.
    ///
    /// The contents of the block are unspecified.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ZeroSize`] if `size` is zero.
    /// - [`AllocError::OutOfMemory`] if a suitable block could not be
    ///   produced.
    ///
    /// [`NonNull<[u8]>`]: NonNull
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, AllocError> {
        let offset = self.tree.allocate(size)?;

        Ok(self.block_at(offset))
    }

    /// Frees the block pointed to by `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`FreeError::NotAllocated`] if `ptr` does not point to the start
    /// of a block currently allocated from this pool. The pool is unchanged in
    /// that case.
    pub fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        let offset = self.base.offset_to(ptr).ok_or_else(|| {
            warn!("buddy pool: free of foreign pointer {:p}", ptr);
            FreeError::NotAllocated
        })?;

        self.tree.free(offset)?;

        Ok(())
    }

    /// Resizes the block pointed to by `ptr` to hold at least `new_size`
    /// bytes.
    ///
    /// If `new_size` rounds to the block's current size, the same block is
    /// returned untouched. Otherwise the old block is freed and a new one
    /// allocated, and the leading `min(old size, new size)` bytes are carried
    /// over. The new block may overlap or coincide with the old one, so the
    /// returned pointer must be used in place of `ptr` from then on.
    ///
    /// # Errors
    ///
    /// - [`ReallocError::NotAllocated`] if `ptr` is not an allocated block.
    /// - [`ReallocError::Alloc`] if a block of `new_size` cannot be produced.
    ///
    /// On error, `ptr` remains allocated and its contents are unchanged.
    pub fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<[u8]>, ReallocError> {
        let offset = self
            .base
            .offset_to(ptr)
            .ok_or(ReallocError::NotAllocated)?;

        let reloc = self.tree.reallocate(offset, new_size)?;

        if !reloc.in_place() {
            let src = self.base.with_offset(reloc.from);
            let dst = self.base.with_offset(reloc.to);

            // SAFETY: both ranges lie within the region, which is initialized
            // and exclusively owned by the pool. `ptr::copy` permits overlap.
            unsafe { ptr::copy(src.as_ptr(), dst.as_ptr(), reloc.len) };
        }

        Ok(self.block_at(reloc.to))
    }

    /// Returns the size of the allocated block pointed to by `ptr`.
    pub fn block_size_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.block_size_at(self.base.offset_to(ptr)?)
    }

    /// Captures the state of every block in the pool.
    pub fn dump(&self) -> Dump {
        self.tree.dump()
    }
}

impl Drop for BuddyPool {
    fn drop(&mut self) {
        // SAFETY: the region was allocated from the global allocator with
        // `self.layout` and has not been freed.
        unsafe { alloc::alloc::dealloc(self.base.ptr().as_ptr(), self.layout) };
    }
}

impl fmt::Debug for BuddyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyPool")
            .field("base", &self.base.ptr())
            .field("capacity", &self.capacity())
            .field("granularity", &self.granularity())
            .field("allocated", &self.tree.num_allocated())
            .finish()
    }
}
