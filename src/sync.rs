//! A thread-safe wrapper around [`BuddyPool`].
//!
//! Splitting and coalescing walk across levels, so the whole pool is guarded
//! by a single lock rather than one lock per level.

use std::{
    ptr::NonNull,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{AllocError, AllocInitError, BuddyPool, Dump, FreeError, ReallocError};

/// A [`BuddyPool`] guarded by a [`Mutex`].
///
/// Every operation takes the lock for its whole duration.
#[cfg_attr(docs_rs, doc(cfg(feature = "std")))]
#[derive(Debug)]
pub struct SyncBuddyPool {
    inner: Mutex<BuddyPool>,
}

impl SyncBuddyPool {
    /// Wraps an existing pool.
    pub fn new(pool: BuddyPool) -> SyncBuddyPool {
        SyncBuddyPool {
            inner: Mutex::new(pool),
        }
    }

    /// Attempts to construct a pool holding at least `capacity` bytes.
    ///
    /// See [`BuddyPool::try_new`].
    pub fn try_new(capacity: usize) -> Result<SyncBuddyPool, AllocInitError> {
        BuddyPool::try_new(capacity).map(SyncBuddyPool::new)
    }

    fn lock(&self) -> MutexGuard<'_, BuddyPool> {
        // The pool only panics on broken internal invariants, so a poisoned
        // lock still guards a pool in a state it produced itself.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// See [`BuddyPool::allocate`].
    pub fn allocate(&self, size: usize) -> Result<NonNull<[u8]>, AllocError> {
        self.lock().allocate(size)
    }

    /// See [`BuddyPool::deallocate`].
    pub fn deallocate(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        self.lock().deallocate(ptr)
    }

    /// See [`BuddyPool::reallocate`].
    pub fn reallocate(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<[u8]>, ReallocError> {
        self.lock().reallocate(ptr, new_size)
    }

    /// See [`BuddyPool::dump`].
    pub fn dump(&self) -> Dump {
        self.lock().dump()
    }

    /// Runs `f` with exclusive access to the pool.
    ///
    /// Use this to perform several operations without interleaving.
    pub fn with<R>(&self, f: impl FnOnce(&mut BuddyPool) -> R) -> R {
        f(&mut self.lock())
    }

    /// Consumes the wrapper, returning the pool.
    pub fn into_inner(self) -> BuddyPool {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, vec::Vec};

    use super::*;

    #[test]
    fn concurrent_alloc_free_preserves_partition() {
        let pool = Arc::new(SyncBuddyPool::try_new(1 << 16).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..200 {
                        let size = 8 << ((t + i) % 6);
                        if let Ok(block) = pool.allocate(size) {
                            assert!(pool.dump().tiles_pool());
                            pool.deallocate(block.cast()).unwrap();
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let pool = Arc::try_unwrap(pool).unwrap().into_inner();
        assert_eq!(pool.dump().free_bytes(), 1 << 16);
        assert_eq!(pool.dump().free.len(), 1);
    }

    #[test]
    fn with_groups_operations() {
        let pool = SyncBuddyPool::try_new(1024).unwrap();

        let dump = pool.with(|p| {
            let a = p.allocate(512).unwrap();
            let b = p.allocate(512).unwrap();
            p.deallocate(a.cast()).unwrap();
            p.deallocate(b.cast()).unwrap();
            p.dump()
        });

        assert_eq!(dump.free.len(), 1);
        assert!(dump.allocated.is_empty());
    }
}
