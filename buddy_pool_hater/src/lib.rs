#![deny(unsafe_op_in_unsafe_fn)]

use std::ptr::NonNull;

use alloc_hater::Subject;
use buddy_pool::{AllocError, AllocInitError, BuddyPool, FreeError, ReallocError};

/// Any error a [`BuddyPool`] can report from a block operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolError {
    Alloc(AllocError),
    Free(FreeError),
    Realloc(ReallocError),
}

pub struct BuddySubject(BuddyPool);

impl BuddySubject {
    pub fn new(capacity: usize) -> Result<Self, AllocInitError> {
        let p = BuddyPool::try_new(capacity)?;
        Ok(BuddySubject(p))
    }

    pub fn with_granularity(capacity: usize, granularity: usize) -> Result<Self, AllocInitError> {
        let p = BuddyPool::try_with_granularity(capacity, granularity)?;
        Ok(BuddySubject(p))
    }

    pub fn pool(&self) -> &BuddyPool {
        &self.0
    }
}

impl Subject for BuddySubject {
    type Error = PoolError;

    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::Error> {
        self.0.allocate(size).map_err(PoolError::Alloc)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), Self::Error> {
        self.0.deallocate(ptr).map_err(PoolError::Free)
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<[u8]>, Self::Error> {
        self.0.reallocate(ptr, new_size).map_err(PoolError::Realloc)
    }
}
