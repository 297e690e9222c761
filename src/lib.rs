//! A fixed-capacity binary-buddy memory pool.
//!
//! A [`BuddyPool`] owns a single contiguous region whose size is a power of
//! two. The region is recursively halved into power-of-two blocks on demand;
//! free blocks are tracked per level, and a freed block is merged with its
//! buddy whenever both halves of the parent are free.
//!
//! All bookkeeping lives outside the managed region. The engine itself,
//! [`BuddyTree`], only ever deals in pool-relative offsets and levels, which
//! makes it usable (and testable) without any backing memory at all.
//!
//! ```
//! use buddy_pool::BuddyPool;
//!
//! let mut pool = BuddyPool::try_new(1024).unwrap();
//!
//! let a = pool.allocate(100).unwrap();
//! assert_eq!(a.len(), 128);
//!
//! pool.deallocate(a.cast()).unwrap();
//! assert_eq!(pool.dump().free_bytes(), 1024);
//! ```
//!
//! ## Features
//!
//! - `std`: enables [`SyncBuddyPool`] and `std::error::Error` impls.
//! - `log`: emits diagnostics through the [`log`](https://docs.rs/log) facade.
//! - `serde`: derives `Serialize` for the diagnostic [`Dump`].

#![doc(html_root_url = "https://docs.rs/buddy_pool/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docs_rs, feature(doc_cfg))]
// This is necessary to allow `sptr` to shadow the strict-provenance methods on
// toolchains where they are still unstable.
#![allow(unstable_name_collisions)]

extern crate alloc;

// Logging is compiled out entirely unless the `log` feature is enabled.
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

mod base;
pub mod dump;
mod free_list;
mod ledger;
pub mod math;
pub mod pool;
#[cfg(feature = "std")]
pub mod sync;
pub mod tree;


use core::{alloc::Layout, fmt};

pub use crate::{
    dump::{BlockInfo, Dump},
    math::Geometry,
    pool::BuddyPool,
    tree::BuddyTree,
};

#[cfg(feature = "std")]
pub use crate::sync::SyncBuddyPool;

/// The error type for pool constructors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocInitError {
    /// A necessary allocation failed.
    ///
    /// This variant is returned when the constructor attempts to allocate the
    /// managed region from the global allocator and that allocation fails.
    ///
    /// The variant contains the [`Layout`] that could not be allocated.
    AllocFailed(Layout),

    /// The configuration of the pool is invalid.
    ///
    /// This variant is returned when the requested capacity is smaller than
    /// the granularity, the granularity is not a power of two at least as
    /// large as a `usize`, or the capacity cannot be rounded up to a power of
    /// two without overflowing.
    InvalidConfig,
}

impl fmt::Display for AllocInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocInitError::AllocFailed(layout) => write!(
                f,
                "failed to allocate pool region (size {}, align {})",
                layout.size(),
                layout.align()
            ),
            AllocInitError::InvalidConfig => f.write_str("invalid pool configuration"),
        }
    }
}

/// Indicates that an allocation request could not be satisfied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// No block of the required size could be produced, either because the
    /// request exceeds the pool capacity or because the pool is exhausted at
    /// that granularity.
    OutOfMemory,

    /// A zero-sized allocation was requested.
    ZeroSize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfMemory => f.write_str("out of memory"),
            AllocError::ZeroSize => f.write_str("zero-sized allocation"),
        }
    }
}

/// Indicates that a block could not be freed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FreeError {
    /// The address does not denote a currently allocated block.
    ///
    /// This is returned for double frees and for addresses that were never
    /// returned by the pool. No state is modified.
    NotAllocated,
}

impl fmt::Display for FreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreeError::NotAllocated => f.write_str("address is not an allocated block"),
        }
    }
}

/// Indicates that a block could not be resized.
///
/// In either case the original block is still allocated and its contents are
/// unchanged.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReallocError {
    /// The address does not denote a currently allocated block.
    NotAllocated,

    /// A block of the new size could not be allocated.
    Alloc(AllocError),
}

impl From<AllocError> for ReallocError {
    fn from(e: AllocError) -> Self {
        ReallocError::Alloc(e)
    }
}

impl fmt::Display for ReallocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReallocError::NotAllocated => f.write_str("address is not an allocated block"),
            ReallocError::Alloc(e) => write!(f, "reallocation failed: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocInitError {}

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}

#[cfg(feature = "std")]
impl std::error::Error for FreeError {}

#[cfg(feature = "std")]
impl std::error::Error for ReallocError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReallocError::NotAllocated => None,
            ReallocError::Alloc(e) => Some(e),
        }
    }
}
