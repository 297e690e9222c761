use core::ptr::{self, NonNull};

use sptr::Strict;

/// A pointer to the base of the region of memory managed by a pool.
///
/// All pointers handed out by the pool are derived from this one, so they
/// carry its provenance. Converting between addresses and offsets never goes
/// through an integer-to-pointer cast.
#[derive(Copy, Clone, Debug)]
pub struct BasePtr {
    ptr: NonNull<u8>,
    extent: usize,
}

impl BasePtr {
    /// Creates a `BasePtr` from `ptr` covering `extent` bytes.
    ///
    /// The returned value assumes the provenance of `ptr`.
    #[inline]
    pub fn new(ptr: NonNull<u8>, extent: usize) -> BasePtr {
        ptr.as_ptr()
            .addr()
            .checked_add(extent)
            .expect("region limit overflows usize");

        BasePtr { ptr, extent }
    }

    /// Returns the base pointer as a `NonNull<u8>`.
    #[inline]
    pub fn ptr(self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns the address of the base pointer.
    #[inline]
    pub fn addr(self) -> usize {
        self.ptr.as_ptr().addr()
    }

    /// Returns the address one past the end of the region.
    #[inline]
    pub fn limit(self) -> usize {
        self.addr() + self.extent
    }

    #[inline]
    pub fn contains_addr(self, addr: usize) -> bool {
        self.addr() <= addr && addr < self.limit()
    }

    /// Calculates the offset from `self` to `ptr`.
    ///
    /// Returns `None` if `ptr` lies outside the region.
    #[inline]
    pub fn offset_to(self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr().addr();

        self.contains_addr(addr).then(|| addr - self.addr())
    }

    /// Creates a new pointer `offset` bytes past the base.
    ///
    /// The returned pointer has the provenance of this pointer.
    #[inline]
    pub fn with_offset(self, offset: usize) -> NonNull<u8> {
        assert!(offset < self.extent, "offset {offset:#x} out of region");

        let raw = self.ptr.as_ptr().with_addr(self.addr() + offset);

        // SAFETY: `raw` lies within the region, which starts at a non-null
        // address and does not wrap around the address space.
        unsafe { NonNull::new_unchecked(raw) }
    }

    /// Creates a slice pointer to `len` bytes starting `offset` bytes past the
    /// base.
    #[inline]
    pub fn with_offset_and_size(self, offset: usize, len: usize) -> NonNull<[u8]> {
        debug_assert!(offset + len <= self.extent);

        let raw = ptr::slice_from_raw_parts_mut(self.with_offset(offset).as_ptr(), len);

        // SAFETY: the data pointer was derived from a `NonNull`.
        unsafe { NonNull::new_unchecked(raw) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_round_trip() {
        let mut region = [0u64; 8];
        let ptr = NonNull::new(region.as_mut_ptr().cast::<u8>()).unwrap();
        let base = BasePtr::new(ptr, 64);

        for ofs in [0, 8, 63] {
            assert_eq!(base.offset_to(base.with_offset(ofs)), Some(ofs));
        }

        let past_end = NonNull::new(ptr.as_ptr().wrapping_add(64)).unwrap();
        assert_eq!(base.offset_to(past_end), None);
    }
}
