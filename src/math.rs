//! Size and level arithmetic.
//!
//! A pool of `pool_size` bytes is viewed as an implicit binary tree. Level 0 is
//! a single block spanning the whole pool; each level below halves the block
//! size, down to `max_depth`, where blocks are exactly `granularity` bytes.
//!
//! Everything here is exact integer arithmetic on powers of two.

/// Returns the smallest power of two greater than or equal to `n`.
///
/// Returns `None` if `n` is zero or the result would overflow a `usize`.
#[inline]
pub fn next_power_of_two(n: usize) -> Option<usize> {
    match n {
        0 => None,
        n => n.checked_next_power_of_two(),
    }
}

/// Returns the smallest `i` such that `2^i >= n`.
///
/// `log2_ceil(0)` and `log2_ceil(1)` are both zero.
#[inline]
pub fn log2_ceil(n: usize) -> u32 {
    match n {
        0 | 1 => 0,
        n => usize::BITS - (n - 1).leading_zeros(),
    }
}

/// The fixed shape of a buddy pool.
///
/// Invariants, established by [`Geometry::new`]:
/// - `pool_size` and `granularity` are powers of two.
/// - `granularity <= pool_size`.
/// - `pool_size >> max_depth == granularity`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    pool_size: usize,
    granularity: usize,
    max_depth: usize,
}

impl Geometry {
    /// Computes the geometry of a pool holding at least `capacity` bytes with
    /// blocks no smaller than `granularity` bytes.
    ///
    /// Returns `None` if `granularity` is not a power of two, if `capacity` is
    /// smaller than `granularity`, or if `capacity` cannot be rounded up to a
    /// power of two.
    pub fn new(capacity: usize, granularity: usize) -> Option<Geometry> {
        if !granularity.is_power_of_two() || capacity < granularity {
            return None;
        }

        let pool_size = next_power_of_two(capacity)?;
        let max_depth = log2_ceil(pool_size / granularity) as usize;

        Some(Geometry {
            pool_size,
            granularity,
            max_depth,
        })
    }

    /// The size of the pool in bytes. Always a power of two.
    #[inline]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// The smallest block size the pool will ever produce.
    #[inline]
    pub fn granularity(&self) -> usize {
        self.granularity
    }

    /// The deepest level, at which blocks are `granularity` bytes.
    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// The number of levels, `max_depth + 1`.
    #[inline]
    pub fn num_levels(&self) -> usize {
        self.max_depth + 1
    }

    /// Returns the size of blocks at `level`.
    ///
    /// # Panics
    ///
    /// Panics if `level > max_depth`.
    #[inline]
    pub fn size_of_level(&self, level: usize) -> usize {
        assert!(level <= self.max_depth, "level {level} out of range");

        self.pool_size >> level
    }

    /// Returns the deepest level whose blocks are at least `size` bytes.
    ///
    /// The result may lie below `max_depth` for sizes smaller than the
    /// granularity. Returns `None` if `size` is zero or exceeds the pool size,
    /// which corresponds to a negative level.
    #[inline]
    pub fn level_of_size(&self, size: usize) -> Option<usize> {
        if size == 0 || size > self.pool_size {
            return None;
        }

        Some(log2_ceil(self.pool_size / size) as usize)
    }

    /// Returns the level from which a request for `size` bytes is served.
    ///
    /// `size` is rounded up to a power of two; requests smaller than the
    /// granularity are served from `max_depth`.
    pub fn level_for_request(&self, size: usize) -> Option<usize> {
        let aligned = next_power_of_two(size)?;
        let level = self.level_of_size(aligned)?;

        Some(level.min(self.max_depth))
    }

    /// Returns the offset of the buddy of the block at `offset` on `level`.
    ///
    /// Level 0 has no buddy.
    #[inline]
    pub fn buddy_of(&self, offset: usize, level: usize) -> Option<usize> {
        if level == 0 {
            return None;
        }

        Some(offset ^ self.size_of_level(level))
    }

    /// Returns the offset of the parent of the block at `offset` on `level`.
    ///
    /// The parent lives on `level - 1`.
    #[inline]
    pub fn parent_of(&self, offset: usize, level: usize) -> Option<usize> {
        if level == 0 {
            return None;
        }

        Some(offset & !self.size_of_level(level))
    }

    /// Returns `true` if `offset` is the start of some block on `level`.
    #[inline]
    pub fn is_block_start(&self, offset: usize, level: usize) -> bool {
        offset < self.pool_size && offset % self.size_of_level(level) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_power_of_two_rounds_up() {
        assert_eq!(next_power_of_two(0), None);
        assert_eq!(next_power_of_two(1), Some(1));
        assert_eq!(next_power_of_two(3), Some(4));
        assert_eq!(next_power_of_two(100), Some(128));
        assert_eq!(next_power_of_two(128), Some(128));
        assert_eq!(next_power_of_two(usize::MAX), None);
    }

    #[test]
    fn log2_ceil_is_exact() {
        assert_eq!(log2_ceil(1), 0);
        assert_eq!(log2_ceil(2), 1);
        assert_eq!(log2_ceil(3), 2);
        assert_eq!(log2_ceil(4), 2);
        assert_eq!(log2_ceil(5), 3);
        assert_eq!(log2_ceil(1 << 40), 40);
        assert_eq!(log2_ceil((1 << 40) + 1), 41);
    }

    #[test]
    fn geometry_rounds_capacity() {
        let g = Geometry::new(1000, 8).unwrap();
        assert_eq!(g.pool_size(), 1024);
        assert_eq!(g.max_depth(), 7);
        assert_eq!(g.size_of_level(g.max_depth()), 8);
    }

    #[test]
    fn geometry_rejects_bad_config() {
        assert_eq!(Geometry::new(4, 8), None);
        assert_eq!(Geometry::new(1024, 12), None);
        assert_eq!(Geometry::new(usize::MAX, 8), None);
    }

    #[test]
    fn level_of_size() {
        let g = Geometry::new(1024, 8).unwrap();
        assert_eq!(g.level_of_size(1024), Some(0));
        assert_eq!(g.level_of_size(512), Some(1));
        assert_eq!(g.level_of_size(256), Some(2));
        assert_eq!(g.level_of_size(2048), None);
        assert_eq!(g.level_of_size(0), None);
    }

    #[test]
    fn level_for_request_clamps() {
        let g = Geometry::new(1024, 8).unwrap();
        assert_eq!(g.level_for_request(100), Some(3));
        assert_eq!(g.level_for_request(120), Some(3));
        assert_eq!(g.level_for_request(1), Some(7));
        assert_eq!(g.level_for_request(1000), Some(0));
        assert_eq!(g.level_for_request(1025), None);
    }

    #[test]
    fn buddy_is_symmetric() {
        let g = Geometry::new(1024, 8).unwrap();
        for level in 1..=g.max_depth() {
            let size = g.size_of_level(level);
            for offset in (0..g.pool_size()).step_by(size) {
                let buddy = g.buddy_of(offset, level).unwrap();
                assert_ne!(buddy, offset);
                assert_eq!(g.buddy_of(buddy, level), Some(offset));
                assert_eq!(g.parent_of(offset, level), g.parent_of(buddy, level));
            }
        }
        assert_eq!(g.buddy_of(0, 0), None);
    }
}
