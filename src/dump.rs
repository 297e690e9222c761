//! Diagnostic snapshots of a pool.
//!
//! A [`Dump`] is a read-only copy of the allocator's bookkeeping, intended for
//! logging and inspection. It implements [`Display`](fmt::Display) for a
//! human-readable report; with the `serde` feature it can also be serialized.

use core::fmt;

use alloc::vec::Vec;

/// A single block, allocated or free.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BlockInfo {
    /// Offset of the block from the start of the pool.
    pub offset: usize,
    /// Level the block belongs to.
    pub level: usize,
    /// Size of the block in bytes.
    pub size: usize,
}

impl BlockInfo {
    /// The offset one past the end of the block.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// A snapshot of every allocated and free block in a pool.
///
/// Both lists are ordered by offset.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Dump {
    /// Size of the pool in bytes.
    pub pool_size: usize,
    /// Blocks currently handed out.
    pub allocated: Vec<BlockInfo>,
    /// Blocks currently on a free list.
    pub free: Vec<BlockInfo>,
}

impl Dump {
    /// Total size of all allocated blocks.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.iter().map(|b| b.size).sum()
    }

    /// Total size of all free blocks.
    pub fn free_bytes(&self) -> usize {
        self.free.iter().map(|b| b.size).sum()
    }

    /// Returns `true` if the allocated and free blocks together exactly tile
    /// `[0, pool_size)` with no gaps or overlaps, and every block starts at a
    /// multiple of its own size.
    pub fn tiles_pool(&self) -> bool {
        let mut blocks: Vec<&BlockInfo> = self.allocated.iter().chain(&self.free).collect();
        blocks.sort_by_key(|b| b.offset);

        let mut cursor = 0;
        for block in blocks {
            if block.offset != cursor || block.size == 0 || block.offset % block.size != 0 {
                return false;
            }

            cursor = block.end();
        }

        cursor == self.pool_size
    }
}

impl fmt::Display for Dump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "buddy pool: {} bytes, {} allocated ({} bytes), {} free ({} bytes)",
            self.pool_size,
            self.allocated.len(),
            self.allocated_bytes(),
            self.free.len(),
            self.free_bytes(),
        )?;

        for (label, blocks) in [("allocated", &self.allocated), ("free", &self.free)] {
            writeln!(f, "  {label}:")?;

            for b in blocks {
                writeln!(
                    f,
                    "    [{:#x}, {:#x}) level {}, {} bytes",
                    b.offset,
                    b.end(),
                    b.level,
                    b.size
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::{prelude::rust_2021::*, vec};

    use super::*;

    fn block(offset: usize, level: usize, size: usize) -> BlockInfo {
        BlockInfo {
            offset,
            level,
            size,
        }
    }

    #[test]
    fn tiles_pool_detects_gaps_and_overlaps() {
        let tiled = Dump {
            pool_size: 64,
            allocated: vec![block(0, 2, 16)],
            free: vec![block(16, 2, 16), block(32, 1, 32)],
        };
        assert!(tiled.tiles_pool());

        let gap = Dump {
            free: vec![block(32, 1, 32)],
            ..tiled.clone()
        };
        assert!(!gap.tiles_pool());

        let overlap = Dump {
            free: vec![block(0, 1, 32), block(32, 1, 32)],
            ..tiled.clone()
        };
        assert!(!overlap.tiles_pool());

        let misaligned = Dump {
            pool_size: 64,
            allocated: vec![block(0, 2, 16), block(16, 1, 32)],
            free: vec![block(48, 2, 16)],
        };
        assert!(!misaligned.tiles_pool());
    }

    #[test]
    fn display_lists_blocks() {
        let dump = Dump {
            pool_size: 64,
            allocated: vec![block(0, 1, 32)],
            free: vec![block(32, 1, 32)],
        };

        let text = dump.to_string();
        assert!(text.starts_with("buddy pool: 64 bytes, 1 allocated (32 bytes), 1 free (32 bytes)"));
        assert!(text.contains("[0x0, 0x20) level 1, 32 bytes"));
        assert!(text.contains("[0x20, 0x40) level 1, 32 bytes"));
    }
}
