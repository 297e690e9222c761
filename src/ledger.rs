use alloc::collections::BTreeMap;

/// Maps the offset of each allocated block to the level it was carved from.
///
/// Keys are pool-relative offsets, never raw addresses.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    blocks: BTreeMap<usize, usize>,
}

impl Ledger {
    pub fn new() -> Ledger {
        Ledger {
            blocks: BTreeMap::new(),
        }
    }

    /// Records an allocation.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is already recorded; that would mean the free lists
    /// handed out a live block twice.
    pub fn insert(&mut self, offset: usize, level: usize) {
        let prev = self.blocks.insert(offset, level);
        assert!(prev.is_none(), "block at offset {offset:#x} allocated twice");
    }

    /// Returns the level of the allocated block at `offset`.
    #[inline]
    pub fn get(&self, offset: usize) -> Option<usize> {
        self.blocks.get(&offset).copied()
    }

    /// Forgets the allocation at `offset`, returning its level.
    #[inline]
    pub fn remove(&mut self, offset: usize) -> Option<usize> {
        self.blocks.remove(&offset)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Iterates over `(offset, level)` pairs in offset order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.blocks.iter().map(|(&ofs, &level)| (ofs, level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut ledger = Ledger::new();
        ledger.insert(256, 2);
        ledger.insert(0, 3);

        assert_eq!(ledger.get(256), Some(2));
        assert_eq!(ledger.get(128), None);
        assert_eq!(ledger.len(), 2);

        assert_eq!(ledger.remove(256), Some(2));
        assert_eq!(ledger.remove(256), None);
        assert_eq!(ledger.iter().collect::<alloc::vec::Vec<_>>(), [(0, 3)]);
    }

    #[test]
    #[should_panic]
    fn double_insert_panics() {
        let mut ledger = Ledger::new();
        ledger.insert(64, 4);
        ledger.insert(64, 4);
    }
}
