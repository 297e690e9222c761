//! A small library for ~~hating on~~ evaluating the correctness of allocators.
//!
//! An [`Evaluator`] drives a [`Subject`] through a sequence of
//! [`AllocatorOp`]s. Every live block is painted with the id of the operation
//! that last wrote it, and the paint is checked before the block is freed or
//! resized, so overlapping blocks and lost data are caught as soon as they
//! are observable.
#![deny(unsafe_op_in_unsafe_fn)]

use core::{fmt, mem::MaybeUninit, ptr::NonNull, slice};

/// Limit on generated allocation sizes, expressed in bits.
const MAX_SIZE_BITS: u8 = 20;

/// An allocation size which implements `Arbitrary`.
///
/// Sizes are spread evenly across powers of two rather than uniformly over
/// `usize`, so that small requests are as likely as large ones.
#[derive(Copy, Clone, Debug)]
pub struct ArbSize(pub usize);

impl arbitrary::Arbitrary<'_> for ArbSize {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let exp = u8::arbitrary(u)? % (MAX_SIZE_BITS + 1);
        let size = usize::arbitrary(u)? % (1_usize << exp);

        Ok(ArbSize(size))
    }
}

#[derive(arbitrary::Arbitrary)]
enum AllocatorOpTag {
    Alloc,
    Dealloc,
    Realloc,
}

#[derive(Clone, Debug)]
pub enum AllocatorOp {
    /// Allocate a block of at least this many bytes.
    Alloc(usize),
    /// Free the outstanding block at this index, modulo the number of blocks.
    Dealloc(usize),
    /// Resize the outstanding block at the first index to the given size.
    Realloc(usize, usize),
}

impl arbitrary::Arbitrary<'_> for AllocatorOp {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let tag = AllocatorOpTag::arbitrary(u)?;

        let op = match tag {
            AllocatorOpTag::Alloc => AllocatorOp::Alloc(ArbSize::arbitrary(u)?.0),
            AllocatorOpTag::Dealloc => AllocatorOp::Dealloc(usize::arbitrary(u)?),
            AllocatorOpTag::Realloc => {
                AllocatorOp::Realloc(usize::arbitrary(u)?, ArbSize::arbitrary(u)?.0)
            }
        };

        Ok(op)
    }
}

pub trait Subject {
    type Error: fmt::Debug;

    /// Allocates a block of at least `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::Error>;

    /// Deallocates the block pointed to by `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a block of memory currently allocated by this
    /// allocator.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), Self::Error>;

    /// Resizes the block pointed to by `ptr` to at least `new_size` bytes.
    ///
    /// On error, the original block must remain allocated and unchanged.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a block of memory currently allocated by this
    /// allocator.
    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<[u8]>, Self::Error>;
}

/// A list of allocated blocks.
#[derive(Default)]
pub struct Blocks {
    blocks: Vec<Block>,
}

impl Blocks {
    pub fn new() -> Blocks {
        Blocks { blocks: Vec::new() }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn remove_modulo(&mut self, idx: usize) -> Option<Block> {
        let len = self.blocks.len();
        (len != 0).then(|| self.blocks.swap_remove(idx % len))
    }

    pub fn get_modulo_mut(&mut self, idx: usize) -> Option<&mut Block> {
        let len = self.blocks.len();
        self.blocks.get_mut(idx.checked_rem(len)?)
    }
}

impl IntoIterator for Blocks {
    type Item = Block;

    type IntoIter = std::vec::IntoIter<Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

/// An allocated block of memory.
pub struct Block {
    // A pointer to the allocated region.
    ptr: NonNull<[u8]>,
    // The unique ID of the last operation that wrote to this allocation.
    id: u64,
}

unsafe fn slice_ptr_to_uninit_slice_mut<'a>(ptr: NonNull<[u8]>) -> &'a mut [MaybeUninit<u8>] {
    unsafe { slice::from_raw_parts_mut(ptr.cast().as_ptr(), ptr.len()) }
}

fn paint(slice: &mut [MaybeUninit<u8>], id: u64) {
    let id_bytes = id.to_le_bytes().into_iter().cycle();

    for (byte, value) in slice.iter_mut().zip(id_bytes) {
        byte.write(value);
    }
}

impl Block {
    /// Creates a block from `ptr` and paints it according to `id`.
    ///
    /// # Safety
    ///
    /// The caller must uphold the following invariants:
    /// - `ptr` must be valid for reads and writes for `ptr.len()` bytes.
    /// - No references to the memory at `ptr` may exist when this function is called.
    /// - No accesses to the memory at `ptr` may be made except by way of the returned `Block`
    ///   until said `Block` is dropped.
    pub unsafe fn init(ptr: NonNull<[u8]>, id: u64) -> Block {
        let mut b = Block { ptr, id };
        b.paint(id);
        b
    }

    /// Returns a pointer to the start of the block.
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr.cast()
    }

    /// Returns the `Block`'s memory as a mutable slice of uninitialized bytes.
    pub fn as_uninit_slice_mut(&mut self) -> &mut [MaybeUninit<u8>] {
        // SAFETY: self is mutably borrowed, so no other references to the
        // slice can exist
        unsafe { slice_ptr_to_uninit_slice_mut(self.ptr) }
    }

    /// "Paints" the memory contained by `self` with the value of `id`.
    pub fn paint(&mut self, id: u64) {
        self.id = id;
        paint(self.as_uninit_slice_mut(), id);
    }

    /// Verifies that the first `len` bytes of `self` have not been
    /// overwritten since the last paint.
    pub fn verify_prefix(&self, len: usize) -> bool {
        let slice: &[u8] = unsafe { self.ptr.as_ref() };
        let id_bytes = self.id.to_le_bytes().into_iter().cycle();

        slice
            .iter()
            .take(len)
            .zip(id_bytes)
            .all(|(byte, value)| *byte == value)
    }

    /// Verifies that the memory contained by `self` has not been overwritten.
    pub fn verify(&self) -> bool {
        self.verify_prefix(self.ptr.len())
    }

    /// Replaces the block's pointer after a successful resize, keeping the
    /// id of the paint it should still carry.
    fn relocate(&mut self, ptr: NonNull<[u8]>) {
        self.ptr = ptr;
    }
}

/// Why an evaluation stopped.
#[derive(Clone, Debug)]
pub enum FailureKind {
    /// A block's contents were modified by something other than its owner.
    Corrupted,
    /// The subject refused to free or resize a block it had handed out.
    Rejected(String),
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<AllocatorOp>,
    pub failed_op: Option<AllocatorOp>,
    pub kind: FailureKind,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    /// Returns the subject under evaluation.
    pub fn subject(&self) -> &S {
        &self.subject
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = AllocatorOp>,
    {
        let mut completed = Vec::new();
        let mut blocks = Blocks::new();

        let fail = |completed: Vec<AllocatorOp>, op: &AllocatorOp, kind| Failed {
            completed,
            failed_op: Some(op.clone()),
            kind,
        };

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id.try_into().unwrap();
            match op {
                AllocatorOp::Alloc(size) => {
                    let ptr = match self.subject.allocate(size) {
                        Ok(p) => p,
                        Err(_) => continue,
                    };

                    let block = unsafe { Block::init(ptr, op_id) };
                    blocks.push(block);
                }

                AllocatorOp::Dealloc(raw_idx) => {
                    let block = match blocks.remove_modulo(raw_idx) {
                        Some(b) => b,
                        None => continue,
                    };

                    if !block.verify() {
                        return Err(fail(completed, &op, FailureKind::Corrupted));
                    }

                    if let Err(e) = unsafe { self.subject.deallocate(block.ptr()) } {
                        return Err(fail(completed, &op, FailureKind::Rejected(format!("{e:?}"))));
                    }
                }

                AllocatorOp::Realloc(raw_idx, new_size) => {
                    let block = match blocks.get_modulo_mut(raw_idx) {
                        Some(b) => b,
                        None => continue,
                    };

                    if !block.verify() {
                        return Err(fail(completed, &op, FailureKind::Corrupted));
                    }

                    let old_len = block.ptr.len();

                    match unsafe { self.subject.reallocate(block.ptr(), new_size) } {
                        Ok(ptr) => {
                            block.relocate(ptr);

                            if !block.verify_prefix(old_len.min(ptr.len())) {
                                return Err(fail(completed, &op, FailureKind::Corrupted));
                            }

                            block.paint(op_id);
                        }

                        Err(_) => {
                            if !block.verify() {
                                return Err(fail(completed, &op, FailureKind::Corrupted));
                            }
                        }
                    }
                }
            }

            completed.push(op);
        }

        for block in blocks {
            if !block.verify() {
                return Err(Failed {
                    completed,
                    failed_op: None,
                    kind: FailureKind::Corrupted,
                });
            }

            if let Err(e) = unsafe { self.subject.deallocate(block.ptr()) } {
                return Err(Failed {
                    completed,
                    failed_op: None,
                    kind: FailureKind::Rejected(format!("{e:?}")),
                });
            }
        }

        Ok(())
    }
}
