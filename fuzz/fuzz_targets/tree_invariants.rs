#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use buddy_pool::{BuddyTree, Geometry, ReallocError};
use libfuzzer_sys::fuzz_target;

const MAX_POOL_BITS: u8 = 32;

#[derive(Clone, Debug, Arbitrary)]
enum TreeOp {
    Allocate(usize),
    Free(usize),
    Reallocate(usize, usize),
    // Offsets that were never handed out must be rejected without effect.
    FreeRaw(usize),
}

#[derive(Clone, Debug)]
struct Args {
    geometry: Geometry,
    ops: Vec<TreeOp>,
}

impl Arbitrary<'_> for Args {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<Args> {
        let pool_bits = u8::arbitrary(un)? % (MAX_POOL_BITS + 1);
        let granularity_bits = u8::arbitrary(un)? % (pool_bits + 1);

        let geometry = Geometry::new(1 << pool_bits, 1 << granularity_bits)
            .ok_or(arbitrary::Error::IncorrectFormat)?;

        Ok(Args {
            geometry,
            ops: Vec::arbitrary(un)?,
        })
    }
}

fuzz_target!(|args: Args| {
    let mut tree = BuddyTree::new(args.geometry);
    let mut live: Vec<usize> = Vec::new();

    for op in args.ops {
        match op {
            TreeOp::Allocate(size) => {
                if let Ok(ofs) = tree.allocate(size) {
                    let level = tree.level_of(ofs).unwrap();
                    let block_size = args.geometry.size_of_level(level);
                    assert!(block_size >= size);
                    assert_eq!(ofs % block_size, 0);
                    live.push(ofs);
                }
            }

            TreeOp::Free(idx) => {
                if live.is_empty() {
                    continue;
                }

                let ofs = live.swap_remove(idx % live.len());
                tree.free(ofs).unwrap();
            }

            TreeOp::Reallocate(idx, size) => {
                if live.is_empty() {
                    continue;
                }

                let idx = idx % live.len();
                match tree.reallocate(live[idx], size) {
                    Ok(reloc) => live[idx] = reloc.to,
                    Err(ReallocError::Alloc(_)) => assert!(tree.level_of(live[idx]).is_some()),
                    Err(e) => panic!("live block rejected: {e:?}"),
                }
            }

            TreeOp::FreeRaw(ofs) => {
                if live.contains(&ofs) {
                    continue;
                }

                let before = tree.dump();
                assert!(tree.free(ofs).is_err());
                assert_eq!(tree.dump(), before);
            }
        }

        assert!(tree.dump().tiles_pool());
        assert_eq!(tree.num_allocated(), live.len());
    }
});
