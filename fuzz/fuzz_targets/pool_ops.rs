#![no_main]

use alloc_hater::{AllocatorOp, Evaluator};
use arbitrary::{Arbitrary, Unstructured};
use buddy_pool_hater::BuddySubject;
use libfuzzer_sys::fuzz_target;

const MAX_CAPACITY_BITS: u8 = 24;

#[derive(Clone, Debug)]
struct Args {
    capacity: usize,
    granularity: usize,
    ops: Vec<AllocatorOp>,
}

impl Arbitrary<'_> for Args {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<Args> {
        let capacity_bits = u8::arbitrary(un)? % (MAX_CAPACITY_BITS + 1);
        let capacity = usize::arbitrary(un)? % (1 << capacity_bits);

        // Select a random bit index and shift to obtain a power of two.
        let granularity = 1 << (u8::arbitrary(un)? % 8);

        Ok(Args {
            capacity,
            granularity,
            ops: Vec::arbitrary(un)?,
        })
    }
}

fuzz_target!(|args: Args| {
    // Rejected configurations are fine; the pool just has to say so.
    let subject = match BuddySubject::with_granularity(args.capacity, args.granularity) {
        Ok(s) => s,
        Err(_) => return,
    };

    let mut eval = Evaluator::new(subject);
    if let Err(failed) = eval.evaluate(args.ops) {
        panic!("{failed:#?}");
    }

    let dump = eval.subject().pool().dump();
    assert!(dump.allocated.is_empty());
    assert_eq!(dump.free.len(), 1);
});
