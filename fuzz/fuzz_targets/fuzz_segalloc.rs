#![no_main]

use segalloc::*;

use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Actions {
    /// Allocate memory with the given size
    Alloc { size: u16 },
    /// Release the ith allocation
    Release { index: u8 },
    /// Resize the ith allocation
    Resize { index: u8, new_size: u16 },
    /// Release an offset that isn't a live allocation, which must be ignored
    ReleaseOffset { offset: u16 },
}
use Actions::*;

fuzz_target!(|input: (u16, Vec<Actions>)| {
    let (segment_words, actions) = input;

    let mut arena = vec![0u64; segment_words as usize % 4096];
    let len = core::mem::size_of_val(arena.as_slice());
    let bytes = unsafe { core::slice::from_raw_parts_mut(arena.as_mut_ptr().cast::<u8>(), len) };

    let Ok(mut segalloc) = Segalloc::new(bytes) else { return };

    // (payload, size, fill byte)
    let mut allocations: Vec<(Payload, usize, u8)> = vec![];

    let holds = |segalloc: &Segalloc, (payload, size, byte): (Payload, usize, u8)| {
        segalloc.payload(payload).unwrap()[..size].iter().all(|&b| b == byte)
    };

    for (i, action) in actions.into_iter().enumerate() {
        let byte = i as u8;

        match action {
            Alloc { size } => {
                let size = size as usize;
                match segalloc.allocate(size) {
                    Ok(payload) => {
                        segalloc.payload_mut(payload).unwrap()[..size].fill(byte);
                        allocations.push((payload, size, byte));
                    }
                    Err(err) => assert!(size == 0 || matches!(err, AllocError::Exhausted { .. })),
                }
            }
            Release { index } => {
                if index as usize >= allocations.len() { continue; }

                let allocation = allocations.swap_remove(index as usize);
                assert!(holds(&segalloc, allocation));
                segalloc.release(allocation.0);
            }
            Resize { index, new_size } => {
                if index as usize >= allocations.len() { continue; }

                let (payload, size, old_byte) = allocations[index as usize];
                let new_size = new_size as usize;

                match segalloc.resize(payload, new_size) {
                    Ok(new_payload) => {
                        assert!(holds(&segalloc, (new_payload, size.min(new_size), old_byte)));
                        segalloc.payload_mut(new_payload).unwrap()[..new_size].fill(byte);
                        allocations[index as usize] = (new_payload, new_size, byte);
                    }
                    Err(AllocError::ZeroSize) => {
                        allocations.swap_remove(index as usize);
                    }
                    Err(_) => assert!(holds(&segalloc, (payload, size, old_byte))),
                }
            }
            ReleaseOffset { offset } => {
                let Some(payload) = Payload::from_offset(offset as usize) else { continue };
                if allocations.iter().any(|&(p, ..)| p == payload) { continue; }

                let before = segalloc.counters().allocation_count;
                segalloc.release(payload);
                assert!(segalloc.counters().allocation_count == before);
            }
        }
    }

    // Free any remaining allocations.
    for allocation in allocations {
        assert!(holds(&segalloc, allocation));
        segalloc.release(allocation.0);
    }

    assert!(segalloc.counters().allocation_count == 0);
    assert!(segalloc.check_invariants());
});
