#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use std::{alloc::System, thread};

use pool_alloc::{AllocatorConfig, CountingBackend, FreeListAllocator, RawBlock};

const THREADS: usize = 8;
const ROUNDS: usize = 2000;

fn fill(block: &RawBlock, tag: u8) {
    unsafe { block.as_ptr().write_bytes(tag, block.size()) };
}

fn check(block: &RawBlock, tag: u8) {
    for i in 0..block.size() {
        assert_eq!(unsafe { block.as_ptr().add(i).read() }, tag);
    }
}

#[test]
fn threads_share_one_allocator() {
    let allocator = FreeListAllocator::<CountingBackend<System>>::with_config(
        CountingBackend::system(),
        AllocatorConfig::new(),
    );

    thread::scope(|s| {
        for t in 0..THREADS {
            let allocator = &allocator;
            s.spawn(move || {
                let tag = u8::try_from(t).unwrap() + 1;
                let mut held = Vec::new();
                for round in 0..ROUNDS {
                    let bytes = 1 + (round * 7 + t * 13) % 160;
                    let block = allocator.allocate(bytes).unwrap();
                    fill(&block, tag);
                    held.push(block);

                    if held.len() > 16 {
                        let block = held.swap_remove(round % held.len());
                        check(&block, tag);
                        let bytes = block.size();
                        unsafe { allocator.deallocate(block, bytes).unwrap() };
                    }
                }
                for block in held {
                    check(&block, tag);
                    let bytes = block.size();
                    unsafe { allocator.deallocate(block, bytes).unwrap() };
                }
            });
        }
    });

    let stats = allocator.stats();
    assert_eq!(stats.live_blocks, 0);
    assert!(stats.is_conserved());
    assert_eq!(
        allocator.primary().stats().bytes_outstanding,
        stats.heap_size + stats.chunk_count * pool_alloc::CHUNK_HEADER_SIZE
    );
}

#[test]
fn blocks_move_between_threads() {
    let allocator = FreeListAllocator::system();
    let blocks = (0..256)
        .map(|i| {
            let block = allocator.allocate(1 + i % 128).unwrap();
            fill(&block, 0x77);
            block
        })
        .collect::<Vec<_>>();

    let mut left = blocks;
    let right = left.split_off(128);
    thread::scope(|s| {
        for half in [left, right] {
            let allocator = &allocator;
            s.spawn(move || {
                for block in half {
                    check(&block, 0x77);
                    let bytes = block.size();
                    unsafe { allocator.deallocate(block, bytes).unwrap() };
                }
            });
        }
    });

    assert_eq!(allocator.stats().live_blocks, 0);
}
