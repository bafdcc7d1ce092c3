use byte_unit::Byte;
use easy_parallel::Parallel;
use kmem::alloc::ALLOC_FILL;
use kmem::prelude::*;
use rand::Rng;

fn allocator(pages: usize, shards: usize) -> PageAllocator {
    let config = AllocConfig::default()
        .pool_size(Byte::from_u64((pages * 4096) as u64))
        .page_size(4096)
        .shard_count(shards);
    PageAllocator::new(config).unwrap()
}

#[test]
fn concurrent_units_never_share_a_frame() {
    let _ = env_logger::builder().is_test(true).try_init();
    let alloc = allocator(64, 4);

    let results = Parallel::new()
        .each(0..4usize, |unit| {
            pin_unit(unit);
            let mut rng = rand::rng();
            let mut held: Vec<PageFrame> = vec![];
            let mut max_held = 0usize;
            for _ in 0..2000 {
                if held.is_empty() || (held.len() < 20 && rng.random_range(0..2) == 0) {
                    if let Some(frame) = alloc.allocate() {
                        // Frame handed out with the allocation fill; any
                        // other byte means someone else touched it.
                        assert!(unsafe { frame.bytes().iter().all(|&b| b == ALLOC_FILL) });
                        unsafe {
                            frame.bytes_mut().fill(unit as u8 + 10);
                        }
                        held.push(frame);
                    }
                } else {
                    let idx = rng.random_range(0..held.len());
                    let frame = held.swap_remove(idx);
                    // Still exclusively ours right up to the free.
                    assert!(unsafe { frame.bytes().iter().all(|&b| b == unit as u8 + 10) });
                    alloc.free(frame);
                }
                max_held = max_held.max(held.len());
            }
            for frame in held {
                alloc.free(frame);
            }
            max_held
        })
        .run();

    assert!(results.iter().all(|&m| m > 0));
    assert_eq!(alloc.page_pool().free_count(), 64);
}

#[test]
fn shared_frame_survives_first_free() {
    let alloc = allocator(8, 2);
    let frame = alloc.allocate().unwrap();
    unsafe {
        frame.bytes_mut().fill(0xAB);
    }
    let shared = alloc.add_ref(&frame);

    let (_, ()) = Parallel::new()
        .add(|| {
            alloc.free(frame);
        })
        .finish(|| {
            // Concurrent with the first free; the second reference keeps
            // the memory alive until this handle is also freed.
            assert!(unsafe { shared.bytes().iter().all(|&b| b == 0xAB) });
        });
    assert!(unsafe { shared.bytes().iter().all(|&b| b == 0xAB) });
    alloc.free(shared);
    assert_eq!(alloc.page_pool().free_count(), 8);
}

#[test]
fn exhaustion_is_recoverable() {
    let alloc = allocator(4, 2);
    let frames: Vec<_> = (0..4).map(|_| alloc.allocate().unwrap()).collect();
    assert!(alloc.allocate().is_none());
    for frame in frames {
        alloc.free(frame);
    }
    let frame = alloc.allocate().unwrap();
    alloc.free(frame);
}
