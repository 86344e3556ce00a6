use std::{ptr::NonNull, slice};

use heapalloc::{ALIGNMENT, Allocator, Arena, Config, HEADER_SIZE, MIN_PAYLOAD};

fn allocator() -> Allocator<Arena> {
    Allocator::with_source(Arena::new(1 << 20).unwrap(), Config::quiet())
}

fn bytes<'a>(ptr: NonNull<u8>, len: usize) -> &'a [u8] {
    unsafe { slice::from_raw_parts(ptr.as_ptr(), len) }
}

#[test]
fn allocations_are_zeroed_writable_and_aligned() {
    let allocator = allocator();

    for size in [1, 3, 8, 15, 16, 17, 100, 1000, 4096] {
        let ptr = allocator.allocate(size).unwrap();

        assert_eq!(0, ptr.as_ptr() as usize % ALIGNMENT, "size {size}");
        assert!(bytes(ptr, size).iter().all(|&b| b == 0), "size {size}");

        unsafe { ptr.as_ptr().write_bytes(0xFF, size) };
    }
}

#[test]
fn reused_blocks_are_zeroed_again() {
    let allocator = allocator();

    let ptr = allocator.allocate(64).unwrap();
    unsafe {
        ptr.as_ptr().write_bytes(0x5A, 64);
        allocator.release(Some(ptr));
    }

    let again = allocator.allocate(64).unwrap();
    assert_eq!(ptr, again);
    assert!(bytes(again, 64).iter().all(|&b| b == 0));
}

#[test]
fn freed_minimum_is_reused() {
    let allocator = allocator();

    let small = allocator.allocate(24).unwrap();
    let large = allocator.allocate(200).unwrap();
    unsafe {
        allocator.release(Some(large));
        allocator.release(Some(small));
    }

    // The 24 byte block is the minimum of the index.
    assert_eq!(small, allocator.allocate(20).unwrap());
    assert_eq!(large, allocator.allocate(200).unwrap());
}

#[test]
fn split_creates_free_tail() {
    let allocator = allocator();

    let block = allocator.allocate(256).unwrap();
    unsafe { allocator.release(Some(block)) };

    let head = allocator.allocate(64).unwrap();
    assert_eq!(block, head);
    assert_eq!(1, allocator.stats().free_blocks);

    // The tail is exactly what is left after the head and a new header.
    let tail_size = 256 - 64 - HEADER_SIZE;
    let tail = allocator.allocate(tail_size).unwrap();
    assert_eq!(unsafe { head.add(64 + HEADER_SIZE) }, tail);
    assert_eq!(tail_size, unsafe { allocator.usable_size(tail) });

    let stats = allocator.stats();
    assert_eq!(0, stats.free_blocks);
    assert_eq!(1, stats.growths);
}

#[test]
fn literal_scenario_does_not_grow_twice() {
    let allocator = allocator();

    let a = allocator.allocate(16).unwrap();
    let b = allocator.allocate(32).unwrap();
    unsafe {
        allocator.release(Some(a));
        allocator.release(Some(b));
    }
    let c = allocator.allocate(16).unwrap();

    assert_eq!(a, c);
    assert!(allocator.stats().heap_bytes <= 16 + 32 + 2 * HEADER_SIZE);
    allocator.validate().unwrap();
}

#[test]
fn zero_sized_allocation() {
    let allocator = allocator();

    let a = allocator.allocate(0).unwrap();
    let b = allocator.allocate(0).unwrap();

    assert_ne!(a, b);
    assert_eq!(MIN_PAYLOAD, unsafe { allocator.usable_size(a) });
    assert_eq!(0, a.as_ptr() as usize % ALIGNMENT);

    unsafe {
        allocator.release(Some(a));
        allocator.release(Some(b));
    }
    allocator.validate().unwrap();
}

#[test]
fn resize_to_smaller_or_equal_keeps_pointer() {
    let allocator = allocator();

    let ptr = allocator.allocate(40).unwrap();
    for size in [0, 1, 39, 40] {
        assert_eq!(Some(ptr), unsafe { allocator.resize(Some(ptr), size) });
    }
    // Rounding gives some slack.
    assert_eq!(Some(ptr), unsafe { allocator.resize(Some(ptr), 20) });
}

#[test]
fn resize_to_larger_copies_payload() {
    let allocator = allocator();

    let ptr = allocator.allocate(32).unwrap();
    let pattern: Vec<u8> = (0..32).collect();
    unsafe { ptr.as_ptr().copy_from_nonoverlapping(pattern.as_ptr(), 32) };

    let moved = unsafe { allocator.resize(Some(ptr), 100) }.unwrap();

    assert_ne!(ptr, moved);
    assert_eq!(&pattern[..], bytes(moved, 32));
    assert!(bytes(moved, 100)[32..].iter().all(|&b| b == 0));
    allocator.validate().unwrap();
}

#[test]
fn resize_none_allocates() {
    let allocator = allocator();

    let ptr = unsafe { allocator.resize(None, 48) }.unwrap();

    assert!(bytes(ptr, 48).iter().all(|&b| b == 0));
    assert_eq!(1, allocator.stats().growths);
}

#[test]
fn exhausted_arena_returns_none() {
    let allocator: Allocator<Arena> =
        Allocator::with_source(Arena::new(256).unwrap(), Config::quiet());

    let mut blocks = Vec::new();
    while let Some(ptr) = allocator.allocate(32) {
        blocks.push(ptr);
    }

    assert_eq!(256 / (32 + HEADER_SIZE), blocks.len());

    // Releasing makes room again.
    unsafe { allocator.release(blocks.pop()) };
    assert!(allocator.allocate(32).is_some());
}

#[test]
fn no_coalescing_of_neighbours() {
    let allocator = allocator();

    let a = allocator.allocate(64).unwrap();
    let b = allocator.allocate(64).unwrap();
    unsafe {
        allocator.release(Some(a));
        allocator.release(Some(b));
    }

    // Two adjacent free blocks are still two blocks.
    let c = allocator.allocate(128).unwrap();
    assert_ne!(a, c);
    assert_ne!(b, c);
    assert_eq!(2, allocator.stats().free_blocks);
}

#[test]
fn diagnostics_do_not_change_behaviour() {
    let loud: Allocator<Arena> = Allocator::with_source(Arena::new(4096).unwrap(), Config::new());
    let quiet: Allocator<Arena> = Allocator::with_source(Arena::new(4096).unwrap(), Config::quiet());

    for allocator in [&loud, &quiet] {
        let a = allocator.allocate(100).unwrap();
        unsafe { allocator.release(Some(a)) };
        let _ = allocator.allocate(10).unwrap();
        let _ = allocator.allocate(300).unwrap();
    }

    assert_eq!(loud.stats(), quiet.stats());
}
