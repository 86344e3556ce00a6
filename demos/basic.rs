use heapalloc::{Allocator, Config};

fn log_alloc(addr: Option<std::ptr::NonNull<u8>>, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let allocator = Allocator::new(Config::quiet());

    let addr1 = allocator.allocate(8);
    log_alloc(addr1, 8);

    let addr2 = allocator.allocate(8);
    log_alloc(addr2, 8);

    let addr3 = allocator.allocate(16);
    log_alloc(addr3, 16);

    unsafe {
        allocator.release(addr1);
        allocator.release(addr2);
    }

    // The smallest free block is reused.
    let addr4 = allocator.allocate(4);
    log_alloc(addr4, 4);
    println!("Reused first block: {}", addr4 == addr1 || addr4 == addr2);

    let addr5 = unsafe { allocator.resize(addr3, 64) };
    log_alloc(addr5, 64);

    unsafe {
        allocator.release(addr4);
        allocator.release(addr5);
    }

    println!("{:?}", allocator.stats());
}
