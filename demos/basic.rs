use std::ptr::NonNull;

use dmalloc::{Heap, HeapConfig};

fn log_alloc(addr: NonNull<u8>, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn print_free_list(heap: &Heap) {
    for block in heap.free_blocks() {
        println!(
            "\tsize: {}, head: {:p}, prev: {:?}, next: {:?}",
            block.size, block.addr, block.prev, block.next
        );
    }
}

fn main() {
    env_logger::init();

    let mut heap = Heap::with_config(HeapConfig::new().with_capacity(4096));

    let addr1 = heap.alloc(32).expect("heap has room");
    log_alloc(addr1, 32);

    let addr2 = heap.alloc(64).expect("heap has room");
    log_alloc(addr2, 64);

    let addr3 = heap.alloc(32).expect("heap has room");
    log_alloc(addr3, 32);

    unsafe { heap.free(addr2) };
    println!("Freed the middle block:");
    print_free_list(&heap);

    unsafe {
        heap.free(addr1);
        heap.free(addr3);
    }
    println!("Freed everything:");
    print_free_list(&heap);

    heap.dump();
    println!("{:?}", heap.stats());
}
