//! Runs the whole program on a [`LockedHeap`] and shows how first-fit and
//! coalescing decide where allocations land.
//!
//! Addresses are compared right after the allocations that produce them,
//! before anything is printed, so the runtime's own allocations can't get in
//! between.

use std::thread;

use dmalloc::{HEADER_SIZE, LockedHeap};

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::new();

fn report(what: &str, expected: *const u8, got: *const u8) {
    let verdict = if expected == got { "same block" } else { "elsewhere" };
    println!("{what}: expected {expected:p}, got {got:p} ({verdict})");
}

fn main() {
    let before = ALLOCATOR.lock().stats();
    println!("Before: {before:?}");

    // A freed hole is taken by the next request that fits in it with room
    // for a header to spare.
    let a = Box::new([1u8; 64]);
    let b = Box::new([2u8; 64]);
    let c = Box::new([3u8; 64]);
    let hole = b.as_ptr();
    drop(b);
    let d = Box::new([4u8; 64 - HEADER_SIZE]);
    report("Hole reuse", hole, d.as_ptr());

    // Freeing two neighbours merges them into a block of 64 + HEADER_SIZE + 64
    // bytes. A 128 byte request needs exactly that once its own header is
    // counted, so it starts where the first neighbour did.
    let first = a.as_ptr();
    drop(a);
    drop(d);
    let merged = Box::new([5u8; 128]);
    report("Merged neighbours", first, merged.as_ptr());

    drop(merged);
    drop(c);

    // Growing a vector moves it to the first block large enough each time.
    let mut v: Vec<u64> = Vec::new();
    for i in 0..64 {
        let old = v.as_ptr();
        v.push(i);
        if v.as_ptr() != old {
            println!("Vec moved to {:p}, capacity {}", v.as_ptr(), v.capacity());
        }
    }
    drop(v);

    // Every thread goes through the same lock.
    let workers: Vec<_> = (0..4)
        .map(|id| {
            thread::spawn(move || {
                let data: Vec<usize> = (0..100).map(|n| n * id).collect();
                data.iter().sum::<usize>()
            })
        })
        .collect();
    for worker in workers {
        println!("Worker sum: {}", worker.join().unwrap());
    }

    let after = ALLOCATOR.lock().stats();
    println!("After: {after:?}");
    println!(
        "Free bytes changed by {} bytes, largest free block is {} bytes",
        after.free_bytes as isize - before.free_bytes as isize,
        after.largest_free
    );
}
