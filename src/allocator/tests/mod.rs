use crate::arena::VecArena;
use crate::block::DSIZE;

use super::*;

fn trace_init() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// A zero min-increment makes the arena grow by exactly what is asked,
// which keeps the layouts below predictable.
fn fresh() -> SegMalloc<VecArena> {
    SegMalloc::init(VecArena::new(0)).unwrap()
}

#[test]
fn test_1() {
    let alloc = fresh();
    assert_eq!(alloc.heap_len(), 2 * DSIZE + CHUNK_SIZE);
    assert_eq!(alloc.free_block_count(), 1);
    alloc.check_heap("test_1");
}

#[test]
fn test_2() {
    // Every allocation is 8-aligned and payloads never overlap.
    let mut alloc = fresh();
    let sizes = [1, 2, 7, 8, 9, 15, 16, 50, 63, 64, 100, 1000, 4096];
    let mut blocks = vec![];
    for (i, &size) in sizes.iter().enumerate() {
        let fill = i as u8 + 1;
        let bp = alloc.malloc(size).unwrap();
        assert_eq!(bp % DSIZE, 0);
        assert!(alloc.payload_capacity(bp) >= size);
        alloc.payload_mut(bp)[..size].fill(fill);
        blocks.push((bp, size, fill));
        alloc.check_heap("test_2");
    }
    for &(bp, size, fill) in &blocks {
        assert!(alloc.payload(bp)[..size].iter().all(|&b| b == fill));
    }
}

#[test]
fn test_3() {
    // free(malloc(s)) leaves a consistent heap for any s, and everything
    // coalesces back into a single free block.
    let mut alloc = fresh();
    for size in 1..200 {
        let bp = alloc.malloc(size).unwrap();
        alloc.free(bp);
        alloc.check_heap("test_3");
        assert_eq!(alloc.free_block_count(), 1);
    }
}

#[test]
fn test_4() {
    // A small request is served out of a freed block instead of growing the
    // arena.
    let mut alloc = fresh();
    let a = alloc.malloc(100).unwrap();
    let b = alloc.malloc(200).unwrap();
    alloc.payload_mut(b)[..200].fill(0xB0);
    let len = alloc.heap_len();

    alloc.free(a);
    let c = alloc.malloc(50).unwrap();
    assert_eq!(alloc.heap_len(), len, "50 bytes must fit in the freed region");
    assert!(c < len);
    assert!(alloc.payload(b)[..200].iter().all(|&x| x == 0xB0));
    alloc.check_heap("test_4");
}

#[test]
fn test_5() {
    // With a request too big for the leftover tail, the freed block itself
    // is reused: first fit skips the too-small head of the lower bin and
    // escalates to the bin holding the freed block.
    let mut alloc = fresh();
    let a = alloc.malloc(100).unwrap();
    let _b = alloc.malloc(200).unwrap();
    let len = alloc.heap_len();

    alloc.free(a);
    let c = alloc.malloc(92).unwrap();
    assert_eq!(c, a);
    assert_eq!(alloc.heap_len(), len);
    alloc.check_heap("test_5");
}

#[test]
fn test_6() {
    // Perfect reuse: a malloc/free pair repeated 1000 times never grows the
    // arena past the first allocation's footprint.
    let mut alloc = fresh();
    let p = alloc.malloc(64).unwrap();
    alloc.free(p);
    let len = alloc.heap_len();

    for _ in 0..1000 {
        let p = alloc.malloc(64).unwrap();
        alloc.payload_mut(p)[..64].fill(0x5A);
        alloc.free(p);
        assert_eq!(alloc.heap_len(), len);
    }
    alloc.check_heap("test_6");
    assert_eq!(alloc.free_block_count(), 1);
}

#[test]
fn test_7() {
    // A freed large block is reused for an equally large request instead of
    // extending the arena.
    let mut alloc = fresh();
    let p1 = alloc.malloc(4096).unwrap();
    let _p2 = alloc.malloc(8).unwrap();
    alloc.free(p1);
    let len = alloc.heap_len();

    let p3 = alloc.malloc(4096).unwrap();
    assert_eq!(p3, p1);
    assert_eq!(alloc.heap_len(), len);
    alloc.check_heap("test_7");
}

#[test]
fn test_8() {
    // realloc always relocates and preserves the common prefix.
    let mut alloc = fresh();
    let p = alloc.malloc(100).unwrap();
    for i in 0..100 {
        alloc.payload_mut(p)[i] = i as u8;
    }

    let q = alloc.realloc(p, 50).unwrap();
    for i in 0..50 {
        assert_eq!(alloc.payload(q)[i], i as u8);
    }
    alloc.check_heap("test_8");

    let r = alloc.realloc(q, 500).unwrap();
    assert_ne!(r, q, "growth must relocate");
    for i in 0..50 {
        assert_eq!(alloc.payload(r)[i], i as u8);
    }
    alloc.check_heap("test_8");

    // realloc to zero frees; a null offset reallocs like malloc.
    assert!(alloc.realloc(r, 0).is_none());
    assert_eq!(alloc.free_block_count(), 1);
    let s = alloc.realloc(0, 40).unwrap();
    assert_eq!(s % DSIZE, 0);
    alloc.check_heap("test_8");
}

#[test]
fn test_9() {
    // calloc zero-fills even when it reuses a dirtied region.
    let mut alloc = fresh();
    let dirty = alloc.malloc(300).unwrap();
    alloc.payload_mut(dirty)[..300].fill(0xFF);
    alloc.free(dirty);

    let p = alloc.calloc(10, 25).unwrap();
    assert!(alloc.payload(p)[..250].iter().all(|&b| b == 0));
    alloc.check_heap("test_9");

    assert!(alloc.calloc(0, 8).is_none());
    assert!(alloc.calloc(8, 0).is_none());
}

#[test]
fn test_10() {
    // Null-offset and zero-size edges.
    let mut alloc = fresh();
    assert!(alloc.malloc(0).is_none());
    alloc.free(0);
    assert!(alloc.realloc(0, 0).is_none());
    alloc.check_heap("test_10");
}

#[test]
fn test_11() {
    // Exhaustion returns None without touching any existing block.
    let mut alloc = SegMalloc::init(VecArena::with_limit(0, 256)).unwrap();
    let p = alloc.malloc(32).unwrap();
    alloc.payload_mut(p)[..32].fill(7);
    let len = alloc.heap_len();

    assert!(alloc.malloc(10_000).is_none());
    assert!(alloc.realloc(p, 10_000).is_none());
    assert_eq!(alloc.heap_len(), len);
    assert!(alloc.payload(p)[..32].iter().all(|&b| b == 7));
    alloc.check_heap("test_11");
}

#[test]
#[should_panic(expected = "check_heap(double-free)")]
fn test_12() {
    let mut alloc = fresh();
    let a = alloc.malloc(24).unwrap();
    let b = alloc.malloc(24).unwrap();
    alloc.free(a);
    alloc.free(a);
    let _ = b;
    alloc.check_heap("double-free");
}

#[test]
fn test_13() {
    // All four coalescing cases, in order: both neighbors allocated,
    // previous free, next free, both free.
    let mut alloc = fresh();
    let a = alloc.malloc(32).unwrap();
    let b = alloc.malloc(32).unwrap();
    let c = alloc.malloc(32).unwrap();
    let d = alloc.malloc(32).unwrap();
    alloc.check_heap("test_13");

    alloc.free(b);
    alloc.check_heap("test_13");
    alloc.free(c);
    alloc.check_heap("test_13");
    alloc.free(a);
    alloc.check_heap("test_13");

    // a..c now form one free block, big enough for a single larger request.
    let e = alloc.malloc(100).unwrap();
    assert_eq!(e, a);
    alloc.check_heap("test_13");

    // d sits between two free remainders; freeing it merges all three.
    alloc.free(d);
    alloc.check_heap("test_13");
    assert_eq!(alloc.free_block_count(), 1);

    alloc.free(e);
    alloc.check_heap("test_13");
    assert_eq!(alloc.free_block_count(), 1);
}

#[test]
fn test_14() {
    // A spread of sizes populates several bins; partial frees and a large
    // escalating request keep everything consistent.
    trace_init();
    let mut alloc = fresh();
    let mut blocks = vec![];
    for i in 0..40 {
        blocks.push(alloc.malloc(17 * (i + 1)).unwrap());
    }
    for i in (0..40).step_by(2) {
        alloc.free(blocks[i]);
    }
    alloc.check_heap("test_14");
    alloc.dump();

    let big = alloc.malloc(3000).unwrap();
    assert_eq!(big % DSIZE, 0);
    alloc.check_heap("test_14");

    for i in (1..40).step_by(2) {
        alloc.free(blocks[i]);
    }
    alloc.free(big);
    alloc.check_heap("test_14");
    assert_eq!(alloc.free_block_count(), 1);
}

#[test]
fn test_15() {
    // Same-bin split: the remainder inherits the original block's list
    // position instead of going through an unlink/insert pair.
    let mut alloc = fresh();
    let big = alloc.malloc(496).unwrap();
    let guard = alloc.malloc(16).unwrap();
    alloc.free(big); // 504-byte block, bin 2

    let len = alloc.heap_len();
    let small = alloc.malloc(100).unwrap(); // 104 bytes; the 400-byte remainder stays in bin 2
    assert_eq!(small, big);
    assert_eq!(alloc.heap_len(), len);
    alloc.check_heap("test_15");

    // The remainder is still reachable for an exact fit.
    let rest = alloc.malloc(392).unwrap();
    assert_eq!(alloc.heap_len(), len);
    alloc.check_heap("test_15");

    alloc.free(small);
    alloc.free(rest);
    alloc.free(guard);
    alloc.check_heap("test_15");
    assert_eq!(alloc.free_block_count(), 1);
}
