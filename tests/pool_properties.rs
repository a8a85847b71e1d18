use bytes::BufMut;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tiered_bufpool::{
    DeallocationHook, Error, GuardedBuffer, PoolConfig, TieredBufferPool, GUARD_BYTE,
};
use tracing_test::traced_test;

const BOUNDARIES: [usize; 3] = [1024, 8192, 65536];
const GUARD: usize = 8;

fn test_pool() -> TieredBufferPool {
    TieredBufferPool::with_hook(
        PoolConfig::new(BOUNDARIES.to_vec()).with_guard_len(GUARD),
        Arc::new(DeallocationHook::unavailable()),
    )
    .unwrap()
}

#[test]
#[traced_test]
fn test_documented_scenario() {
    let pool = test_pool();

    let buf = pool.borrow(500).unwrap();
    assert_eq!(buf.len(), 500);
    assert_eq!(buf.capacity(), 1032);
    let id = buf.id();
    pool.return_buffer(buf).unwrap();

    let buf = pool.borrow(700).unwrap();
    assert_eq!(buf.id(), id, "same physical buffer reused");
    assert_eq!(buf.len(), 700);
    assert!(buf.physical()[1024..].iter().all(|&b| b == GUARD_BYTE));
    pool.return_buffer(buf).unwrap();

    let big = pool.borrow(100_000).unwrap();
    assert_eq!(big.len(), 100_000);
    assert_eq!(big.capacity() - GUARD, 100_000);
    assert!(logs_contain("exceeds the largest size class"));
    assert!(logs_contain("requested=100000"));

    pool.return_buffer(big).unwrap();
    assert_eq!(pool.hook().releases(), 1);
    let stats = pool.stats();
    assert_eq!(stats.oversized_releases, 1);
    assert_eq!(stats.total_idle(), 1);
}

#[test]
fn test_class_boundaries_are_inclusive() {
    let pool = test_pool();
    let cases = [
        (1, 1024),
        (1024, 1024),
        (1025, 8192),
        (8192, 8192),
        (8193, 65536),
        (65536, 65536),
    ];

    for (size, boundary) in cases {
        let buf = pool.borrow(size).unwrap();
        assert_eq!(buf.len(), size);
        assert_eq!(buf.capacity(), boundary + GUARD, "size {size}");
        pool.return_buffer(buf).unwrap();
    }
}

#[test]
fn test_oversized_buffer_never_requeued() {
    let pool = test_pool();

    let big = pool.borrow(65537).unwrap();
    let big_id = big.id();
    assert_eq!(big.capacity(), 65537 + GUARD);
    pool.return_buffer(big).unwrap();

    // Drain every class: none of them may hand back the oversized buffer.
    let mut held = Vec::new();
    for &boundary in &BOUNDARIES {
        for _ in 0..4 {
            let buf = pool.borrow(boundary).unwrap();
            assert_ne!(buf.id(), big_id);
            held.push(buf);
        }
    }
    for buf in held {
        pool.return_buffer(buf).unwrap();
    }
}

#[test]
fn test_reuse_never_reallocates_beyond_peak() {
    let pool = test_pool();
    let peak = 5;

    for round in 0..20 {
        let held: Vec<GuardedBuffer> = (0..peak)
            .map(|i| pool.borrow(100 + round * 10 + i).unwrap())
            .collect();
        for buf in &held {
            assert!(buf.physical()[1024..].iter().all(|&b| b == GUARD_BYTE));
        }
        for buf in held {
            pool.return_buffer(buf).unwrap();
        }
    }

    let small = pool.stats().classes[0];
    assert_eq!(small.boundary, 1024);
    assert_eq!(small.allocations, peak as u64);
    assert_eq!(small.reuses, 19 * peak as u64);
    assert_eq!(small.idle, peak);
    assert_eq!(small.outstanding, 0);
}

#[test]
fn test_guard_integrity() {
    let pool = test_pool();

    let mut buf = pool.borrow(300).unwrap();
    buf.put_slice(&[0xAB; 300]);
    pool.check_guard(&buf).unwrap();

    // Raw I/O writing one byte too many lands in the guard.
    buf.physical_mut()[1024] = 0xAB;
    match pool.check_guard(&buf) {
        Err(Error::GuardViolation {
            buffer_id,
            capacity,
            offset,
            ..
        }) => {
            assert_eq!(buffer_id, buf.id());
            assert_eq!(capacity, 1032);
            assert_eq!(offset, 1024);
        }
        other => panic!("expected guard violation, got {other:?}"),
    }
    assert_eq!(buf.len(), 300);
}

#[test]
fn test_write_up_to_data_capacity_keeps_guard() {
    let pool = test_pool();
    let mut buf = pool.borrow(1024).unwrap();
    buf.physical_mut()[..1024].fill(0xFF);
    pool.check_guard(&buf).unwrap();
}

#[test]
fn test_unmanaged_capacity_rejected() {
    let pool = test_pool();
    let stranger = GuardedBuffer::allocate(5000 + GUARD, GUARD).unwrap();

    let err = pool.return_buffer(stranger).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, Error::CapacityMismatch { capacity: 5008, .. }));
    assert_eq!(pool.stats().total_idle(), 0);
}

#[test]
fn test_disabled_guard_has_no_trailing_bytes() {
    let pool = TieredBufferPool::with_hook(
        PoolConfig::new(vec![128]).with_guard_len(0),
        Arc::new(DeallocationHook::unavailable()),
    )
    .unwrap();

    let mut buf = pool.borrow(128).unwrap();
    assert_eq!(buf.capacity(), 128);
    buf.physical_mut().fill(0x11);
    pool.check_guard(&buf).unwrap();
    pool.return_buffer(buf).unwrap();
}

#[test]
fn test_small_class_buffers_share_pages() {
    let pool = TieredBufferPool::with_hook(
        PoolConfig::new(vec![256]).with_guard_len(GUARD),
        Arc::new(DeallocationHook::unavailable()),
    )
    .unwrap();
    let page = tiered_bufpool::pool::page_size();

    let held: Vec<GuardedBuffer> = (0..256).map(|_| pool.borrow(200).unwrap()).collect();
    let pages: HashSet<usize> = held
        .iter()
        .map(|b| b.physical().as_ptr() as usize / page)
        .collect();
    assert!(
        pages.len() * 2 < held.len(),
        "{} buffers of {} bytes spread over {} pages",
        held.len(),
        256 + GUARD,
        pages.len()
    );

    for buf in held {
        pool.return_buffer(buf).unwrap();
    }
}

#[test]
fn test_pool_from_comma_separated_sizes() {
    let boundaries = PoolConfig::parse_boundaries("512, 51200").unwrap();
    let pool = TieredBufferPool::with_hook(
        PoolConfig::new(boundaries).with_guard_len(GUARD),
        Arc::new(DeallocationHook::unavailable()),
    )
    .unwrap();

    assert_eq!(pool.boundaries(), &[512, 51200]);
    let buf = pool.borrow(65000).unwrap();
    assert_eq!(buf.capacity(), 65000 + GUARD);
    pool.return_buffer(buf).unwrap();
    assert_eq!(pool.stats().oversized_releases, 1);
}

proptest! {
    #[test]
    fn prop_borrow_picks_smallest_covering_class(size in 1usize..=65536) {
        let pool = test_pool();
        let expected = BOUNDARIES.iter().copied().find(|&b| b >= size).unwrap();

        let buf = pool.borrow(size).unwrap();
        prop_assert_eq!(buf.len(), size);
        prop_assert_eq!(buf.capacity(), expected + GUARD);
        prop_assert!(pool.check_guard(&buf).is_ok());
        pool.return_buffer(buf).unwrap();
    }

    #[test]
    fn prop_oversized_fits_exactly(size in 65537usize..300_000) {
        let pool = test_pool();
        let buf = pool.borrow(size).unwrap();
        prop_assert_eq!(buf.len(), size);
        prop_assert_eq!(buf.capacity(), size + GUARD);
        pool.return_buffer(buf).unwrap();
        prop_assert_eq!(pool.stats().total_idle(), 0);
    }
}
