use bytes::BufMut;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tiered_bufpool::{DeallocationHook, PoolConfig, TieredBufferPool};

fn shared_pool(guard_len: usize) -> Arc<TieredBufferPool> {
    Arc::new(
        TieredBufferPool::with_hook(
            PoolConfig::new(vec![256, 4096, 32768]).with_guard_len(guard_len),
            Arc::new(DeallocationHook::unavailable()),
        )
        .unwrap(),
    )
}

#[test]
fn test_no_buffer_held_by_two_threads() {
    let pool = shared_pool(8);
    let in_use = Arc::new(Mutex::new(HashSet::new()));
    let violations = Arc::new(AtomicUsize::new(0));

    let num_threads = 8;
    let cycles = 500;
    let mut handles = vec![];

    for thread_id in 0..num_threads {
        let pool = Arc::clone(&pool);
        let in_use = Arc::clone(&in_use);
        let violations = Arc::clone(&violations);

        handles.push(thread::spawn(move || {
            let mut rng = rand::rng();
            for _ in 0..cycles {
                let size = rng.random_range(1..=40_000);
                let mut buf = pool.borrow(size).unwrap();

                if !in_use.lock().unwrap().insert(buf.id()) {
                    violations.fetch_add(1, Ordering::SeqCst);
                }

                // Stamp the whole visible window, then confirm nobody else did.
                let stamp = thread_id as u8;
                buf.put_bytes(stamp, size);
                if buf.as_slice().iter().any(|&b| b != stamp) {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                pool.check_guard(&buf).unwrap();

                in_use.lock().unwrap().remove(&buf.id());
                pool.return_buffer(buf).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_conservation_per_size_class() {
    let pool = shared_pool(0);
    let num_threads = 6;
    let cycles = 400;
    let running = Arc::new(AtomicBool::new(true));
    let mut handles = vec![];

    // Sample while the workers run; the invariant must hold mid-flight too.
    let sampler = {
        let pool = Arc::clone(&pool);
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let mut samples = 0usize;
            let mut excesses = Vec::new();
            while running.load(Ordering::Acquire) || samples == 0 {
                for class in pool.stats().classes {
                    if (class.idle + class.outstanding) as u64 > class.allocations {
                        excesses.push(class);
                    }
                }
                samples += 1;
            }
            (samples, excesses)
        })
    };

    for _ in 0..num_threads {
        let pool = Arc::clone(&pool);
        handles.push(thread::spawn(move || {
            let mut rng = rand::rng();
            let mut held = Vec::new();
            for _ in 0..cycles {
                // Hold a few buffers at a time so classes see real overlap.
                held.push(pool.borrow(rng.random_range(1..=32768)).unwrap());
                if held.len() > 3 || rng.random_bool(0.5) {
                    let index = rng.random_range(0..held.len());
                    pool.return_buffer(held.swap_remove(index)).unwrap();
                }
            }
            for buf in held {
                pool.return_buffer(buf).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    running.store(false, Ordering::Release);
    let (samples, excesses) = sampler.join().unwrap();
    assert!(samples > 0);
    assert!(excesses.is_empty(), "snapshots over allocation count: {excesses:?}");

    let stats = pool.stats();
    assert_eq!(stats.total_outstanding(), 0);
    assert_eq!(stats.oversized_allocations, 0);

    for class in &stats.classes {
        assert_eq!(class.outstanding, 0);
        assert_eq!(
            class.idle as u64, class.allocations,
            "every allocation for class {} is idle again",
            class.boundary
        );
        assert!(class.allocations <= (num_threads * 4) as u64);
        assert_eq!(class.reuses + class.allocations, class.returns);
    }
}

#[test]
fn test_concurrent_oversized_traffic_bypasses_queues() {
    let pool = shared_pool(8);
    let mut handles = vec![];

    for _ in 0..4 {
        let pool = Arc::clone(&pool);
        handles.push(thread::spawn(move || {
            for i in 0..50 {
                let buf = pool.borrow(40_000 + i).unwrap();
                assert_eq!(buf.capacity(), 40_008 + i);
                pool.return_buffer(buf).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.oversized_allocations, 200);
    assert_eq!(stats.oversized_releases, 200);
    assert_eq!(stats.total_idle(), 0);
    assert_eq!(pool.hook().releases(), 200);
}
