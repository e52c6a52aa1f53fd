use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use super::support::{counting_factory, CountingHost, CountingResource, HookCounts};
use crate::config::LaunchConfig;
use crate::kernel::constants::MAX_WORKER_THREADS;
use crate::kernel::thread::{default_worker_capacity, ThreadToken};
use crate::resource_pool::{DetachedHost, PoolToken, ResourcePool, ResourcePoolError};

fn provisioned_pool(capacity: usize, counts: &Arc<HookCounts>) -> ResourcePool {
    let pool = ResourcePool::with_capacity(ThreadToken::current(), capacity);
    let created = pool
        .provision(&DetachedHost, counting_factory(counts), || true)
        .expect("provisioning should succeed");
    assert_eq!(created, pool.capacity());
    pool
}

#[test]
fn test_capacity_defaults_and_clamps() {
    let here = ThreadToken::current();
    assert_eq!(ResourcePool::new(here).capacity(), default_worker_capacity());
    assert_eq!(ResourcePool::with_capacity(here, 3).capacity(), 3);
    assert_eq!(
        ResourcePool::with_capacity(here, 64).capacity(),
        MAX_WORKER_THREADS
    );

    let config = LaunchConfig::default().with_pool_capacity(2);
    assert_eq!(ResourcePool::with_config(here, &config).capacity(), 2);
}

#[test]
fn test_designated_thread_gets_empty_token() {
    let pool = ResourcePool::with_capacity(ThreadToken::current(), 2);

    // No provisioning needed: the designated thread never draws from the pool
    let token = pool.acquire();
    assert!(token.is_designated());
    assert!(token.resource().is_none());
    pool.release(token);

    let token = pool.try_acquire().expect("designated try_acquire always succeeds");
    assert!(token.is_designated());
    pool.release(token);
    assert_eq!(pool.active(), 0);
}

#[test]
fn test_provision_skipped_when_not_needed() {
    let counts = Arc::new(HookCounts::default());
    let host = CountingHost::default();
    let pool = ResourcePool::with_capacity(ThreadToken::current(), 4);

    let created = pool
        .provision(&host, counting_factory(&counts), || false)
        .expect("cancelled provisioning is not an error");

    assert_eq!(created, 0);
    assert_eq!(pool.provisioned_entries(), 0);
    assert!(pool.is_provisioned());
    assert_eq!(HookCounts::get(&host.suspended), 1);
    assert_eq!(HookCounts::get(&host.resumed), 1);
}

#[test]
fn test_provision_stops_early_keeping_created_entries() {
    let counts = Arc::new(HookCounts::default());
    let pool = ResourcePool::with_capacity(ThreadToken::current(), 4);
    let mut budget = 2;

    let created = pool
        .provision(&DetachedHost, counting_factory(&counts), || {
            budget -= 1;
            budget >= 0
        })
        .expect("provisioning should succeed");

    assert_eq!(created, 2);
    assert_eq!(pool.available(), 2);
    // Every fresh resource is unbound from the creating thread
    assert_eq!(HookCounts::get(&counts.clear_current), 2);
}

#[test]
fn test_provision_fills_capacity() {
    let counts = Arc::new(HookCounts::default());
    let host = CountingHost::default();
    let pool = ResourcePool::with_capacity(ThreadToken::current(), 3);

    let created = pool
        .provision(&host, counting_factory(&counts), || true)
        .expect("provisioning should succeed");

    assert_eq!(created, 3);
    assert_eq!(pool.available(), 3);
    assert_eq!(pool.active(), 0);
    assert_eq!(HookCounts::get(&host.suspended), 1);
    assert_eq!(HookCounts::get(&host.resumed), 1);
}

#[test]
fn test_factory_failure_is_reported_and_primary_resumed() {
    let counts = Arc::new(HookCounts::default());
    let host = CountingHost::default();
    let pool = ResourcePool::with_capacity(ThreadToken::current(), 4);

    let result = pool.provision(
        &host,
        |index| {
            if index == 1 {
                Err(std::io::Error::other("device lost"))
            } else {
                Ok(CountingResource::new(index, Arc::clone(&counts)))
            }
        },
        || true,
    );

    match result {
        Err(ResourcePoolError::ResourceCreation { index, source }) => {
            assert_eq!(index, 1);
            assert!(source.to_string().contains("device lost"));
        }
        other => panic!("Expected ResourceCreation, got {:?}", other),
    }
    assert_eq!(pool.provisioned_entries(), 1, "entries created before the failure stay");
    assert!(pool.is_provisioned());
    assert_eq!(HookCounts::get(&host.resumed), 1);
}

#[test]
#[should_panic(expected = "already provisioned")]
fn test_second_provision_aborts() {
    let counts = Arc::new(HookCounts::default());
    let pool = provisioned_pool(1, &counts);
    let _ = pool.provision(&DetachedHost, counting_factory(&counts), || true);
}

#[test]
fn test_provision_off_designated_thread_aborts() {
    let pool = ResourcePool::with_capacity(ThreadToken::current(), 1);
    let counts = Arc::new(HookCounts::default());

    let outcome = thread::scope(|scope| {
        scope
            .spawn(|| {
                let _ = pool.provision(&DetachedHost, counting_factory(&counts), || true);
            })
            .join()
    });

    assert!(outcome.is_err(), "provision from a worker thread must abort");
    assert_eq!(pool.provisioned_entries(), 0);
}

#[test]
fn test_worker_acquire_and_release_run_hooks() {
    let counts = Arc::new(HookCounts::default());
    let pool = provisioned_pool(1, &counts);
    let clears_after_provision = HookCounts::get(&counts.clear_current);

    thread::scope(|scope| {
        scope.spawn(|| {
            let token = pool.acquire();
            assert!(!token.is_designated());
            assert_eq!(token.index(), Some(0));
            let entry = token.entry().expect("worker token carries an entry");
            assert_eq!(entry.owner(), Some(ThreadToken::current()));
            assert!(entry.is_active());
            assert_eq!(pool.active(), 1);
            assert_eq!(pool.available(), 0);
            pool.release(token);
        });
    });

    assert_eq!(HookCounts::get(&counts.make_current), 1);
    assert_eq!(HookCounts::get(&counts.released), 1);
    assert_eq!(HookCounts::get(&counts.clear_current), clears_after_provision + 1);
    assert_eq!(pool.available(), 1);
    assert_eq!(pool.active(), 0);
}

#[test]
fn test_worker_blocks_until_entry_released() {
    let counts = Arc::new(HookCounts::default());
    let pool = provisioned_pool(1, &counts);
    let held = Barrier::new(2);
    let (release_tx, release_rx) = mpsc::channel::<()>();

    thread::scope(|scope| {
        scope.spawn(|| {
            let release_rx = release_rx;
            let token = pool.acquire();
            held.wait();
            release_rx.recv().expect("release signal");
            pool.release(token);
        });

        let waiter = scope.spawn(|| {
            held.wait();
            assert!(pool.try_acquire().is_none(), "pool is exhausted");
            assert!(
                pool.acquire_timeout(Duration::from_millis(20)).is_none(),
                "no entry frees up while the holder sleeps"
            );
            release_tx.send(()).expect("holder is alive");
            let token = pool.acquire();
            assert_eq!(token.index(), Some(0));
            pool.release(token);
        });
        waiter.join().expect("waiter thread panicked");
    });

    assert_eq!(pool.available(), 1);
}

#[test]
fn test_active_entries_never_exceed_capacity() {
    let counts = Arc::new(HookCounts::default());
    let pool = provisioned_pool(2, &counts);
    let in_use = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..6 {
            scope.spawn(|| {
                for _ in 0..25 {
                    let guard = pool.scoped();
                    assert!(guard.resource().is_some());
                    let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    in_use.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert!(peak.load(Ordering::SeqCst) <= 2, "peak {} exceeds capacity", peak.load(Ordering::SeqCst));
    assert_eq!(pool.available(), 2);
    assert_eq!(pool.active(), 0);
    assert_eq!(
        HookCounts::get(&counts.make_current),
        HookCounts::get(&counts.released)
    );
}

#[test]
fn test_worker_waits_for_provisioning_to_start() {
    let counts = Arc::new(HookCounts::default());
    let pool = ResourcePool::with_capacity(ThreadToken::current(), 1);
    let (started_tx, started_rx) = mpsc::channel::<()>();

    thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let started_tx = started_tx;
            started_tx.send(()).expect("test thread is alive");
            // Nothing is provisioned yet: this must block, not abort
            let token = pool.acquire();
            let index = token.index();
            pool.release(token);
            index
        });

        started_rx.recv().expect("worker started");
        thread::sleep(Duration::from_millis(20));
        assert!(!pool.is_provisioned());
        pool.provision(&DetachedHost, counting_factory(&counts), || true)
            .expect("provisioning should succeed");

        assert_eq!(worker.join().expect("worker panicked"), Some(0));
    });
    assert_eq!(pool.available(), 1);
}

#[test]
fn test_worker_acquire_on_empty_sealed_pool_aborts() {
    let counts = Arc::new(HookCounts::default());
    let pool = ResourcePool::with_capacity(ThreadToken::current(), 2);
    assert!(!pool.is_sealed_empty(), "an unprovisioned pool may still fill");
    pool.provision(&DetachedHost, counting_factory(&counts), || false)
        .expect("cancelled provisioning is not an error");
    assert!(pool.is_sealed_empty());

    let outcome = thread::scope(|scope| {
        scope
            .spawn(|| {
                let token = pool.acquire();
                pool.release(token);
            })
            .join()
    });
    assert!(outcome.is_err(), "an empty sealed pool can never satisfy a worker");
}

#[test]
fn test_acquire_available_reports_empty_seal() {
    let counts = Arc::new(HookCounts::default());
    let pool = ResourcePool::with_capacity(ThreadToken::current(), 2);
    let (started_tx, started_rx) = mpsc::channel::<()>();

    thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let started_tx = started_tx;
            started_tx.send(()).expect("test thread is alive");
            let first = pool.acquire_available().map(|token| {
                pool.release(token);
            });
            let timed = pool.acquire_timeout(Duration::from_secs(5));
            (first.is_some(), timed.is_some())
        });

        started_rx.recv().expect("worker started");
        thread::sleep(Duration::from_millis(20));
        pool.provision(&DetachedHost, counting_factory(&counts), || false)
            .expect("cancelled provisioning is not an error");

        // Both calls return as soon as the pool seals empty
        assert_eq!(worker.join().expect("worker panicked"), (false, false));
    });
    assert!(pool.acquire_available().is_some_and(|token| token.is_designated()));
}

#[test]
#[should_panic(expected = "Invalid pool token")]
fn test_designated_thread_cannot_release_worker_entry() {
    let counts = Arc::new(HookCounts::default());
    let pool = provisioned_pool(1, &counts);

    let token: PoolToken = thread::scope(|scope| {
        scope
            .spawn(|| pool.acquire())
            .join()
            .expect("worker acquire")
    });
    pool.release(token);
}

#[test]
fn test_worker_cannot_release_designated_token() {
    let counts = Arc::new(HookCounts::default());
    let pool = provisioned_pool(1, &counts);
    let token = pool.acquire();

    let outcome = thread::scope(|scope| scope.spawn(|| pool.release(token)).join());
    assert!(outcome.is_err());
    assert_eq!(pool.available(), 1);
}
