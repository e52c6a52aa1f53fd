use crate::kernel::constants::MAX_WORKER_THREADS;
use crate::kernel::thread::{default_worker_capacity, hardware_concurrency, ThreadRole, ThreadToken};

#[test]
fn test_current_token_is_stable_on_one_thread() {
    assert_eq!(ThreadToken::current(), ThreadToken::current());
}

#[test]
fn test_tokens_differ_across_threads() {
    let here = ThreadToken::current();
    let there = std::thread::spawn(ThreadToken::current)
        .join()
        .expect("spawned thread panicked");

    assert_ne!(here, there);
    assert_eq!(here.role(here), ThreadRole::Designated);
    assert_eq!(there.role(here), ThreadRole::Worker);
    assert!(!there.role(here).is_designated());
}

#[test]
fn test_worker_capacity_is_capped() {
    assert!(hardware_concurrency() >= 1);
    assert!(default_worker_capacity() >= 1);
    assert!(default_worker_capacity() <= MAX_WORKER_THREADS);
    assert_eq!(default_worker_capacity(), hardware_concurrency().min(MAX_WORKER_THREADS));
}
