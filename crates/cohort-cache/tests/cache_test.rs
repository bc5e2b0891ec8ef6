//! Integration tests for KeyedCache over real work and sequences.

use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use cohort_broadcast::BroadcastSequence;
use cohort_cache::{CacheKey, EvictionStrategy, KeyedCache};
use cohort_core::WorkError;
use cohort_work::UnitOfWork;
use futures::channel::mpsc;
use futures::future::join_all;

type Fetch = UnitOfWork<usize, String>;

fn slow_fetch(counter: &Arc<AtomicUsize>, outcome: Result<usize, String>) -> Fetch {
  let counter = counter.clone();
  UnitOfWork::from_future_fn(move || {
    let counter = counter.clone();
    let outcome = outcome.clone();
    async move {
      counter.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(30)).await;
      outcome
    }
  })
  .lazy()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_requests_share_one_invocation() {
  const REQUESTS: usize = 4;

  let cache = KeyedCache::new();
  let key = CacheKey::of(&("profile", 7));
  let invocations = Arc::new(AtomicUsize::new(0));
  let factories = Arc::new(AtomicUsize::new(0));
  let barrier = Barrier::new(REQUESTS);

  // Each thread brings its own factory; all of them hit the cache at once.
  let works: Vec<Fetch> = thread::scope(|scope| {
    let handles: Vec<_> = (0..REQUESTS)
      .map(|request| {
        let (cache, invocations, factories, barrier) = (&cache, &invocations, &factories, &barrier);
        scope.spawn(move || {
          barrier.wait();
          cache
            .retrieve_or_create(key, || {
              factories.fetch_add(1, Ordering::SeqCst);
              slow_fetch(invocations, Ok(request))
            })
            .unwrap()
        })
      })
      .collect();
    handles
      .into_iter()
      .map(|handle| handle.join().unwrap())
      .collect()
  });

  assert_eq!(factories.load(Ordering::SeqCst), 1);
  assert!(works.iter().all(|work| work.id() == works[0].id()));

  let drivers: Vec<_> = works
    .into_iter()
    .map(|work| tokio::spawn(async move { work.execute().await }))
    .collect();
  let results: Vec<_> = join_all(drivers)
    .await
    .into_iter()
    .map(|joined| joined.unwrap())
    .collect();

  assert!(results[0].is_ok());
  assert!(results.iter().all(|result| *result == results[0]));
  assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failure_is_shared_then_evicted() {
  let cache = KeyedCache::new();
  let key = CacheKey::of("flaky");
  let invocations = Arc::new(AtomicUsize::new(0));

  let first: Fetch = cache
    .retrieve_or_create(key, || slow_fetch(&invocations, Err("E".to_string())))
    .unwrap();
  let second: Fetch = cache
    .retrieve_or_create(key, || slow_fetch(&invocations, Ok(1)))
    .unwrap();

  let (a, b) = tokio::join!(first.execute(), second.execute());
  assert_eq!(a, Err(WorkError::Operation("E".to_string())));
  assert_eq!(b, Err(WorkError::Operation("E".to_string())));
  assert_eq!(invocations.load(Ordering::SeqCst), 1);
  assert!(!cache.contains(key));

  // The settled work is gone, so the next request runs the new factory.
  let third: Fetch = cache
    .retrieve_or_create(key, || slow_fetch(&invocations, Ok(1)))
    .unwrap();
  assert_eq!(third.execute().await, Ok(1));
  assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_work_is_evicted() {
  let cache = KeyedCache::new();
  let key = CacheKey::of("cancelled");
  let invocations = Arc::new(AtomicUsize::new(0));

  let work: Fetch = cache
    .retrieve_or_create(key, || slow_fetch(&invocations, Ok(1)))
    .unwrap();
  work.cancel();

  assert!(!cache.contains(key));
  assert_eq!(work.execute().await, Err(WorkError::Cancelled));
}

#[tokio::test]
async fn test_manual_strategy_keeps_settled_work() {
  let cache = KeyedCache::with_strategy(EvictionStrategy::Manual);
  let key = CacheKey::of("kept");
  let invocations = Arc::new(AtomicUsize::new(0));

  let work: Fetch = cache
    .retrieve_or_create(key, || slow_fetch(&invocations, Ok(3)))
    .unwrap();
  assert_eq!(work.execute().await, Ok(3));

  let again: Fetch = cache
    .retrieve_or_create(key, || slow_fetch(&invocations, Ok(4)))
    .unwrap();
  assert_eq!(again.execute().await, Ok(3));
  assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_broadcast_sequence_is_shared_until_it_ends() {
  let cache = KeyedCache::new();
  let key = CacheKey::of("feed");
  let (tx, rx) = mpsc::unbounded::<Result<i32, String>>();

  let sequence: BroadcastSequence<i32, String> = cache
    .retrieve_or_create(key, move || BroadcastSequence::new(rx))
    .unwrap();
  let same: BroadcastSequence<i32, String> = cache
    .retrieve_or_create(key, || panic!("factory must not run on a hit"))
    .unwrap();

  let mut a = sequence.make_iterator();
  let mut b = same.make_iterator();
  tx.unbounded_send(Ok(1)).unwrap();
  drop(tx);

  assert_eq!(a.next().await, Ok(Some(1)));
  assert_eq!(b.next().await, Ok(Some(1)));
  assert_eq!(a.next().await, Ok(None));

  assert!(sequence.is_terminal());
  assert!(!cache.contains(key));
}

#[tokio::test]
async fn test_call_site_keys() {
  let cache = KeyedCache::new();
  let invocations = Arc::new(AtomicUsize::new(0));

  let mut works = Vec::new();
  for _ in 0..2 {
    let work: Fetch = cache
      .retrieve_or_create(cohort_cache::call_site!(), || {
        slow_fetch(&invocations, Ok(9))
      })
      .unwrap();
    works.push(work);
  }

  assert_eq!(cache.len(), 1);
  assert_eq!(works[0].id(), works[1].id());
}
