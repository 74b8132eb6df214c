//! Integration Tests for Memo
//!
//! Drives `Memo` through its public API only: loading, subscription,
//! retry after rejection, manual override and reload.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::StreamExt;
use memo_cache::{Atom, CacheError, CacheState, Memo, ReactiveStore};
use tokio::time::{sleep, timeout};

// == Helper Functions ==

type Loader = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// Loader that resolves `"loaded"` after `delay` and counts its calls.
fn loaded_after(calls: &Arc<AtomicUsize>, delay: Duration) -> Loader {
    let calls = Arc::clone(calls);
    Box::new(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            sleep(delay).await;
            Ok::<_, anyhow::Error>("loaded".to_string())
        }
        .boxed()
    })
}

/// Loader that rejects with `"rejected"` first, then resolves `"resolved"`.
fn reject_then_resolve(calls: &Arc<AtomicUsize>) -> Loader {
    let calls = Arc::clone(calls);
    Box::new(move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            sleep(Duration::from_millis(5)).await;
            if n == 1 {
                Err(anyhow!("rejected"))
            } else {
                Ok("resolved".to_string())
            }
        }
        .boxed()
    })
}

fn memo_with(loader: Loader) -> Memo<String> {
    Memo::from_loader(move || loader())
}

const WAIT: Duration = Duration::from_secs(2);

// == Scenarios ==

#[tokio::test]
async fn test_scenario_get_before_and_after_subscribe() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo_with(loaded_after(&calls, Duration::from_millis(10)));

    assert_eq!(*memo.get().await.unwrap(), "loaded");

    let mut sub = memo.subscribe();
    assert_eq!(*sub.next().await.unwrap().unwrap(), "loaded");
    assert_eq!(*memo.get().await.unwrap(), "loaded");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_scenario_resubscribe_after_rejection() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo_with(reject_then_resolve(&calls));

    let mut first = memo.subscribe();
    let err = first.next().await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "rejected");
    assert!(first.next().await.is_none());
    drop(first);

    let mut second = memo.subscribe();
    let value = timeout(WAIT, second.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(*value, "resolved");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// == Properties ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_across_threads() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo_with(loaded_after(&calls, Duration::from_millis(30)));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let memo = memo.clone();
            tokio::spawn(async move { memo.get().await })
        })
        .collect();

    let values: Vec<_> = future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|value| Arc::ptr_eq(value, &values[0])));
}

#[tokio::test]
async fn test_single_flight_shares_rejection() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo_with(reject_then_resolve(&calls));

    let results = future::join_all((0..8).map(|_| memo.get())).await;
    let errors: Vec<CacheError> = results.into_iter().map(|r| r.unwrap_err()).collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(errors.iter().all(|err| err.same(&errors[0])));
    assert!(memo.state().is_rejected());
}

#[tokio::test]
async fn test_cached_value_served_without_reload() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo_with(loaded_after(&calls, Duration::ZERO));

    for _ in 0..10 {
        assert_eq!(*memo.get().await.unwrap(), "loaded");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(memo.stats().hits, 9);
}

#[tokio::test]
async fn test_clear_forces_reload_from_any_settled_state() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo_with(reject_then_resolve(&calls));

    assert!(memo.get().await.is_err());
    memo.clear();
    assert_eq!(*memo.get().await.unwrap(), "resolved");
    memo.clear();
    assert_eq!(*memo.get().await.unwrap(), "resolved");

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_manual_set_skips_loader() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo_with(loaded_after(&calls, Duration::ZERO));

    memo.set("manual".to_string());
    assert_eq!(*memo.get().await.unwrap(), "manual");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_modify_only_touches_fulfilled_state() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo_with(reject_then_resolve(&calls));

    memo.modify_if_fulfilled(|value| format!("{value}!"));
    assert!(memo.state().is_idle());

    assert!(memo.get().await.is_err());
    memo.modify_if_fulfilled(|value| format!("{value}!"));
    assert!(memo.state().is_rejected());

    memo.set("ok".to_string());
    memo.modify_if_fulfilled(|value| format!("{value}!"));
    assert_eq!(memo.state().value().map(|v| v.as_str()), Some("ok!"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_construction_is_lazy() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo_with(loaded_after(&calls, Duration::ZERO));

    sleep(Duration::from_millis(20)).await;
    assert!(memo.state().is_idle());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let _sub = memo.subscribe();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_one_error_per_rejection_cycle() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo_with(reject_then_resolve(&calls));

    let mut errors = 0;
    let mut value = None;
    for _ in 0..3 {
        let mut sub = memo.subscribe();
        match timeout(WAIT, sub.next()).await.unwrap() {
            Some(Ok(v)) => {
                value = Some(v);
                break;
            }
            Some(Err(_)) => errors += 1,
            None => panic!("subscription ended without an event"),
        }
    }

    assert_eq!(errors, 1);
    assert_eq!(value.as_deref().map(String::as_str), Some("resolved"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(memo.stats().loads_started, 2);
}

#[tokio::test]
async fn test_stale_load_never_overwrites_newer_state() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let memo = Memo::from_loader(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            let delay = if n == 1 { 60 } else { 5 };
            sleep(Duration::from_millis(delay)).await;
            Ok::<_, anyhow::Error>(format!("load-{n}"))
        }
    });

    let waiter = {
        let memo = memo.clone();
        tokio::spawn(async move { memo.get().await })
    };
    sleep(Duration::from_millis(10)).await;
    assert!(memo.state().is_pending());

    // The waiter sees the reset and starts the second load itself
    memo.clear();
    assert_eq!(*waiter.await.unwrap().unwrap(), "load-2");

    sleep(Duration::from_millis(100)).await;
    assert_eq!(memo.state().value().map(|v| v.as_str()), Some("load-2"));
    assert_eq!(memo.stats().stale_settlements, 1);
}

#[tokio::test]
async fn test_subscribers_share_reloads() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo_with(loaded_after(&calls, Duration::from_millis(5)));

    let mut a = memo.subscribe();
    let mut b = memo.subscribe();
    assert_eq!(memo.subscriber_count(), 2);
    let first_a = a.next().await.unwrap().unwrap();
    let first_b = b.next().await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&first_a, &first_b));

    memo.clear();
    let second_a = a.next().await.unwrap().unwrap();
    let second_b = b.next().await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&second_a, &second_b));
    assert!(!Arc::ptr_eq(&first_a, &second_a));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    drop(a);
    drop(b);
    assert_eq!(memo.subscriber_count(), 0);
}

#[tokio::test]
async fn test_memo_over_shared_store() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = Atom::new(CacheState::Idle);
    let loader = loaded_after(&calls, Duration::ZERO);
    let memo = Memo::new(store.clone(), move || loader());

    assert_eq!(*memo.get().await.unwrap(), "loaded");
    assert!(store.get().is_fulfilled());

    // Writing the store directly is visible through the memo
    store.set(CacheState::fulfilled("external".to_string()));
    assert_eq!(*memo.get().await.unwrap(), "external");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_memos_on_one_store_keep_the_newest_load() {
    let store = Atom::new(CacheState::Idle);
    let a = Memo::new(store.clone(), || async {
        sleep(Duration::from_millis(50)).await;
        Ok::<_, anyhow::Error>("stale-from-a".to_string())
    });
    let b = Memo::new(store.clone(), || async {
        sleep(Duration::from_millis(200)).await;
        Ok::<_, anyhow::Error>("from-b".to_string())
    });

    // A starts loading, then B resets the shared store and loads its own
    drop(a.subscribe());
    b.clear();
    let waiting = tokio::spawn({
        let b = b.clone();
        async move { b.get().await }
    });

    sleep(Duration::from_millis(100)).await;
    assert!(store.get().is_pending());
    assert_eq!(a.stats().stale_settlements, 1);

    assert_eq!(*waiting.await.unwrap().unwrap(), "from-b");
    assert_eq!(store.get().value().map(|v| v.as_str()), Some("from-b"));
    assert_eq!(b.stats().loads_fulfilled, 1);
}

#[tokio::test]
async fn test_panicking_loader_settles_as_rejection() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let memo = Memo::from_loader(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            sleep(Duration::from_millis(5)).await;
            assert!(n > 1, "first load blows up");
            Ok::<_, anyhow::Error>("second".to_string())
        }
    });

    let err = timeout(Duration::from_millis(500), memo.get())
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("loader panicked"));
    assert!(memo.state().is_rejected());

    memo.clear();
    assert_eq!(*memo.get().await.unwrap(), "second");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
