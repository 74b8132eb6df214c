//! Memo Cache demo
//!
//! Walks through the cache lifecycle against simulated slow loaders:
//! single-flight loading, subscription, retry after failure, keyed and
//! batch loading. Prints load statistics as JSON at the end.

use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures_util::{future, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memo_cache::{Atom, CacheConfig, KeyCache, Memo};

/// Default simulated loader latency
const DEFAULT_LOAD_DELAY_MS: u64 = 200;

/// Entry point for the demo.
///
/// # Steps
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Run the single-value walkthrough
/// 4. Run the keyed walkthrough
/// 5. Print statistics
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to debug for this crate, can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memo_cache=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env();
    let delay = load_delay()?;
    info!(?config, delay_ms = delay.as_millis() as u64, "configuration loaded");

    let memo = memo_walkthrough(config, delay).await?;
    let keyed = key_cache_walkthrough(config, delay).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "memo": memo.stats(),
            "memo_status": memo.state().status(),
            "key_cache": keyed.stats(),
        }))?
    );
    Ok(())
}

/// Reads `DEMO_LOAD_DELAY_MS`, falling back to the default when unset.
fn load_delay() -> anyhow::Result<Duration> {
    match env::var("DEMO_LOAD_DELAY_MS") {
        Ok(raw) => {
            let millis = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid DEMO_LOAD_DELAY_MS: {raw}"))?;
            Ok(Duration::from_millis(millis))
        }
        Err(_) => Ok(Duration::from_millis(DEFAULT_LOAD_DELAY_MS)),
    }
}

async fn memo_walkthrough(config: CacheConfig, delay: Duration) -> anyhow::Result<Memo<String>> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    // Fails on the first call, succeeds afterwards
    let memo = Memo::with_config(
        Atom::default(),
        move || {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::time::sleep(delay).await;
                if call == 1 {
                    Err(anyhow!("upstream unavailable"))
                } else {
                    Ok(format!("profile v{call}"))
                }
            }
        },
        config,
    );

    let mut updates = memo.subscribe();
    match updates.next().await {
        Some(Err(err)) => warn!(error = %err, "first load failed"),
        other => info!(?other, "first load settled"),
    }
    drop(updates);

    // Concurrent callers share one reload
    let results = future::join_all((0..5).map(|_| memo.get())).await;
    let value = results
        .into_iter()
        .next()
        .context("no callers ran")??;
    info!(%value, loads = calls.load(Ordering::SeqCst), "five concurrent gets settled");

    memo.modify_if_fulfilled(|value| format!("{value} (edited)"));
    let value = memo.get().await?;
    info!(%value, "modified in place");

    let value = memo.force_get().await?;
    info!(%value, "forced reload");
    Ok(memo)
}

async fn key_cache_walkthrough(
    config: CacheConfig,
    delay: Duration,
) -> anyhow::Result<KeyCache<u32, String>> {
    let cache = KeyCache::new(Atom::new(HashMap::new()), move |id: u32| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, anyhow::Error>(format!("user-{id}"))
    })
    .with_batch_loader(move |ids: Vec<u32>| async move {
        tokio::time::sleep(delay).await;
        // The backend knows nothing about id 13
        Ok::<_, anyhow::Error>(
            ids.into_iter()
                .filter(|id| *id != 13)
                .map(|id| (id, format!("user-{id} (batched)")))
                .collect::<Vec<_>>(),
        )
    })
    .with_config(config);

    let value = cache.get(&1).await?;
    info!(%value, "single key loaded");
    cache.set(2, "user-2 (manual)".to_string());

    let users = cache.get_map(&[1, 2, 3, 4]).await?;
    let mut ids: Vec<_> = users.keys().copied().collect();
    ids.sort_unstable();
    info!(?ids, "batch loaded");

    if let Err(err) = cache.get_map(&[5, 13]).await {
        warn!(error = %err, state = %cache.state(&13).status(), "batch left a key out");
    }
    Ok(cache)
}
