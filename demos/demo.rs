//! Cascade Cache demo
//!
//! Walks through populate-once, background refresh, dependency cascades and
//! the on-disk sidecar. Run with `cargo run --example demo`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cascade_cache::{Cache, CacheConfig, ExpirationPolicy, GetOptions, PersistenceOptions};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "debug" for this crate, can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cascade_cache=debug,demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: default_sliding={:?}, cleanup_interval={:?}, min_refresh={:?}",
        config.default_sliding_expiration, config.cleanup_interval, config.min_refresh_interval
    );
    let cache: Cache<String> = Cache::new(config);

    let snapshot_dir = std::env::temp_dir().join("cascade_cache_demo");
    cache.enable_persistence(PersistenceOptions::new(&snapshot_dir))?;

    // Prices refresh every two seconds in the background
    let ticks = Arc::new(AtomicU64::new(0));
    let options = GetOptions::new(ExpirationPolicy::never())
        .with_refresh_interval(Duration::from_secs(2));
    let price_source = {
        let ticks = ticks.clone();
        move || {
            let ticks = ticks.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let tick = ticks.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(format!("price@{}", 100 + tick))
            }
        }
    };

    // Reports depend on prices: dropping prices drops reports too
    cache.set_dependencies("prices", &["reports"])?;

    let price = cache.get_with("ACME", "prices", options, price_source.clone()).await?;
    info!("First read: {}", price);

    let report = cache
        .get_sliding("daily", "reports", Duration::from_secs(60), || async {
            anyhow::Ok("daily report".to_string())
        })
        .await?;
    info!("Report: {}", report);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let price = cache.get_with("ACME", "prices", options, price_source.clone()).await?;
    info!("After refresh: {}", price);

    for meta in cache.get_all_metadata() {
        info!(
            "{}/{} type={} refreshes={} failures={}",
            meta.group, meta.key, meta.type_tag, meta.refresh_count, meta.refresh_failures
        );
    }

    let removed = cache.remove_group(&["prices"])?;
    info!("Removed {} entries via cascade, {} left", removed, cache.len());

    let stats = cache.stats();
    info!(
        "Stats: hits={} misses={} refreshes={} hit_rate={:.2}",
        stats.hits,
        stats.misses,
        stats.refreshes,
        stats.hit_rate()
    );

    cache.shutdown();
    info!("Demo finished");
    Ok(())
}
