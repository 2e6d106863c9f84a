//! Memo Cache - An in-memory memoization engine
//!
//! Demo binary: memoizes a factorial workload and prints the resulting
//! statistics.

use std::convert::Infallible;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memo_cache::{CacheEngine, Config, ConfigUpdate, ExecuteOptions};

/// Main entry point for the memo cache demo.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the engine with configured parameters
/// 4. Run cold, cached, and short-TTL factorial computations
/// 5. Print statistics and shut the engine down
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memo_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Memo Cache demo");

    // Load configuration from environment variables
    let config = Config::from_env();
    info!(
        "Configuration loaded: max_size={}, default_ttl_ms={:?}, policy={}, maintenance_interval={}ms",
        config.max_size,
        config.default_ttl.as_millis(),
        config.eviction_policy,
        config.maintenance_interval_ms
    );

    let engine: CacheEngine<u128> =
        CacheEngine::from_config(&config).context("invalid cache configuration")?;
    engine
        .configure(ConfigUpdate::new().max_size(50).default_ttl_ms(30_000))
        .context("failed to apply demo configuration")?;

    // First call computes, second is served from the cache
    let first = factorial(&engine, 20, ExecuteOptions::default()).await?;
    info!("factorial(20) = {}", first);
    let second = factorial(&engine, 20, ExecuteOptions::default()).await?;
    info!("factorial(20) = {} (cached)", second);

    // A different argument is a different key
    let other = factorial(&engine, 15, ExecuteOptions::default()).await?;
    info!("factorial(15) = {}", other);

    // Short-lived entry, recomputed once it expires
    let short = ExecuteOptions::with_ttl(Duration::from_secs(1));
    let brief = factorial(&engine, 30, short).await?;
    info!("factorial(30) = {} (1s TTL)", brief);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let again = factorial(&engine, 30, ExecuteOptions::default()).await?;
    info!("factorial(30) = {} (after expiry)", again);

    let stats = engine.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    engine.shutdown();
    info!("Demo complete");
    Ok(())
}

/// Computes `n!` through the cache.
async fn factorial(
    engine: &CacheEngine<u128>,
    n: u32,
    options: ExecuteOptions,
) -> anyhow::Result<u128> {
    let key = engine.key("factorial", &n)?;
    let value = engine
        .execute_async(&key, options, || async move {
            info!("Calculating factorial for {}...", n);
            Ok::<_, Infallible>((1..=n as u128).product())
        })
        .await?;
    Ok(*value)
}
