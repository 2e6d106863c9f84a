//! Cache Engine Module
//!
//! Thread-safe memoization engine. Wraps a `CacheStore` behind a mutex,
//! guarantees that concurrent callers for one key share a single
//! computation, and owns the background maintenance task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{
    saturating_millis, CacheConfig, CacheKey, CacheStats, CacheStore, ConfigUpdate,
    ExecuteOptions, Ttl,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::tasks::{spawn_maintenance_task, Maintained, MaintenanceReport};

// == Constants ==
/// Default upper bound on the delay between maintenance passes
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);

/// Lower bound on the delay between maintenance passes
pub const MIN_MAINTENANCE_INTERVAL: Duration = Duration::from_millis(10);

// == Flights ==
/// A key's in-progress computation, shared by every caller waiting on it.
#[derive(Default)]
struct Flight {
    /// Taken by whichever caller is computing
    turn: Arc<tokio::sync::Mutex<()>>,
    /// Callers currently holding a ticket for this flight
    holders: usize,
}

/// One caller's share of a flight.
///
/// Dropping the last ticket removes the flight, whether the caller finished,
/// failed, panicked or had its future cancelled.
struct FlightTicket<'a, V, C> {
    shared: &'a Shared<V, C>,
    key: CacheKey,
    turn: Arc<tokio::sync::Mutex<()>>,
}

impl<V, C> Drop for FlightTicket<'_, V, C> {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        let last = match state.flights.get_mut(&self.key) {
            Some(flight) => {
                flight.holders = flight.holders.saturating_sub(1);
                flight.holders == 0
            }
            None => false,
        };
        if last {
            state.flights.remove(&self.key);
        }
    }
}

// == Engine State ==
/// Everything guarded by the engine lock.
struct EngineState<V> {
    store: CacheStore<V>,
    /// Keys with a computation in progress
    flights: HashMap<CacheKey, Flight>,
    /// Whether a maintenance task is alive
    maintenance_running: bool,
}

/// Result of the first, optimistic lookup in `execute`.
enum Begin<'a, V, C> {
    Hit(Arc<V>),
    Wait(FlightTicket<'a, V, C>),
}

// == Shared ==
struct Shared<V, C> {
    state: Mutex<EngineState<V>>,
    clock: C,
    maintenance_interval_ms: AtomicU64,
    maintenance_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl<V, C> Shared<V, C> {
    fn state(&self) -> MutexGuard<'_, EngineState<V>> {
        // Only engine bookkeeping runs under this lock, never caller code
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.maintenance_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V, C> Drop for Shared<V, C> {
    fn drop(&mut self) {
        if let Some(handle) = self.task_slot().take() {
            handle.abort();
        }
    }
}

impl<V, C> Maintained for Shared<V, C>
where
    V: Send + Sync + 'static,
    C: Clock,
{
    fn maintenance_interval(&self) -> Duration {
        let cap = Duration::from_millis(self.maintenance_interval_ms.load(Ordering::Relaxed));
        let interval = match self.state().store.config().default_ttl {
            Ttl::After(ttl) => ttl.min(cap),
            Ttl::Never => cap,
        };
        interval.max(MIN_MAINTENANCE_INTERVAL)
    }

    fn maintenance_tick(&self) -> (MaintenanceReport, bool) {
        let mut state = self.state();
        let report = sweep(&mut state.store, self.clock.now_ms());

        let keep_running =
            !self.shut_down.load(Ordering::SeqCst) && state.store.needs_maintenance();
        if !keep_running {
            state.maintenance_running = false;
        }
        (report, keep_running)
    }
}

fn sweep<V>(store: &mut CacheStore<V>, now: u64) -> MaintenanceReport {
    let expired = store.purge_expired(now);
    let evicted = store.evict_to_capacity(now);
    MaintenanceReport {
        expired,
        evicted,
        remaining: store.len(),
    }
}

// == Cache Engine ==
/// Memoizes the results of expensive computations.
///
/// Cloning is cheap and every clone drives the same cache. Values come back
/// as `Arc<V>` handles; callers never get a mutable alias into the store.
///
/// # Example
/// ```
/// use memo_cache::{CacheConfig, CacheEngine, ExecuteOptions};
///
/// let engine: CacheEngine<u64> = CacheEngine::new(CacheConfig::default()).unwrap();
/// let key = engine.key("square", &12u64).unwrap();
///
/// let value = engine
///     .execute(&key, ExecuteOptions::default(), || Ok::<_, std::convert::Infallible>(144))
///     .unwrap();
/// assert_eq!(*value, 144);
/// assert_eq!(engine.stats().misses, 1);
/// ```
pub struct CacheEngine<V, C = SystemClock> {
    shared: Arc<Shared<V, C>>,
}

impl<V, C> Clone for CacheEngine<V, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V, C> std::fmt::Debug for CacheEngine<V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine").finish_non_exhaustive()
    }
}

impl<V> CacheEngine<V, SystemClock>
where
    V: Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates an engine on the system clock.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Creates an engine from startup settings.
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = Self::new(config.cache_config())?;
        engine.set_maintenance_interval(config.maintenance_interval());
        Ok(engine)
    }
}

impl<V, C> CacheEngine<V, C>
where
    V: Send + Sync + 'static,
    C: Clock,
{
    /// Creates an engine that reads time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: C) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState {
                    store: CacheStore::new(config),
                    flights: HashMap::new(),
                    maintenance_running: false,
                }),
                clock,
                maintenance_interval_ms: AtomicU64::new(saturating_millis(
                    DEFAULT_MAINTENANCE_INTERVAL,
                )),
                maintenance_task: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Derives the key for `function` called with `args`.
    pub fn key<A>(&self, function: &str, args: &A) -> Result<CacheKey>
    where
        A: Serialize + ?Sized,
    {
        CacheKey::derive(function, args)
    }

    // == Execute ==
    /// Returns the cached value for `key`, computing it on a miss.
    ///
    /// `compute` runs outside the engine lock. Concurrent calls for the same
    /// key wait for the first one and then read its result as a hit. If
    /// `compute` fails, its error is returned as-is, nothing is cached, and
    /// the miss still counts.
    ///
    /// If `compute` panics, the panic propagates and the key is left free
    /// for the next caller.
    ///
    /// # Panics
    /// Waiting for another caller's computation blocks the thread, which
    /// panics inside an async task. Use `execute_async` there.
    pub fn execute<F, E>(
        &self,
        key: &CacheKey,
        options: ExecuteOptions,
        compute: F,
    ) -> std::result::Result<Arc<V>, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
    {
        let ticket = match self.begin(key) {
            Begin::Hit(value) => return Ok(value),
            Begin::Wait(ticket) => ticket,
        };

        let _turn = match ticket.turn.try_lock() {
            Ok(turn) => turn,
            Err(_) => ticket.turn.blocking_lock(),
        };
        if let Some(value) = self.claim(key) {
            return Ok(value);
        }

        let outcome = compute();
        self.complete(key, options, outcome)
    }

    /// Async counterpart of [`execute`](Self::execute).
    ///
    /// The engine lock is never held across an await point. Dropping the
    /// future part-way releases the key for the remaining callers.
    pub async fn execute_async<F, Fut, E>(
        &self,
        key: &CacheKey,
        options: ExecuteOptions,
        compute: F,
    ) -> std::result::Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        let ticket = match self.begin(key) {
            Begin::Hit(value) => return Ok(value),
            Begin::Wait(ticket) => ticket,
        };

        let _turn = ticket.turn.lock().await;
        if let Some(value) = self.claim(key) {
            return Ok(value);
        }

        let outcome = compute().await;
        self.complete(key, options, outcome)
    }

    // == Peek ==
    /// Returns the stored value without touching statistics or access
    /// records. Expired entries that have not been purged yet are returned.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<V>> {
        self.shared.state().store.peek(key)
    }

    // == Configure ==
    /// Applies a partial configuration update, all or nothing.
    ///
    /// Returns `self` so calls can be chained.
    pub fn configure(&self, update: ConfigUpdate) -> Result<&Self> {
        let mut state = self.shared.state();

        match state.store.configure(&update) {
            Ok(config) => info!(
                "Cache configured: max_size={}, default_ttl_ms={:?}, policy={}",
                config.max_size,
                config.default_ttl.as_millis(),
                config.eviction_policy
            ),
            Err(e) => {
                warn!("Rejected cache configuration: {}", e);
                return Err(e);
            }
        }

        let runtime = self.claim_maintenance(&mut state);
        drop(state);
        self.start_maintenance(runtime);
        Ok(self)
    }

    /// Returns the active configuration.
    pub fn config(&self) -> CacheConfig {
        self.shared.state().store.config()
    }

    // == Clear ==
    /// Drops every entry. Statistics are kept since they describe the engine,
    /// not the current contents.
    pub fn clear(&self) {
        let dropped = self.shared.state().store.clear();
        info!("Cache cleared, dropped {} entries", dropped);
    }

    // == Invalidate ==
    /// Removes the entry for `key`. Returns true if one was stored.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.shared.state().store.remove(key);
        if removed {
            debug!("Invalidated {}", key);
        }
        removed
    }

    // == Stats ==
    /// Returns a snapshot of the engine statistics.
    pub fn stats(&self) -> CacheStats {
        self.shared.state().store.stats()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.shared.state().store.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.shared.state().store.is_empty()
    }

    // == Maintenance ==
    /// Runs one maintenance pass now: purge expired entries, then enforce
    /// the size bound under the active policy.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let now = self.shared.clock.now_ms();
        sweep(&mut self.shared.state().store, now)
    }

    /// Sets the upper bound on the delay between background passes.
    pub fn set_maintenance_interval(&self, interval: Duration) {
        let interval = interval.max(MIN_MAINTENANCE_INTERVAL);
        self.shared
            .maintenance_interval_ms
            .store(saturating_millis(interval), Ordering::Relaxed);
    }

    /// Whether a background maintenance task is currently alive.
    pub fn is_maintenance_running(&self) -> bool {
        self.shared.state().maintenance_running
    }

    // == Shutdown ==
    /// Stops the background maintenance task for good.
    ///
    /// The cache keeps working afterwards, relying on lazy expiration only.
    pub fn shutdown(&self) {
        self.shared.shut_down.store(true, Ordering::SeqCst);
        if let Some(handle) = self.shared.task_slot().take() {
            handle.abort();
        }
        self.shared.state().maintenance_running = false;
        info!("Cache engine shut down");
    }

    /// Entry count, access record count and in-flight count, in one lock.
    #[cfg(test)]
    pub(crate) fn bookkeeping(&self) -> (usize, usize, usize) {
        let state = self.shared.state();
        (
            state.store.len(),
            state.store.access_log().len(),
            state.flights.len(),
        )
    }

    // == Internals ==
    fn begin(&self, key: &CacheKey) -> Begin<'_, V, C> {
        let now = self.shared.clock.now_ms();
        let mut state = self.shared.state();

        if let Some(value) = state.store.lookup(key, now) {
            return Begin::Hit(value);
        }

        let flight = state.flights.entry(key.clone()).or_default();
        flight.holders += 1;
        Begin::Wait(FlightTicket {
            shared: self.shared.as_ref(),
            key: key.clone(),
            turn: Arc::clone(&flight.turn),
        })
    }

    /// Second lookup, made while holding the key's flight lock. A value here
    /// was computed by the caller we waited for.
    fn claim(&self, key: &CacheKey) -> Option<Arc<V>> {
        let now = self.shared.clock.now_ms();
        let mut state = self.shared.state();

        let value = state.store.lookup(key, now);
        if value.is_none() {
            state.store.record_miss();
        }
        value
    }

    fn complete<E>(
        &self,
        key: &CacheKey,
        options: ExecuteOptions,
        outcome: std::result::Result<V, E>,
    ) -> std::result::Result<Arc<V>, E> {
        let now = self.shared.clock.now_ms();
        let mut state = self.shared.state();

        let result = match outcome {
            Ok(value) => Ok(state.store.insert(key.clone(), value, options.ttl, now)),
            Err(e) => {
                debug!("Computation for {} failed, nothing cached", key);
                Err(e)
            }
        };

        let runtime = self.claim_maintenance(&mut state);
        drop(state);
        self.start_maintenance(runtime);
        result
    }

    /// Marks maintenance as running if a task should start now, returning
    /// the runtime to spawn it on.
    fn claim_maintenance(&self, state: &mut EngineState<V>) -> Option<Handle> {
        if state.maintenance_running
            || self.shared.shut_down.load(Ordering::SeqCst)
            || !state.store.needs_maintenance()
        {
            return None;
        }

        let runtime = Handle::try_current().ok()?;
        state.maintenance_running = true;
        Some(runtime)
    }

    fn start_maintenance(&self, runtime: Option<Handle>) {
        let Some(runtime) = runtime else {
            return;
        };

        let handle = spawn_maintenance_task(&runtime, Arc::downgrade(&self.shared));
        let mut slot = self.shared.task_slot();
        if self.shared.shut_down.load(Ordering::SeqCst) {
            // Lost a race with shutdown
            handle.abort();
            return;
        }
        *slot = Some(handle);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicy;
    use crate::clock::ManualClock;
    use crate::error::CacheError;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn engine(
        max_size: usize,
        policy: EvictionPolicy,
    ) -> (CacheEngine<u64, ManualClock>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let config = CacheConfig {
            max_size,
            default_ttl: Ttl::After(Duration::from_secs(30)),
            eviction_policy: policy,
        };
        (CacheEngine::with_clock(config, clock.clone()).unwrap(), clock)
    }

    fn factorial(n: u64) -> u64 {
        (1..=n).product()
    }

    #[test]
    fn test_new_rejects_zero_capacity() {
        let config = CacheConfig {
            max_size: 0,
            ..CacheConfig::default()
        };
        let result = CacheEngine::<u64>::new(config);
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_execute_hits_after_first_call() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("factorial", &20u64).unwrap();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = engine
                .execute(&key, ExecuteOptions::default(), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(factorial(20))
                })
                .unwrap();
            assert_eq!(*value, 2_432_902_008_176_640_000);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = engine.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_hits_return_the_same_handle() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("factorial", &5u64).unwrap();

        let first = engine
            .execute(&key, ExecuteOptions::default(), || Ok::<_, Infallible>(120))
            .unwrap();
        let second = engine
            .execute(&key, ExecuteOptions::default(), || Ok::<_, Infallible>(0))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_failure_leaves_no_trace() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("flaky", &1u64).unwrap();

        let result = engine.execute(&key, ExecuteOptions::default(), || {
            Err::<u64, _>("backend unavailable")
        });

        assert_eq!(result.unwrap_err(), "backend unavailable");
        assert!(engine.peek(&key).is_none());

        let stats = engine.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_default_ttl_expiry() {
        let (engine, clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("factorial", &3u64).unwrap();
        let run = || {
            engine
                .execute(&key, ExecuteOptions::default(), || Ok::<_, Infallible>(6))
                .unwrap()
        };

        run();
        clock.advance(Duration::from_millis(29_999));
        run();
        assert_eq!(engine.stats().hits, 1);

        clock.advance(Duration::from_millis(2));
        run();
        let stats = engine.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn test_per_call_ttl_overrides_default() {
        let (engine, clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("factorial", &30u64).unwrap();

        engine
            .execute(&key, ExecuteOptions::with_ttl(Duration::from_secs(1)), || {
                Ok::<_, Infallible>(1)
            })
            .unwrap();

        clock.advance(Duration::from_secs(2));
        engine
            .execute(&key, ExecuteOptions::default(), || Ok::<_, Infallible>(2))
            .unwrap();

        assert_eq!(engine.stats().misses, 2);
        assert_eq!(*engine.peek(&key).unwrap(), 2);
    }

    #[test]
    fn test_explicit_no_expiry() {
        let (engine, clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("constant", &()).unwrap();

        engine
            .execute(&key, ExecuteOptions::no_expiry(), || Ok::<_, Infallible>(7))
            .unwrap();
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        engine
            .execute(&key, ExecuteOptions::default(), || Ok::<_, Infallible>(8))
            .unwrap();

        assert_eq!(engine.stats().hits, 1);
        assert_eq!(*engine.peek(&key).unwrap(), 7);
    }

    #[test]
    fn test_peek_does_not_touch() {
        let (engine, clock) = engine(2, EvictionPolicy::Lru);
        let a = engine.key("id", &"a").unwrap();
        let b = engine.key("id", &"b").unwrap();
        let c = engine.key("id", &"c").unwrap();

        engine.execute(&a, ExecuteOptions::default(), || Ok::<_, Infallible>(1)).unwrap();
        clock.advance(Duration::from_millis(1));
        engine.execute(&b, ExecuteOptions::default(), || Ok::<_, Infallible>(2)).unwrap();
        clock.advance(Duration::from_millis(1));

        // Peeking at "a" must not save it from eviction
        assert_eq!(*engine.peek(&a).unwrap(), 1);
        engine.execute(&c, ExecuteOptions::default(), || Ok::<_, Infallible>(3)).unwrap();

        assert!(engine.peek(&a).is_none());
        let stats = engine.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 3);
    }

    #[test]
    fn test_configure_chains_and_applies() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);

        let config = engine
            .configure(ConfigUpdate::new().max_size(50))
            .unwrap()
            .configure(ConfigUpdate::new().eviction_policy("FIFO"))
            .unwrap()
            .config();

        assert_eq!(config.max_size, 50);
        assert_eq!(config.eviction_policy, EvictionPolicy::Fifo);
        assert_eq!(engine.stats().eviction_policy, EvictionPolicy::Fifo);
    }

    #[test]
    fn test_configure_rejects_invalid_update_atomically() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        let before = engine.config();

        let result = engine.configure(ConfigUpdate::new().max_size(20).eviction_policy("MRU"));

        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
        assert_eq!(engine.config(), before);
    }

    #[test]
    fn test_clear_keeps_statistics() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("factorial", &4u64).unwrap();

        engine.execute(&key, ExecuteOptions::default(), || Ok::<_, Infallible>(24)).unwrap();
        engine.execute(&key, ExecuteOptions::default(), || Ok::<_, Infallible>(24)).unwrap();
        engine.clear();

        assert!(engine.is_empty());
        assert!(engine.peek(&key).is_none());
        let stats = engine.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_invalidate() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("factorial", &4u64).unwrap();

        engine.execute(&key, ExecuteOptions::default(), || Ok::<_, Infallible>(24)).unwrap();
        assert!(engine.invalidate(&key));
        assert!(!engine.invalidate(&key));
        assert_eq!(engine.len(), 0);
        assert_eq!(engine.stats().evictions, 0);
    }

    #[test]
    fn test_run_maintenance_purges_and_shrinks() {
        let (engine, clock) = engine(10, EvictionPolicy::Lru);

        for n in 0..6u64 {
            let key = engine.key("factorial", &n).unwrap();
            let options = if n < 2 {
                ExecuteOptions::with_ttl(Duration::from_millis(100))
            } else {
                ExecuteOptions::no_expiry()
            };
            engine.execute(&key, options, || Ok::<_, Infallible>(factorial(n))).unwrap();
            clock.advance(Duration::from_millis(1));
        }

        engine.configure(ConfigUpdate::new().max_size(3)).unwrap();
        clock.advance(Duration::from_millis(200));

        let report = engine.run_maintenance();
        assert_eq!(report.expired, 2);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.remaining, 3);
    }

    #[test]
    fn test_no_maintenance_without_runtime() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("factorial", &4u64).unwrap();

        engine.execute(&key, ExecuteOptions::default(), || Ok::<_, Infallible>(24)).unwrap();
        assert!(!engine.is_maintenance_running());
    }

    #[test]
    fn test_execute_single_flight_across_threads() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("slow", &1u64).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let key = key.clone();
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    engine
                        .execute(&key, ExecuteOptions::default(), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok::<_, Infallible>(99)
                        })
                        .unwrap()
                })
            })
            .collect();

        for worker in workers {
            assert_eq!(*worker.join().unwrap(), 99);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = engine.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 7);
    }

    #[test]
    fn test_execute_async_under_block_on() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("factorial", &10u64).unwrap();

        let value = tokio_test::block_on(engine.execute_async(
            &key,
            ExecuteOptions::default(),
            || async { Ok::<_, Infallible>(factorial(10)) },
        ))
        .unwrap();

        assert_eq!(*value, 3_628_800);
        assert_eq!(*engine.peek(&key).unwrap(), 3_628_800);
    }

    #[test]
    fn test_huge_capacity_does_not_overflow() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        engine.configure(ConfigUpdate::new().max_size(i64::MAX)).unwrap();
        let key = engine.key("factorial", &6u64).unwrap();

        let value = engine
            .execute(&key, ExecuteOptions::no_expiry(), || Ok::<_, Infallible>(720))
            .unwrap();

        assert_eq!(*value, 720);
        assert_eq!(engine.stats().max_size, i64::MAX as usize);
    }

    #[test]
    fn test_huge_per_call_ttl_does_not_wrap() {
        let (engine, clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("factorial", &7u64).unwrap();
        let options = ExecuteOptions::with_ttl(Duration::from_secs(18_446_744_073_709_552));

        engine.execute(&key, options, || Ok::<_, Infallible>(1)).unwrap();
        clock.advance(Duration::from_secs(1));
        let value = engine
            .execute(&key, ExecuteOptions::default(), || Ok::<_, Infallible>(2))
            .unwrap();

        assert_eq!(*value, 1);
        let stats = engine.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.expirations, 0);
    }

    #[test]
    fn test_panicking_compute_releases_flight() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("fragile", &1u64).unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            engine.execute(&key, ExecuteOptions::default(), || -> Result<u64> {
                panic!("compute blew up")
            })
        }));
        assert!(outcome.is_err());
        assert_eq!(engine.bookkeeping(), (0, 0, 0));

        let value = engine
            .execute(&key, ExecuteOptions::default(), || Ok::<_, Infallible>(5))
            .unwrap();
        assert_eq!(*value, 5);
        assert_eq!(engine.stats().misses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_execute_async_releases_flight() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);

        for n in 0..100u64 {
            let key = engine.key("stuck", &n).unwrap();
            let result = tokio::time::timeout(
                Duration::from_millis(1),
                engine.execute_async(&key, ExecuteOptions::default(), || {
                    std::future::pending::<std::result::Result<u64, Infallible>>()
                }),
            )
            .await;
            assert!(result.is_err(), "Pending compute should time out");
        }

        assert_eq!(engine.bookkeeping(), (0, 0, 0));
        assert_eq!(engine.stats().misses, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_keeps_leader_flight() {
        let (engine, _clock) = engine(10, EvictionPolicy::Lru);
        let key = engine.key("slow", &2u64).unwrap();

        let leader = {
            let engine = engine.clone();
            let key = key.clone();
            tokio::spawn(async move {
                engine
                    .execute_async(&key, ExecuteOptions::default(), || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, Infallible>(42)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(engine.bookkeeping().2, 1);

        let waiter = tokio::time::timeout(
            Duration::from_millis(10),
            engine.execute_async(&key, ExecuteOptions::default(), || async {
                Ok::<_, Infallible>(0)
            }),
        )
        .await;
        assert!(waiter.is_err());
        assert_eq!(engine.bookkeeping().2, 1, "Leader still owns the flight");

        assert_eq!(*leader.await.unwrap().unwrap(), 42);
        assert_eq!(engine.bookkeeping(), (1, 1, 0));
        assert_eq!(engine.stats().misses, 1);
    }
}
