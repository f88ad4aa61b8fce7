//! Process-wide plot cache keyed by (benchmark, assessment, task).
//!
//! Each key is either absent, in flight, or ready. An in-flight slot holds a
//! shared future: every caller for that key awaits the same fetch, so at most
//! one request per key reaches the service. A failed fetch clears its slot and
//! the next caller starts a fresh one. Ready entries are never evicted or
//! refetched.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::logging::{log, log_cache, obj, v_str, Domain, Level, ProfileScope};
use crate::plot::{decode_analysis, CachedPlotSet, PlotKey};
use crate::query::{analysis_resource, QueryClient};

/// Failure to fetch or decode the plots of one key.
#[derive(Debug, Clone)]
pub struct FetchError {
    pub key: PlotKey,
    pub msg: String,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to load plots for {}: {}", self.key, self.msg)
    }
}

impl std::error::Error for FetchError {}

pub type FetchResult = Result<Arc<CachedPlotSet>, FetchError>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

enum Slot {
    InFlight { ticket: u64, fetch: SharedFetch },
    Ready(Arc<CachedPlotSet>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Keys with a ready plot set
    pub entries: usize,
    /// Keys with a fetch in progress
    pub in_flight: usize,
    /// Calls answered from a ready entry
    pub hits: u64,
    /// Calls that attached to an in-flight fetch
    pub joins: u64,
    /// Fetches started (one network request sequence each)
    pub fetches: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    joins: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

pub struct PlotCache {
    client: Arc<dyn QueryClient>,
    slots: Arc<Mutex<HashMap<PlotKey, Slot>>>,
    counters: Arc<Counters>,
    next_ticket: AtomicU64,
}

fn lock_slots(slots: &Mutex<HashMap<PlotKey, Slot>>) -> MutexGuard<'_, HashMap<PlotKey, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PlotCache {
    pub fn new(client: Arc<dyn QueryClient>) -> Self {
        Self {
            client,
            slots: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Plots for (benchmark, assessment, task), fetching them on first use.
    pub async fn get(&self, benchmark: &str, assessment: &str, task: &str) -> FetchResult {
        self.get_key(PlotKey::new(benchmark, assessment, task)).await
    }

    pub async fn get_key(&self, key: PlotKey) -> FetchResult {
        let fetch = {
            let mut slots = lock_slots(&self.slots);
            match slots.get(&key) {
                Some(Slot::Ready(set)) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    log_cache("hit", &key.benchmark, &key.assessment, &key.task);
                    return Ok(Arc::clone(set));
                }
                Some(Slot::InFlight { fetch, .. }) => {
                    self.counters.joins.fetch_add(1, Ordering::Relaxed);
                    log_cache("join", &key.benchmark, &key.assessment, &key.task);
                    fetch.clone()
                }
                None => {
                    let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                    let fetch = self.start_fetch(key.clone(), ticket);
                    slots.insert(key.clone(), Slot::InFlight { ticket, fetch: fetch.clone() });
                    self.counters.fetches.fetch_add(1, Ordering::Relaxed);
                    log_cache("miss", &key.benchmark, &key.assessment, &key.task);
                    fetch
                }
            }
        };
        fetch.await
    }

    fn start_fetch(&self, key: PlotKey, ticket: u64) -> SharedFetch {
        let client = Arc::clone(&self.client);
        let slots = Arc::clone(&self.slots);
        let counters = Arc::clone(&self.counters);
        async move {
            let result = fetch_plot_set(client.as_ref(), &key).await;
            let mut slots = lock_slots(&slots);
            let owns_slot = matches!(slots.get(&key), Some(Slot::InFlight { ticket: t, .. }) if *t == ticket);
            match &result {
                Ok(set) => {
                    if owns_slot {
                        slots.insert(key, Slot::Ready(Arc::clone(set)));
                    }
                }
                Err(err) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    if owns_slot {
                        slots.remove(&key);
                    }
                    log(
                        Level::Warn,
                        Domain::Cache,
                        "fetch_failed",
                        obj(&[
                            ("benchmark", v_str(&key.benchmark)),
                            ("assessment", v_str(&key.assessment)),
                            ("task", v_str(&key.task)),
                            ("msg", v_str(&err.msg)),
                        ]),
                    );
                }
            }
            drop(slots);
            result
        }
        .boxed()
        .shared()
    }

    pub fn contains(&self, key: &PlotKey) -> bool {
        matches!(lock_slots(&self.slots).get(key), Some(Slot::Ready(_)))
    }

    pub fn stats(&self) -> CacheStats {
        let slots = lock_slots(&self.slots);
        let entries = slots.values().filter(|s| matches!(s, Slot::Ready(_))).count();
        CacheStats {
            entries,
            in_flight: slots.len() - entries,
            hits: self.counters.hits.load(Ordering::Relaxed),
            joins: self.counters.joins.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Forget every entry. Fetches still in flight finish for their current
    /// waiters but are not stored.
    pub fn reset(&self) {
        let mut slots = lock_slots(&self.slots);
        let dropped = slots.len();
        slots.clear();
        log(Level::Info, Domain::Cache, "reset", obj(&[("dropped", json!(dropped))]));
    }
}

async fn fetch_plot_set(client: &dyn QueryClient, key: &PlotKey) -> FetchResult {
    let resource = analysis_resource(&key.benchmark, &key.assessment, &key.task, &[]);
    let _scope = ProfileScope::with_context("plot_fetch", &[("resource", v_str(&resource))]);
    let to_error = |err: anyhow::Error| FetchError {
        key: key.clone(),
        msg: format!("{:#}", err),
    };
    let response = client.query(&resource).await.map_err(to_error)?;
    let set = decode_analysis(key, &response).map_err(to_error)?;
    log(
        Level::Info,
        Domain::Cache,
        "stored",
        obj(&[
            ("benchmark", v_str(&key.benchmark)),
            ("assessment", v_str(&key.assessment)),
            ("task", v_str(&key.task)),
            ("plots", json!(set.plots.len())),
            ("traces", json!(set.trace_count())),
        ]),
    );
    Ok(Arc::new(set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MemoryBackend;
    use serde_json::{json, Value};

    const BENCH: &str = "branin_baselines_webapi";

    fn regret() -> Value {
        json!({
            "regret": json!({
                "data": [{"name": "gridsearch"}, {"name": "random"}],
                "layout": {"title": "Average Regret"},
            }).to_string()
        })
    }

    fn resource() -> String {
        analysis_resource(BENCH, "AverageResult", "branin", &[])
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let backend = Arc::new(MemoryBackend::new().with_analysis(BENCH, "AverageResult", "branin", regret()));
        let cache = PlotCache::new(backend.clone());

        let first = cache.get(BENCH, "AverageResult", "branin").await.unwrap();
        let second = cache.get(BENCH, "AverageResult", "branin").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.request_count(&resource()), 1);
        let stats = cache.stats();
        assert_eq!((stats.fetches, stats.hits, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_fetch() {
        let backend = Arc::new(
            MemoryBackend::gated().with_analysis(BENCH, "AverageResult", "branin", regret()),
        );
        let cache = PlotCache::new(backend.clone());

        let (a, b, _) = tokio::join!(
            cache.get(BENCH, "AverageResult", "branin"),
            cache.get(BENCH, "AverageResult", "branin"),
            async {
                tokio::task::yield_now().await;
                assert_eq!(cache.stats().in_flight, 1);
                backend.open_gate();
            }
        );

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(backend.total_requests(), 1);
        assert_eq!(cache.stats().joins, 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_poison_key() {
        let backend = Arc::new(MemoryBackend::new().with_analysis(BENCH, "AverageResult", "branin", regret()));
        backend.fail_next(resource(), 1);
        let cache = PlotCache::new(backend.clone());

        let err = cache.get(BENCH, "AverageResult", "branin").await.unwrap_err();
        assert_eq!(err.key, PlotKey::new(BENCH, "AverageResult", "branin"));
        assert!(!cache.contains(&err.key));

        let retried = cache.get(BENCH, "AverageResult", "branin").await.unwrap();
        assert_eq!(retried.plots[0].name, "regret");
        assert_eq!(backend.request_count(&resource()), 2);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_failure_is_local_to_its_key() {
        let backend = Arc::new(
            MemoryBackend::new()
                .with_analysis(BENCH, "AverageResult", "branin", regret())
                .with_analysis(BENCH, "AverageRank", "branin", regret()),
        );
        backend.fail_next(resource(), 1);
        let cache = PlotCache::new(backend.clone());

        assert!(cache.get(BENCH, "AverageResult", "branin").await.is_err());
        assert!(cache.get(BENCH, "AverageRank", "branin").await.is_ok());
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_undecodable_response_is_fetch_error() {
        let backend = Arc::new(MemoryBackend::new());
        backend.route(resource(), json!({"analysis": {}}));
        let cache = PlotCache::new(backend.clone());
        let err = cache.get(BENCH, "AverageResult", "branin").await.unwrap_err();
        assert!(err.msg.contains("AverageResult"));
    }

    #[tokio::test]
    async fn test_reset_forgets_entries() {
        let backend = Arc::new(MemoryBackend::new().with_analysis(BENCH, "AverageResult", "branin", regret()));
        let cache = PlotCache::new(backend.clone());
        cache.get(BENCH, "AverageResult", "branin").await.unwrap();
        cache.reset();
        assert_eq!(cache.stats().entries, 0);
        cache.get(BENCH, "AverageResult", "branin").await.unwrap();
        assert_eq!(backend.request_count(&resource()), 2);
    }
}
