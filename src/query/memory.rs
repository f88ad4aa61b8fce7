use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

use super::{analysis_resource, QueryClient, QueryError, BENCHMARKS_RESOURCE};

/// In-process analysis service serving canned JSON by exact resource path.
///
/// Requests can be held behind a gate (see [`MemoryBackend::gated`]) so a test
/// can observe callers while their fetch is still pending.
pub struct MemoryBackend {
    routes: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, u32>>,
    requests: Mutex<HashMap<String, u64>>,
    total: AtomicU64,
    gate: watch::Sender<bool>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_gate(true)
    }

    /// Backend whose replies wait until [`MemoryBackend::open_gate`] is called.
    pub fn gated() -> Self {
        Self::with_gate(false)
    }

    fn with_gate(open: bool) -> Self {
        let (gate, _) = watch::channel(open);
        Self {
            routes: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            total: AtomicU64::new(0),
            gate,
        }
    }

    pub fn route(&self, resource: impl Into<String>, body: Value) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.into(), body);
    }

    /// Serve the benchmark listing.
    pub fn with_benchmarks(self, benchmarks: Value) -> Self {
        self.route(BENCHMARKS_RESOURCE, benchmarks);
        self
    }

    /// Serve the unfiltered analysis of one (benchmark, assessment, task),
    /// `plots` being the plot-name to chart-definition mapping.
    pub fn with_analysis(self, benchmark: &str, assessment: &str, task: &str, plots: Value) -> Self {
        let mut tasks = Map::new();
        tasks.insert(task.to_string(), plots);
        let mut assessments = Map::new();
        assessments.insert(assessment.to_string(), Value::Object(tasks));
        self.route(
            analysis_resource(benchmark, assessment, task, &[]),
            json!({ "analysis": assessments }),
        );
        self
    }

    /// Make the next `times` requests for `resource` fail with a 503.
    pub fn fail_next(&self, resource: impl Into<String>, times: u32) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.into(), times);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Number of requests received for `resource`, counted on arrival.
    pub fn request_count(&self, resource: &str) -> u64 {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    fn take_failure(&self, resource: &str) -> bool {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.get_mut(resource) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl QueryClient for MemoryBackend {
    async fn query(&self, resource: &str) -> Result<Value> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(resource.to_string())
            .or_insert(0) += 1;

        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| anyhow!("memory backend dropped"))?;

        if self.take_failure(resource) {
            return Err(QueryError {
                resource: resource.to_string(),
                status: Some(503),
                msg: "injected failure".to_string(),
                retryable: true,
            }
            .into());
        }
        let body = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned();
        body.ok_or_else(|| {
            QueryError {
                resource: resource.to_string(),
                status: Some(404),
                msg: "no such resource".to_string(),
                retryable: false,
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_routes_and_counts() {
        let backend = MemoryBackend::new().with_benchmarks(json!([{ "name": "b" }]));
        let body = backend.query("benchmarks").await.unwrap();
        assert_eq!(body[0]["name"], "b");
        assert_eq!(backend.request_count("benchmarks"), 1);
        assert_eq!(backend.total_requests(), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let backend = MemoryBackend::new();
        let err = backend.query("benchmarks/nope").await.unwrap_err();
        assert_eq!(err.downcast_ref::<QueryError>().unwrap().status, Some(404));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let backend = MemoryBackend::new().with_benchmarks(json!([]));
        backend.fail_next("benchmarks", 1);
        assert!(backend.query("benchmarks").await.is_err());
        assert!(backend.query("benchmarks").await.is_ok());
    }

    #[tokio::test]
    async fn test_gate_holds_replies() {
        let backend = MemoryBackend::gated().with_benchmarks(json!([]));
        let (result, _) = tokio::join!(backend.query("benchmarks"), async {
            tokio::task::yield_now().await;
            assert_eq!(backend.request_count("benchmarks"), 1);
            backend.open_gate();
        });
        assert!(result.is_ok());
    }
}
