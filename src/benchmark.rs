//! Benchmark metadata as served by the `benchmarks` listing.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::logging::{log, obj, v_str, Domain, Level};
use crate::query::{QueryClient, BENCHMARKS_RESOURCE};

/// One entry of a benchmark's `algorithms` list.
///
/// The service sends either a bare name or a mapping keyed by the name
/// (`{"tpe": {"seed": 1}}`). Any other shape is kept as `Malformed` so that
/// it fails at normalization rather than at listing time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlgorithmDescriptor {
    Name(String),
    Configured(Map<String, Value>),
    Malformed(Value),
}

#[derive(Debug, Clone)]
pub struct DescriptorError {
    pub benchmark: String,
    pub descriptor: Value,
    pub msg: String,
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed algorithm descriptor in benchmark {}: {} ({})",
            self.benchmark, self.descriptor, self.msg
        )
    }
}

impl std::error::Error for DescriptorError {}

impl AlgorithmDescriptor {
    /// Canonical algorithm name.
    pub fn normalize(&self) -> std::result::Result<String, String> {
        let name = match self {
            AlgorithmDescriptor::Name(name) => name.clone(),
            AlgorithmDescriptor::Configured(map) => match map.get("algorithm") {
                Some(Value::String(name)) => name.clone(),
                Some(other) => return Err(format!("\"algorithm\" must be a string, found {}", other)),
                None if map.len() == 1 => map.keys().next().cloned().unwrap_or_default(),
                None => return Err(format!("expected exactly one key, found {}", map.len())),
            },
            AlgorithmDescriptor::Malformed(_) => {
                return Err("expected a name or a single-key mapping".to_string())
            }
        };
        if name.is_empty() {
            return Err("empty algorithm name".to_string());
        }
        Ok(name)
    }

    fn to_value(&self) -> Value {
        match self {
            AlgorithmDescriptor::Name(name) => json!(name),
            AlgorithmDescriptor::Configured(map) => Value::Object(map.clone()),
            AlgorithmDescriptor::Malformed(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    pub name: String,
    #[serde(default)]
    pub algorithms: Vec<AlgorithmDescriptor>,
    #[serde(default)]
    pub tasks: BTreeMap<String, Value>,
    #[serde(default)]
    pub assessments: BTreeMap<String, Value>,
}

impl Benchmark {
    /// Sorted, de-duplicated algorithm names. Fails on the first malformed
    /// descriptor: it means the benchmark metadata itself is corrupt.
    pub fn algorithm_names(&self) -> std::result::Result<BTreeSet<String>, DescriptorError> {
        self.algorithms
            .iter()
            .map(|descriptor| {
                descriptor.normalize().map_err(|msg| DescriptorError {
                    benchmark: self.name.clone(),
                    descriptor: descriptor.to_value(),
                    msg,
                })
            })
            .collect()
    }

    pub fn task_names(&self) -> BTreeSet<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn assessment_names(&self) -> BTreeSet<String> {
        self.assessments.keys().cloned().collect()
    }
}

/// The benchmark listing backing the search box.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkCatalog {
    benchmarks: Vec<Benchmark>,
}

impl BenchmarkCatalog {
    pub fn new(mut benchmarks: Vec<Benchmark>) -> Self {
        benchmarks.sort_by(|a, b| a.name.cmp(&b.name));
        Self { benchmarks }
    }

    pub async fn fetch(client: &dyn QueryClient) -> Result<Self> {
        let body = client.query(BENCHMARKS_RESOURCE).await?;
        let benchmarks: Vec<Benchmark> = serde_json::from_value(body)?;
        Ok(Self::new(benchmarks))
    }

    /// Like [`BenchmarkCatalog::fetch`], but a failed listing yields an
    /// empty catalog.
    pub async fn load(client: &dyn QueryClient) -> Self {
        match Self::fetch(client).await {
            Ok(catalog) => {
                log(
                    Level::Info,
                    Domain::Selection,
                    "catalog_loaded",
                    obj(&[("count", json!(catalog.len()))]),
                );
                catalog
            }
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::Selection,
                    "catalog_failed",
                    obj(&[("msg", v_str(&err.to_string()))]),
                );
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.benchmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.benchmarks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Benchmark> {
        self.benchmarks.iter()
    }

    pub fn find(&self, name: &str) -> Option<&Benchmark> {
        self.benchmarks.iter().find(|b| b.name == name)
    }

    /// Case-insensitive substring search; an exact name match comes first.
    pub fn search(&self, text: &str) -> Vec<&Benchmark> {
        let needle = text.to_lowercase();
        let mut hits: Vec<&Benchmark> = self
            .benchmarks
            .iter()
            .filter(|b| b.name.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by_key(|b| b.name.to_lowercase() != needle);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MemoryBackend;

    fn descriptor(raw: Value) -> AlgorithmDescriptor {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_bare_name() {
        assert_eq!(descriptor(json!("random")).normalize().unwrap(), "random");
    }

    #[test]
    fn test_single_key_mapping() {
        let d = descriptor(json!({"tpe": {"n_initial_points": 5}}));
        assert!(matches!(d, AlgorithmDescriptor::Configured(_)));
        assert_eq!(d.normalize().unwrap(), "tpe");
    }

    #[test]
    fn test_explicit_algorithm_field() {
        let d = descriptor(json!({"algorithm": "gridsearch", "seed": 1}));
        assert_eq!(d.normalize().unwrap(), "gridsearch");
    }

    #[test]
    fn test_non_string_algorithm_field_is_error() {
        let d = descriptor(json!({"algorithm": {"tpe": {}}}));
        let msg = d.normalize().unwrap_err();
        assert!(msg.contains("must be a string"));
        assert!(descriptor(json!({"algorithm": 7, "seed": 1})).normalize().is_err());
    }

    #[test]
    fn test_multi_key_mapping_is_error() {
        let d = descriptor(json!({"tpe": {}, "random": {}}));
        assert!(d.normalize().is_err());
    }

    #[test]
    fn test_other_shapes_are_errors() {
        assert!(descriptor(json!(3)).normalize().is_err());
        assert!(descriptor(json!(["tpe"])).normalize().is_err());
        assert!(descriptor(json!({})).normalize().is_err());
        assert!(descriptor(json!("")).normalize().is_err());
    }

    #[test]
    fn test_algorithm_names_reports_benchmark() {
        let b: Benchmark = serde_json::from_value(json!({
            "name": "broken",
            "algorithms": ["random", {"a": 1, "b": 2}],
        }))
        .unwrap();
        let err = b.algorithm_names().unwrap_err();
        assert_eq!(err.benchmark, "broken");
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_names_are_sorted_and_deduplicated() {
        let b: Benchmark = serde_json::from_value(json!({
            "name": "b",
            "algorithms": ["tpe", {"random": {"seed": 1}}, "random"],
            "tasks": {"rosenbrock": {}, "branin": {}},
            "assessments": {"AverageResult": {}},
        }))
        .unwrap();
        let algos: Vec<String> = b.algorithm_names().unwrap().into_iter().collect();
        assert_eq!(algos, vec!["random", "tpe"]);
        let tasks: Vec<String> = b.task_names().into_iter().collect();
        assert_eq!(tasks, vec!["branin", "rosenbrock"]);
    }

    #[test]
    fn test_search_prefers_exact_match() {
        let catalog = BenchmarkCatalog::new(vec![
            serde_json::from_value(json!({"name": "branin_baselines_webapi"})).unwrap(),
            serde_json::from_value(json!({"name": "branin"})).unwrap(),
            serde_json::from_value(json!({"name": "all_algos_webapi"})).unwrap(),
        ]);
        let hits: Vec<&str> = catalog.search("BRANIN").iter().map(|b| b.name.as_str()).collect();
        assert_eq!(hits, vec!["branin", "branin_baselines_webapi"]);
        assert!(catalog.search("nothing").is_empty());
        assert!(catalog.find("all_algos_webapi").is_some());
    }

    #[tokio::test]
    async fn test_load_falls_back_to_empty() {
        let backend = MemoryBackend::new();
        let catalog = BenchmarkCatalog::load(&backend).await;
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_listing() {
        let backend = MemoryBackend::new().with_benchmarks(json!([
            {"name": "z", "algorithms": ["random"]},
            {"name": "a", "algorithms": ["tpe"]},
        ]));
        let catalog = BenchmarkCatalog::fetch(&backend).await.unwrap();
        let names: Vec<&str> = catalog.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["a", "z"]);
    }
}
