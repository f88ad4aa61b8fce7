use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::form_urlencoded;

mod http;
mod memory;
pub mod retry;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

/// Read-only access to the benchmark analysis service.
///
/// `resource` is a path relative to the service root, e.g. `benchmarks` or
/// `benchmarks/branin?assessment=AverageResult&task=branin`.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn query(&self, resource: &str) -> Result<Value>;
}

/// Transport or service failure for one resource.
#[derive(Debug, Clone)]
pub struct QueryError {
    pub resource: String,
    pub status: Option<u16>,
    pub msg: String,
    pub retryable: bool,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "query {} failed with status {}: {}", self.resource, status, self.msg),
            None => write!(f, "query {} failed: {}", self.resource, self.msg),
        }
    }
}

impl std::error::Error for QueryError {}

pub const BENCHMARKS_RESOURCE: &str = "benchmarks";

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'\\')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'&')
    .add(b'+');

/// Resource path for one benchmark's analysis of `assessment` on `task`.
/// An empty `algorithms` slice requests every algorithm.
pub fn analysis_resource(benchmark: &str, assessment: &str, task: &str, algorithms: &[String]) -> String {
    let mut path = String::from(BENCHMARKS_RESOURCE);
    path.push('/');
    path.extend(utf8_percent_encode(benchmark, PATH_SEGMENT));
    let mut params = form_urlencoded::Serializer::new(String::new());
    params.append_pair("assessment", assessment);
    params.append_pair("task", task);
    for algorithm in algorithms {
        params.append_pair("algorithms", algorithm);
    }
    format!("{}?{}", path, params.finish())
}
