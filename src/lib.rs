//! Plot acquisition and caching for a benchmark visualization client.
//!
//! - `query`: read-only access to the analysis service (HTTP or in-memory)
//! - `benchmark`: benchmark listing and algorithm descriptor normalization
//! - `cache`: at-most-one-fetch-per-key plot cache
//! - `filter`: projection of cached plots onto an algorithm set
//! - `selection`: shared checkbox state and grid layout
//! - `session`: per-cell acquisition lifecycle

pub mod benchmark;
pub mod cache;
pub mod config;
pub mod filter;
pub mod logging;
pub mod plot;
pub mod query;
pub mod selection;
pub mod session;

pub use benchmark::{AlgorithmDescriptor, Benchmark, BenchmarkCatalog, DescriptorError};
pub use cache::{CacheStats, FetchError, PlotCache};
pub use filter::{filter_plots, FilteredPlotSet};
pub use plot::{CachedPlotSet, PlotDefinition, PlotKey};
pub use query::{HttpBackend, MemoryBackend, QueryClient, QueryError};
pub use selection::{GridView, Narrowing, Selection, SelectionState};
pub use session::{CellKey, ChartGrid, ChartSession, SessionStatus};
