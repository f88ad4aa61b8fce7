//! Per-cell chart acquisition.
//!
//! A session fetches the plots of one grid cell through the [`PlotCache`],
//! filters them to the cell's algorithms and publishes the outcome on a watch
//! channel. The generation captured at start is compared, under the channel's
//! lock, with the current one before anything is published; teardown bumps it
//! under the same lock, so a torn-down session never changes state again.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::cache::PlotCache;
use crate::filter::{filter_plots, FilteredPlotSet};
use crate::logging::{log_session, Level};
use crate::plot::PlotKey;
use crate::selection::{GridView, Selection};

/// Identity of a rendered cell. Any change to it means a new session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CellKey {
    pub benchmark: String,
    pub assessment: String,
    pub task: String,
    /// Sorted
    pub algorithms: Vec<String>,
}

impl CellKey {
    pub fn new(benchmark: &str, assessment: &str, task: &str, algorithms: &BTreeSet<String>) -> Self {
        Self {
            benchmark: benchmark.to_string(),
            assessment: assessment.to_string(),
            task: task.to_string(),
            algorithms: algorithms.iter().cloned().collect(),
        }
    }

    pub fn plot_key(&self) -> PlotKey {
        PlotKey::new(&self.benchmark, &self.assessment, &self.task)
    }

    pub fn algorithm_set(&self) -> BTreeSet<String> {
        self.algorithms.iter().cloned().collect()
    }

    pub fn render_key(&self) -> String {
        format!(
            "render-{}-{}-{}-{}",
            self.benchmark,
            self.assessment,
            self.task,
            self.algorithms.join("-")
        )
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "assessment: {}, task: {}, algorithms: {}",
            self.assessment,
            self.task,
            self.algorithms.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Pending,
    Ready(Arc<FilteredPlotSet>),
    /// Carries the underlying error text
    Failed(String),
}

impl SessionStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, SessionStatus::Pending)
    }

    /// Placeholder text for pending and failed cells.
    pub fn message(&self, key: &CellKey) -> Option<String> {
        match self {
            SessionStatus::Pending => Some(format!("Loading plot for {}", key)),
            SessionStatus::Failed(_) => Some(format!("Unable to load plot for {}", key)),
            SessionStatus::Ready(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionCell {
    generation: u64,
    torn_down: bool,
    status: SessionStatus,
}

pub struct ChartSession {
    key: CellKey,
    state: Arc<watch::Sender<SessionCell>>,
}

impl ChartSession {
    /// Start acquiring `key`. Must be called from within a tokio runtime.
    pub fn start(cache: Arc<PlotCache>, key: CellKey) -> Self {
        let (tx, _) = watch::channel(SessionCell {
            generation: 0,
            torn_down: false,
            status: SessionStatus::Pending,
        });
        let state = Arc::new(tx);
        log_session(Level::Debug, "session_start", &key.render_key(), 0);
        tokio::spawn(acquire(cache, key.clone(), Arc::clone(&state), 0));
        Self { key, state }
    }

    pub fn key(&self) -> &CellKey {
        &self.key
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.borrow().torn_down
    }

    pub fn message(&self) -> Option<String> {
        self.status().message(&self.key)
    }

    /// Resolve once the session is no longer pending, or has been torn down.
    pub async fn wait_settled(&self) -> SessionStatus {
        let mut cells = self.state.subscribe();
        let settled = cells
            .wait_for(|cell| cell.torn_down || !cell.status.is_pending())
            .await
            .map(|cell| cell.status.clone());
        settled.unwrap_or_else(|_| self.status())
    }

    /// Stop publishing results. The fetch itself keeps running so the cache
    /// still gets populated.
    pub fn teardown(&mut self) {
        let mut generation = 0;
        let changed = self.state.send_if_modified(|cell| {
            if cell.torn_down {
                return false;
            }
            cell.torn_down = true;
            cell.generation += 1;
            generation = cell.generation;
            true
        });
        if changed {
            log_session(Level::Debug, "session_teardown", &self.key.render_key(), generation);
        }
    }
}

impl Drop for ChartSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn acquire(cache: Arc<PlotCache>, key: CellKey, state: Arc<watch::Sender<SessionCell>>, generation: u64) {
    let (status, event, level) = match cache.get_key(key.plot_key()).await {
        Ok(set) => (
            SessionStatus::Ready(Arc::new(filter_plots(&set, &key.algorithm_set()))),
            "session_ready",
            Level::Debug,
        ),
        Err(err) => (SessionStatus::Failed(err.to_string()), "session_failed", Level::Warn),
    };
    let applied = state.send_if_modified(|cell| {
        if cell.torn_down || cell.generation != generation {
            return false;
        }
        cell.status = status;
        true
    });
    let event = if applied { event } else { "session_discarded" };
    log_session(level, event, &key.render_key(), generation);
}

/// The sessions backing the cells currently on screen.
pub struct ChartGrid {
    cache: Arc<PlotCache>,
    sessions: HashMap<CellKey, ChartSession>,
    view: GridView,
}

impl ChartGrid {
    pub fn new(cache: Arc<PlotCache>) -> Self {
        Self {
            cache,
            sessions: HashMap::new(),
            view: GridView::NoBenchmark,
        }
    }

    /// Reconcile sessions with `selection`: cells that disappeared are torn
    /// down, new cells start from `Pending`, unchanged cells keep their session.
    pub fn sync(&mut self, selection: &Selection) -> &GridView {
        let view = selection.grid();
        let wanted: BTreeSet<&CellKey> = view.cells().iter().collect();
        self.sessions.retain(|key, _| wanted.contains(key));
        for key in view.cells() {
            if !self.sessions.contains_key(key) {
                let session = ChartSession::start(Arc::clone(&self.cache), key.clone());
                self.sessions.insert(key.clone(), session);
            }
        }
        self.view = view;
        &self.view
    }

    pub fn view(&self) -> &GridView {
        &self.view
    }

    pub fn session(&self, key: &CellKey) -> Option<&ChartSession> {
        self.sessions.get(key)
    }

    /// Sessions in grid order.
    pub fn sessions(&self) -> impl Iterator<Item = &ChartSession> {
        self.view.cells().iter().filter_map(|key| self.sessions.get(key))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub async fn wait_settled(&self) {
        for session in self.sessions() {
            session.wait_settled().await;
        }
    }

    /// Tear every session down (the view unmounted).
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.view = GridView::NoBenchmark;
    }
}
