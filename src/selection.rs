//! What the user currently has checked.
//!
//! `SelectionState` is a cloneable handle over one watch channel: the
//! navigation controls mutate it, the chart grid subscribes to it, and both
//! always see the same value.

use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

use crate::benchmark::{Benchmark, DescriptorError};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::session::CellKey;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub benchmark: Option<Arc<Benchmark>>,
    pub algorithms: BTreeSet<String>,
    pub tasks: BTreeSet<String>,
    pub assessments: BTreeSet<String>,
}

/// Optional explicit subsets passed along with a benchmark change. `None`
/// selects everything the benchmark declares.
#[derive(Debug, Clone, Default)]
pub struct Narrowing {
    pub algorithms: Option<BTreeSet<String>>,
    pub tasks: Option<BTreeSet<String>>,
    pub assessments: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Facet {
    Algorithm,
    Task,
    Assessment,
}

impl Facet {
    fn as_str(&self) -> &'static str {
        match self {
            Facet::Algorithm => "algorithm",
            Facet::Task => "task",
            Facet::Assessment => "assessment",
        }
    }
}

/// How the chart grid should render a selection.
#[derive(Debug, Clone, PartialEq)]
pub enum GridView {
    NoBenchmark,
    NoAssessment,
    NoTask,
    NoAlgorithm,
    Cells {
        /// Column headers
        assessments: Vec<String>,
        /// Row order
        tasks: Vec<String>,
        /// Row-major: one cell per (task, assessment)
        cells: Vec<CellKey>,
    },
}

impl GridView {
    /// User-facing text for the empty states.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            GridView::NoBenchmark => Some("No benchmark selected"),
            GridView::NoAssessment => Some("No assessment selected"),
            GridView::NoTask => Some("No task selected"),
            GridView::NoAlgorithm => Some("No algorithm selected"),
            GridView::Cells { .. } => None,
        }
    }

    pub fn cells(&self) -> &[CellKey] {
        match self {
            GridView::Cells { cells, .. } => cells,
            _ => &[],
        }
    }
}

/// Declared names the selection must stay within.
struct Declared {
    algorithms: BTreeSet<String>,
    tasks: BTreeSet<String>,
    assessments: BTreeSet<String>,
}

impl Declared {
    fn of(benchmark: &Benchmark) -> Result<Self, DescriptorError> {
        Ok(Self {
            algorithms: benchmark.algorithm_names()?,
            tasks: benchmark.task_names(),
            assessments: benchmark.assessment_names(),
        })
    }
}

fn narrow(declared: BTreeSet<String>, requested: Option<BTreeSet<String>>) -> BTreeSet<String> {
    match requested {
        Some(requested) => declared.intersection(&requested).cloned().collect(),
        None => declared,
    }
}

impl Selection {
    /// Select `benchmark` with every declared algorithm, task and assessment,
    /// minus whatever `narrowing` leaves out.
    pub fn for_benchmark(benchmark: Benchmark, narrowing: Narrowing) -> Result<Self, DescriptorError> {
        let declared = Declared::of(&benchmark)?;
        Ok(Self {
            benchmark: Some(Arc::new(benchmark)),
            algorithms: narrow(declared.algorithms, narrowing.algorithms),
            tasks: narrow(declared.tasks, narrowing.tasks),
            assessments: narrow(declared.assessments, narrowing.assessments),
        })
    }

    pub fn benchmark_name(&self) -> Option<&str> {
        self.benchmark.as_deref().map(|b| b.name.as_str())
    }

    fn facet(&self, facet: Facet) -> &BTreeSet<String> {
        match facet {
            Facet::Algorithm => &self.algorithms,
            Facet::Task => &self.tasks,
            Facet::Assessment => &self.assessments,
        }
    }

    fn facet_mut(&mut self, facet: Facet) -> &mut BTreeSet<String> {
        match facet {
            Facet::Algorithm => &mut self.algorithms,
            Facet::Task => &mut self.tasks,
            Facet::Assessment => &mut self.assessments,
        }
    }

    fn declares(&self, facet: Facet, name: &str) -> bool {
        let Some(benchmark) = self.benchmark.as_deref() else {
            return false;
        };
        match facet {
            Facet::Algorithm => benchmark
                .algorithm_names()
                .map_or(false, |names| names.contains(name)),
            Facet::Task => benchmark.tasks.contains_key(name),
            Facet::Assessment => benchmark.assessments.contains_key(name),
        }
    }

    /// Grid layout: sorted assessment columns, sorted task rows, one cell
    /// per pair carrying the sorted algorithm list.
    pub fn grid(&self) -> GridView {
        let Some(benchmark) = self.benchmark.as_deref() else {
            return GridView::NoBenchmark;
        };
        if self.assessments.is_empty() {
            return GridView::NoAssessment;
        }
        if self.tasks.is_empty() {
            return GridView::NoTask;
        }
        if self.algorithms.is_empty() {
            return GridView::NoAlgorithm;
        }
        let assessments: Vec<String> = self.assessments.iter().cloned().collect();
        let tasks: Vec<String> = self.tasks.iter().cloned().collect();
        let algorithms: Vec<String> = self.algorithms.iter().cloned().collect();
        let cells = tasks
            .iter()
            .flat_map(|task| {
                assessments.iter().map(|assessment| CellKey {
                    benchmark: benchmark.name.clone(),
                    assessment: assessment.clone(),
                    task: task.clone(),
                    algorithms: algorithms.clone(),
                })
            })
            .collect();
        GridView::Cells { assessments, tasks, cells }
    }
}

/// Shared handle to the current selection.
#[derive(Clone)]
pub struct SelectionState {
    tx: Arc<watch::Sender<Selection>>,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Selection::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Selection {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Selection> {
        self.tx.subscribe()
    }

    /// Switch benchmark (or clear it with `None`). All three subsets are
    /// recomputed from the new benchmark. Fails on corrupt algorithm metadata,
    /// leaving the previous selection in place.
    pub fn select_benchmark(&self, benchmark: Option<Benchmark>, narrowing: Narrowing) -> Result<(), DescriptorError> {
        let next = match benchmark {
            Some(benchmark) => Selection::for_benchmark(benchmark, narrowing)?,
            None => Selection::default(),
        };
        log(
            Level::Info,
            Domain::Selection,
            "benchmark_selected",
            obj(&[
                ("benchmark", next.benchmark_name().map(v_str).unwrap_or(serde_json::Value::Null)),
                ("algorithms", json!(next.algorithms)),
                ("tasks", json!(next.tasks)),
                ("assessments", json!(next.assessments)),
            ]),
        );
        self.tx.send_replace(next);
        Ok(())
    }

    pub fn toggle_algorithm(&self, name: &str) -> bool {
        self.toggle(Facet::Algorithm, name)
    }

    pub fn toggle_task(&self, name: &str) -> bool {
        self.toggle(Facet::Task, name)
    }

    pub fn toggle_assessment(&self, name: &str) -> bool {
        self.toggle(Facet::Assessment, name)
    }

    pub fn set_algorithm(&self, name: &str, checked: bool) {
        self.set(Facet::Algorithm, name, checked)
    }

    pub fn set_task(&self, name: &str, checked: bool) {
        self.set(Facet::Task, name, checked)
    }

    pub fn set_assessment(&self, name: &str, checked: bool) {
        self.set(Facet::Assessment, name, checked)
    }

    /// Flip membership; returns whether `name` is selected afterwards.
    fn toggle(&self, facet: Facet, name: &str) -> bool {
        self.update(facet, name, None)
    }

    fn set(&self, facet: Facet, name: &str, checked: bool) {
        self.update(facet, name, Some(checked));
    }

    /// `checked == None` flips the current membership.
    fn update(&self, facet: Facet, name: &str, checked: Option<bool>) -> bool {
        let mut selected = false;
        self.tx.send_if_modified(|selection| {
            let was = selection.facet(facet).contains(name);
            let checked = checked.unwrap_or(!was);
            selected = was;
            if checked == was {
                return false;
            }
            if checked && !selection.declares(facet, name) {
                log(
                    Level::Warn,
                    Domain::Selection,
                    "undeclared_name",
                    obj(&[("facet", v_str(facet.as_str())), ("name", v_str(name))]),
                );
                return false;
            }
            let set = selection.facet_mut(facet);
            if checked {
                set.insert(name.to_string());
            } else {
                set.remove(name);
            }
            selected = checked;
            log(
                Level::Debug,
                Domain::Selection,
                "toggled",
                obj(&[
                    ("facet", v_str(facet.as_str())),
                    ("name", v_str(name)),
                    ("checked", json!(checked)),
                ]),
            );
            true
        });
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn benchmark() -> Benchmark {
        serde_json::from_value(json!({
            "name": "all_algos_webapi",
            "algorithms": ["gridsearch", {"random": {"seed": 1}}, "tpe"],
            "tasks": {"branin": {}, "eggholder": {}, "rosenbrock": {}},
            "assessments": {"AverageResult": {"repetitions": 3}},
        }))
        .unwrap()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_all_by_default() {
        let state = SelectionState::new();
        state.select_benchmark(Some(benchmark()), Narrowing::default()).unwrap();
        let s = state.current();
        assert_eq!(s.algorithms, set(&["gridsearch", "random", "tpe"]));
        assert_eq!(s.tasks, set(&["branin", "eggholder", "rosenbrock"]));
        assert_eq!(s.assessments, set(&["AverageResult"]));
    }

    #[test]
    fn test_narrowing_is_intersected_with_declared() {
        let state = SelectionState::new();
        let narrowing = Narrowing {
            algorithms: Some(set(&["tpe", "unknown"])),
            ..Default::default()
        };
        state.select_benchmark(Some(benchmark()), narrowing).unwrap();
        assert_eq!(state.current().algorithms, set(&["tpe"]));
        assert_eq!(state.current().tasks.len(), 3);
    }

    #[test]
    fn test_clearing_benchmark_empties_everything() {
        let state = SelectionState::new();
        state.select_benchmark(Some(benchmark()), Narrowing::default()).unwrap();
        state.select_benchmark(None, Narrowing::default()).unwrap();
        assert_eq!(state.current(), Selection::default());
        assert_eq!(state.current().grid(), GridView::NoBenchmark);
    }

    #[test]
    fn test_malformed_descriptor_keeps_previous_selection() {
        let state = SelectionState::new();
        state.select_benchmark(Some(benchmark()), Narrowing::default()).unwrap();
        let broken: Benchmark = serde_json::from_value(json!({
            "name": "broken",
            "algorithms": [{"a": 1, "b": 2}],
        }))
        .unwrap();
        assert!(state.select_benchmark(Some(broken), Narrowing::default()).is_err());
        assert_eq!(state.current().benchmark_name(), Some("all_algos_webapi"));
    }

    #[test]
    fn test_toggle_round_trip() {
        let state = SelectionState::new();
        state.select_benchmark(Some(benchmark()), Narrowing::default()).unwrap();
        let before = state.current();
        assert!(!state.toggle_algorithm("tpe"));
        assert!(state.toggle_algorithm("tpe"));
        assert_eq!(state.current(), before);
    }

    #[test]
    fn test_set_is_idempotent() {
        let state = SelectionState::new();
        state.select_benchmark(Some(benchmark()), Narrowing::default()).unwrap();
        let mut rx = state.subscribe();
        rx.borrow_and_update();
        state.set_task("branin", true);
        assert!(!rx.has_changed().unwrap());
        state.set_task("branin", false);
        state.set_task("branin", false);
        assert_eq!(state.current().tasks, set(&["eggholder", "rosenbrock"]));
    }

    #[test]
    fn test_undeclared_names_are_ignored() {
        let state = SelectionState::new();
        state.select_benchmark(Some(benchmark()), Narrowing::default()).unwrap();
        assert!(!state.toggle_algorithm("hyperband"));
        assert!(!state.current().algorithms.contains("hyperband"));
    }

    #[test]
    fn test_clones_share_state() {
        let nav = SelectionState::new();
        let grid = nav.clone();
        nav.select_benchmark(Some(benchmark()), Narrowing::default()).unwrap();
        nav.toggle_assessment("AverageResult");
        assert!(grid.current().assessments.is_empty());
    }

    #[test]
    fn test_grid_empty_states_in_order() {
        let mut s = Selection::for_benchmark(benchmark(), Narrowing::default()).unwrap();
        s.algorithms.clear();
        assert_eq!(s.grid(), GridView::NoAlgorithm);
        s.tasks.clear();
        assert_eq!(s.grid(), GridView::NoTask);
        s.assessments.clear();
        assert_eq!(s.grid(), GridView::NoAssessment);
        assert_eq!(s.grid().message(), Some("No assessment selected"));
    }

    #[test]
    fn test_grid_cells_are_row_major() {
        let s = Selection::for_benchmark(benchmark(), Narrowing::default()).unwrap();
        let view = s.grid();
        let cells = view.cells();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].task, "branin");
        assert_eq!(cells[2].task, "rosenbrock");
        assert_eq!(cells[0].algorithms, vec!["gridsearch", "random", "tpe"]);
    }
}
