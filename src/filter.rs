use serde::Serialize;
use std::collections::BTreeSet;

use crate::plot::{CachedPlotSet, PlotDefinition, PlotKey};

/// A cached plot set restricted to the traces of some algorithms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredPlotSet {
    pub key: PlotKey,
    pub algorithms: Vec<String>,
    pub plots: Vec<PlotDefinition>,
}

impl FilteredPlotSet {
    pub fn trace_count(&self) -> usize {
        self.plots.iter().map(|p| p.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.trace_count() == 0
    }
}

/// True when `trace` is `algorithm` itself or one of its derived series
/// (`<algorithm>_<suffix>`, e.g. `tpe_workers_1`).
pub fn trace_belongs_to(trace: &str, algorithm: &str) -> bool {
    match trace.strip_prefix(algorithm) {
        Some(rest) => rest.is_empty() || rest.starts_with('_'),
        None => false,
    }
}

/// Keep, in every plot, the traces owned by one of `algorithms`.
///
/// Plot order and trace order are preserved and no plot is ever dropped, so
/// an empty selection yields every plot with zero traces.
pub fn filter_plots(set: &CachedPlotSet, algorithms: &BTreeSet<String>) -> FilteredPlotSet {
    let plots = set
        .plots
        .iter()
        .map(|plot| PlotDefinition {
            name: plot.name.clone(),
            data: plot
                .data
                .iter()
                .filter(|trace| {
                    PlotDefinition::trace_name(trace)
                        .map_or(false, |name| algorithms.iter().any(|a| trace_belongs_to(name, a)))
                })
                .cloned()
                .collect(),
            layout: plot.layout.clone(),
        })
        .collect();

    FilteredPlotSet {
        key: set.key.clone(),
        algorithms: algorithms.iter().cloned().collect(),
        plots,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn traces(names: &[&str]) -> Vec<Value> {
        names.iter().map(|n| json!({"name": n, "y": [1, 2]})).collect()
    }

    fn set() -> CachedPlotSet {
        CachedPlotSet {
            key: PlotKey::new("all_assessments_webapi_2", "ParallelAssessment", "branin"),
            plots: vec![
                PlotDefinition {
                    name: "durations".to_string(),
                    data: traces(&["random", "tpe"]),
                    layout: json!({"title": "Time to result"}),
                },
                PlotDefinition {
                    name: "regret".to_string(),
                    data: traces(&["tpe2", "random_workers_1", "tpe_workers_1", "tpe", "randomized"]),
                    layout: json!({"title": "Average Regret"}),
                },
                PlotDefinition {
                    name: "unnamed".to_string(),
                    data: vec![json!({"y": [1]})],
                    layout: json!({}),
                },
            ],
        }
    }

    fn algos(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn names(plot: &PlotDefinition) -> Vec<&str> {
        plot.data.iter().filter_map(PlotDefinition::trace_name).collect()
    }

    #[test]
    fn test_prefix_boundary() {
        assert!(trace_belongs_to("tpe", "tpe"));
        assert!(trace_belongs_to("tpe_workers_1", "tpe"));
        assert!(!trace_belongs_to("tpe2", "tpe"));
        assert!(!trace_belongs_to("tp", "tpe"));
        assert!(!trace_belongs_to("randomized", "random"));
    }

    #[test]
    fn test_filter_keeps_owned_traces_in_order() {
        let out = filter_plots(&set(), &algos(&["tpe"]));
        assert_eq!(names(&out.plots[0]), vec!["tpe"]);
        assert_eq!(names(&out.plots[1]), vec!["tpe_workers_1", "tpe"]);
        assert!(out.plots[2].data.is_empty());
        assert_eq!(out.plots[1].layout["title"], "Average Regret");
    }

    #[test]
    fn test_empty_selection_keeps_every_plot() {
        let out = filter_plots(&set(), &BTreeSet::new());
        assert_eq!(out.plots.len(), 3);
        assert!(out.is_empty());
    }

    #[test]
    fn test_does_not_mutate_input() {
        let original = set();
        let copy = original.clone();
        let _ = filter_plots(&original, &algos(&["random"]));
        assert_eq!(original, copy);
    }

    #[test]
    fn test_monotonic_in_algorithm_set() {
        let cached = set();
        let small = filter_plots(&cached, &algos(&["random"]));
        let large = filter_plots(&cached, &algos(&["random", "tpe2"]));
        assert!(small.trace_count() <= large.trace_count());
        for (a, b) in small.plots.iter().zip(&large.plots) {
            for trace in &a.data {
                assert!(b.data.contains(trace));
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let cached = set();
        let selection = algos(&["random", "tpe"]);
        assert_eq!(filter_plots(&cached, &selection), filter_plots(&cached, &selection));
    }
}
