//! Chart definitions returned by the analysis service.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One server-side analysis unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PlotKey {
    pub benchmark: String,
    pub assessment: String,
    pub task: String,
}

impl PlotKey {
    pub fn new(benchmark: impl Into<String>, assessment: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            benchmark: benchmark.into(),
            assessment: assessment.into(),
            task: task.into(),
        }
    }
}

impl fmt::Display for PlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.benchmark, self.assessment, self.task)
    }
}

/// A named chart: plotly-style trace array plus layout object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotDefinition {
    pub name: String,
    pub data: Vec<Value>,
    pub layout: Value,
}

impl PlotDefinition {
    /// The algorithm-bearing name of a trace, if it has one.
    pub fn trace_name(trace: &Value) -> Option<&str> {
        trace.get("name").and_then(Value::as_str)
    }
}

#[derive(Deserialize)]
struct ChartBody {
    data: Vec<Value>,
    #[serde(default = "empty_layout")]
    layout: Value,
}

fn empty_layout() -> Value {
    Value::Object(Map::new())
}

/// The decoded plots of one [`PlotKey`], sorted by plot name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedPlotSet {
    pub key: PlotKey,
    pub plots: Vec<PlotDefinition>,
}

impl CachedPlotSet {
    pub fn trace_count(&self) -> usize {
        self.plots.iter().map(|p| p.data.len()).sum()
    }

    pub fn plot(&self, name: &str) -> Option<&PlotDefinition> {
        self.plots.iter().find(|p| p.name == name)
    }
}

/// Decode one chart definition, serialized as a JSON string or inline.
pub fn decode_chart(name: &str, raw: &Value) -> Result<PlotDefinition> {
    let body: ChartBody = match raw {
        Value::String(text) => serde_json::from_str::<ChartBody>(text),
        other => serde_json::from_value::<ChartBody>(other.clone()),
    }
    .with_context(|| format!("invalid chart definition for plot {}", name))?;
    Ok(PlotDefinition {
        name: name.to_string(),
        data: body.data,
        layout: body.layout,
    })
}

fn is_chart_body(raw: &Value) -> bool {
    match raw {
        Value::String(_) => true,
        Value::Object(map) => map.get("data").map_or(false, Value::is_array),
        _ => false,
    }
}

/// Decode an analysis response for `key`.
///
/// Accepts `{"analysis": {...}}` or the bare assessment mapping. Under
/// `[assessment][task]` sits either a plot-name mapping or, in the older
/// single-plot form, one chart named after the assessment.
pub fn decode_analysis(key: &PlotKey, response: &Value) -> Result<CachedPlotSet> {
    let analysis = response.get("analysis").unwrap_or(response);
    let by_task = analysis
        .get(&key.assessment)
        .ok_or_else(|| anyhow!("no analysis for assessment {}", key.assessment))?;
    let entry = by_task
        .get(&key.task)
        .ok_or_else(|| anyhow!("no analysis for task {} under assessment {}", key.task, key.assessment))?;

    let mut plots = if is_chart_body(entry) {
        vec![decode_chart(&key.assessment, entry)?]
    } else if let Value::Object(named) = entry {
        named
            .iter()
            .map(|(name, raw)| decode_chart(name, raw))
            .collect::<Result<Vec<_>>>()?
    } else {
        bail!("unexpected analysis shape for {}", key);
    };
    plots.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(CachedPlotSet { key: key.clone(), plots })
}
