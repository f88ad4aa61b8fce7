use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde_json::json;

use benchplots::config::Config;
use benchplots::logging::{log, obj, v_str, Domain, Level};
use benchplots::{
    BenchmarkCatalog, ChartGrid, HttpBackend, Narrowing, PlotCache, QueryClient, SelectionState, SessionStatus,
};

fn usage() -> String {
    "usage: benchplots <benchmark-search> [algorithm ...]".to_string()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let search = args.next().ok_or_else(|| anyhow!(usage()))?;
    let algorithms: BTreeSet<String> = args.collect();

    let cfg = Config::from_env();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("backend", v_str(&cfg.backend_address)),
            ("retries", json!(cfg.retry.max_retries)),
        ]),
    );
    let client: Arc<dyn QueryClient> = Arc::new(HttpBackend::new(&cfg)?);
    let cache = Arc::new(PlotCache::new(Arc::clone(&client)));

    let catalog = BenchmarkCatalog::load(client.as_ref()).await;
    let benchmark = match catalog.search(&search).first() {
        Some(benchmark) => (*benchmark).clone(),
        None => bail!("no benchmark matches {:?} ({} available)", search, catalog.len()),
    };

    let selection = SelectionState::new();
    let narrowing = Narrowing {
        algorithms: if algorithms.is_empty() { None } else { Some(algorithms) },
        ..Default::default()
    };
    selection.select_benchmark(Some(benchmark), narrowing)?;

    let mut grid = ChartGrid::new(Arc::clone(&cache));
    if let Some(message) = grid.sync(&selection.current()).message() {
        println!("{}", json!({ "message": message }));
        return Ok(());
    }
    grid.wait_settled().await;

    for session in grid.sessions() {
        let key = session.key();
        let cell = match session.status() {
            SessionStatus::Ready(set) => json!({
                "id": key.render_key(),
                "assessment": key.assessment,
                "task": key.task,
                "algorithms": key.algorithms,
                "plots": set.plots,
            }),
            status => json!({
                "id": key.render_key(),
                "message": status.message(key),
            }),
        };
        println!("{}", cell);
    }

    let stats = cache.stats();
    log(
        Level::Info,
        Domain::System,
        "shutdown",
        obj(&[
            ("cells", json!(grid.len())),
            ("fetches", json!(stats.fetches)),
            ("failures", json!(stats.failures)),
        ]),
    );
    grid.clear();
    Ok(())
}
