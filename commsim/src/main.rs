use std::path::PathBuf;

use anyhow::{bail, Context};
use common::log_setup::setup_logging;
use common::FileFormat;
use tracing::{info, warn};

use commsim::context::SimulationContext;
use commsim::elements::basic_lib;
use commsim::graph::Graph;
use commsim::run_simulation;
use commsim::settings::SweepConfig;

const USAGE: &str = "usage: commsim <graph.yaml|json> [config.yaml|json] [results.yaml|json]";

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1).map(PathBuf::from);
    let Some(graph_path) = args.next() else {
        bail!(USAGE);
    };
    let config_path = args.next();
    let results_path = args.next();

    setup_logging("commsim", "info", None)?;

    let mut graph: Graph = common::read_file(&graph_path)
        .with_context(|| format!("reading graph {}", graph_path.display()))?;
    let config = match &config_path {
        Some(path) => SweepConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => SweepConfig::default(),
    };

    let report = run_simulation(&mut graph, &basic_lib(), &SimulationContext::new(config))?;
    for record in report.failures() {
        if let Some(failure) = &record.failure {
            warn!(iteration = record.iteration, %failure, "Iteration failed");
        }
    }
    info!(
        completed = report.completed(),
        faults = report.faults.len(),
        "Simulation done"
    );

    match results_path {
        Some(path) => common::write_file(&report.results, &path)?,
        None => print!("{}", common::serialize(&report.results, FileFormat::Yaml)?),
    }

    if report.aborted {
        bail!("sweep aborted");
    }

    Ok(())
}
