//! pping-exporter binary: wires stdin ingest, flow expiry and the metrics
//! endpoint together.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pping_exporter::expiry::{self, FLOW_IDLE_TIMEOUT};
use pping_exporter::ingest::{self, IngestStats};
use pping_exporter::prometheus::{MetricsServer, DEFAULT_LISTEN_ADDR};
use pping_exporter::{FlowTable, SourceFilter};

#[derive(Parser, Debug)]
#[command(name = "pping-exporter")]
#[command(about = "Aggregates pping output into per-flow median RTT Prometheus metrics")]
struct Args {
    /// Source subnet to exclude, in CIDR notation (e.g. 100.200.3.0/24).
    /// Samples originating inside it (intra-host container flows) are ignored.
    subnet: String,

    /// HTTP listening address for Prometheus to scrape
    #[arg(short = 'a', long, default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let filter: SourceFilter = args
        .subnet
        .parse()
        .with_context(|| format!("unusable exclusion subnet {:?}", args.subnet))?;

    let table = Arc::new(FlowTable::new());
    let stats = Arc::new(IngestStats::default());

    tokio::spawn(ingest::run_ingest(
        tokio::io::stdin(),
        table.clone(),
        filter,
        stats.clone(),
    ));
    tokio::spawn(expiry::run_sweeper(table.clone(), FLOW_IDLE_TIMEOUT));

    let server = Arc::new(MetricsServer::new(table, stats));
    server.run(&args.listen).await
}
