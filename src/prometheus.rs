//! Prometheus exposition endpoint.
//!
//! Renders the flow table's current medians in the Prometheus text-based
//! exposition format and serves them over HTTP for scraping. Rendering is a
//! read-only snapshot of the flow table taken at request time, so the set of
//! exported `pping_service_rtt` series always equals the set of live flows.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::ingest::IngestStats;
use crate::table::{FlowMedian, FlowTable};

/// Default address Prometheus scrapes, matching pping's exporter convention.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9876";

const METRICS_PATH: &str = "/metrics";
const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain";

/// HTTP server exposing the `/metrics` endpoint.
///
/// Holds shared handles to the flow table and ingest counters; every request
/// renders a fresh snapshot. Any path other than `/metrics` gets a 404.
#[derive(Debug)]
pub struct MetricsServer {
    table: Arc<FlowTable>,
    stats: Arc<IngestStats>,
    started_at: SystemTime,
}

impl MetricsServer {
    pub fn new(table: Arc<FlowTable>, stats: Arc<IngestStats>) -> Self {
        Self {
            table,
            stats,
            started_at: SystemTime::now(),
        }
    }

    /// Render the full scrape body: per-flow medians plus process metrics.
    pub fn render(&self) -> String {
        render_exposition(&self.table.snapshot(), &self.stats, self.started_at)
    }

    /// Route a request path to a status, content type and body.
    fn respond(&self, path: &str) -> (StatusCode, &'static str, String) {
        if path == METRICS_PATH {
            (StatusCode::OK, METRICS_CONTENT_TYPE, self.render())
        } else {
            (
                StatusCode::NOT_FOUND,
                TEXT_CONTENT_TYPE,
                "Not Found\n".to_string(),
            )
        }
    }

    /// Accept connections on `listen_addr` and serve scrapes until the
    /// process is terminated.
    pub async fn run(self: Arc<Self>, listen_addr: &str) -> anyhow::Result<()> {
        let addr: SocketAddr = listen_addr
            .parse()
            .with_context(|| format!("invalid listen address {listen_addr:?}"))?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "metrics endpoint listening");

        loop {
            let (stream, _) = listener.accept().await.context("accept failed")?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let server = server.clone();
                    async move {
                        let (status, content_type, body) = server.respond(req.uri().path());
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(status)
                                .header("Content-Type", content_type)
                                .body(Full::new(Bytes::from(body)))
                                .expect("static response parts are valid"),
                        )
                    }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!(error = %e, "metrics connection error");
                }
            });
        }
    }
}

/// Format flow medians and process counters in the text exposition format.
fn render_exposition(flows: &[FlowMedian], stats: &IngestStats, started_at: SystemTime) -> String {
    let mut output = String::new();

    output.push_str(
        "# HELP pping_service_rtt Per-flow running median RTT from source IP to a given destination IP/port\n",
    );
    output.push_str("# TYPE pping_service_rtt gauge\n");
    for flow in flows {
        output.push_str(&format!(
            "pping_service_rtt{{srcIP=\"{}\",dstIP=\"{}\",dstPort=\"{}\"}} {}\n",
            escape_label_value(&flow.key.src_ip),
            escape_label_value(&flow.key.dst_ip),
            escape_label_value(&flow.key.dst_port),
            flow.median_ms
        ));
    }

    let start_epoch = started_at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    output.push_str(
        "# HELP process_start_time_seconds Start time of the process since unix epoch in seconds\n",
    );
    output.push_str("# TYPE process_start_time_seconds gauge\n");
    output.push_str(&format!("process_start_time_seconds {start_epoch:.3}\n"));

    output.push_str("# HELP pping_exporter_flows Number of flows currently tracked\n");
    output.push_str("# TYPE pping_exporter_flows gauge\n");
    output.push_str(&format!("pping_exporter_flows {}\n", flows.len()));

    output.push_str(
        "# HELP pping_exporter_records_total Measurement records applied to the flow table\n",
    );
    output.push_str("# TYPE pping_exporter_records_total counter\n");
    output.push_str(&format!(
        "pping_exporter_records_total {}\n",
        stats.records()
    ));

    output.push_str(
        "# HELP pping_exporter_rejected_records_total Input lines dropped as malformed or incomplete\n",
    );
    output.push_str("# TYPE pping_exporter_rejected_records_total counter\n");
    output.push_str(&format!(
        "pping_exporter_rejected_records_total {}\n",
        stats.rejected()
    ));

    output.push_str(
        "# HELP pping_exporter_filtered_records_total Records dropped by the source subnet filter\n",
    );
    output.push_str("# TYPE pping_exporter_filtered_records_total counter\n");
    output.push_str(&format!(
        "pping_exporter_filtered_records_total {}\n",
        stats.filtered()
    ));

    output
}

/// Escape a label value per the exposition format: backslash, double quote
/// and newline are the only characters needing escapes. Label values here
/// come from parsed flow fields, so ordinarily nothing is escaped at all.
fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
