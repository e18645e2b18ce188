//! # pping-exporter
//!
//! A Prometheus exporter that aggregates the machine-readable output of
//! [pping](https://github.com/pollere/pping) into per-flow running median
//! round-trip times.
//!
//! pping prints one line per observed round trip. Piped into this exporter,
//! each line is parsed into a flow sample, appended to a bounded window of
//! recent RTTs for its flow, and the window median is exposed as the
//! `pping_service_rtt` gauge, labeled by source IP, destination IP and
//! destination port. Flows that stop producing samples are expired after an
//! idle timeout so their series disappear from the scrape output.
//!
//! ## Architecture
//!
//! Three tokio tasks share a lock-protected flow table:
//!
//! ```text
//! stdin ──▶ ingest loop ──▶ parse ──▶ FlowTable ◀── expiry sweeper
//!                                        │
//!                                        ▼ snapshot
//!                               HTTP /metrics endpoint
//! ```
//!
//! ## Quick start
//!
//! ```bash
//! sudo pping -i eth0 -m | pping-exporter 100.200.3.0/24
//! curl localhost:9876/metrics
//! ```
//!
//! The single positional argument is a subnet in CIDR notation; samples whose
//! source IP falls inside it (e.g. intra-host container traffic) are ignored.

pub mod expiry;
pub mod filter;
pub mod ingest;
pub mod parse;
pub mod prometheus;
pub mod samples;
pub mod table;

pub use filter::{FilterError, SourceFilter};
pub use ingest::IngestStats;
pub use parse::{parse_record, FlowKey, FlowSample, Reject};
pub use samples::{FlowSamples, WINDOW_SIZE};
pub use table::{FlowMedian, FlowTable};
