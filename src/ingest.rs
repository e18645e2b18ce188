//! Ingest loop: reads pping output line by line and updates the flow table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info, warn};

use crate::filter::SourceFilter;
use crate::parse::{parse_record, Reject};
use crate::table::FlowTable;

/// Counters describing what the ingest loop has seen so far.
///
/// Updated with relaxed atomics on the hot path; read by the exporter when
/// rendering a scrape.
#[derive(Debug, Default)]
pub struct IngestStats {
    /// Records parsed and applied to the flow table.
    pub records: AtomicU64,
    /// Lines dropped for any reason other than the source filter.
    pub rejected: AtomicU64,
    /// Records dropped because their source IP was inside the excluded subnet.
    pub filtered: AtomicU64,
}

impl IngestStats {
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }
}

/// Continuously read newline-delimited records from `reader` and feed them
/// into `table`.
///
/// Generic over [`AsyncRead`] so production can pass stdin and tests can pass
/// an in-memory cursor. Each complete line is parsed, validated against the
/// source filter and applied; the flow's fresh median is logged for
/// observability. A malformed line only affects itself: the loop logs (or
/// silently skips) it and moves on.
///
/// Waiting for input is an await point, never a busy block, so the sweeper
/// and HTTP server always make progress. The loop ends at EOF or on a read
/// error; the rest of the process keeps serving whatever was aggregated.
///
/// # Example
///
/// ```
/// use std::io::Cursor;
/// use std::sync::Arc;
/// use pping_exporter::{ingest, FlowTable, IngestStats, SourceFilter};
///
/// # tokio_test::block_on(async {
/// let filter: SourceFilter = "100.200.3.0/24".parse().unwrap();
/// let table = Arc::new(FlowTable::new());
/// let stats = Arc::new(IngestStats::default());
///
/// let input = Cursor::new(b"1.0 0.002 0.002 74 0 66 10.0.0.1:40622+1.1.1.1:53\n".to_vec());
/// ingest::run_ingest(input, table.clone(), filter, stats).await;
///
/// assert_eq!(table.len(), 1);
/// assert_eq!(table.snapshot()[0].median_ms, 2.0);
/// # });
/// ```
pub async fn run_ingest<R>(
    reader: R,
    table: Arc<FlowTable>,
    filter: SourceFilter,
    stats: Arc<IngestStats>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                info!("input stream closed, ingest loop stopping");
                break;
            }
            Ok(_) => {
                // Lossy decode: a line with garbled bytes turns into a
                // malformed record and is rejected like any other, rather
                // than tearing down the whole loop.
                let line = String::from_utf8_lossy(&buf);
                let record = line.trim_end_matches(['\r', '\n']);
                if record.is_empty() {
                    continue;
                }
                ingest_line(record, &table, &filter, &stats);
            }
            Err(e) => {
                error!(error = %e, "failed to read input, ingest loop stopping");
                break;
            }
        }
    }
}

/// Parse and apply a single record. Factored out of the loop so tests can
/// drive it line by line.
fn ingest_line(record: &str, table: &FlowTable, filter: &SourceFilter, stats: &IngestStats) {
    match parse_record(record, filter) {
        Ok(sample) => {
            stats.records.fetch_add(1, Ordering::Relaxed);
            let median = table.record(sample.key.clone(), sample.rtt_ms);
            info!(flow = %sample.key, median_ms = median, "flow median updated");
        }
        Err(Reject::FieldCount(_)) => {
            // Partial or foreign line; not worth a log entry.
            stats.rejected.fetch_add(1, Ordering::Relaxed);
        }
        Err(Reject::FilteredSource(src)) => {
            stats.filtered.fetch_add(1, Ordering::Relaxed);
            debug!(source = %src, "dropped sample from excluded subnet");
        }
        Err(reject) => {
            stats.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(reason = %reject, line = record, "dropped malformed record");
        }
    }
}
