//! Parsing of pping machine-readable output lines.
//!
//! Each line pping emits in `-m` mode has exactly seven whitespace-separated
//! fields:
//!
//! ```text
//! <timestamp> <rtt_s> <min_rtt_s> <fbytes> <dbytes> <pbytes> <src:port+dst:port>
//! ```
//!
//! e.g. `1567578632.260233 0.001452 0.001452 74 0 66 10.0.0.254:40622+100.200.3.38:9000`.
//!
//! Parsing is pure: a line either becomes a validated [`FlowSample`] or a
//! [`Reject`] naming why it was dropped. Nothing in here touches the flow
//! table, and no input can make it panic.

use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

use crate::filter::SourceFilter;

/// Number of whitespace-separated fields in a complete record.
const FIELD_COUNT: usize = 7;

/// Identity of a flow: source IP, destination IP and destination port.
///
/// Two records with the same triple belong to the same flow. The source port
/// is deliberately not part of the identity, so reconnects from ephemeral
/// ports keep feeding the same median window.
///
/// The `Ord` impl gives the flow table (and therefore the scrape output) a
/// stable iteration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowKey {
    pub src_ip: String,
    pub dst_ip: String,
    pub dst_port: String,
}

impl fmt::Display for FlowKey {
    /// Canonical `srcIP+dstIP:dstPort` form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}:{}", self.src_ip, self.dst_ip, self.dst_port)
    }
}

/// One parsed measurement, consumed immediately by the flow table.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSample {
    /// Capture time in seconds since the epoch, as reported by pping.
    pub timestamp: f64,
    /// Round-trip time in milliseconds.
    pub rtt_ms: f64,
    /// Shortest RTT seen so far for this flow, in milliseconds.
    /// Informational only; not used in aggregation.
    pub min_rtt_ms: f64,
    pub key: FlowKey,
}

/// Why a line was dropped instead of producing a [`FlowSample`].
///
/// Silent variants (see [`Reject::is_silent`]) are expected operational
/// noise; the rest indicate a garbled record worth logging.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Reject {
    /// Wrong field count: a partial or foreign line, not an error.
    #[error("expected 7 fields, found {0}")]
    FieldCount(usize),

    /// Timestamp field did not parse as a number.
    #[error("unparsable timestamp {0:?}")]
    BadTimestamp(String),

    /// RTT field did not parse as a non-negative finite number.
    #[error("unparsable RTT {0:?}")]
    BadRtt(String),

    /// Minimum-RTT field did not parse as a non-negative finite number.
    #[error("unparsable min RTT {0:?}")]
    BadMinRtt(String),

    /// Flow field has no `+` between source and destination.
    #[error("flow field {0:?} missing '+' separator")]
    MissingFlowSeparator(String),

    /// A flow endpoint has no `:` between IP and port.
    #[error("flow endpoint {0:?} missing ':' separator")]
    MissingPortSeparator(String),

    /// Source half of the flow field is not an IP address.
    #[error("unparsable source address {0:?}")]
    BadSourceAddr(String),

    /// Source IP lies inside the configured exclusion subnet.
    #[error("source {0} is inside the excluded subnet")]
    FilteredSource(IpAddr),

    /// Destination port is empty (e.g. the destination was `127.0.0.1:`).
    #[error("empty destination port")]
    EmptyDestPort,
}

impl Reject {
    /// True for rejections that are routine and should not be logged as
    /// content errors: shape mismatches and filtered sources.
    pub fn is_silent(&self) -> bool {
        matches!(self, Reject::FieldCount(_) | Reject::FilteredSource(_))
    }
}

/// Parse one raw input line into a [`FlowSample`].
///
/// Applies the source filter as part of validation, so a sample is only
/// produced for flows the exporter actually tracks.
///
/// # Example
///
/// ```rust
/// use pping_exporter::{parse_record, SourceFilter};
///
/// let filter: SourceFilter = "100.200.3.0/24".parse().unwrap();
/// let line = "1567578632.260233 0.001452 0.001452 74 0 66 10.0.0.254:40622+100.200.3.38:9000";
/// let sample = parse_record(line, &filter).unwrap();
/// assert_eq!(sample.key.to_string(), "10.0.0.254+100.200.3.38:9000");
/// assert_eq!(sample.rtt_ms, 1.452);
/// ```
pub fn parse_record(line: &str, filter: &SourceFilter) -> Result<FlowSample, Reject> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != FIELD_COUNT {
        return Err(Reject::FieldCount(fields.len()));
    }

    let timestamp: f64 = fields[0]
        .parse()
        .map_err(|_| Reject::BadTimestamp(fields[0].to_string()))?;
    let rtt_ms = parse_rtt_ms(fields[1]).ok_or_else(|| Reject::BadRtt(fields[1].to_string()))?;
    let min_rtt_ms =
        parse_rtt_ms(fields[2]).ok_or_else(|| Reject::BadMinRtt(fields[2].to_string()))?;

    let flow = fields[6];
    let (src, dst) = flow
        .split_once('+')
        .ok_or_else(|| Reject::MissingFlowSeparator(flow.to_string()))?;
    let (src_ip, _src_port) = src
        .split_once(':')
        .ok_or_else(|| Reject::MissingPortSeparator(src.to_string()))?;
    let (dst_ip, dst_port) = dst
        .split_once(':')
        .ok_or_else(|| Reject::MissingPortSeparator(dst.to_string()))?;

    let src_addr: IpAddr = src_ip
        .parse()
        .map_err(|_| Reject::BadSourceAddr(src_ip.to_string()))?;
    if filter.excludes(src_addr) {
        return Err(Reject::FilteredSource(src_addr));
    }

    if dst_port.is_empty() {
        return Err(Reject::EmptyDestPort);
    }

    Ok(FlowSample {
        timestamp,
        rtt_ms,
        min_rtt_ms,
        key: FlowKey {
            src_ip: src_ip.to_string(),
            dst_ip: dst_ip.to_string(),
            dst_port: dst_port.to_string(),
        },
    })
}

/// Parse an RTT field given in seconds into milliseconds.
///
/// Returns `None` for anything that is not a finite, non-negative number.
fn parse_rtt_ms(field: &str) -> Option<f64> {
    let seconds: f64 = field.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(seconds * 1000.0)
}
