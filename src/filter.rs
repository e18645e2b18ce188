//! Source-IP exclusion filter.
//!
//! pping observes every flow crossing the capture point, including traffic
//! that originates on the host itself (containers, loopback-adjacent
//! services). The filter drops samples whose source address lies inside a
//! configured subnet so only flows arriving from outside are aggregated.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use thiserror::Error;

/// Errors produced while building a [`SourceFilter`] from its CIDR argument.
///
/// All of these are fatal configuration errors: the exporter refuses to start
/// without a usable exclusion subnet.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The argument was not valid CIDR notation.
    #[error("invalid CIDR notation: {0:?}")]
    InvalidCidr(String),

    /// The subnet covers a single host (/32 for IPv4, /128 for IPv6).
    #[error("cannot use a single-host subnet: {0}")]
    SingleHost(IpNet),
}

/// Predicate that decides whether a sample's source IP should be ignored.
///
/// # Example
///
/// ```rust
/// use pping_exporter::SourceFilter;
///
/// let filter: SourceFilter = "100.200.3.0/24".parse().unwrap();
/// assert!(filter.excludes("100.200.3.38".parse().unwrap()));
/// assert!(!filter.excludes("10.0.0.254".parse().unwrap()));
/// ```
#[derive(Debug, Clone)]
pub struct SourceFilter {
    subnet: IpNet,
}

impl SourceFilter {
    /// Build a filter from a subnet in CIDR notation (e.g. `100.200.3.0/24`).
    ///
    /// Single-host subnets are rejected: a /32 almost always means the
    /// operator passed a host address instead of a network.
    pub fn from_cidr(cidr: &str) -> Result<Self, FilterError> {
        let subnet: IpNet = cidr
            .parse()
            .map_err(|_| FilterError::InvalidCidr(cidr.to_string()))?;

        if subnet.prefix_len() == subnet.max_prefix_len() {
            return Err(FilterError::SingleHost(subnet));
        }

        Ok(Self { subnet })
    }

    /// True if `addr` falls inside the exclusion subnet.
    ///
    /// An address of a different family than the subnet is never excluded.
    pub fn excludes(&self, addr: IpAddr) -> bool {
        self.subnet.contains(&addr)
    }

    /// The configured subnet.
    pub fn subnet(&self) -> IpNet {
        self.subnet
    }
}

impl FromStr for SourceFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cidr(s)
    }
}
