//! Background sweeper that evicts idle flows.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::table::FlowTable;

/// How long a flow may go without a new sample before it is evicted and its
/// gauge series disappears from the scrape output.
pub const FLOW_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Interval between expiry sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically sweep the flow table, removing flows idle beyond
/// `idle_timeout`.
///
/// Each sweep works on a snapshot of the table (see
/// [`FlowTable::sweep_expired`]), so a flow updated mid-sweep is spared. The
/// timing race the other way (a flow reaped just as a new sample arrives) is
/// acceptable: the next sample simply re-creates it with a fresh window.
///
/// Runs until the process is terminated.
pub async fn run_sweeper(table: Arc<FlowTable>, idle_timeout: Duration) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        interval.tick().await;
        for key in table.sweep_expired(idle_timeout) {
            info!(flow = %key, "removing expired flow");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::FlowKey;

    fn key(port: &str) -> FlowKey {
        FlowKey {
            src_ip: "10.0.0.1".to_string(),
            dst_ip: "1.1.1.1".to_string(),
            dst_port: port.to_string(),
        }
    }

    #[tokio::test]
    async fn sweeper_evicts_idle_flows_on_its_interval() {
        let table = Arc::new(FlowTable::new());
        table.record(key("53"), 1.0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let sweeper = tokio::spawn(run_sweeper(table.clone(), Duration::from_millis(10)));

        // First tick fires immediately; give it a moment to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();

        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn sweeper_leaves_active_flows_alone() {
        let table = Arc::new(FlowTable::new());
        table.record(key("53"), 1.0);

        let sweeper = tokio::spawn(run_sweeper(table.clone(), FLOW_IDLE_TIMEOUT));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();

        assert_eq!(table.len(), 1);
    }
}
