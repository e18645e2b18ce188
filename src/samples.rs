//! Bounded sample window with running median, one per flow.

use std::collections::VecDeque;
use std::time::Instant;

/// Number of recent RTT samples kept per flow.
///
/// The median is computed over this window only; older samples fall out and
/// never influence it again, so a flow whose latency shifts converges on the
/// new level within 20 round trips.
pub const WINDOW_SIZE: usize = 20;

/// Per-flow tracker: the most recent RTT samples and when they last changed.
///
/// Owned exclusively by the [`FlowTable`](crate::FlowTable); all concurrent
/// access goes through the table's lock.
///
/// # Example
///
/// ```rust
/// use pping_exporter::FlowSamples;
///
/// let mut samples = FlowSamples::new();
/// samples.append(1.0);
/// samples.append(3.0);
/// samples.append(2.0);
/// assert_eq!(samples.median(), 2.0);
///
/// samples.append(4.0);
/// assert_eq!(samples.median(), 2.5);
/// ```
#[derive(Debug, Clone)]
pub struct FlowSamples {
    samples: VecDeque<f64>,
    last_updated: Instant,
}

impl FlowSamples {
    /// Create an empty tracker. `last_updated` starts at creation time so a
    /// flow that never receives a sample still ages out.
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW_SIZE),
            last_updated: Instant::now(),
        }
    }

    /// Record one RTT sample in milliseconds, evicting the oldest sample
    /// once the window is full.
    pub fn append(&mut self, rtt_ms: f64) {
        if self.samples.len() == WINDOW_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);
        self.last_updated = Instant::now();
    }

    /// Median of the current window.
    ///
    /// An empty window has a defined median of `0.0`. For an even sample
    /// count the result is the mean of the two middle elements. The window
    /// holds at most [`WINDOW_SIZE`] values, so sorting a copy on every call
    /// is cheaper than maintaining an order-statistics structure.
    pub fn median(&self) -> f64 {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        if n == 0 {
            0.0
        } else if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        }
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if no samples have been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// When the last sample was appended.
    pub fn last_updated(&self) -> Instant {
        self.last_updated
    }
}

impl Default for FlowSamples {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_has_zero_median() {
        let samples = FlowSamples::new();
        assert!(samples.is_empty());
        assert_eq!(samples.median(), 0.0);
    }

    #[test]
    fn single_sample_is_its_own_median() {
        let mut samples = FlowSamples::new();
        samples.append(1.452);
        assert!(!samples.is_empty());
        assert_eq!(samples.median(), 1.452);
    }

    #[test]
    fn odd_count_takes_middle_element() {
        let mut samples = FlowSamples::new();
        for v in [1.0, 3.0, 2.0] {
            samples.append(v);
        }
        assert_eq!(samples.median(), 2.0);
    }

    #[test]
    fn even_count_averages_two_middle_elements() {
        let mut samples = FlowSamples::new();
        for v in [1.0, 3.0, 2.0, 4.0] {
            samples.append(v);
        }
        assert_eq!(samples.median(), 2.5);
    }

    #[test]
    fn median_matches_full_sort_for_any_prefix() {
        let values = [
            5.0, 1.0, 9.0, 2.0, 8.0, 3.0, 7.0, 4.0, 6.0, 0.5, 5.5, 1.5, 9.5, 2.5, 8.5, 3.5, 7.5,
            4.5, 6.5, 0.1,
        ];
        let mut samples = FlowSamples::new();

        for i in 0..values.len() {
            samples.append(values[i]);

            let mut sorted = values[..=i].to_vec();
            sorted.sort_by(f64::total_cmp);
            let n = sorted.len();
            let expected = if n % 2 == 0 {
                (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
            } else {
                sorted[n / 2]
            };

            assert_eq!(samples.median(), expected, "prefix length {}", i + 1);
        }
    }

    #[test]
    fn window_evicts_oldest_beyond_capacity() {
        let mut samples = FlowSamples::new();

        // Fill the window with large values, then push it out with 1.0s.
        for _ in 0..WINDOW_SIZE {
            samples.append(1000.0);
        }
        for _ in 0..WINDOW_SIZE {
            samples.append(1.0);
        }

        assert_eq!(samples.len(), WINDOW_SIZE);
        assert_eq!(samples.median(), 1.0);
    }

    #[test]
    fn length_never_exceeds_window_size() {
        let mut samples = FlowSamples::new();
        for i in 0..100 {
            samples.append(i as f64);
            assert!(samples.len() <= WINDOW_SIZE);
        }
        // Only the most recent 20 remain: 80..=99, median 89.5.
        assert_eq!(samples.median(), 89.5);
    }

    #[test]
    fn append_advances_last_updated() {
        let mut samples = FlowSamples::new();
        let before = samples.last_updated();
        std::thread::sleep(std::time::Duration::from_millis(5));
        samples.append(1.0);
        assert!(samples.last_updated() > before);
    }
}
