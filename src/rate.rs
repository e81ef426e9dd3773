//! Rolling byte-rate counter fed by wire events and rolled once per
//! bandwidth pulse (§4.4 "scored by current upload rate..."). Grounded on
//! the teacher's `Counter`/`ThroughputStats` (`bittorrent/src/stats.rs`): a
//! 5-round exponential moving average over accumulated byte counts.

/// Accumulates bytes for one direction (upload or download) of one peer.
/// `add` is called as bytes cross the wire; `reset` rolls the average
/// forward once per bandwidth pulse and zeroes the round counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct RateCounter {
    total: u64,
    round: u64,
    avg: f64,
    peak: f64,
}

impl RateCounter {
    pub fn add(&mut self, n: u64) {
        self.total += n;
        self.round += n;
    }

    pub fn reset(&mut self) {
        self.avg = (self.avg * (5 - 1) as f64 / 5.0) + (self.round as f64 / 5.0);
        self.round = 0;
        if self.avg > self.peak {
            self.peak = self.avg;
        }
    }

    pub fn avg(&self) -> u64 {
        self.avg as u64
    }

    pub fn peak(&self) -> u64 {
        self.peak as u64
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_decays_toward_zero_bytes_with_no_traffic() {
        let mut c = RateCounter::default();
        c.add(1000);
        c.reset();
        let after_one = c.avg();
        c.reset();
        assert!(c.avg() < after_one);
    }

    #[test]
    fn peak_tracks_the_highest_average_seen() {
        let mut c = RateCounter::default();
        c.add(5000);
        c.reset();
        let high = c.avg();
        c.reset();
        c.reset();
        assert_eq!(c.peak(), high);
    }

    #[test]
    fn total_accumulates_across_rounds() {
        let mut c = RateCounter::default();
        c.add(100);
        c.reset();
        c.add(50);
        assert_eq!(c.total(), 150);
    }
}
