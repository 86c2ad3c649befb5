use serde::{Deserialize, Serialize};

/// Number of confidence bins.
const BINS: usize = 10;
/// Below this many events the estimate is not considered stable.
const STABILITY_FLOOR: usize = 30;

/// Expected-calibration-error tracker.
///
/// Accumulates (max_posterior, correct) events and computes 10-bin ECE as a
/// pure function of the event sequence. Emits diagnostics only; never feeds
/// back into posteriors.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EceTracker {
    events: Vec<(f64, bool)>,
}

/// Per-bin calibration summary.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BinStats {
    pub count: usize,
    pub mean_confidence: f64,
    pub accuracy: f64,
}

impl EceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, max_posterior: f64, correct: bool) {
        self.events.push((max_posterior.clamp(0.0, 1.0), correct));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_stable(&self) -> bool {
        self.events.len() >= STABILITY_FLOOR
    }

    pub fn bin_stats(&self) -> [BinStats; BINS] {
        let mut counts = [0usize; BINS];
        let mut conf_sums = [0.0; BINS];
        let mut hits = [0usize; BINS];
        for &(confidence, correct) in &self.events {
            let bin = ((confidence * BINS as f64) as usize).min(BINS - 1);
            counts[bin] += 1;
            conf_sums[bin] += confidence;
            if correct {
                hits[bin] += 1;
            }
        }
        let mut stats = [BinStats {
            count: 0,
            mean_confidence: 0.0,
            accuracy: 0.0,
        }; BINS];
        for bin in 0..BINS {
            if counts[bin] > 0 {
                stats[bin] = BinStats {
                    count: counts[bin],
                    mean_confidence: conf_sums[bin] / counts[bin] as f64,
                    accuracy: hits[bin] as f64 / counts[bin] as f64,
                };
            }
        }
        stats
    }

    /// 10-bin expected calibration error.
    pub fn ece(&self) -> f64 {
        if self.events.is_empty() {
            return 0.0;
        }
        let n = self.events.len() as f64;
        self.bin_stats()
            .iter()
            .map(|b| (b.count as f64 / n) * (b.mean_confidence - b.accuracy).abs())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfectly_calibrated_is_near_zero() {
        // 90% confidence, 9 of 10 correct.
        let mut tracker = EceTracker::new();
        for i in 0..100 {
            tracker.record(0.9, i % 10 != 0);
        }
        assert!(tracker.is_stable());
        assert!(tracker.ece() < 0.02, "ece={}", tracker.ece());
    }

    #[test]
    fn overconfidence_shows_up() {
        let mut tracker = EceTracker::new();
        for i in 0..100 {
            tracker.record(0.95, i % 2 == 0);
        }
        assert!((tracker.ece() - 0.45).abs() < 0.01);
    }

    #[test]
    fn unstable_below_thirty_events() {
        let mut tracker = EceTracker::new();
        for _ in 0..29 {
            tracker.record(0.5, true);
        }
        assert!(!tracker.is_stable());
        tracker.record(0.5, true);
        assert!(tracker.is_stable());
    }

    #[test]
    fn tracking_is_pure_over_events() {
        let mut a = EceTracker::new();
        let mut b = EceTracker::new();
        for i in 0..50 {
            a.record(0.6 + (i % 4) as f64 * 0.1, i % 3 == 0);
            b.record(0.6 + (i % 4) as f64 * 0.1, i % 3 == 0);
        }
        assert_eq!(a.ece(), b.ece());
    }
}
