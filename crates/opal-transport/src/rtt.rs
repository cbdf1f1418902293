use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

// Jacobson/Karels smoothing factors.
const RTT_ALPHA: f64 = 0.125;
const RTT_BETA: f64 = 0.25;

const INITIAL_SRTT_MICROS: f64 = 20_000.0;
const INITIAL_RTO_MICROS: u64 = 30_000;

// An RTO past this is considered runaway and replaced with a pseudorandom
// value below RTO_FALLBACK_BOUND_MICROS.
const RTO_CEILING_MICROS: u64 = 1_000_000;
const RTO_FALLBACK_BOUND_MICROS: u64 = 30_000;

/// Exponentially-weighted RTT estimator driving the retransmission timeout.
/// The deviation term is fed the already-updated smoothed RTT, matching the
/// published estimator this protocol derives from.
#[derive(Debug)]
pub struct RttEstimator {
    srtt: f64,
    rttvar: f64,
    rto: u64,
    rng: StdRng,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            srtt: INITIAL_SRTT_MICROS,
            rttvar: 0.0,
            rto: INITIAL_RTO_MICROS,
            rng,
        }
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        Duration::from_micros(self.rto)
    }

    pub fn srtt_micros(&self) -> f64 {
        self.srtt
    }

    /// Folds one round-trip sample (in microseconds) into the estimate.
    pub fn record_sample(&mut self, sample_micros: u64) {
        let sample = sample_micros as f64;
        self.srtt += RTT_ALPHA * (sample - self.srtt);
        self.rttvar = (1.0 - RTT_BETA) * self.rttvar + RTT_BETA * (self.srtt - sample).abs();
        self.rto = (self.srtt + 4.0 * self.rttvar) as u64;

        if self.rto > RTO_CEILING_MICROS {
            self.rto = self.rng.random_range(0..RTO_FALLBACK_BOUND_MICROS);
        }
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_published_initials() {
        let estimator = RttEstimator::seeded(1);
        assert_eq!(estimator.srtt_micros(), 20_000.0);
        assert_eq!(estimator.rto(), Duration::from_micros(30_000));
    }

    #[test]
    fn steady_samples_converge_the_timeout() {
        let mut estimator = RttEstimator::seeded(1);
        estimator.record_sample(20_000);
        // Sample equal to srtt leaves both terms unchanged.
        assert_eq!(estimator.srtt_micros(), 20_000.0);
        assert_eq!(estimator.rto(), Duration::from_micros(20_000));
    }

    #[test]
    fn smoothing_follows_the_ewma_recurrence() {
        let mut estimator = RttEstimator::seeded(1);
        estimator.record_sample(10_000);
        // srtt = 20000 + 0.125 * (10000 - 20000) = 18750
        // rttvar = 0.25 * |18750 - 10000| = 2187.5
        // rto = 18750 + 4 * 2187.5 = 27500
        assert_eq!(estimator.srtt_micros(), 18_750.0);
        assert_eq!(estimator.rto(), Duration::from_micros(27_500));
    }

    #[test]
    fn runaway_timeout_is_reset_below_the_fallback_bound() {
        let mut estimator = RttEstimator::seeded(1);
        estimator.record_sample(10_000_000);
        assert!(estimator.rto() < Duration::from_micros(RTO_FALLBACK_BOUND_MICROS));
    }
}
