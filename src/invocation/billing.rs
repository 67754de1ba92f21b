//! Billing computation.

use serde::{Deserialize, Serialize};

/// Rounds execution time up to a billing granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingPolicy {
    /// Billing step in milliseconds
    pub granularity_ms: u64,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            granularity_ms: 100,
        }
    }
}

impl BillingPolicy {
    /// Creates a policy with the given granularity.
    #[must_use]
    pub fn new(granularity_ms: u64) -> Self {
        Self { granularity_ms }
    }

    /// Returns `ceil(duration / granularity) * granularity`.
    ///
    /// A zero granularity bills the exact duration.
    #[must_use]
    pub fn billed_duration_ms(&self, duration_ms: u64) -> u64 {
        if self.granularity_ms == 0 {
            return duration_ms;
        }
        duration_ms
            .div_ceil(self.granularity_ms)
            .saturating_mul(self.granularity_ms)
    }

    /// Returns the GB-seconds consumed by `memory_mb` for `billed_ms`.
    #[must_use]
    pub fn gb_seconds(memory_mb: u32, billed_ms: u64) -> f64 {
        (f64::from(memory_mb) / 1024.0) * (billed_ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_granularity() {
        let policy = BillingPolicy::default();
        assert_eq!(policy.billed_duration_ms(1), 100);
        assert_eq!(policy.billed_duration_ms(100), 100);
        assert_eq!(policy.billed_duration_ms(101), 200);
        assert_eq!(policy.billed_duration_ms(0), 0);
    }

    #[test]
    fn billed_is_never_less_than_duration() {
        let policy = BillingPolicy::new(250);
        for duration in [0, 1, 249, 250, 251, 999, 1000, 299_999] {
            let billed = policy.billed_duration_ms(duration);
            assert!(billed >= duration);
            assert_eq!(billed % 250, 0);
        }
    }

    #[test]
    fn zero_granularity_bills_exactly() {
        assert_eq!(BillingPolicy::new(0).billed_duration_ms(123), 123);
    }

    #[test]
    fn gb_seconds() {
        let value = BillingPolicy::gb_seconds(512, 2000);
        assert!((value - 1.0).abs() < f64::EPSILON);
    }
}
