//! Nack -> invisibility-duration backoff policy (spec §4.9).
//!
//! `min(max, initial × multiplier^n)` where `n` is the message's current
//! reconsume count. Kept as a standalone, stateless policy object — it is
//! not a reimplementation of [`crate::resilience::retry`]'s
//! client-request retry executor, which governs the proxy's own outbound
//! calls rather than a broker-visible message redelivery schedule.

use std::time::Duration;

/// Tunables for the nack backoff ladder; defaults match spec §4.9.
#[derive(Debug, Clone, Copy)]
pub struct NackBackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for NackBackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(2 * 3600),
            multiplier: 2.0,
        }
    }
}

impl NackBackoffConfig {
    /// The invisibility duration to apply for a message at its `n`th
    /// reconsume attempt (0-indexed: the first nack passes `n = 0`).
    pub fn invisible_duration(&self, reconsume_times: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(reconsume_times as i32);
        Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_geometrically_until_capped() {
        let cfg = NackBackoffConfig::default();
        assert_eq!(cfg.invisible_duration(0), Duration::from_secs(5));
        assert_eq!(cfg.invisible_duration(1), Duration::from_secs(10));
        assert_eq!(cfg.invisible_duration(2), Duration::from_secs(20));
    }

    #[test]
    fn caps_at_max() {
        let cfg = NackBackoffConfig::default();
        assert_eq!(cfg.invisible_duration(20), cfg.max);
    }
}
