//! Probabilistic forced disconnects.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::MasterConfig;

/// Decides once per cycle whether to tear down every connection and how long
/// to stay away afterwards
#[derive(Debug)]
pub struct FaultInjector {
    probability: f64,
    min_delay: Duration,
    max_delay: Duration,
    rng: StdRng,
}

impl FaultInjector {
    /// Create an injector with an explicit probability and delay range
    #[must_use]
    pub fn new(probability: f64, delay: (Duration, Duration), seed: Option<u64>) -> Self {
        let (min_delay, max_delay) = if delay.0 <= delay.1 {
            delay
        } else {
            (delay.1, delay.0)
        };
        Self {
            probability: probability.clamp(0.0, 1.0),
            min_delay,
            max_delay,
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        }
    }

    /// Injector for a master profile
    #[must_use]
    pub fn for_master(master: &MasterConfig, seed: Option<u64>) -> Self {
        Self::new(master.disconnect_prob, master.reconnect_delay.bounds(), seed)
    }

    /// Injector that never fires
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0.0, (Duration::ZERO, Duration::ZERO), Some(0))
    }

    /// Per-cycle disconnect probability
    #[must_use]
    pub const fn probability(&self) -> f64 {
        self.probability
    }

    /// Whether the injector can ever fire
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.probability > 0.0
    }

    /// Draw for this cycle. Returns the reconnect delay when a disconnect
    /// should be injected.
    pub fn draw(&mut self) -> Option<Duration> {
        if !self.is_enabled() {
            return None;
        }
        if self.rng.gen_range(0.0..1.0) < self.probability {
            Some(self.reconnect_delay())
        } else {
            None
        }
    }

    /// Uniform delay from the configured range
    pub fn reconnect_delay(&mut self) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }
        self.rng.gen_range(self.min_delay..=self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelayRange;

    #[test]
    fn test_zero_probability_never_fires() {
        let mut injector = FaultInjector::new(0.0, (Duration::ZERO, Duration::ZERO), Some(1));
        assert!((0..10_000).all(|_| injector.draw().is_none()));
    }

    #[test]
    fn test_probability_one_always_fires() {
        let mut injector = FaultInjector::new(
            1.0,
            (Duration::from_millis(5), Duration::from_millis(5)),
            Some(1),
        );
        for _ in 0..1_000 {
            assert_eq!(injector.draw(), Some(Duration::from_millis(5)));
        }
    }

    #[test]
    fn test_delay_stays_in_range() {
        let master = MasterConfig {
            disconnect_prob: 1.0,
            reconnect_delay: DelayRange::secs(60.0, 300.0),
            ..MasterConfig::steady("m")
        };
        let mut injector = FaultInjector::for_master(&master, Some(3));
        for _ in 0..1_000 {
            let delay = injector.reconnect_delay();
            assert!(delay >= Duration::from_secs(60));
            assert!(delay <= Duration::from_secs(300));
        }
    }

    #[test]
    fn test_rate_roughly_matches_probability() {
        let mut injector = FaultInjector::new(0.1, (Duration::ZERO, Duration::ZERO), Some(11));
        let fired = (0..100_000).filter(|_| injector.draw().is_some()).count();
        assert!((9_000..11_000).contains(&fired), "fired {fired} times");
    }
}
