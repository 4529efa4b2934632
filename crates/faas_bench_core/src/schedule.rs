//! Burst departure scheduling.
//!
//! Every burst is preceded by one delta. Deterministic runs repeat the
//! configured inter-arrival time; stochastic runs draw each delta from an
//! exponential distribution with the configured mean, which turns burst
//! departures into a Poisson process. Deltas are produced up front for the
//! whole run and never depend on when requests complete.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};

use crate::experiment::{IatType, SubExperimentConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstSchedule {
    deltas: Vec<Duration>,
}

impl BurstSchedule {
    pub fn for_sub_experiment(config: &SubExperimentConfig, seed: u64) -> Self {
        Self::generate(config.iat_type, config.iat_seconds, config.bursts, seed)
    }

    /// `seed` only feeds this schedule's generator; no other randomness in
    /// the process shares it.
    pub fn generate(iat_type: IatType, iat_seconds: f64, bursts: usize, seed: u64) -> Self {
        let mean = if iat_seconds.is_finite() {
            iat_seconds.max(0.0)
        } else {
            0.0
        };

        let deltas = match iat_type {
            IatType::Deterministic => vec![seconds(mean); bursts],
            IatType::Stochastic => sample_exponential(mean, bursts, seed),
        };

        Self { deltas }
    }

    /// Delay applied before each burst, indexed by burst id.
    pub fn deltas(&self) -> &[Duration] {
        &self.deltas
    }

    /// Departure time of each burst relative to the start of the run.
    pub fn departure_offsets(&self) -> Vec<Duration> {
        self.deltas
            .iter()
            .scan(Duration::ZERO, |elapsed, delta| {
                *elapsed = elapsed.saturating_add(*delta);
                Some(*elapsed)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// Saturates instead of panicking on values `Duration` cannot hold.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

fn sample_exponential(mean_seconds: f64, bursts: usize, seed: u64) -> Vec<Duration> {
    if mean_seconds <= 0.0 {
        return vec![Duration::ZERO; bursts];
    }

    let Ok(distribution) = Exp::new(1.0 / mean_seconds) else {
        return vec![seconds(mean_seconds); bursts];
    };

    let mut rng = StdRng::seed_from_u64(seed);
    (0..bursts)
        .map(|_| seconds(distribution.sample(&mut rng)))
        .collect()
}
