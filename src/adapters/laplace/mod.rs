//! Laplace adapter: Implementation of DifferentialPrivacy.
//!
//! Samples Laplace noise from a ChaCha20 CSPRNG.
//!
//! # Mutex Behavior
//!
//! This adapter uses `Mutex` for thread-safe RNG access. A poisoned mutex
//! (from a panic in another thread) fails closed by returning an error, and
//! no value is released.
//!
//! # Budget
//!
//! Epsilon is applied per released scalar and never capped. The adapter keeps
//! a running sum so sites can log how much was released, but it does not
//! refuse queries: composing budgets across scalars and rounds is left open.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::ports::{DifferentialPrivacy, DpError};

/// Scale factor for fixed-point epsilon arithmetic.
/// Epsilon is stored as (epsilon * EPSILON_SCALE) to avoid IEEE 754 drift when summing.
const EPSILON_SCALE: f64 = 1_000_000_000.0;

/// Laplace mechanism backed by a CSPRNG.
pub struct LaplaceMechanism {
    /// Total finite epsilon released, scaled by EPSILON_SCALE
    epsilon_spent_scaled: AtomicU64,

    releases: AtomicU64,

    rng: Mutex<ChaCha20Rng>,
}

impl LaplaceMechanism {
    /// Create a mechanism seeded from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(ChaCha20Rng::from_entropy())
    }

    /// Create a mechanism with a fixed seed (reproducible noise for tests and audits).
    #[must_use]
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self::with_rng(ChaCha20Rng::from_seed(seed))
    }

    fn with_rng(rng: ChaCha20Rng) -> Self {
        Self {
            epsilon_spent_scaled: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            rng: Mutex::new(rng),
        }
    }

    /// Sample from Laplace(0, scale) via inverse CDF.
    fn sample_laplace(&self, scale: f64) -> Result<f64, DpError> {
        let mut rng = self.rng.lock().map_err(|_| DpError::RngUnavailable)?;

        // u01 == 0 would put u at exactly -0.5 and ln(0) = -inf.
        let mut u01: f64 = rng.gen(); // [0, 1)
        while u01 == 0.0 {
            u01 = rng.gen();
        }
        let u: f64 = u01 - 0.5; // (-0.5, 0.5)

        let inner: f64 = 1.0 - 2.0 * u.abs();
        Ok(-scale * u.signum() * inner.ln())
    }

    fn record_release(&self, epsilon: f64) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if epsilon.is_finite() {
            let delta = (epsilon * EPSILON_SCALE).round().max(0.0) as u64;
            self.epsilon_spent_scaled.fetch_add(delta, Ordering::SeqCst);
        }
    }
}

impl Default for LaplaceMechanism {
    fn default() -> Self {
        Self::new()
    }
}

impl DifferentialPrivacy for LaplaceMechanism {
    fn add_laplace_noise(
        &self,
        value: f64,
        sensitivity: f64,
        epsilon: f64,
    ) -> Result<f64, DpError> {
        if epsilon.is_nan() || epsilon <= 0.0 {
            tracing::error!("Invalid epsilon: {epsilon}. Refusing to release statistic.");
            return Err(DpError::InvalidEpsilon(epsilon));
        }

        if !sensitivity.is_finite() || sensitivity < 0.0 {
            tracing::error!("Invalid sensitivity: {sensitivity}. Refusing to release statistic.");
            return Err(DpError::InvalidSensitivity(sensitivity));
        }

        self.record_release(epsilon);

        let scale = sensitivity / epsilon;
        if scale == 0.0 {
            return Ok(value);
        }
        Ok(value + self.sample_laplace(scale)?)
    }

    fn total_epsilon_spent(&self) -> f64 {
        self.epsilon_spent_scaled.load(Ordering::SeqCst) as f64 / EPSILON_SCALE
    }

    fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }
}
