//! Differential Privacy port: Trait for noise mechanisms.
//!
//! This trait abstracts the noise source from the privacy guard so tests can
//! seed it and deployments can swap mechanisms.

/// Errors that can occur during differential privacy operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DpError {
    #[error("Invalid epsilon: {0}")]
    InvalidEpsilon(f64),

    #[error("Invalid sensitivity: {0}")]
    InvalidSensitivity(f64),

    #[error("DP RNG unavailable")]
    RngUnavailable,
}

/// Trait for differential privacy operations.
///
/// Each call releases one scalar. Implementations must not cap or compose a
/// privacy budget across calls; they may record what was spent.
pub trait DifferentialPrivacy: Send + Sync {
    /// Add Laplacian noise to a single value.
    ///
    /// # Arguments
    /// * `value` - The true value to protect
    /// * `sensitivity` - Maximum change from one person's data
    /// * `epsilon` - Privacy parameter for this release; `+inf` releases `value` unchanged
    ///
    /// # Errors
    /// `InvalidEpsilon` for NaN or non-positive epsilon, `InvalidSensitivity`
    /// for NaN, infinite or negative sensitivity.
    fn add_laplace_noise(&self, value: f64, sensitivity: f64, epsilon: f64) -> Result<f64, DpError>;

    /// Total epsilon released through this mechanism so far (simple sum).
    fn total_epsilon_spent(&self) -> f64;

    /// Number of scalars released through this mechanism so far.
    fn releases(&self) -> u64;
}
