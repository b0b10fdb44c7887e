//! Privacy configuration shared by every site.
//!
//! Defaults can be overridden from the environment:
//! - `FEDSCORE_MIN_SAMPLE_SIZE` (positive integer)
//! - `FEDSCORE_DP_EPSILON` (positive number; `inf` turns noise off)
//! - `FEDSCORE_DP_SENSITIVITY` (finite, non-negative number)

use crate::{FedScoreError, Result};

/// Cells with fewer observations are suppressed.
pub const DEFAULT_MIN_SAMPLE_SIZE: u64 = 10;

/// Epsilon used for every released scalar.
pub const DEFAULT_EPSILON: f64 = 1.0;

/// Sensitivity assumed for means and sums of squared deviations.
pub const DEFAULT_SENSITIVITY: f64 = 1.0;

const MIN_SAMPLE_SIZE_ENV: &str = "FEDSCORE_MIN_SAMPLE_SIZE";
const EPSILON_ENV: &str = "FEDSCORE_DP_EPSILON";
const SENSITIVITY_ENV: &str = "FEDSCORE_DP_SENSITIVITY";

/// Configuration of the privacy guard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrivacyConfig {
    /// Minimum number of observations a cell needs to be released
    pub min_sample_size: u64,

    /// Laplace epsilon per released scalar. Not composed across releases.
    pub epsilon: f64,

    /// Sensitivity for means and sums; counts always use 1
    pub sensitivity: f64,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
            epsilon: DEFAULT_EPSILON,
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }
}

impl PrivacyConfig {
    /// Configuration that suppresses small cells but adds no noise.
    #[must_use]
    pub fn without_noise(min_sample_size: u64) -> Self {
        Self {
            min_sample_size,
            epsilon: f64::INFINITY,
            ..Self::default()
        }
    }

    /// Whether released values are perturbed at all.
    #[must_use]
    pub fn noise_enabled(&self) -> bool {
        self.epsilon.is_finite() && self.sensitivity > 0.0
    }

    /// Reject configurations that would release unprotected or garbage values.
    ///
    /// # Errors
    /// Returns `Configuration` for a zero threshold, a NaN or non-positive
    /// epsilon, or a NaN, infinite or negative sensitivity.
    pub fn validate(&self) -> Result<()> {
        if self.min_sample_size == 0 {
            return Err(FedScoreError::Configuration(
                "minimum sample size must be positive".to_string(),
            ));
        }
        check_epsilon(self.epsilon)?;
        check_sensitivity(self.sensitivity)?;
        Ok(())
    }

    /// Load defaults with environment overrides.
    ///
    /// # Errors
    /// Returns `Configuration` if an override is unparseable or invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = lookup(MIN_SAMPLE_SIZE_ENV) {
            cfg.min_sample_size = v.trim().parse::<u64>().map_err(|_| {
                FedScoreError::Configuration(format!(
                    "{MIN_SAMPLE_SIZE_ENV}={v} is not a positive integer"
                ))
            })?;
        }

        if let Some(v) = lookup(EPSILON_ENV) {
            cfg.epsilon = v.trim().parse::<f64>().map_err(|_| {
                FedScoreError::Configuration(format!("{EPSILON_ENV}={v} is not a number"))
            })?;
        }

        if let Some(v) = lookup(SENSITIVITY_ENV) {
            cfg.sensitivity = v.trim().parse::<f64>().map_err(|_| {
                FedScoreError::Configuration(format!("{SENSITIVITY_ENV}={v} is not a number"))
            })?;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

pub(crate) fn check_epsilon(epsilon: f64) -> Result<()> {
    if epsilon.is_nan() || epsilon <= 0.0 {
        return Err(FedScoreError::Configuration(format!(
            "epsilon must be positive, got {epsilon}"
        )));
    }
    Ok(())
}

pub(crate) fn check_sensitivity(sensitivity: f64) -> Result<()> {
    if !sensitivity.is_finite() || sensitivity < 0.0 {
        return Err(FedScoreError::Configuration(format!(
            "sensitivity must be finite and non-negative, got {sensitivity}"
        )));
    }
    Ok(())
}
