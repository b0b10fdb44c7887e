//! Privacy guard: sample size suppression and Laplace noise.
//!
//! Every record leaving a site goes through `protect` (round one) or
//! `release_deviation` (round two). Suppression always looks at true counts;
//! noise is only added to what survives suppression.

use std::sync::Arc;

use crate::config::{check_epsilon, check_sensitivity, PrivacyConfig};
use crate::domain::{
    CategoricalSummary, DeviationCell, Guarded, LocalStatisticsRecord, NumericSummary, VariableMap,
};
use crate::ports::{DifferentialPrivacy, DpError};
use crate::{FedScoreError, Result};

/// Counts change by at most one when one person is added or removed.
const COUNT_SENSITIVITY: f64 = 1.0;

/// Replace every cell with fewer than `threshold` observations by `Suppressed`.
///
/// Returns a transformed copy; the input is left untouched.
///
/// # Errors
/// Returns `Configuration` if `threshold` is zero.
pub fn enforce_minimum_sample_size(
    record: &LocalStatisticsRecord,
    threshold: u64,
) -> Result<LocalStatisticsRecord> {
    if threshold == 0 {
        return Err(FedScoreError::Configuration(
            "minimum sample size must be positive".to_string(),
        ));
    }

    let numeric = suppress_cells(&record.numeric, threshold, |s| s.count);
    let categorical = suppress_cells(&record.categorical, threshold, |s| s.count);

    Ok(LocalStatisticsRecord {
        site: record.site.clone(),
        numeric,
        categorical,
    })
}

fn suppress_cells<T: Clone>(
    cells: &VariableMap<Guarded<T>>,
    threshold: u64,
    count: impl Fn(&T) -> u64,
) -> VariableMap<Guarded<T>> {
    cells
        .iter()
        .map(|(variable, strata)| {
            let strata = strata
                .iter()
                .map(|(stratum, cell)| {
                    let guarded = match cell {
                        Guarded::Released(summary) if count(summary) >= threshold => {
                            Guarded::Released(summary.clone())
                        }
                        _ => Guarded::Suppressed,
                    };
                    (stratum.clone(), guarded)
                })
                .collect();
            (variable.clone(), strata)
        })
        .collect()
}

fn map_released<T>(
    cells: &VariableMap<Guarded<T>>,
    mut f: impl FnMut(&T) -> Result<T>,
) -> Result<VariableMap<Guarded<T>>> {
    let mut out = VariableMap::new();
    for (variable, strata) in cells {
        let target = out.entry(variable.clone()).or_insert_with(Default::default);
        for (stratum, cell) in strata {
            let guarded = match cell {
                Guarded::Released(summary) => Guarded::Released(f(summary)?),
                Guarded::Suppressed => Guarded::Suppressed,
            };
            target.insert(stratum.clone(), guarded);
        }
    }
    Ok(out)
}

/// Applies the configured suppression threshold and noise to outgoing records.
pub struct PrivacyGuard<D: DifferentialPrivacy> {
    config: PrivacyConfig,
    dp: Arc<D>,
}

impl<D: DifferentialPrivacy> PrivacyGuard<D> {
    /// Create a guard.
    ///
    /// # Errors
    /// Returns `Configuration` if the configuration is invalid.
    pub fn new(config: PrivacyConfig, dp: Arc<D>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, dp })
    }

    #[must_use]
    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    #[must_use]
    pub fn mechanism(&self) -> &D {
        &self.dp
    }

    /// Add Laplace noise of scale `sensitivity / epsilon` to one value.
    ///
    /// # Errors
    /// Returns `Configuration` for a NaN or non-positive epsilon or an invalid
    /// sensitivity, `Privacy` if the noise source fails.
    pub fn apply_noise(&self, value: f64, epsilon: f64, sensitivity: f64) -> Result<f64> {
        check_epsilon(epsilon)?;
        check_sensitivity(sensitivity)?;
        self.dp
            .add_laplace_noise(value, sensitivity, epsilon)
            .map_err(|e| match e {
                DpError::InvalidEpsilon(_) | DpError::InvalidSensitivity(_) => {
                    FedScoreError::Configuration(e.to_string())
                }
                DpError::RngUnavailable => FedScoreError::Privacy(e),
            })
    }

    fn noisy_value(&self, value: f64) -> Result<f64> {
        self.apply_noise(value, self.config.epsilon, self.config.sensitivity)
    }

    fn noisy_count(&self, count: u64) -> Result<u64> {
        let noisy = self.apply_noise(count as f64, self.config.epsilon, COUNT_SENSITIVITY)?;
        Ok(noisy.round().max(0.0) as u64)
    }

    fn noisy_numeric(&self, summary: &NumericSummary) -> Result<NumericSummary> {
        Ok(NumericSummary {
            count: self.noisy_count(summary.count)?,
            mean: self.noisy_value(summary.mean)?,
            sum_sq_dev: self.noisy_value(summary.sum_sq_dev)?.max(0.0),
        })
    }

    fn noisy_categorical(&self, summary: &CategoricalSummary) -> Result<CategoricalSummary> {
        let mut noisy = CategoricalSummary::default();
        for (category, count) in &summary.categories {
            let c = self.noisy_count(*count)?;
            noisy.categories.insert(category.clone(), c);
            noisy.count += c;
        }
        Ok(noisy)
    }

    /// Add independent noise to every released scalar of a record.
    ///
    /// # Errors
    /// Propagates `apply_noise` errors.
    pub fn add_noise(&self, record: &LocalStatisticsRecord) -> Result<LocalStatisticsRecord> {
        Ok(LocalStatisticsRecord {
            site: record.site.clone(),
            numeric: map_released(&record.numeric, |s| self.noisy_numeric(s))?,
            categorical: map_released(&record.categorical, |s| self.noisy_categorical(s))?,
        })
    }

    /// Suppress small cells, then add noise to the rest.
    ///
    /// # Errors
    /// Propagates suppression and noise errors.
    pub fn protect(&self, record: &LocalStatisticsRecord) -> Result<LocalStatisticsRecord> {
        let suppressed = enforce_minimum_sample_size(record, self.config.min_sample_size)?;
        let protected = self.add_noise(&suppressed)?;

        tracing::debug!(
            "Protected record: {} suppressed cell(s)",
            count_suppressed(&protected)
        );
        Ok(protected)
    }

    /// Release one round-two cell from its true count and sum of squared deviations.
    ///
    /// # Errors
    /// Propagates noise errors.
    pub fn release_deviation(&self, count: u64, sum_sq_dev: f64) -> Result<DeviationCell> {
        if count < self.config.min_sample_size {
            return Ok(DeviationCell::Suppressed);
        }
        Ok(DeviationCell::Released {
            sum_sq_dev: self.noisy_value(sum_sq_dev)?.max(0.0),
        })
    }
}

fn count_suppressed(record: &LocalStatisticsRecord) -> usize {
    let numeric = record
        .numeric
        .values()
        .flat_map(|s| s.values())
        .filter(|c| c.is_suppressed())
        .count();
    let categorical = record
        .categorical
        .values()
        .flat_map(|s| s.values())
        .filter(|c| c.is_suppressed())
        .count();
    numeric + categorical
}
