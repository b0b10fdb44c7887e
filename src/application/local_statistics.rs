//! Local statistics engine.
//!
//! Runs at a site over its scored partition. Round one summarises every
//! measured variable per stratum; round two sums squared deviations from the
//! global means the coordinator broadcast. Both results go through the
//! privacy guard before they are returned.

use crate::domain::{
    AdjustedDeviationRecord, CategoricalSummary, Datatype, DeviationCell, GlobalMeans, Guarded,
    LocalStatisticsRecord, Row, SiteId, SitePartition, StratificationSpec, VariableDescriptor,
    Welford,
};
use crate::ports::DifferentialPrivacy;
use crate::{FedScoreError, Result};

use super::PrivacyGuard;

/// Measured variables the site actually holds.
///
/// A variable without a column is left out: the coordinator sees it as absent
/// at this site, not as suppressed.
fn measured_variables<'a>(
    partition: &SitePartition,
    descriptors: &'a [VariableDescriptor],
) -> Result<Vec<&'a VariableDescriptor>> {
    let mut measured = Vec::new();
    for descriptor in descriptors.iter().filter(|d| d.is_measured()) {
        if descriptor.datatype == Datatype::Datetime {
            return Err(FedScoreError::UserInput(format!(
                "datetime variable '{}' can only be used as a stratifier",
                descriptor.name
            )));
        }
        if partition.has_column(&descriptor.name) {
            measured.push(descriptor);
        } else {
            tracing::debug!("Variable '{}' not present at this site", descriptor.name);
        }
    }
    Ok(measured)
}

fn numbers<'a>(rows: &'a [&'a Row], variable: &'a str) -> impl Iterator<Item = f64> + 'a {
    rows.iter()
        .filter_map(move |row| row.get(variable).and_then(|v| v.as_number()))
}

/// Round-one summary before any privacy protection.
///
/// # Errors
/// Returns `UserInput` if a datetime variable is marked as measured.
pub fn summarize_partition(
    site: &SiteId,
    partition: &SitePartition,
    descriptors: &[VariableDescriptor],
    stratification: &StratificationSpec,
) -> Result<LocalStatisticsRecord> {
    let measured = measured_variables(partition, descriptors)?;
    let strata = stratification.strata(partition);
    let mut record = LocalStatisticsRecord::new(site.clone());

    for descriptor in measured {
        let name = descriptor.name.as_str();
        for stratum in &strata {
            match descriptor.datatype {
                Datatype::Numeric => {
                    let mut acc = Welford::new();
                    acc.extend(numbers(&stratum.rows, name));
                    record
                        .numeric
                        .entry(name.to_string())
                        .or_default()
                        .insert(stratum.label.clone(), Guarded::Released(acc.summary()));
                }
                Datatype::Categorical => {
                    let mut counts = CategoricalSummary::default();
                    for category in stratum
                        .rows
                        .iter()
                        .filter_map(|row| row.get(name).and_then(|v| v.as_category()))
                    {
                        counts.push(category);
                    }
                    record
                        .categorical
                        .entry(name.to_string())
                        .or_default()
                        .insert(stratum.label.clone(), Guarded::Released(counts));
                }
                Datatype::Datetime => {}
            }
        }
    }

    Ok(record)
}

/// Round one: count, mean and local sum of squared deviations per cell.
///
/// # Errors
/// Returns `UserInput` for unusable descriptors, or any privacy guard error.
pub fn compute_local_statistics<D: DifferentialPrivacy>(
    site: &SiteId,
    partition: &SitePartition,
    descriptors: &[VariableDescriptor],
    stratification: &StratificationSpec,
    guard: &PrivacyGuard<D>,
) -> Result<LocalStatisticsRecord> {
    let summary = summarize_partition(site, partition, descriptors, stratification)?;
    guard.protect(&summary)
}

/// Round two: Σ(x − global mean)² per numeric cell.
///
/// Suppression is decided on the true local count, exactly as in round one.
/// A cell the site can release but for which no global mean arrived is marked
/// `MissingAggregate`; the rest of the record is still computed.
///
/// # Errors
/// Returns `UserInput` for unusable descriptors, or any privacy guard error.
pub fn compute_local_adjusted_deviation<D: DifferentialPrivacy>(
    site: &SiteId,
    partition: &SitePartition,
    descriptors: &[VariableDescriptor],
    stratification: &StratificationSpec,
    global_means: &GlobalMeans,
    guard: &PrivacyGuard<D>,
) -> Result<AdjustedDeviationRecord> {
    let measured = measured_variables(partition, descriptors)?;
    let strata = stratification.strata(partition);
    let min_sample_size = guard.config().min_sample_size;

    let mut record = AdjustedDeviationRecord {
        site: site.clone(),
        deviations: Default::default(),
    };

    for descriptor in measured.into_iter().filter(|d| d.datatype == Datatype::Numeric) {
        let name = descriptor.name.as_str();
        let cells = record.deviations.entry(name.to_string()).or_default();

        for stratum in &strata {
            let values: Vec<f64> = numbers(&stratum.rows, name).collect();
            let count = values.len() as u64;

            let cell = match global_means.get(name, &stratum.label) {
                Some(mean) => {
                    let sum_sq_dev: f64 = values.iter().map(|x| (x - mean) * (x - mean)).sum();
                    guard.release_deviation(count, sum_sq_dev)?
                }
                None if count < min_sample_size => DeviationCell::Suppressed,
                None => {
                    tracing::warn!(
                        "{}",
                        FedScoreError::MissingAggregate {
                            variable: name.to_string(),
                            stratum: stratum.label.clone(),
                        }
                    );
                    DeviationCell::MissingAggregate
                }
            };
            cells.insert(stratum.label.clone(), cell);
        }
    }

    Ok(record)
}
