//! Coordinator aggregation of site records.
//!
//! Pure functions: same records in, same aggregate out. Cells are visited in
//! key order and sites in input order, so floating point sums are reproducible.

use std::collections::BTreeSet;

use crate::domain::{
    AdjustedDeviationRecord, CategoricalAggregate, DeviationCell, GlobalAggregateRecord, Guarded,
    LocalStatisticsRecord, NumericAggregate, StratumLabel, VariableMap,
};
use crate::{FedScoreError, Result};

fn cell_keys<'a, T: 'a>(
    maps: impl Iterator<Item = &'a VariableMap<T>>,
) -> BTreeSet<(String, StratumLabel)> {
    let mut keys = BTreeSet::new();
    for map in maps {
        for (variable, strata) in map {
            keys.extend(strata.keys().map(|s| (variable.clone(), s.clone())));
        }
    }
    keys
}

/// Unbiased variance from a pooled sum of squared deviations.
///
/// # Errors
/// Returns `InsufficientData` when `count` is 0 or 1.
pub fn sample_variance(
    sum_sq_dev: f64,
    count: u64,
    variable: &str,
    stratum: &StratumLabel,
) -> Result<f64> {
    if count <= 1 {
        return Err(FedScoreError::InsufficientData {
            variable: variable.to_string(),
            stratum: stratum.clone(),
            count,
        });
    }
    Ok(sum_sq_dev.max(0.0) / (count - 1) as f64)
}

fn aggregate_numeric_cell(
    records: &[LocalStatisticsRecord],
    variable: &str,
    stratum: &StratumLabel,
) -> NumericAggregate {
    let mut cell = NumericAggregate::default();
    let mut count = 0u64;
    let mut weighted_sum = 0.0_f64;
    let mut released = 0usize;

    for record in records {
        match record.numeric_cell(variable, stratum) {
            None => cell.absent_sites.push(record.site.clone()),
            Some(Guarded::Suppressed) => cell.suppressed_sites.push(record.site.clone()),
            Some(Guarded::Released(summary)) => {
                released += 1;
                count += summary.count;
                weighted_sum += summary.mean * summary.count as f64;
            }
        }
    }

    cell.incomplete = !cell.suppressed_sites.is_empty();
    if released == 0 {
        cell.suppressed = true;
        return cell;
    }

    cell.count = Some(count);
    if count == 0 {
        cell.insufficient = true;
    } else {
        cell.mean = Some(weighted_sum / count as f64);
    }
    cell
}

fn aggregate_categorical_cell(
    records: &[LocalStatisticsRecord],
    variable: &str,
    stratum: &StratumLabel,
) -> CategoricalAggregate {
    let mut cell = CategoricalAggregate::default();
    let mut count = 0u64;
    let mut released = 0usize;

    for record in records {
        match record.categorical.get(variable).and_then(|s| s.get(stratum)) {
            None => cell.absent_sites.push(record.site.clone()),
            Some(Guarded::Suppressed) => cell.suppressed_sites.push(record.site.clone()),
            Some(Guarded::Released(summary)) => {
                released += 1;
                count += summary.count;
                for (category, n) in &summary.categories {
                    *cell.categories.entry(category.clone()).or_insert(0) += n;
                }
            }
        }
    }

    cell.incomplete = !cell.suppressed_sites.is_empty();
    if released == 0 {
        cell.suppressed = true;
    } else {
        cell.count = Some(count);
    }
    cell
}

/// Round one: pooled count and count-weighted mean per cell.
///
/// Suppressed sites are left out of both and listed; a cell every holding site
/// suppressed stays in the output with `suppressed` set. Sites that do not hold
/// a cell at all are listed as absent and do not make it incomplete.
#[must_use]
pub fn aggregate_statistics(records: &[LocalStatisticsRecord]) -> GlobalAggregateRecord {
    let mut global = GlobalAggregateRecord {
        sites: records.iter().map(|r| r.site.clone()).collect(),
        ..Default::default()
    };

    for (variable, stratum) in cell_keys(records.iter().map(|r| &r.numeric)) {
        let cell = aggregate_numeric_cell(records, &variable, &stratum);
        global.numeric.entry(variable).or_default().insert(stratum, cell);
    }
    for (variable, stratum) in cell_keys(records.iter().map(|r| &r.categorical)) {
        let cell = aggregate_categorical_cell(records, &variable, &stratum);
        global.categorical.entry(variable).or_default().insert(stratum, cell);
    }

    tracing::debug!(
        "Aggregated general statistics of {} site(s): {} numeric and {} categorical variable(s)",
        records.len(),
        global.numeric.len(),
        global.categorical.len()
    );
    global
}

/// Round two: pooled sample variance and standard deviation per numeric cell.
///
/// Starts from the round-one aggregate and fills in `variance` and
/// `standard_deviation` where a mean exists. A cell with a global count of one
/// or less is flagged `insufficient`. A cell some site could not compute for
/// lack of a global mean gets an `error`; other cells are unaffected.
#[must_use]
pub fn aggregate_adjusted_deviation(
    records: &[AdjustedDeviationRecord],
    general: &GlobalAggregateRecord,
) -> GlobalAggregateRecord {
    let mut global = general.clone();

    for (variable, strata) in &mut global.numeric {
        for (stratum, cell) in strata.iter_mut() {
            cell.variance = None;
            cell.standard_deviation = None;
            cell.error = None;

            let (Some(count), Some(_)) = (cell.count, cell.mean) else {
                continue;
            };

            let mut sum_sq_dev = 0.0_f64;
            let mut missing_mean = false;
            for record in records {
                match record.deviations.get(variable).and_then(|s| s.get(stratum)) {
                    Some(DeviationCell::Released { sum_sq_dev: s }) => sum_sq_dev += *s,
                    Some(DeviationCell::MissingAggregate) => missing_mean = true,
                    Some(DeviationCell::Suppressed) | None => {}
                }
            }

            if missing_mean {
                cell.error = Some(
                    FedScoreError::MissingAggregate {
                        variable: variable.clone(),
                        stratum: stratum.clone(),
                    }
                    .to_string(),
                );
                continue;
            }

            match sample_variance(sum_sq_dev, count, variable, stratum) {
                Ok(variance) => {
                    cell.insufficient = false;
                    cell.variance = Some(variance);
                    cell.standard_deviation = Some(variance.sqrt());
                }
                Err(e) => {
                    tracing::debug!("{e}");
                    cell.insufficient = true;
                }
            }
        }
    }

    let stray = cell_keys(records.iter().map(|r| &r.deviations))
        .into_iter()
        .filter(|(v, s)| general.numeric_cell(v, s).is_none())
        .count();
    if stray > 0 {
        tracing::warn!("Ignored {stray} deviation cell(s) with no round-one aggregate");
    }

    global
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CategoricalSummary, NumericSummary, SiteId};

    fn numeric(site: &str, cells: &[(&str, Option<(u64, f64, f64)>)]) -> LocalStatisticsRecord {
        let mut record = LocalStatisticsRecord::new(SiteId::from(site));
        let strata = record.numeric.entry("anxiety".to_string()).or_default();
        for (label, cell) in cells {
            let guarded = match cell {
                Some((count, mean, sum_sq_dev)) => Guarded::Released(NumericSummary {
                    count: *count,
                    mean: *mean,
                    sum_sq_dev: *sum_sq_dev,
                }),
                None => Guarded::Suppressed,
            };
            strata.insert(StratumLabel::new(*label), guarded);
        }
        record
    }

    fn deviations(site: &str, cells: &[(&str, DeviationCell)]) -> AdjustedDeviationRecord {
        let mut record = AdjustedDeviationRecord {
            site: SiteId::from(site),
            deviations: VariableMap::new(),
        };
        let strata = record.deviations.entry("anxiety".to_string()).or_default();
        for (label, cell) in cells {
            strata.insert(StratumLabel::new(*label), *cell);
        }
        record
    }

    fn all() -> StratumLabel {
        StratumLabel::all()
    }

    #[test]
    fn test_weighted_mean() {
        let global = aggregate_statistics(&[
            numeric("a", &[("all", Some((20, 6.0, 0.0)))]),
            numeric("b", &[("all", Some((30, 8.0, 0.0)))]),
        ]);
        let cell = global.numeric_cell("anxiety", &all()).expect("Cell exists");
        assert_eq!(cell.count, Some(50));
        assert!((cell.mean.expect("Mean") - 7.2).abs() < 1e-12);
        assert!(!cell.incomplete);
        assert_eq!(global.sites, vec![SiteId::from("a"), SiteId::from("b")]);
    }

    #[test]
    fn test_suppressed_site_excluded_and_flagged() {
        let global = aggregate_statistics(&[
            numeric("a", &[("all", Some((20, 6.0, 0.0)))]),
            numeric("b", &[("all", None)]),
        ]);
        let cell = global.numeric_cell("anxiety", &all()).expect("Cell exists");
        assert_eq!(cell.count, Some(20));
        assert_eq!(cell.mean, Some(6.0));
        assert!(cell.incomplete);
        assert!(!cell.suppressed);
        assert_eq!(cell.suppressed_sites, vec![SiteId::from("b")]);
    }

    #[test]
    fn test_fully_suppressed_cell_kept() {
        let global =
            aggregate_statistics(&[numeric("a", &[("all", None)]), numeric("b", &[("all", None)])]);
        let cell = global.numeric_cell("anxiety", &all()).expect("Cell kept");
        assert!(cell.suppressed);
        assert_eq!(cell.count, None);
        assert_eq!(cell.mean, None);
    }

    #[test]
    fn test_absent_is_not_suppressed() {
        let global = aggregate_statistics(&[
            numeric("a", &[("all", Some((20, 6.0, 0.0))), ("Sex in [F]", Some((12, 5.0, 0.0)))]),
            numeric("b", &[("all", Some((15, 4.0, 0.0)))]),
        ]);
        let cell = global
            .numeric_cell("anxiety", &StratumLabel::new("Sex in [F]"))
            .expect("Cell exists");
        assert_eq!(cell.count, Some(12));
        assert!(!cell.incomplete);
        assert_eq!(cell.absent_sites, vec![SiteId::from("b")]);
        assert!(cell.suppressed_sites.is_empty());
    }

    #[test]
    fn test_zero_count_is_insufficient() {
        let global = aggregate_statistics(&[numeric("a", &[("all", Some((0, 0.0, 0.0)))])]);
        let cell = global.numeric_cell("anxiety", &all()).expect("Cell exists");
        assert_eq!(cell.count, Some(0));
        assert_eq!(cell.mean, None);
        assert!(cell.insufficient);
    }

    #[test]
    fn test_categorical_counts_summed() {
        let mut a = LocalStatisticsRecord::new(SiteId::from("a"));
        let mut b = LocalStatisticsRecord::new(SiteId::from("b"));
        let mut summary = CategoricalSummary::default();
        for band in ["normal", "normal", "abnormal"] {
            summary.push(band.to_string());
        }
        for record in [&mut a, &mut b] {
            record
                .categorical
                .entry("anxiety_severity".to_string())
                .or_default()
                .insert(all(), Guarded::Released(summary.clone()));
        }

        let global = aggregate_statistics(&[a, b]);
        let cell = global.categorical_cell("anxiety_severity", &all()).expect("Cell exists");
        assert_eq!(cell.count, Some(6));
        assert_eq!(cell.categories["normal"], 4);
        assert_eq!(cell.categories["abnormal"], 2);
    }

    #[test]
    fn test_pooled_variance() {
        // site a: 1, 2, 3; site b: 7, 9 → pooled mean 4.4
        let general = aggregate_statistics(&[
            numeric("a", &[("all", Some((3, 2.0, 2.0)))]),
            numeric("b", &[("all", Some((2, 8.0, 2.0)))]),
        ]);
        let mean = general.numeric_cell("anxiety", &all()).and_then(|c| c.mean).expect("Mean");
        let ssd = |xs: &[f64]| xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>();

        let final_record = aggregate_adjusted_deviation(
            &[
                deviations(
                    "a",
                    &[(
                        "all",
                        DeviationCell::Released {
                            sum_sq_dev: ssd(&[1.0, 2.0, 3.0]),
                        },
                    )],
                ),
                deviations(
                    "b",
                    &[(
                        "all",
                        DeviationCell::Released {
                            sum_sq_dev: ssd(&[7.0, 9.0]),
                        },
                    )],
                ),
            ],
            &general,
        );
        let cell = final_record.numeric_cell("anxiety", &all()).expect("Cell exists");
        // Σ(x − 4.4)² = 47.2 over 4 degrees of freedom
        assert!((cell.variance.expect("Variance") - 11.8).abs() < 1e-9);
        assert!((cell.standard_deviation.expect("Sd") - 11.8f64.sqrt()).abs() < 1e-9);
        assert_eq!(cell.count, Some(5));
    }

    #[test]
    fn test_single_observation_insufficient() {
        let general = aggregate_statistics(&[numeric("a", &[("all", Some((1, 3.0, 0.0)))])]);
        let out = aggregate_adjusted_deviation(
            &[deviations("a", &[("all", DeviationCell::Released { sum_sq_dev: 0.0 })])],
            &general,
        );
        let cell = out.numeric_cell("anxiety", &all()).expect("Cell exists");
        assert!(cell.insufficient);
        assert_eq!(cell.variance, None);
    }

    #[test]
    fn test_missing_mean_marks_only_that_cell() {
        let general = aggregate_statistics(&[numeric(
            "a",
            &[("all", Some((20, 3.0, 0.0))), ("Age <= 39", Some((10, 2.0, 0.0)))],
        )]);
        let out = aggregate_adjusted_deviation(
            &[deviations(
                "a",
                &[
                    ("all", DeviationCell::Released { sum_sq_dev: 38.0 }),
                    ("Age <= 39", DeviationCell::MissingAggregate),
                ],
            )],
            &general,
        );
        let young = out
            .numeric_cell("anxiety", &StratumLabel::new("Age <= 39"))
            .expect("Cell exists");
        assert!(young.error.is_some());
        assert_eq!(young.variance, None);
        assert_eq!(out.numeric_cell("anxiety", &all()).and_then(|c| c.variance), Some(2.0));
    }

    #[test]
    fn test_negative_noisy_sum_clamped() {
        let general = aggregate_statistics(&[numeric("a", &[("all", Some((20, 3.0, 0.0)))])]);
        let out = aggregate_adjusted_deviation(
            &[deviations("a", &[("all", DeviationCell::Released { sum_sq_dev: -4.0 })])],
            &general,
        );
        assert_eq!(out.numeric_cell("anxiety", &all()).and_then(|c| c.variance), Some(0.0));
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let records = [
            numeric("a", &[("all", Some((20, 6.1, 0.0))), ("Age <= 39", None)]),
            numeric("b", &[("all", Some((13, 7.3, 0.0))), ("Age <= 39", Some((11, 5.0, 0.0)))]),
        ];
        let first = aggregate_statistics(&records);
        assert_eq!(first, aggregate_statistics(&records));

        let devs = [
            deviations("a", &[("all", DeviationCell::Released { sum_sq_dev: 41.0 })]),
            deviations("b", &[("all", DeviationCell::Released { sum_sq_dev: 17.5 })]),
        ];
        let second = aggregate_adjusted_deviation(&devs, &first);
        assert_eq!(second, aggregate_adjusted_deviation(&devs, &first));
        assert_eq!(second, aggregate_adjusted_deviation(&devs, &second));
    }
}
