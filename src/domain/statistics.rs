//! Statistics records exchanged between sites and the coordinator.
//!
//! Local records leave a site only after the privacy guard has run over them:
//! a suppressed cell carries no count and no value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{SiteId, StratumLabel};

/// Per-variable, per-stratum map used by every record type.
pub type VariableMap<T> = BTreeMap<String, BTreeMap<StratumLabel, T>>;

/// Single-pass mean/variance accumulator (Welford).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation.
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sum of squared deviations from the running mean.
    #[must_use]
    pub fn m2(&self) -> f64 {
        self.m2
    }

    #[must_use]
    pub fn summary(&self) -> NumericSummary {
        NumericSummary {
            count: self.count,
            mean: self.mean,
            sum_sq_dev: self.m2,
        }
    }
}

impl Extend<f64> for Welford {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for x in iter {
            self.push(x);
        }
    }
}

/// Count, mean and sum of squared deviations from the local mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub count: u64,
    pub mean: f64,
    pub sum_sq_dev: f64,
}

/// Category counts of one variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalSummary {
    pub count: u64,
    pub categories: BTreeMap<String, u64>,
}

impl CategoricalSummary {
    pub fn push(&mut self, category: String) {
        self.count += 1;
        *self.categories.entry(category).or_insert(0) += 1;
    }
}

/// A released statistic or the marker that replaced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Guarded<T> {
    Released(T),
    Suppressed,
}

impl<T> Guarded<T> {
    #[must_use]
    pub fn released(&self) -> Option<&T> {
        match self {
            Self::Released(value) => Some(value),
            Self::Suppressed => None,
        }
    }

    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed)
    }
}

/// Round-one output of one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalStatisticsRecord {
    pub site: SiteId,
    pub numeric: VariableMap<Guarded<NumericSummary>>,
    pub categorical: VariableMap<Guarded<CategoricalSummary>>,
}

impl LocalStatisticsRecord {
    #[must_use]
    pub fn new(site: SiteId) -> Self {
        Self {
            site,
            numeric: BTreeMap::new(),
            categorical: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn numeric_cell(
        &self,
        variable: &str,
        stratum: &StratumLabel,
    ) -> Option<&Guarded<NumericSummary>> {
        self.numeric.get(variable).and_then(|s| s.get(stratum))
    }
}

/// Round-two contribution of one site to one cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviationCell {
    /// Σ(x − global mean)² over the site's rows
    Released { sum_sq_dev: f64 },
    Suppressed,
    /// The coordinator sent no global mean for a cell the site holds
    MissingAggregate,
}

/// Round-two output of one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedDeviationRecord {
    pub site: SiteId,
    pub deviations: VariableMap<DeviationCell>,
}

/// Collaboration-wide statistics of one numeric cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericAggregate {
    pub count: Option<u64>,
    pub mean: Option<f64>,
    pub variance: Option<f64>,
    pub standard_deviation: Option<f64>,
    /// No site released this cell
    pub suppressed: bool,
    /// At least one site suppressed this cell
    pub incomplete: bool,
    /// Too few observations for a sample variance
    pub insufficient: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed_sites: Vec<SiteId>,
    /// Sites that do not hold this cell at all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub absent_sites: Vec<SiteId>,
}

/// Collaboration-wide category counts of one categorical cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalAggregate {
    pub count: Option<u64>,
    pub categories: BTreeMap<String, u64>,
    pub suppressed: bool,
    pub incomplete: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed_sites: Vec<SiteId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub absent_sites: Vec<SiteId>,
}

/// Result of aggregating one round across all sites.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalAggregateRecord {
    /// Sites whose records went into this aggregate, in input order
    pub sites: Vec<SiteId>,
    pub numeric: VariableMap<NumericAggregate>,
    pub categorical: VariableMap<CategoricalAggregate>,
}

impl GlobalAggregateRecord {
    #[must_use]
    pub fn numeric_cell(
        &self,
        variable: &str,
        stratum: &StratumLabel,
    ) -> Option<&NumericAggregate> {
        self.numeric.get(variable).and_then(|s| s.get(stratum))
    }

    #[must_use]
    pub fn categorical_cell(
        &self,
        variable: &str,
        stratum: &StratumLabel,
    ) -> Option<&CategoricalAggregate> {
        self.categorical.get(variable).and_then(|s| s.get(stratum))
    }

    /// Means to broadcast for round two. Cells without a mean are left out.
    #[must_use]
    pub fn global_means(&self) -> GlobalMeans {
        let mut means = GlobalMeans::default();
        for (variable, strata) in &self.numeric {
            for (stratum, cell) in strata {
                if let Some(mean) = cell.mean {
                    means.insert(variable.clone(), stratum.clone(), mean);
                }
            }
        }
        means
    }
}

/// Global mean per variable and stratum, sent to sites in round two.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalMeans(VariableMap<f64>);

impl GlobalMeans {
    pub fn insert(&mut self, variable: impl Into<String>, stratum: StratumLabel, mean: f64) {
        self.0.entry(variable.into()).or_default().insert(stratum, mean);
    }

    #[must_use]
    pub fn get(&self, variable: &str, stratum: &StratumLabel) -> Option<f64> {
        self.0.get(variable).and_then(|s| s.get(stratum)).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
