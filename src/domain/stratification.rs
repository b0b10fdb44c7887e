//! Stratification rules and the strata they carve out of a partition.
//!
//! Every partition has the implicit `all` stratum. Each stratifier adds one
//! more stratum holding the rows its rule accepts. Strata are not crossed.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::variable::parse_date;
use super::{CellValue, Datatype, Row, SitePartition, VariableDescriptor};
use crate::{FedScoreError, Result};

/// Label of the stratum that holds every row.
pub const ALL_STRATUM: &str = "all";

/// Name of a stratum as it appears in records and output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StratumLabel(String);

impl StratumLabel {
    #[must_use]
    pub fn all() -> Self {
        Self(ALL_STRATUM.to_string())
    }

    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        self.0 == ALL_STRATUM
    }
}

impl std::fmt::Display for StratumLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StratumLabel {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Validated rule selecting the rows of one stratum. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "datatype", rename_all = "snake_case")]
pub enum StratificationRule {
    Numeric {
        start: Option<f64>,
        end: Option<f64>,
    },
    Categorical {
        values: Vec<String>,
    },
    Datetime {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

impl StratificationRule {
    #[must_use]
    pub fn datatype(&self) -> Datatype {
        match self {
            Self::Numeric { .. } => Datatype::Numeric,
            Self::Categorical { .. } => Datatype::Categorical,
            Self::Datetime { .. } => Datatype::Datetime,
        }
    }

    /// Whether a value falls inside the stratum. Unparseable values never do.
    #[must_use]
    pub fn matches(&self, value: &CellValue) -> bool {
        match self {
            Self::Numeric { start, end } => value
                .as_number()
                .is_some_and(|x| start.map_or(true, |s| x >= s) && end.map_or(true, |e| x <= e)),
            Self::Categorical { values } => value
                .as_category()
                .is_some_and(|c| values.iter().any(|v| *v == c)),
            Self::Datetime { start, end } => value
                .as_date()
                .is_some_and(|d| start.map_or(true, |s| d >= s) && end.map_or(true, |e| d <= e)),
        }
    }

    /// Label of the stratum this rule produces for `variable`.
    #[must_use]
    pub fn label(&self, variable: &str) -> StratumLabel {
        fn bounds<T: std::fmt::Display>(
            variable: &str,
            start: Option<&T>,
            end: Option<&T>,
        ) -> String {
            match (start, end) {
                (Some(s), Some(e)) => format!("{s} <= {variable} <= {e}"),
                (Some(s), None) => format!("{variable} >= {s}"),
                (None, Some(e)) => format!("{variable} <= {e}"),
                (None, None) => variable.to_string(),
            }
        }

        let label = match self {
            Self::Numeric { start, end } => bounds(variable, start.as_ref(), end.as_ref()),
            Self::Datetime { start, end } => bounds(variable, start.as_ref(), end.as_ref()),
            Self::Categorical { values } => format!("{variable} in [{}]", values.join(", ")),
        };
        StratumLabel(label)
    }
}

/// Stratifier entry exactly as written in task input.
///
/// Example: `{"Age": {"end": 39, "datatype": "int"}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StratifierInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<serde_json::Value>>,
    pub datatype: String,
}

impl StratifierInput {
    fn into_rule(self, variable: &str) -> Result<StratificationRule> {
        let datatype = Datatype::from_input_name(&self.datatype).ok_or_else(|| {
            FedScoreError::UserInput(format!(
                "stratifier '{variable}' has unknown datatype '{}'",
                self.datatype
            ))
        })?;

        match datatype {
            Datatype::Numeric => {
                let start = self
                    .start
                    .as_ref()
                    .map(|v| json_number(variable, "start", v))
                    .transpose()?;
                let end = self
                    .end
                    .as_ref()
                    .map(|v| json_number(variable, "end", v))
                    .transpose()?;
                check_bounds(variable, start, end)?;
                Ok(StratificationRule::Numeric { start, end })
            }
            Datatype::Datetime => {
                let start = self
                    .start
                    .as_ref()
                    .map(|v| json_date(variable, "start", v))
                    .transpose()?;
                let end = self
                    .end
                    .as_ref()
                    .map(|v| json_date(variable, "end", v))
                    .transpose()?;
                check_bounds(variable, start, end)?;
                Ok(StratificationRule::Datetime { start, end })
            }
            Datatype::Categorical => {
                let values: Vec<String> = self
                    .values
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|v| match v {
                        serde_json::Value::String(s) => CellValue::from(s.as_str()).as_category(),
                        serde_json::Value::Number(n) => {
                            n.as_f64().and_then(|x| CellValue::Number(x).as_category())
                        }
                        _ => None,
                    })
                    .collect();
                if values.is_empty() {
                    return Err(FedScoreError::UserInput(format!(
                        "categorical stratifier '{variable}' needs a non-empty 'values' list"
                    )));
                }
                Ok(StratificationRule::Categorical { values })
            }
        }
    }
}

fn json_number(variable: &str, field: &str, value: &serde_json::Value) -> Result<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|x| x.is_finite()).ok_or_else(|| {
        FedScoreError::UserInput(format!(
            "stratifier '{variable}' has a non-numeric '{field}' bound: {value}"
        ))
    })
}

fn json_date(variable: &str, field: &str, value: &serde_json::Value) -> Result<NaiveDate> {
    value.as_str().and_then(parse_date).ok_or_else(|| {
        FedScoreError::UserInput(format!(
            "stratifier '{variable}' has an unparseable '{field}' date: {value}"
        ))
    })
}

fn check_bounds<T: PartialOrd + std::fmt::Display>(
    variable: &str,
    start: Option<T>,
    end: Option<T>,
) -> Result<()> {
    match (start, end) {
        (None, None) => Err(FedScoreError::UserInput(format!(
            "stratifier '{variable}' needs a 'start' or 'end' bound"
        ))),
        (Some(s), Some(e)) if s > e => Err(FedScoreError::UserInput(format!(
            "stratifier '{variable}' has start {s} after end {e}"
        ))),
        _ => Ok(()),
    }
}

/// One stratum of a partition: its label and member rows.
#[derive(Debug)]
pub struct Stratum<'a> {
    pub label: StratumLabel,
    pub rows: Vec<&'a Row>,
}

/// Validated set of stratifiers, keyed by variable name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StratificationSpec {
    rules: BTreeMap<String, StratificationRule>,
}

impl StratificationSpec {
    /// Validate raw stratifier input.
    ///
    /// # Errors
    /// Returns `UserInput` for unknown datatypes, missing or malformed bounds,
    /// and empty categorical value lists.
    pub fn from_input(raw: BTreeMap<String, StratifierInput>) -> Result<Self> {
        let mut rules = BTreeMap::new();
        for (variable, input) in raw {
            if variable.trim().is_empty() {
                return Err(FedScoreError::UserInput(
                    "stratifier names must not be empty".to_string(),
                ));
            }
            let rule = input.into_rule(&variable)?;
            rules.insert(variable, rule);
        }
        Ok(Self { rules })
    }

    #[must_use]
    pub fn with_rule(mut self, variable: impl Into<String>, rule: StratificationRule) -> Self {
        self.rules.insert(variable.into(), rule);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StratificationRule)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Descriptors for the stratifier variables.
    #[must_use]
    pub fn descriptors(&self) -> Vec<VariableDescriptor> {
        self.rules
            .iter()
            .map(|(name, rule)| VariableDescriptor::stratifier(name.clone(), rule.datatype()))
            .collect()
    }

    /// Split a partition into strata.
    ///
    /// The `all` stratum comes first and always exists. A stratifier whose column
    /// the site does not hold produces no stratum at all, so it shows up as absent
    /// rather than empty.
    #[must_use]
    pub fn strata<'a>(&self, partition: &'a SitePartition) -> Vec<Stratum<'a>> {
        let mut strata = vec![Stratum {
            label: StratumLabel::all(),
            rows: partition.rows().iter().collect(),
        }];

        for (variable, rule) in &self.rules {
            if !partition.has_column(variable) {
                tracing::debug!(
                    "Stratifier '{variable}' not present at this site; skipping stratum"
                );
                continue;
            }
            let rows = partition
                .rows()
                .iter()
                .filter(|row| row.get(variable.as_str()).is_some_and(|v| rule.matches(v)))
                .collect();
            strata.push(Stratum {
                label: rule.label(variable),
                rows,
            });
        }

        strata
    }
}
