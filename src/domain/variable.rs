//! Variable descriptors and raw cell values.
//!
//! A descriptor tells the statistics engine how to read a column; a cell value
//! is whatever the site's ingestion layer put into the partition.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// How a column is interpreted when statistics are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    /// Continuous or integer values
    Numeric,
    /// Discrete labels counted per category
    Categorical,
    /// Calendar dates or timestamps
    Datetime,
}

impl Datatype {
    /// Parse a datatype name as it appears in task input.
    ///
    /// Accepts the loose names analysts tend to write (`int`, `float`, `str`, ...).
    #[must_use]
    pub fn from_input_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" | "float" | "double" | "numeric" | "number" => Some(Self::Numeric),
            "str" | "string" | "category" | "categorical" | "text" => Some(Self::Categorical),
            "datetime" | "date" | "timestamp" => Some(Self::Datetime),
            _ => None,
        }
    }
}

impl std::fmt::Display for Datatype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric => write!(f, "numeric"),
            Self::Categorical => write!(f, "categorical"),
            Self::Datetime => write!(f, "datetime"),
        }
    }
}

/// Whether a variable is summarised or only used to split rows into strata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableRole {
    Measured,
    Stratifier,
}

/// Description of one variable taking part in a computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub name: String,
    pub datatype: Datatype,
    pub role: VariableRole,
}

impl VariableDescriptor {
    #[must_use]
    pub fn measured(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            role: VariableRole::Measured,
        }
    }

    #[must_use]
    pub fn stratifier(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            role: VariableRole::Stratifier,
        }
    }

    #[must_use]
    pub fn is_measured(&self) -> bool {
        self.role == VariableRole::Measured
    }
}

/// A single value held in a site partition.
///
/// Deserializes from plain JSON: `null`, numbers and strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Missing,
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Read the value as a finite number.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(x) if x.is_finite() => Some(*x),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
            _ => None,
        }
    }

    /// Read the value as a category label.
    #[must_use]
    pub fn as_category(&self) -> Option<String> {
        match self {
            Self::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Self::Number(x) if x.is_finite() => Some(x.to_string()),
            _ => None,
        }
    }

    /// Read the value as a calendar date.
    ///
    /// RFC 3339 timestamps are reduced to their date; plain `YYYY-MM-DD` is accepted too.
    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Text(s) => parse_date(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}
