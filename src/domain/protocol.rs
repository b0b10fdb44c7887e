//! Typed messages of the two-round protocol.
//!
//! Round one asks every site for local statistics. Round two hands back the
//! global means and asks for the aggregate-adjusted deviation.

use serde::{Deserialize, Serialize};

use super::{AdjustedDeviationRecord, GlobalMeans, LocalStatisticsRecord, TaskInput};

/// Identifier of a participating organisation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Protocol round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Round {
    GeneralStatistics,
    AdjustedDeviation,
}

impl std::fmt::Display for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GeneralStatistics => write!(f, "general statistics"),
            Self::AdjustedDeviation => write!(f, "aggregate-adjusted deviation"),
        }
    }
}

/// Request sent to every site of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "kwargs", rename_all = "snake_case")]
pub enum SiteRequest {
    GeneralStatistics {
        task: TaskInput,
    },
    AdjustedDeviation {
        task: TaskInput,
        global_means: GlobalMeans,
    },
}

impl SiteRequest {
    #[must_use]
    pub fn round(&self) -> Round {
        match self {
            Self::GeneralStatistics { .. } => Round::GeneralStatistics,
            Self::AdjustedDeviation { .. } => Round::AdjustedDeviation,
        }
    }

    #[must_use]
    pub fn task(&self) -> &TaskInput {
        match self {
            Self::GeneralStatistics { task } | Self::AdjustedDeviation { task, .. } => task,
        }
    }
}

/// Answer of one site to a round request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "round", content = "record", rename_all = "snake_case")]
pub enum SiteResponse {
    GeneralStatistics(LocalStatisticsRecord),
    AdjustedDeviation(AdjustedDeviationRecord),
}

impl SiteResponse {
    #[must_use]
    pub fn round(&self) -> Round {
        match self {
            Self::GeneralStatistics(_) => Round::GeneralStatistics,
            Self::AdjustedDeviation(_) => Round::AdjustedDeviation,
        }
    }

    #[must_use]
    pub fn site(&self) -> &SiteId {
        match self {
            Self::GeneralStatistics(record) => &record.site,
            Self::AdjustedDeviation(record) => &record.site,
        }
    }
}

/// What a dispatcher hands back for one site: a response or the error it reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteResult {
    pub site: SiteId,
    pub outcome: std::result::Result<SiteResponse, String>,
}
