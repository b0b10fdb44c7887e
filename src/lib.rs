//! # fedscore
//!
//! Federated questionnaire scoring with privacy-preserving statistics.
//!
//! Sites score questionnaire items locally and release only suppressed,
//! noise-protected statistics. A coordinator combines them in two rounds:
//! counts and means first, then the aggregate-adjusted deviation that yields
//! the pooled variance without any site revealing its rows.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Protocol types (partitions, strata, statistics records, messages)
//! - `ports`: Trait definitions for collaborators (noise, scoring, dispatch)
//! - `adapters`: Concrete implementations (Laplace mechanism, HADS scorer, in-process dispatcher)
//! - `application`: Privacy guard, local statistics, aggregation, site node, orchestration
//! - `config`: Privacy configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use application::{FederatedScoringService, SiteNode};
pub use config::PrivacyConfig;
pub use domain::{GlobalAggregateRecord, SiteId, SitePartition, TaskInput};

use domain::{Round, StratumLabel};
use ports::{DispatchError, DpError};

/// Result type for fedscore operations
pub type Result<T> = std::result::Result<T, FedScoreError>;

/// Main error type for fedscore
#[derive(Debug, thiserror::Error)]
pub enum FedScoreError {
    /// Bad threshold, epsilon or sensitivity
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed scoring or stratification input
    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("No global mean for '{variable}' in stratum '{stratum}'")]
    MissingAggregate {
        variable: String,
        stratum: StratumLabel,
    },

    #[error("Insufficient data for '{variable}' in stratum '{stratum}': global count {count}")]
    InsufficientData {
        variable: String,
        stratum: StratumLabel,
        count: u64,
    },

    #[error(
        "Round '{round}' incomplete: {} site(s) missing, {} site(s) failed",
        missing.len(),
        failed.len()
    )]
    IncompleteRound {
        round: Round,
        missing: Vec<domain::SiteId>,
        failed: Vec<(domain::SiteId, String)>,
    },

    #[error("Privacy error: {0}")]
    Privacy(#[from] DpError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
