//! Application layer: Use cases and services.
//!
//! Site side: the privacy guard, the local statistics engine and the site node
//! that ties them to a partition. Coordinator side: aggregation and the
//! federated scoring service driving both rounds.

mod aggregator;
mod local_statistics;
mod orchestrator;
mod privacy_guard;
mod site;

pub use aggregator::{aggregate_adjusted_deviation, aggregate_statistics, sample_variance};
pub use local_statistics::{
    compute_local_adjusted_deviation, compute_local_statistics, summarize_partition,
};
pub use orchestrator::{collect_round, FederatedScoringService};
pub use privacy_guard::{enforce_minimum_sample_size, PrivacyGuard};
pub use site::SiteNode;
