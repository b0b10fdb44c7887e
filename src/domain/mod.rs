//! Domain layer: Core types of the federated scoring protocol.
//!
//! This module contains plain Rust types with no I/O. Everything that crosses
//! the coordinator/site boundary is serializable; site partitions are not.

mod partition;
mod protocol;
mod statistics;
mod stratification;
mod task;
mod variable;

pub use partition::{Row, SitePartition};
pub use protocol::{Round, SiteId, SiteRequest, SiteResponse, SiteResult};
pub use statistics::{
    AdjustedDeviationRecord, CategoricalAggregate, CategoricalSummary, DeviationCell,
    GlobalAggregateRecord, GlobalMeans, Guarded, LocalStatisticsRecord, NumericAggregate,
    NumericSummary, VariableMap, Welford,
};
pub use stratification::{
    StratificationRule, StratificationSpec, StratifierInput, Stratum, StratumLabel, ALL_STRATUM,
};
pub use task::{ItemsToScore, TaskInput, TaskInputRaw};
pub use variable::{CellValue, Datatype, VariableDescriptor, VariableRole};
