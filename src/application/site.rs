//! Site node: answers round requests from one data partition.

use std::sync::Arc;

use crate::domain::{
    SiteId, SitePartition, SiteRequest, SiteResponse, TaskInput, VariableDescriptor,
};
use crate::ports::{DifferentialPrivacy, InstrumentScorer, SiteHandler};
use crate::Result;

use super::local_statistics::{compute_local_adjusted_deviation, compute_local_statistics};
use super::PrivacyGuard;

/// One data holder of the collaboration.
///
/// Raw rows never leave this struct; only guarded records do.
pub struct SiteNode<D, S>
where
    D: DifferentialPrivacy,
    S: InstrumentScorer,
{
    site: SiteId,
    partition: SitePartition,
    guard: PrivacyGuard<D>,
    scorer: Arc<S>,
}

impl<D, S> SiteNode<D, S>
where
    D: DifferentialPrivacy,
    S: InstrumentScorer,
{
    pub fn new(
        site: SiteId,
        partition: SitePartition,
        guard: PrivacyGuard<D>,
        scorer: Arc<S>,
    ) -> Self {
        Self {
            site,
            partition,
            guard,
            scorer,
        }
    }

    #[must_use]
    pub fn guard(&self) -> &PrivacyGuard<D> {
        &self.guard
    }

    fn descriptors(&self, task: &TaskInput) -> Result<Vec<VariableDescriptor>> {
        task.variable_descriptors(self.scorer.scored_variables(&task.items_to_score))
    }

    /// Drop every column the task does not need, then score.
    fn scored_partition(&self, task: &TaskInput) -> Result<SitePartition> {
        self.scorer.check_input_structure(&task.items_to_score)?;
        let masked = self.partition.retain_columns(&task.required_columns());
        self.scorer.score(&task.items_to_score, &masked)
    }
}

impl<D, S> SiteHandler for SiteNode<D, S>
where
    D: DifferentialPrivacy,
    S: InstrumentScorer,
{
    fn site(&self) -> &SiteId {
        &self.site
    }

    fn handle(&self, request: &SiteRequest) -> Result<SiteResponse> {
        let task = request.task();
        let descriptors = self.descriptors(task)?;
        let scored = self.scored_partition(task)?;

        tracing::debug!(
            "Site {} computing {} over {} row(s)",
            self.site,
            request.round(),
            scored.len()
        );

        let response = match request {
            SiteRequest::GeneralStatistics { .. } => {
                SiteResponse::GeneralStatistics(compute_local_statistics(
                    &self.site,
                    &scored,
                    &descriptors,
                    &task.stratification,
                    &self.guard,
                )?)
            }
            SiteRequest::AdjustedDeviation { global_means, .. } => {
                SiteResponse::AdjustedDeviation(compute_local_adjusted_deviation(
                    &self.site,
                    &scored,
                    &descriptors,
                    &task.stratification,
                    global_means,
                    &self.guard,
                )?)
            }
        };

        let dp = self.guard.mechanism();
        tracing::info!(
            "Site {} answered {}: {} release(s) so far, ε spent {:.2}",
            self.site,
            request.round(),
            dp.releases(),
            dp.total_epsilon_spent()
        );
        Ok(response)
    }
}
